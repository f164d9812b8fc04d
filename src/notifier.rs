// SPDX-License-Identifier: MPL-2.0

/// Fire-and-forget user notifications.
pub trait Notifier {
    fn started(&self, name: &str);

    fn stopped(&self);

    fn error(&self, message: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn started(&self, name: &str) {
        tracing::info!(video = name, "wallpaper started");
    }

    fn stopped(&self) {
        tracing::info!("wallpaper stopped");
    }

    fn error(&self, message: &str) {
        tracing::error!(message, "wallpaper error");
    }
}
