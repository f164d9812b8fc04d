// SPDX-License-Identifier: MPL-2.0

//! Notices library and state files rewritten by other processes.

use std::path::{Path, PathBuf};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::event::{Event, EventSender};

/// Post [`Event::LibraryChanged`] whenever one of `files` is written,
/// replaced or removed. Events stop when the returned watcher is dropped.
pub fn watch(files: Vec<PathBuf>, events: EventSender) -> Option<RecommendedWatcher> {
    let mut dirs: Vec<PathBuf> = files
        .iter()
        .filter_map(|file| file.parent().map(Path::to_path_buf))
        .collect();
    dirs.sort();
    dirs.dedup();
    if dirs.is_empty() {
        return None;
    }

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if touches(&event, &files) {
                    let _ = events.send(Event::LibraryChanged);
                }
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(why) => {
            tracing::warn!(%why, "library changes from other processes will not be noticed");
            return None;
        }
    };

    for dir in &dirs {
        // Files are replaced by rename, so watch their directory.
        if let Err(why) = watcher.watch(dir, RecursiveMode::NonRecursive) {
            tracing::warn!(dir = %dir.display(), %why, "failed to watch library directory");
            return None;
        }
        tracing::debug!(dir = %dir.display(), "watching library");
    }

    Some(watcher)
}

fn touches(event: &notify::Event, files: &[PathBuf]) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|path| files.contains(path))
}
