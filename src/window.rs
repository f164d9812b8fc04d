// SPDX-License-Identifier: MPL-2.0

//! Desktop-level windows, one per display, each owning a video surface.

use std::{path::Path, rc::Rc};

use tracing::{debug, info};

use crate::{
    error::{StateError, WindowError},
    event::{EventSender, SurfaceEvent, SurfaceId, Ticket},
    media::{MediaEngine, PlayerConfig},
    session::GrantLease,
    surface::{ContentView, SurfaceOutcome, SurfaceState, VideoSurface},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// A connected display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayInfo {
    pub id: u32,
    pub name: String,
    /// Full frame in physical pixels.
    pub frame: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowLevel {
    /// One level below the desktop icons.
    BelowDesktopIcons,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    pub frame: Rect,
    pub level: WindowLevel,
    pub borderless: bool,
    /// Shown on every workspace.
    pub all_workspaces: bool,
    /// Hidden from window switchers and window lists.
    pub skip_switcher: bool,
    pub mouse_transparent: bool,
    pub activates: bool,
}

impl WindowConfig {
    /// A wallpaper window covering `display`.
    pub fn desktop(display: &DisplayInfo) -> Self {
        Self {
            frame: display.frame,
            level: WindowLevel::BelowDesktopIcons,
            borderless: true,
            all_workspaces: true,
            skip_switcher: true,
            mouse_transparent: true,
            activates: false,
        }
    }
}

/// A window created by the display server.
pub trait PlatformWindow {
    fn content(&mut self) -> &mut dyn ContentView;

    /// Destroy the window. Called once, after the surface has been closed.
    fn close(&mut self);
}

pub trait DisplayServer {
    fn displays(&self) -> Vec<DisplayInfo>;

    fn create_window(
        &mut self,
        display: &DisplayInfo,
        config: &WindowConfig,
    ) -> Result<Box<dyn PlatformWindow>, WindowError>;
}

/// A wallpaper window showing one video on one display.
pub struct DesktopWindow {
    display: String,
    window: Option<Box<dyn PlatformWindow>>,
    surface: VideoSurface,
}

impl DesktopWindow {
    /// Create the window for `screen` and start loading `path` into it.
    pub fn open(
        screen: &DisplayInfo,
        path: &Path,
        lease: GrantLease,
        server: &mut dyn DisplayServer,
        engine: Rc<dyn MediaEngine>,
        events: EventSender,
    ) -> Result<Self, WindowError> {
        let config = WindowConfig::desktop(screen);
        let mut window = server.create_window(screen, &config)?;

        let player = PlayerConfig::wallpaper(screen.frame.width, screen.frame.height);
        let mut surface = VideoSurface::new(engine, events, player);
        // A fresh surface cannot be closed yet.
        let _ = surface.open(path, lease, window.content());

        info!(display = screen.name, surface = %surface.id(), "desktop window opened");
        Ok(Self {
            display: screen.name.clone(),
            window: Some(window),
            surface,
        })
    }

    #[must_use]
    pub fn surface_id(&self) -> SurfaceId {
        self.surface.id()
    }

    #[must_use]
    pub fn surface_state(&self) -> &SurfaceState {
        self.surface.state()
    }

    pub fn handle(
        &mut self,
        ticket: Ticket,
        event: SurfaceEvent,
    ) -> Result<Option<SurfaceOutcome>, StateError> {
        let Some(window) = self.window.as_mut() else {
            return Err(StateError::Closed(self.surface.id()));
        };
        self.surface.handle(ticket, event, window.content())
    }

    /// Close the surface, then the window. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        let Some(mut window) = self.window.take() else {
            return false;
        };
        self.surface.close(window.content());
        window.close();
        debug!(display = self.display, "desktop window closed");
        true
    }
}

impl Drop for DesktopWindow {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::SessionId,
        testing::{FakeDisplays, FakeEngine, Harness, Log, scratch_video},
    };

    #[test]
    fn desktop_windows_sit_below_icons_and_ignore_input() {
        let display = FakeDisplays::display(0, 2560, 1440);
        let config = WindowConfig::desktop(&display);

        assert_eq!(config.level, WindowLevel::BelowDesktopIcons);
        assert_eq!(config.frame.width, 2560);
        assert!(config.borderless && config.all_workspaces && config.skip_switcher);
        assert!(config.mouse_transparent);
        assert!(!config.activates);
    }

    #[test]
    fn close_is_idempotent_and_closes_surface_first() {
        let harness = Harness::new();
        let log = Log::default();
        let mut displays = FakeDisplays::new(log.clone(), 1);
        let display = displays.displays().remove(0);
        let engine = Rc::new(FakeEngine::new(log.clone()));

        let mut window = DesktopWindow::open(
            &display,
            &scratch_video("window-close"),
            GrantLease::new(SessionId(1), harness.sender()),
            &mut displays,
            engine,
            harness.sender(),
        )
        .unwrap();
        assert_eq!(displays.open_windows(), 1);

        assert!(window.close());
        assert!(!window.close());
        assert_eq!(window.surface_state(), &SurfaceState::Closed);
        assert_eq!(displays.open_windows(), 0);
        assert_eq!(log.count("close_window"), 1);
    }

    #[test]
    fn dropping_a_window_closes_it() {
        let harness = Harness::new();
        let log = Log::default();
        let mut displays = FakeDisplays::new(log.clone(), 1);
        let display = displays.displays().remove(0);

        let window = DesktopWindow::open(
            &display,
            &scratch_video("window-drop"),
            GrantLease::new(SessionId(1), harness.sender()),
            &mut displays,
            Rc::new(FakeEngine::new(log.clone())),
            harness.sender(),
        )
        .unwrap();
        drop(window);

        assert_eq!(displays.open_windows(), 0);
    }

    #[test]
    fn unknown_display_is_an_error() {
        let harness = Harness::new();
        let log = Log::default();
        let mut displays = FakeDisplays::new(log.clone(), 1);
        let ghost = FakeDisplays::display(9, 800, 600);

        let result = DesktopWindow::open(
            &ghost,
            &scratch_video("window-ghost"),
            GrantLease::new(SessionId(1), harness.sender()),
            &mut displays,
            Rc::new(FakeEngine::new(log)),
            harness.sender(),
        );
        assert!(matches!(result, Err(WindowError::UnknownDisplay(9))));
    }
}
