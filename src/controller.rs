// SPDX-License-Identifier: MPL-2.0

//! The operations offered to front ends, tying the library to the session.
//!
//! Library-only operations (import, rename, remove, optimize) live on the
//! [`Catalog`], which one-shot commands use without a session. The
//! controller adds everything that changes what is on screen.

use deskvid_config::{SamplingMethod, VideoEntry};
use rand::seq::IndexedRandom;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    catalog::Catalog,
    error::LibraryError,
    event::Event,
    library::VideoLibrary,
    session::{SessionState, WallpaperSessionManager},
};

/// Snapshot observed by front ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedState {
    pub video_entries: Vec<VideoEntry>,
    pub selected_entry: Option<Uuid>,
    pub is_playing: bool,
}

impl PublishedState {
    pub fn new(library: &VideoLibrary, is_playing: bool) -> Self {
        Self {
            video_entries: library.entries().to_vec(),
            selected_entry: library.selected().map(|entry| entry.id),
            is_playing,
        }
    }
}

pub struct Controller {
    catalog: Catalog,
    session: WallpaperSessionManager,
}

impl Controller {
    pub fn new(catalog: Catalog, session: WallpaperSessionManager) -> Self {
        Self { catalog, session }
    }

    #[must_use]
    pub fn state(&self) -> PublishedState {
        PublishedState::new(
            self.catalog.library(),
            self.session.state() == SessionState::Playing,
        )
    }

    /// Choose the wallpaper video; a playing wallpaper switches to it.
    pub fn select(&mut self, id: Uuid) -> Result<(), LibraryError> {
        self.catalog.library_mut().select(id)?;
        // Windows are being rebuilt for new displays; rebuild with this video.
        if self.session.retarget_restart(id) {
            return Ok(());
        }
        if self.session.state() == SessionState::Playing || self.catalog.library().is_playing() {
            self.start()?;
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), LibraryError> {
        let library = self.catalog.library_mut();
        let entry = library
            .selected()
            .cloned()
            .ok_or(LibraryError::NoSelection)?;
        self.session.start(&entry, library)?;
        library.set_playing(true)
    }

    pub fn stop(&mut self) -> Result<(), LibraryError> {
        self.session.stop();
        self.catalog.library_mut().set_playing(false)
    }

    /// Generate thumbnails for entries that have none.
    pub fn refresh_thumbnails(&mut self) {
        self.catalog.refresh_thumbnails();
    }

    /// Move to the next video per the configured sampling method.
    pub fn advance(&mut self) -> Result<(), LibraryError> {
        let library = self.catalog.library();
        let current = library.selected().map(|entry| entry.id);
        let next = match self.catalog.config().sampling_method {
            SamplingMethod::Alphanumeric => {
                let mut entries: Vec<&VideoEntry> = library.entries().iter().collect();
                entries.sort_by_cached_key(|entry| entry.name.to_lowercase());
                let position = current
                    .and_then(|id| entries.iter().position(|entry| entry.id == id))
                    .map_or(0, |index| index + 1);
                entries
                    .get(position)
                    .or_else(|| entries.first())
                    .map(|entry| entry.id)
            }
            SamplingMethod::Random => {
                let others: Vec<Uuid> = library
                    .entries()
                    .iter()
                    .map(|entry| entry.id)
                    .filter(|id| Some(*id) != current)
                    .collect();
                others.choose(&mut rand::rng()).copied().or(current)
            }
        };

        let next = next.ok_or(LibraryError::NoSelection)?;
        if Some(next) == current {
            return Ok(());
        }
        debug!(%next, "advancing wallpaper");
        self.select(next)
    }

    pub fn display_topology_changed(&mut self) {
        self.session.restart_on_display_change();
    }

    /// Pick up changes written by another process and follow the persisted
    /// playing flag and selection.
    pub fn reload(&mut self) -> Result<(), LibraryError> {
        if self.catalog.library_mut().reload()? {
            debug!("library changed on disk");
        }
        self.reconcile()
    }

    /// Bring the session in line with the library's state. A removed or
    /// deselected video stops playing here.
    pub fn reconcile(&mut self) -> Result<(), LibraryError> {
        let library = self.catalog.library();
        let selected = library.selected().map(|entry| entry.id);
        let active = self.session.active_entry();

        match (library.is_playing(), selected) {
            (true, Some(id)) if self.session.restart_pending() => {
                self.session.retarget_restart(id);
                Ok(())
            }
            (true, Some(id)) if active != Some(id) => self.start(),
            (true, None) | (false, _) if active.is_some() || self.session.restart_pending() => {
                self.stop()
            }
            _ => Ok(()),
        }
    }

    pub fn handle_event(&mut self, event: Event) {
        let Some(event) = self
            .session
            .handle_event(event, self.catalog.library_mut())
        else {
            return;
        };
        let Some(event) = self.catalog.handle_event(event) else {
            return;
        };

        match event {
            Event::LibraryChanged => {
                if let Err(why) = self.reload() {
                    warn!(%why, "failed to apply library change");
                }
            }
            other => debug!(?other, "unhandled event"),
        }
    }

    /// Stop playback without changing the persisted playing flag.
    pub fn shutdown(&mut self) {
        self.session.stop();
    }
}
