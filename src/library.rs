// SPDX-License-Identifier: MPL-2.0

//! The persisted list of imported videos and the current selection.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use deskvid_config::{LibraryStore, VideoEntry, state::State};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    access::{BookmarkResolver, EntryStore},
    animated::collect_videos,
    error::{IoError, LibraryError},
};

/// Shortest id prefix accepted by [`VideoLibrary::find`].
const MIN_PREFIX: usize = 4;

/// Video entries and playback state, written through to a [`LibraryStore`]
/// on every change. At most one entry is selected.
pub struct VideoLibrary {
    store: Box<dyn LibraryStore>,
    entries: Vec<VideoEntry>,
    state: State,
}

impl VideoLibrary {
    pub fn load(store: Box<dyn LibraryStore>) -> Result<Self, LibraryError> {
        let entries = store.load()?;
        let state = store.load_state()?;
        let mut library = Self {
            store,
            entries,
            state,
        };
        library.normalize();
        debug!(videos = library.entries.len(), "library loaded");
        Ok(library)
    }

    /// Re-read the store. Returns `true` if anything changed.
    pub fn reload(&mut self) -> Result<bool, LibraryError> {
        let entries = self.store.load()?;
        let state = self.store.load_state()?;
        if entries == self.entries && state == self.state {
            return Ok(false);
        }
        self.entries = entries;
        self.state = state;
        self.normalize();
        Ok(true)
    }

    /// Make the selected flag agree with the persisted selection.
    fn normalize(&mut self) {
        if let Some(selected) = self.state.selected {
            if !self.entries.iter().any(|entry| entry.id == selected) {
                warn!(%selected, "selected video no longer exists");
                self.state.selected = None;
            }
        }
        let selected = self.state.selected;
        for entry in &mut self.entries {
            entry.is_active = Some(entry.id) == selected;
        }
    }

    fn persist(&mut self) -> Result<(), LibraryError> {
        self.store.save(&self.entries)?;
        self.store.save_state(&self.state)?;
        Ok(())
    }

    #[must_use]
    pub fn entries(&self) -> &[VideoEntry] {
        &self.entries
    }

    #[must_use]
    pub fn entry(&self, id: Uuid) -> Option<&VideoEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    fn entry_mut(&mut self, id: Uuid) -> Result<&mut VideoEntry, LibraryError> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(LibraryError::UnknownEntry(id))
    }

    #[must_use]
    pub fn selected(&self) -> Option<&VideoEntry> {
        self.state.selected.and_then(|id| self.entry(id))
    }

    /// Whether the wallpaper should be playing.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state.playing
    }

    /// Look a video up by id, unique id prefix, or name.
    pub fn find(&self, query: &str) -> Result<&VideoEntry, LibraryError> {
        if let Ok(id) = Uuid::parse_str(query) {
            return self.entry(id).ok_or(LibraryError::UnknownEntry(id));
        }

        if let Some(entry) = self.entries.iter().find(|entry| entry.name == query) {
            return Ok(entry);
        }

        let lower = query.to_lowercase();
        let matches: Vec<&VideoEntry> = self
            .entries
            .iter()
            .filter(|entry| {
                (query.len() >= MIN_PREFIX && entry.id.to_string().starts_with(&lower))
                    || entry.name.to_lowercase() == lower
            })
            .collect();

        match matches[..] {
            [entry] => Ok(entry),
            [] => Err(LibraryError::NotFound(query.to_owned())),
            _ => Err(LibraryError::Ambiguous(query.to_owned())),
        }
    }

    /// Import video files and directories of videos, minting an access token
    /// for each. Files already in the library are skipped. The first import
    /// into a library without a selection becomes the selection.
    pub fn import(
        &mut self,
        paths: &[PathBuf],
        resolver: &BookmarkResolver,
    ) -> Result<Vec<Uuid>, LibraryError> {
        let mut imported = Vec::new();

        for path in collect_videos(paths) {
            let path = path.canonicalize().unwrap_or(path);
            if self.entries.iter().any(|entry| entry.url == path) {
                debug!(path = %path.display(), "already imported");
                continue;
            }

            let token = match resolver.mint(&path) {
                Ok(token) => token,
                Err(why) => {
                    warn!(path = %path.display(), %why, "cannot import video");
                    continue;
                }
            };

            let entry = VideoEntry::new(path).bookmark_data(token);
            info!(video = entry.name, id = %entry.id, "imported video");
            imported.push(entry.id);
            self.entries.push(entry);
        }

        if imported.is_empty() {
            return Err(LibraryError::NothingImported);
        }

        if self.state.selected.is_none() {
            self.state.selected = imported.first().copied();
            self.normalize();
        }
        self.persist()?;
        Ok(imported)
    }

    pub fn select(&mut self, id: Uuid) -> Result<(), LibraryError> {
        self.entry_mut(id)?;
        self.state.selected = Some(id);
        self.normalize();
        self.persist()
    }

    pub fn remove(&mut self, id: Uuid) -> Result<VideoEntry, LibraryError> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or(LibraryError::UnknownEntry(id))?;
        let entry = self.entries.remove(index);

        if self.state.selected == Some(id) {
            self.state.selected = None;
            self.state.playing = false;
        }
        self.persist()?;
        info!(video = entry.name, "removed video");
        Ok(entry)
    }

    pub fn rename(&mut self, id: Uuid, name: &str) -> Result<(), LibraryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LibraryError::EmptyName);
        }
        self.entry_mut(id)?.name = name.to_owned();
        self.persist()
    }

    pub fn set_thumbnail(&mut self, id: Uuid, png: Vec<u8>) -> Result<(), LibraryError> {
        self.entry_mut(id)?.thumbnail_data = Some(png);
        self.store.save(&self.entries)?;
        Ok(())
    }

    pub fn set_playing(&mut self, playing: bool) -> Result<(), LibraryError> {
        if self.state.playing != playing {
            self.state.playing = playing;
            self.store.save_state(&self.state)?;
        }
        Ok(())
    }

    /// Replace a video with its optimized copy at `temp`.
    ///
    /// The copy is moved into `dest_dir` and a token minted for it; only then
    /// are the entry's path and token swapped, together. On any failure the
    /// temporary file is removed and the entry is left as it was.
    pub fn apply_transcode(
        &mut self,
        id: Uuid,
        temp: &Path,
        dest_dir: &Path,
        resolver: &BookmarkResolver,
    ) -> Result<PathBuf, LibraryError> {
        let dest = dest_dir.join(format!("{id}.mp4"));

        let swapped = self
            .entry_mut(id)
            .map(drop)
            .and_then(|()| move_file(temp, &dest).map_err(LibraryError::from))
            .and_then(|()| {
                resolver.mint(&dest).map_err(|why| {
                    let _ = fs::remove_file(&dest);
                    LibraryError::from(why)
                })
            });

        let token = match swapped {
            Ok(token) => token,
            Err(why) => {
                if temp.exists() {
                    let _ = fs::remove_file(temp);
                }
                return Err(why);
            }
        };

        let entry = self.entry_mut(id)?;
        let previous = std::mem::replace(&mut entry.url, dest.clone());
        entry.bookmark_data = Some(token);
        self.persist()?;

        info!(from = %previous.display(), to = %dest.display(), "video replaced by optimized copy");
        Ok(dest)
    }
}

fn move_file(from: &Path, to: &Path) -> Result<(), IoError> {
    if !from.exists() {
        return Err(IoError::Missing(from.to_path_buf()));
    }
    let write_err = |source: io::Error| IoError::Write {
        path: to.to_path_buf(),
        source,
    };
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    if fs::rename(from, to).is_err() {
        // Across filesystems.
        fs::copy(from, to).map_err(write_err)?;
        let _ = fs::remove_file(from);
    }
    Ok(())
}

impl EntryStore for VideoLibrary {
    fn entry(&self, id: Uuid) -> Option<VideoEntry> {
        VideoLibrary::entry(self, id).cloned()
    }

    fn store_token(&mut self, id: Uuid, token: Vec<u8>) {
        let Ok(entry) = self.entry_mut(id) else {
            return;
        };
        entry.bookmark_data = Some(token);
        if let Err(why) = self.store.save(&self.entries) {
            warn!(%why, "failed to persist refreshed access token");
        }
    }
}
