// SPDX-License-Identifier: MPL-2.0-only

//! Persistence of the video library and the playback state.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use uuid::Uuid;

use crate::{VideoEntry, state::State};

const VIDEOS_FILE: &str = "videos.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed video list: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed state file: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("failed to serialize state: {0}")]
    RonWrite(#[from] ron::Error),
}

/// Key-value persistence consumed by the library.
pub trait LibraryStore {
    /// Load the persisted video list.
    fn load(&self) -> Result<Vec<VideoEntry>, StoreError>;

    /// Replace the persisted video list.
    fn save(&mut self, entries: &[VideoEntry]) -> Result<(), StoreError>;

    fn load_state(&self) -> Result<State, StoreError>;

    fn save_state(&mut self, state: &State) -> Result<(), StoreError>;

    fn load_selected(&self) -> Result<Option<Uuid>, StoreError> {
        Ok(self.load_state()?.selected)
    }

    fn save_selected(&mut self, selected: Option<Uuid>) -> Result<(), StoreError> {
        let mut state = self.load_state()?;
        state.selected = selected;
        self.save_state(&state)
    }

    /// Files whose modification means the library changed on disk.
    fn watched_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Stores the library as JSON and the state as RON inside one directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn videos_path(&self) -> PathBuf {
        self.dir.join(VIDEOS_FILE)
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(State::file_name())
    }

    /// Write through a temporary file so readers never observe a partial file.
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(why) if why.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl LibraryStore for JsonStore {
    fn load(&self) -> Result<Vec<VideoEntry>, StoreError> {
        match read_optional(&self.videos_path())? {
            Some(contents) => Ok(serde_json::from_str(&contents)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&mut self, entries: &[VideoEntry]) -> Result<(), StoreError> {
        let contents = serde_json::to_vec_pretty(entries)?;
        self.write_atomic(&self.videos_path(), &contents)
    }

    fn load_state(&self) -> Result<State, StoreError> {
        match read_optional(&self.state_path())? {
            Some(contents) => Ok(ron::from_str(&contents)?),
            None => Ok(State::default()),
        }
    }

    fn save_state(&mut self, state: &State) -> Result<(), StoreError> {
        let contents = ron::ser::to_string_pretty(state, ron::ser::PrettyConfig::default())?;
        self.write_atomic(&self.state_path(), contents.as_bytes())
    }

    fn watched_files(&self) -> Vec<PathBuf> {
        vec![self.videos_path(), self.state_path()]
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: Vec<VideoEntry>,
    state: State,
    saves: usize,
}

/// In-memory store; clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn with_entries(entries: Vec<VideoEntry>) -> Self {
        let store = Self::default();
        if let Ok(mut inner) = store.inner.lock() {
            inner.entries = entries;
        }
        store
    }

    /// Snapshot of the stored entries.
    #[must_use]
    pub fn entries(&self) -> Vec<VideoEntry> {
        self.inner
            .lock()
            .map(|inner| inner.entries.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.inner
            .lock()
            .map(|inner| inner.state.clone())
            .unwrap_or_default()
    }

    /// Number of times the entry list was written.
    #[must_use]
    pub fn saves(&self) -> usize {
        self.inner.lock().map(|inner| inner.saves).unwrap_or(0)
    }
}

impl LibraryStore for MemoryStore {
    fn load(&self) -> Result<Vec<VideoEntry>, StoreError> {
        Ok(self.entries())
    }

    fn save(&mut self, entries: &[VideoEntry]) -> Result<(), StoreError> {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries = entries.to_vec();
            inner.saves += 1;
        }
        Ok(())
    }

    fn load_state(&self) -> Result<State, StoreError> {
        Ok(self.state())
    }

    fn save_state(&mut self, state: &State) -> Result<(), StoreError> {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = state.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "deskvid-config-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn empty_store_loads_nothing() {
        let store = JsonStore::new(scratch_dir("empty"));
        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.load_selected().unwrap(), None);
    }

    #[test]
    fn json_store_persists_entries_and_selection() {
        let dir = scratch_dir("persist");
        let mut store = JsonStore::new(dir.clone());
        let entry = VideoEntry::new(PathBuf::from("/videos/forest.mp4")).is_active(true);

        store.save(std::slice::from_ref(&entry)).unwrap();
        store.save_selected(Some(entry.id)).unwrap();

        let reopened = JsonStore::new(dir.clone());
        assert_eq!(reopened.load().unwrap(), vec![entry.clone()]);
        assert_eq!(reopened.load_selected().unwrap(), Some(entry.id));
        assert!(!dir.join("videos.tmp").exists());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn saving_selection_keeps_playing_flag() {
        let mut store = MemoryStore::default();
        store.save_state(&State::default().playing(true)).unwrap();
        store.save_selected(Some(Uuid::nil())).unwrap();

        let state = store.state();
        assert!(state.playing);
        assert_eq!(state.selected, Some(Uuid::nil()));
    }

    #[test]
    fn memory_store_clones_share_contents() {
        let store = MemoryStore::default();
        let mut writer = store.clone();
        writer
            .save(&[VideoEntry::new(PathBuf::from("/a.mp4"))])
            .unwrap();
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.saves(), 1);
    }
}
