// SPDX-License-Identifier: MPL-2.0

//! The video library together with the background jobs that maintain it.
//!
//! Thumbnails and transcodes run on worker threads holding a live grant for
//! the duration of the job. Results come back as events, which the daemon's
//! main loop and the one-shot commands both feed to [`Catalog::handle_event`].

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
    thread,
};

use deskvid_config::{Config, VideoEntry};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    access::BookmarkResolver,
    error::LibraryError,
    event::{Event, EventSender},
    library::VideoLibrary,
    media::{Thumbnailer, Transcoder},
    notifier::Notifier,
};

pub struct CatalogDeps {
    pub resolver: BookmarkResolver,
    pub thumbnailer: Arc<dyn Thumbnailer>,
    pub transcoder: Arc<dyn Transcoder>,
    pub notifier: Rc<dyn Notifier>,
    pub events: EventSender,
    /// Where optimized copies of videos are kept.
    pub optimized_dir: PathBuf,
}

pub struct Catalog {
    library: VideoLibrary,
    deps: CatalogDeps,
    config: Config,
    pending_jobs: usize,
    /// Entries with a transcode in flight.
    optimizing: HashSet<Uuid>,
}

impl Catalog {
    pub fn new(library: VideoLibrary, deps: CatalogDeps, config: Config) -> Self {
        Self {
            library,
            deps,
            config,
            pending_jobs: 0,
            optimizing: HashSet::new(),
        }
    }

    #[must_use]
    pub fn library(&self) -> &VideoLibrary {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut VideoLibrary {
        &mut self.library
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn resolver(&self) -> &BookmarkResolver {
        &self.deps.resolver
    }

    /// Thumbnail and transcode jobs still running.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.pending_jobs
    }

    /// Import videos and start generating their thumbnails, and their
    /// optimized copies when `optimize_on_import` is set.
    pub fn add_videos(&mut self, paths: &[PathBuf]) -> Result<Vec<Uuid>, LibraryError> {
        let ids = self.library.import(paths, &self.deps.resolver)?;
        for &id in &ids {
            self.spawn_thumbnail(id);
            if self.config.optimize_on_import {
                if let Err(why) = self.optimize(id) {
                    warn!(%why, "cannot optimize imported video");
                }
            }
        }
        Ok(ids)
    }

    /// Re-encode a video in the background. The entry is swapped to the
    /// optimized copy when the job reports back.
    pub fn optimize(&mut self, id: Uuid) -> Result<(), LibraryError> {
        if self.optimizing.contains(&id) {
            return Err(LibraryError::OptimizeInProgress(id));
        }
        let entry = self
            .library
            .entry(id)
            .cloned()
            .ok_or(LibraryError::UnknownEntry(id))?;
        let grant = self.deps.resolver.resolve(&entry, &mut self.library)?;
        let temp = partial_path(&self.deps.optimized_dir, id);
        let transcoder = self.deps.transcoder.clone();
        let events = self.deps.events.clone();

        if let Err(why) = std::fs::create_dir_all(&self.deps.optimized_dir) {
            warn!(%why, "cannot create optimized video directory");
        }

        info!(video = entry.name, "optimizing video");
        let spawned = self.spawn_job("deskvid-transcode", move || {
            let result = transcoder.transcode(grant.path(), &temp).map(|()| temp);
            drop(grant);
            let _ = events.send(Event::Transcoded { entry: id, result });
        });
        if spawned {
            self.optimizing.insert(id);
        }
        Ok(())
    }

    /// Generate thumbnails for entries that have none.
    pub fn refresh_thumbnails(&mut self) {
        let missing: Vec<Uuid> = self
            .library
            .entries()
            .iter()
            .filter(|entry| entry.thumbnail_data.is_none())
            .map(|entry| entry.id)
            .collect();
        for id in missing {
            self.spawn_thumbnail(id);
        }
    }

    fn spawn_thumbnail(&mut self, id: Uuid) {
        let Some(entry) = self.library.entry(id).cloned() else {
            return;
        };
        let grant = match self.deps.resolver.resolve(&entry, &mut self.library) {
            Ok(grant) => grant,
            Err(why) => {
                warn!(video = entry.name, %why, "cannot access video for thumbnail");
                return;
            }
        };
        let thumbnailer = self.deps.thumbnailer.clone();
        let events = self.deps.events.clone();
        let width = self.config.thumbnail_width;

        self.spawn_job("deskvid-thumbnail", move || {
            let result = thumbnailer.thumbnail(grant.path(), width);
            drop(grant);
            let _ = events.send(Event::Thumbnail { entry: id, result });
        });
    }

    fn spawn_job(&mut self, name: &str, job: impl FnOnce() + Send + 'static) -> bool {
        match thread::Builder::new().name(name.to_owned()).spawn(job) {
            Ok(_) => {
                self.pending_jobs += 1;
                true
            }
            Err(why) => {
                error!(?why, job = name, "failed to spawn worker");
                false
            }
        }
    }

    /// Store a finished job's result. Other events are handed back.
    pub fn handle_event(&mut self, event: Event) -> Option<Event> {
        match event {
            Event::Thumbnail { entry, result } => {
                self.pending_jobs = self.pending_jobs.saturating_sub(1);
                let stored = result
                    .map_err(LibraryError::from)
                    .and_then(|png| self.library.set_thumbnail(entry, png));
                if let Err(why) = stored {
                    warn!(%entry, %why, "thumbnail not stored");
                }
            }

            Event::Transcoded { entry, result } => {
                self.pending_jobs = self.pending_jobs.saturating_sub(1);
                self.optimizing.remove(&entry);
                let swapped = match result {
                    Ok(temp) => self.library.apply_transcode(
                        entry,
                        &temp,
                        &self.deps.optimized_dir,
                        &self.deps.resolver,
                    ),
                    Err(why) => {
                        discard_partial(&self.deps.optimized_dir, entry);
                        Err(why.into())
                    }
                };
                match swapped {
                    Ok(path) => info!(%entry, path = %path.display(), "video optimized"),
                    Err(why) => {
                        let name = self
                            .library
                            .entry(entry)
                            .map_or_else(|| entry.to_string(), |entry| entry.name.clone());
                        self.deps
                            .notifier
                            .error(&format!("Optimizing {name} failed: {why}"));
                    }
                }
            }

            other => return Some(other),
        }
        None
    }

    pub fn rename(&mut self, id: Uuid, name: &str) -> Result<(), LibraryError> {
        self.library.rename(id, name)
    }

    pub fn remove(&mut self, id: Uuid) -> Result<VideoEntry, LibraryError> {
        self.library.remove(id)
    }
}

fn partial_path(dir: &Path, id: Uuid) -> PathBuf {
    dir.join(format!(".{id}.partial.mp4"))
}

fn discard_partial(dir: &Path, id: Uuid) {
    let partial = partial_path(dir, id);
    if partial.exists() {
        let _ = std::fs::remove_file(partial);
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use deskvid_config::MemoryStore;

    use super::*;
    use crate::testing::{
        FakeProvider, FakeThumbnailer, FakeTranscoder, Harness, RecordingNotifier, scratch_dir,
    };

    struct Fixture {
        harness: Harness,
        store: MemoryStore,
        notifier: Rc<RecordingNotifier>,
        catalog: Catalog,
        dir: PathBuf,
    }

    impl Fixture {
        fn new(transcoder: FakeTranscoder, config: Config) -> Self {
            let harness = Harness::new();
            let notifier = Rc::new(RecordingNotifier::default());
            let store = MemoryStore::default();
            let dir = scratch_dir("catalog");

            let library = VideoLibrary::load(Box::new(store.clone())).unwrap();
            let catalog = Catalog::new(
                library,
                CatalogDeps {
                    resolver: BookmarkResolver::new(Arc::new(FakeProvider::default())),
                    thumbnailer: Arc::new(FakeThumbnailer::default()),
                    transcoder: Arc::new(transcoder),
                    notifier: notifier.clone(),
                    events: harness.sender(),
                    optimized_dir: dir.join("optimized"),
                },
                config,
            );

            Self {
                harness,
                store,
                notifier,
                catalog,
                dir,
            }
        }

        fn video(&self, name: &str) -> PathBuf {
            let path = self.dir.join(name);
            fs::write(&path, b"video").unwrap();
            path
        }

        fn pump(&mut self) {
            for _ in 0..500 {
                for event in self.harness.wait(Duration::from_millis(5)) {
                    assert!(self.catalog.handle_event(event).is_none());
                }
                if self.catalog.pending_jobs() == 0 {
                    return;
                }
            }
            panic!("jobs did not finish");
        }

        fn optimized(&self, id: Uuid) -> PathBuf {
            self.dir.join("optimized").join(format!("{id}.mp4"))
        }
    }

    #[test]
    fn imported_videos_get_thumbnails() {
        let mut fx = Fixture::new(FakeTranscoder::default(), Config::default());
        let paths = [fx.video("a.mp4"), fx.video("b.mp4")];
        let ids = fx.catalog.add_videos(&paths).unwrap();
        fx.pump();

        assert_eq!(ids.len(), 2);
        assert!(
            fx.store
                .entries()
                .iter()
                .all(|entry| entry.thumbnail_data.as_deref() == Some(b"\x89PNG thumb".as_slice()))
        );
        // Nothing is optimized unless asked for.
        assert_eq!(fx.store.entries()[0].url, paths[0].canonicalize().unwrap());
    }

    #[test]
    fn optimize_on_import_swaps_in_the_copy() {
        let config = Config::default().optimize_on_import(true);
        let mut fx = Fixture::new(FakeTranscoder::default(), config);
        let video = fx.video("import.mov");
        let ids = fx.catalog.add_videos(&[video]).unwrap();
        fx.pump();

        let entry = &fx.store.entries()[0];
        assert_eq!(entry.url, fx.optimized(ids[0]));
        assert!(entry.thumbnail_data.is_some());
        assert!(fx.notifier.errors().is_empty());
    }

    #[test]
    fn optimize_swaps_in_the_optimized_copy() {
        let mut fx = Fixture::new(FakeTranscoder::default(), Config::default());
        let video = fx.video("big.mov");
        let ids = fx.catalog.add_videos(&[video]).unwrap();
        fx.pump();

        fx.catalog.optimize(ids[0]).unwrap();
        fx.pump();

        let entry = &fx.store.entries()[0];
        assert_eq!(entry.url, fx.optimized(ids[0]));
        assert!(entry.url.exists());
        assert!(fx.notifier.errors().is_empty());
    }

    #[test]
    fn failed_optimize_keeps_original() {
        let mut fx = Fixture::new(FakeTranscoder { fail: true }, Config::default());
        let video = fx.video("big.mov");
        let ids = fx.catalog.add_videos(&[video]).unwrap();
        fx.pump();
        let original = fx.store.entries()[0].url.clone();

        fx.catalog.optimize(ids[0]).unwrap();
        fx.pump();

        assert_eq!(fx.store.entries()[0].url, original);
        assert_eq!(fx.notifier.errors().len(), 1);
        assert!(!partial_path(&fx.dir.join("optimized"), ids[0]).exists());
    }

    #[test]
    fn overlapping_optimize_of_one_video_is_rejected() {
        let mut fx = Fixture::new(FakeTranscoder::default(), Config::default());
        let video = fx.video("twice.mov");
        let ids = fx.catalog.add_videos(&[video]).unwrap();
        fx.pump();

        fx.catalog.optimize(ids[0]).unwrap();
        assert!(matches!(
            fx.catalog.optimize(ids[0]),
            Err(LibraryError::OptimizeInProgress(id)) if id == ids[0]
        ));
        fx.pump();
        assert_eq!(fx.store.entries()[0].url, fx.optimized(ids[0]));

        // Finished jobs no longer block another run.
        fx.catalog.optimize(ids[0]).unwrap();
        fx.pump();
        assert!(fx.notifier.errors().is_empty());
    }

    #[test]
    fn unrelated_events_are_handed_back() {
        let mut fx = Fixture::new(FakeTranscoder::default(), Config::default());
        assert!(matches!(
            fx.catalog.handle_event(Event::LibraryChanged),
            Some(Event::LibraryChanged)
        ));
    }
}
