// SPDX-License-Identifier: MPL-2.0

//! One-shot commands that edit the persisted library.
//!
//! A running daemon follows these edits through its library watcher.

use std::{
    io::{self, Write},
    path::PathBuf,
    rc::Rc,
};

use calloop::{EventLoop, channel};
use deskvid_config::Config;
use eyre::{WrapErr, eyre};
use tracing::debug;
use uuid::Uuid;

use crate::{
    access::BookmarkResolver,
    catalog::{Catalog, CatalogDeps},
    controller::PublishedState,
    error::LibraryError,
    event::Event,
    library::VideoLibrary,
    media::Backends,
    notifier::LogNotifier,
};

/// A catalog whose background jobs report to a private loop, so commands can
/// wait for them before exiting.
pub struct OfflineCatalog {
    event_loop: EventLoop<'static, Vec<Event>>,
    catalog: Catalog,
}

impl OfflineCatalog {
    pub fn new(
        library: VideoLibrary,
        resolver: BookmarkResolver,
        backends: &Backends,
        config: Config,
        optimized_dir: PathBuf,
    ) -> eyre::Result<Self> {
        let event_loop = EventLoop::try_new()?;
        let (events, receiver) = channel::channel();
        event_loop
            .handle()
            .insert_source(receiver, |event, _, received: &mut Vec<Event>| {
                if let channel::Event::Msg(event) = event {
                    received.push(event);
                }
            })
            .map_err(|why| eyre!("failed to insert job channel: {}", why.error))?;

        let catalog = Catalog::new(
            library,
            CatalogDeps {
                resolver,
                thumbnailer: backends.thumbnailer.clone(),
                transcoder: backends.transcoder.clone(),
                notifier: Rc::new(LogNotifier),
                events,
                optimized_dir,
            },
            config,
        );

        Ok(Self {
            event_loop,
            catalog,
        })
    }

    /// Block until every job started so far has reported back.
    fn finish_jobs(&mut self) -> eyre::Result<()> {
        while self.catalog.pending_jobs() > 0 {
            let mut received = Vec::new();
            self.event_loop
                .dispatch(None, &mut received)
                .wrap_err("waiting for background jobs")?;
            for event in received {
                if let Some(event) = self.catalog.handle_event(event) {
                    debug!(?event, "ignored event");
                }
            }
        }
        Ok(())
    }
}

/// Import videos and wait for their thumbnails, and their optimized copies
/// when `optimize_on_import` is set.
pub fn add(offline: &mut OfflineCatalog, paths: &[PathBuf], out: &mut impl Write) -> eyre::Result<()> {
    let ids = offline.catalog.add_videos(paths)?;
    offline.finish_jobs()?;

    let library = offline.catalog.library();
    for id in ids {
        if let Some(entry) = library.entry(id) {
            writeln!(out, "added {} {}", short_id(id), entry.name)?;
        }
    }
    Ok(())
}

pub fn list(state: &PublishedState, out: &mut impl Write) -> io::Result<()> {
    if state.video_entries.is_empty() {
        return writeln!(out, "no videos imported");
    }

    for entry in &state.video_entries {
        let marker = match (state.selected_entry == Some(entry.id), state.is_playing) {
            (true, true) => '>',
            (true, false) => '*',
            (false, _) => ' ',
        };
        writeln!(
            out,
            "{marker} {}  {}  {}",
            short_id(entry.id),
            entry.name,
            entry.url.display()
        )?;
    }
    Ok(())
}

pub fn select(library: &mut VideoLibrary, query: &str) -> eyre::Result<()> {
    let id = library.find(query)?.id;
    library.select(id)?;
    Ok(())
}

pub fn remove(library: &mut VideoLibrary, query: &str) -> eyre::Result<()> {
    let id = library.find(query)?.id;
    let entry = library.remove(id)?;
    println!("removed {}", entry.name);
    Ok(())
}

pub fn rename(library: &mut VideoLibrary, query: &str, name: &str) -> eyre::Result<()> {
    let id = library.find(query)?.id;
    library.rename(id, name)?;
    Ok(())
}

/// Persist the playing flag. Starting needs a selected video.
pub fn set_playing(library: &mut VideoLibrary, playing: bool) -> eyre::Result<()> {
    if playing && library.selected().is_none() {
        return Err(LibraryError::NoSelection.into());
    }
    library.set_playing(playing)?;
    Ok(())
}

/// Re-encode a video and wait until the library entry uses the copy.
pub fn optimize(offline: &mut OfflineCatalog, query: &str, out: &mut impl Write) -> eyre::Result<()> {
    let entry = offline.catalog.library().find(query)?.clone();
    offline.catalog.optimize(entry.id)?;
    writeln!(out, "optimizing {}", entry.name)?;
    offline.finish_jobs()?;

    match offline.catalog.library().entry(entry.id) {
        Some(optimized) if optimized.url != entry.url => {
            writeln!(out, "optimized copy stored at {}", optimized.url.display())?;
            Ok(())
        }
        _ => Err(eyre!("optimizing {} failed", entry.name)),
    }
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_owned()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use deskvid_config::{LibraryStore, MemoryStore, VideoEntry};

    use super::*;
    use crate::{
        media::Backends,
        testing::{FakeProvider, FakeThumbnailer, FakeTranscoder, scratch_dir, scratch_video},
    };

    fn library(store: &MemoryStore) -> VideoLibrary {
        VideoLibrary::load(Box::new(store.clone())).unwrap()
    }

    fn offline(store: &MemoryStore, transcoder: FakeTranscoder, config: Config) -> OfflineCatalog {
        let mut backends = Backends::unsupported("tests");
        backends.thumbnailer = Arc::new(FakeThumbnailer::default());
        backends.transcoder = Arc::new(transcoder);

        OfflineCatalog::new(
            library(store),
            BookmarkResolver::new(Arc::new(FakeProvider::default())),
            &backends,
            config,
            scratch_dir("cli-optimized"),
        )
        .unwrap()
    }

    fn listing(library: &VideoLibrary) -> String {
        let mut out = Vec::new();
        list(&PublishedState::new(library, library.is_playing()), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn list_marks_the_selected_video() {
        let a = VideoEntry::new("/v/a.mp4".into());
        let b = VideoEntry::new("/v/b.mp4".into());
        let store = MemoryStore::with_entries(vec![a.clone(), b]);
        let mut library = library(&store);
        library.select(a.id).unwrap();

        let out = listing(&library);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(&format!("* {}", short_id(a.id))));
        assert!(lines[1].starts_with("  "));

        library.set_playing(true).unwrap();
        assert!(listing(&library).starts_with('>'));
    }

    #[test]
    fn empty_library_says_so() {
        let store = MemoryStore::default();
        assert_eq!(listing(&library(&store)), "no videos imported\n");
    }

    #[test]
    fn start_requires_a_selection() {
        let store = MemoryStore::default();
        let mut library = library(&store);
        assert!(set_playing(&mut library, true).is_err());
        assert!(!store.state().playing);
    }

    #[test]
    fn added_videos_get_thumbnails() {
        let store = MemoryStore::default();
        let mut offline = offline(&store, FakeTranscoder::default(), Config::default());
        let video = scratch_video("cli-add");

        let mut out = Vec::new();
        add(&mut offline, &[video.clone()], &mut out).unwrap();

        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].thumbnail_data.is_some());
        assert_eq!(entries[0].url, video.canonicalize().unwrap());
        assert!(String::from_utf8(out).unwrap().starts_with("added "));
    }

    #[test]
    fn add_optimizes_when_configured() {
        let store = MemoryStore::default();
        let config = Config::default().optimize_on_import(true);
        let mut offline = offline(&store, FakeTranscoder::default(), config);
        let video = scratch_video("cli-add-optimize");

        add(&mut offline, &[video.clone()], &mut Vec::new()).unwrap();

        let entry = &store.load().unwrap()[0];
        assert_ne!(entry.url, video.canonicalize().unwrap());
        assert_eq!(entry.url.file_name().unwrap(), format!("{}.mp4", entry.id).as_str());
        assert!(entry.url.exists());
    }

    #[test]
    fn optimize_swaps_the_entry_to_the_copy() {
        let store = MemoryStore::default();
        let mut offline = offline(&store, FakeTranscoder::default(), Config::default());
        add(&mut offline, &[scratch_video("cli-optimize")], &mut Vec::new()).unwrap();
        let id = store.load().unwrap()[0].id;

        let mut out = Vec::new();
        optimize(&mut offline, &id.to_string(), &mut out).unwrap();

        let entry = &store.load().unwrap()[0];
        assert_eq!(entry.url.file_name().unwrap(), format!("{id}.mp4").as_str());
        let dir = entry.url.parent().unwrap();
        assert!(!dir.join(format!(".{id}.partial.mp4")).exists());
        assert!(String::from_utf8(out).unwrap().contains("optimized copy stored at"));
    }

    #[test]
    fn failed_optimize_reports_and_leaves_no_partial_file() {
        let store = MemoryStore::default();
        let mut offline = offline(&store, FakeTranscoder { fail: true }, Config::default());
        let video = scratch_video("cli-optimize-fail");
        add(&mut offline, &[video.clone()], &mut Vec::new()).unwrap();
        let id = store.load().unwrap()[0].id;

        let result = optimize(&mut offline, &id.to_string(), &mut Vec::new());

        assert!(result.is_err());
        let entry = &store.load().unwrap()[0];
        assert_eq!(entry.url, video.canonicalize().unwrap());
        assert_eq!(offline.catalog.pending_jobs(), 0);
    }
}
