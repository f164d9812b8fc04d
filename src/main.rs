// SPDX-License-Identifier: MPL-2.0-only

mod access;
mod animated;
mod catalog;
mod cli;
mod controller;
mod draw;
mod error;
mod event;
mod frame_queue;
mod library;
mod library_watch;
mod media;
mod notifier;
mod scaler;
mod session;
mod surface;
#[cfg(test)]
mod testing;
mod wayland;
mod window;

use std::{io, path::PathBuf, rc::Rc, sync::Arc};

use clap::{Parser, Subcommand};
use deskvid_config::{Config, JsonStore, LibraryStore, data_dir};
use eyre::{WrapErr, eyre};
use sctk::{
    compositor::CompositorState,
    output::OutputState,
    reexports::{
        calloop::{
            self, EventLoop,
            signals::{Signal, Signals},
            timer::{TimeoutAction, Timer},
        },
        calloop_wayland_source::WaylandSource,
        client::{Connection, globals::registry_queue_init},
    },
    registry::RegistryState,
    shell::wlr_layer::LayerShell,
    shm::Shm,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    access::{BookmarkResolver, FileAccessProvider},
    catalog::{Catalog, CatalogDeps},
    cli::OfflineCatalog,
    controller::{Controller, PublishedState},
    event::LoopScheduler,
    library::VideoLibrary,
    notifier::{LogNotifier, Notifier},
    session::{SessionDeps, WallpaperSessionManager},
    wayland::{App, WaylandDisplays, WaylandShared},
};

/// Loop a video as the desktop background on every display.
#[derive(Debug, Parser)]
#[command(name = "deskvid", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Play the selected video until interrupted (default)
    Run,
    /// Import video files or directories of videos
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List imported videos; `*` marks the selection, `>` while playing
    List,
    /// Choose the wallpaper video by id, id prefix or name
    Select { video: String },
    /// Delete a video from the library
    Remove { video: String },
    Rename { video: String, name: String },
    /// Start playing the selected video
    Start,
    Stop,
    /// Re-encode a video to HEVC and use the copy from now on
    Optimize { video: String },
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    init_logger();

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(conf) => conf,
        Err(err) => {
            warn!("Config file error, falling back to defaults: {err}");
            Config::default()
        }
    };

    let store = JsonStore::new(data_dir());
    let resolver = BookmarkResolver::new(Arc::new(FileAccessProvider::default()));
    let open_library = || VideoLibrary::load(Box::new(store.clone()));
    let open_catalog = |config: Config| -> eyre::Result<OfflineCatalog> {
        let backends = animated::backends(config.load_timeout());
        OfflineCatalog::new(
            open_library()?,
            resolver.clone(),
            &backends,
            config,
            data_dir().join("optimized"),
        )
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, store, resolver),
        Command::Add { paths } => {
            cli::add(&mut open_catalog(config)?, &paths, &mut io::stdout().lock())
        }
        Command::List => {
            let library = open_library()?;
            let state = PublishedState::new(&library, library.is_playing());
            Ok(cli::list(&state, &mut io::stdout().lock())?)
        }
        Command::Select { video } => cli::select(&mut open_library()?, &video),
        Command::Remove { video } => cli::remove(&mut open_library()?, &video),
        Command::Rename { video, name } => cli::rename(&mut open_library()?, &video, &name),
        Command::Start => cli::set_playing(&mut open_library()?, true),
        Command::Stop => cli::set_playing(&mut open_library()?, false),
        Command::Optimize { video } => {
            cli::optimize(&mut open_catalog(config)?, &video, &mut io::stdout().lock())
        }
    }
}

fn init_logger() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
}

/// Run the wallpaper daemon until SIGINT or SIGTERM.
fn run(config: Config, store: JsonStore, resolver: BookmarkResolver) -> eyre::Result<()> {
    let mut event_loop: EventLoop<'static, App> = EventLoop::try_new()?;

    // Block the signals before any worker thread inherits the mask.
    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM, Signal::SIGUSR1])?;

    let conn = Connection::connect_to_env().wrap_err("no Wayland compositor to draw on")?;
    let (globals, mut event_queue) = registry_queue_init(&conn)?;
    let qh = event_queue.handle();

    let shared = WaylandShared::new(
        CompositorState::bind(&globals, &qh)?,
        LayerShell::bind(&globals, &qh)?,
        qh.clone(),
    );

    let mut app = App {
        registry_state: RegistryState::new(&globals),
        output_state: OutputState::new(&globals, &qh),
        shm_state: Shm::bind(&globals, &qh)?,
        shared: shared.clone(),
        controller: None,
        exit: false,
    };

    // Outputs are announced in the first roundtrip, their details in the second.
    event_queue.roundtrip(&mut app)?;
    event_queue.roundtrip(&mut app)?;

    let (events, receiver) = calloop::channel::channel();
    event_loop
        .handle()
        .insert_source(receiver, |event, _, app: &mut App| {
            if let calloop::channel::Event::Msg(event) = event {
                if let Some(controller) = app.controller.as_mut() {
                    controller.handle_event(event);
                }
            }
        })
        .map_err(|why| eyre!("failed to insert event channel: {}", why.error))?;

    if let Err(why) = std::fs::create_dir_all(store.dir()) {
        warn!(%why, "cannot create data directory");
    }
    let _watcher = library_watch::watch(store.watched_files(), events.clone());

    let backends = animated::backends(config.load_timeout());
    let notifier: Rc<dyn Notifier> = Rc::new(LogNotifier);
    let library = VideoLibrary::load(Box::new(store))?;

    let session = WallpaperSessionManager::new(SessionDeps {
        resolver: resolver.clone(),
        displays: Box::new(WaylandDisplays::new(shared)),
        engine: backends.engine,
        notifier: notifier.clone(),
        scheduler: Box::new(LoopScheduler::new(event_loop.handle(), events.clone())),
        events: events.clone(),
        restart_delay: config.restart_delay(),
    });

    let catalog = Catalog::new(
        library,
        CatalogDeps {
            resolver,
            thumbnailer: backends.thumbnailer,
            transcoder: backends.transcoder,
            notifier,
            events,
            optimized_dir: data_dir().join("optimized"),
        },
        config.clone(),
    );
    let mut controller = Controller::new(catalog, session);

    controller.refresh_thumbnails();
    if let Err(why) = controller.reconcile() {
        warn!(%why, "could not resume the wallpaper");
    }
    app.controller = Some(controller);

    WaylandSource::new(conn.clone(), event_queue)
        .insert(event_loop.handle())
        .map_err(|why| eyre!("failed to insert wayland source: {}", why.error))?;

    event_loop
        .handle()
        .insert_source(signals, |event, _, app: &mut App| match event.signal() {
            Signal::SIGUSR1 => advance(app),
            signal => {
                info!(?signal, "shutting down");
                if let Some(controller) = app.controller.as_mut() {
                    controller.shutdown();
                }
                app.exit = true;
            }
        })
        .map_err(|why| eyre!("failed to insert signal source: {}", why.error))?;

    if let Some(every) = config.rotation() {
        event_loop
            .handle()
            .insert_source(Timer::from_duration(every), move |_, _, app: &mut App| {
                let span = tracing::debug_span!("rotation timer");
                let _handle = span.enter();

                let playing = app
                    .controller
                    .as_ref()
                    .is_some_and(|controller| controller.state().is_playing);
                if playing {
                    advance(app);
                }
                TimeoutAction::ToDuration(every)
            })
            .map_err(|why| eyre!("failed to insert rotation timer: {}", why.error))?;
    }

    info!("deskvid running");
    while !app.exit {
        event_loop.dispatch(None, &mut app)?;
    }

    drop(app.controller.take());
    conn.flush()?;
    Ok(())
}

fn advance(app: &mut App) {
    if let Some(controller) = app.controller.as_mut() {
        if let Err(why) = controller.advance() {
            warn!(%why, "cannot advance to the next video");
        }
    }
}
