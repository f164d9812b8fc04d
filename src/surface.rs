// SPDX-License-Identifier: MPL-2.0

//! Playback of one video into one window's content view.

use std::{
    path::{Path, PathBuf},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::{debug, info, trace, warn};

use crate::{
    error::{MediaError, StateError},
    event::{EventSender, SurfaceEvent, SurfaceId, Ticket},
    media::{AssetInfo, MediaEngine, ObserverKind, ObserverToken, Player, PlayerConfig, VideoLayer},
    session::GrantLease,
};

/// Longest error message shown in a placeholder, in characters.
const PLACEHOLDER_LIMIT: usize = 100;

static NEXT_SURFACE: AtomicU64 = AtomicU64::new(1);

/// The part of a window a surface renders into.
pub trait ContentView {
    fn attach_layer(&mut self, layer: VideoLayer);

    /// Remove the attached layer from the view, if any.
    fn detach_layer(&mut self) -> Option<VideoLayer>;

    /// Replace any content with a placeholder for `message`.
    fn show_placeholder(&mut self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceState {
    Idle,
    Loading,
    Ready,
    Playing,
    /// Playback rate fell to zero and play was requested again.
    Stalled,
    Failed(String),
    Closed,
}

/// A transition the owner of a surface may need to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceOutcome {
    Playing,
    Failed(String),
}

pub struct VideoSurface {
    id: SurfaceId,
    epoch: u64,
    closing: bool,
    state: SurfaceState,
    config: PlayerConfig,
    engine: Rc<dyn MediaEngine>,
    events: EventSender,
    path: Option<PathBuf>,
    lease: Option<GrantLease>,
    asset: Option<AssetInfo>,
    player: Option<Box<dyn Player>>,
    observers: Vec<(ObserverKind, ObserverToken)>,
}

impl VideoSurface {
    pub fn new(engine: Rc<dyn MediaEngine>, events: EventSender, config: PlayerConfig) -> Self {
        Self {
            id: SurfaceId(NEXT_SURFACE.fetch_add(1, Ordering::Relaxed)),
            epoch: 0,
            closing: false,
            state: SurfaceState::Idle,
            config,
            engine,
            events,
            path: None,
            lease: None,
            asset: None,
            player: None,
            observers: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> &SurfaceState {
        &self.state
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closing
    }

    fn ticket(&self) -> Ticket {
        Ticket {
            surface: self.id,
            epoch: self.epoch,
        }
    }

    /// Begin loading `path`. Completion arrives later as a [`SurfaceEvent::Loaded`]
    /// for [`Self::handle`]. A missing file fails immediately.
    pub fn open(
        &mut self,
        path: &Path,
        lease: GrantLease,
        view: &mut dyn ContentView,
    ) -> Result<Option<SurfaceOutcome>, StateError> {
        if self.closing {
            return Err(StateError::Closed(self.id));
        }

        if !path.exists() {
            return Ok(Some(self.fail(MediaError::Missing(path.to_path_buf()), view)));
        }

        debug!(surface = %self.id, path = %path.display(), "loading video");
        self.state = SurfaceState::Loading;
        self.engine
            .load(path, self.ticket(), lease.clone(), self.events.clone());
        self.path = Some(path.to_path_buf());
        self.lease = Some(lease);
        Ok(None)
    }

    /// Discard the current video and open another in its place.
    pub fn replace(
        &mut self,
        path: &Path,
        lease: GrantLease,
        view: &mut dyn ContentView,
    ) -> Result<Option<SurfaceOutcome>, StateError> {
        if self.closing {
            return Err(StateError::Closed(self.id));
        }
        self.teardown(view);
        self.state = SurfaceState::Idle;
        self.open(path, lease, view)
    }

    /// Apply an asynchronous completion issued under `ticket`.
    ///
    /// Completions for a closed surface or an earlier epoch change nothing and
    /// return a [`StateError`] for the caller to discard.
    pub fn handle(
        &mut self,
        ticket: Ticket,
        event: SurfaceEvent,
        view: &mut dyn ContentView,
    ) -> Result<Option<SurfaceOutcome>, StateError> {
        if self.closing {
            return Err(StateError::Closed(self.id));
        }
        if ticket.epoch != self.epoch {
            return Err(StateError::StaleEpoch {
                surface: self.id,
                event: ticket.epoch,
                current: self.epoch,
            });
        }

        if let Some(kind) = ObserverKind::of(&event) {
            if !self.observers.iter().any(|(observed, _)| *observed == kind) {
                trace!(surface = %self.id, ?kind, "event for unobserved kind dropped");
                return Ok(None);
            }
        }

        match event {
            SurfaceEvent::Loaded(result) => Ok(Some(self.loaded(result, view))),

            SurfaceEvent::EndOfMedia => {
                if let Some(player) = self.player.as_mut() {
                    trace!(surface = %self.id, "looping");
                    player.seek_to_start();
                    player.play();
                }
                Ok(None)
            }

            SurfaceEvent::RateChanged(rate) => {
                let Some(player) = self.player.as_mut() else {
                    return Ok(None);
                };
                if rate == 0.0 && self.state == SurfaceState::Playing {
                    warn!(surface = %self.id, "playback stalled, resuming");
                    self.state = SurfaceState::Stalled;
                    player.play();
                } else if rate > 0.0 && self.state == SurfaceState::Stalled {
                    debug!(surface = %self.id, "playback recovered");
                    self.state = SurfaceState::Playing;
                }
                Ok(None)
            }

            SurfaceEvent::Failed(why) => {
                self.teardown(view);
                Ok(Some(self.fail(why, view)))
            }
        }
    }

    fn loaded(
        &mut self,
        result: Result<AssetInfo, MediaError>,
        view: &mut dyn ContentView,
    ) -> SurfaceOutcome {
        if self.state != SurfaceState::Loading {
            warn!(surface = %self.id, state = ?self.state, "unexpected load completion");
        }

        let asset = match result {
            Ok(asset) if !asset.playable => return self.fail(MediaError::NotPlayable, view),
            Ok(asset) if asset.video_track().is_none() => {
                return self.fail(MediaError::NoVideoTrack, view);
            }
            Ok(asset) => asset,
            Err(why) => return self.fail(why, view),
        };

        let (Some(path), Some(lease)) = (self.path.clone(), self.lease.clone()) else {
            return self.fail(MediaError::Decode("no video to play".into()), view);
        };

        let player = match self.engine.build_player(
            &path,
            &asset,
            &self.config,
            self.ticket(),
            lease,
            self.events.clone(),
        ) {
            Ok(player) => player,
            Err(why) => return self.fail(why, view),
        };

        let layer = player.layer();
        view.attach_layer(layer);
        self.asset = Some(asset);
        self.state = SurfaceState::Ready;

        let player = self.player.insert(player);
        for kind in [ObserverKind::Status, ObserverKind::Rate, ObserverKind::EndOfMedia] {
            let token = player.add_observer(kind);
            self.observers.push((kind, token));
        }

        player.play();
        self.state = SurfaceState::Playing;
        info!(surface = %self.id, path = %path.display(), "playing");
        SurfaceOutcome::Playing
    }

    fn fail(&mut self, why: MediaError, view: &mut dyn ContentView) -> SurfaceOutcome {
        let message = why.to_string();
        warn!(surface = %self.id, error = message, "video surface failed");
        view.show_placeholder(&truncate(&message, PLACEHOLDER_LIMIT));

        // Nothing reads the file any more.
        self.lease = None;
        self.state = SurfaceState::Failed(message.clone());
        SurfaceOutcome::Failed(message)
    }

    /// Stop playback and release everything this surface holds. Completions
    /// that arrive afterwards are discarded. Returns `false` if already closed.
    pub fn close(&mut self, view: &mut dyn ContentView) -> bool {
        if self.closing {
            return false;
        }

        self.closing = true;
        self.teardown(view);
        self.state = SurfaceState::Closed;
        debug!(surface = %self.id, "closed");
        true
    }

    fn teardown(&mut self, view: &mut dyn ContentView) {
        // Invalidate every completion already in flight.
        self.epoch += 1;

        if let Some(player) = self.player.as_mut() {
            player.pause();
            for (_, token) in self.observers.drain(..) {
                player.remove_observer(token);
            }
        }
        self.observers.clear();

        if let Some(mut layer) = view.detach_layer() {
            layer.detach_player();
        }

        if let Some(player) = self.player.as_mut() {
            player.clear_item();
        }

        self.player = None;
        self.asset = None;
        self.lease = None;
        self.path = None;
    }
}

impl std::fmt::Debug for VideoSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSurface")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("state", &self.state)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn truncate(message: &str, limit: usize) -> String {
    if message.chars().count() <= limit {
        return message.to_owned();
    }
    let mut short: String = message.chars().take(limit).collect();
    short.push('…');
    short
}
