// SPDX-License-Identifier: MPL-2.0

//! Abstractions over the decode and render engine.
//!
//! A [`MediaEngine`] loads asset metadata asynchronously and builds
//! [`Player`]s. Players render into a [`VideoLayer`], which a window's content
//! view composites. The GStreamer implementation lives in `animated`.

use std::{
    fmt,
    path::Path,
    rc::Rc,
    sync::Arc,
    time::Duration,
};

use crate::{
    error::{IoError, MediaError},
    event::{Event, EventSender, SurfaceEvent, Ticket},
    frame_queue::SharedFrameQueue,
    session::GrantLease,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub kind: TrackKind,
    pub playable: bool,
    pub width: u32,
    pub height: u32,
}

impl TrackInfo {
    pub fn video(width: u32, height: u32) -> Self {
        Self {
            kind: TrackKind::Video,
            playable: true,
            width,
            height,
        }
    }

    pub fn audio() -> Self {
        Self {
            kind: TrackKind::Audio,
            playable: true,
            width: 0,
            height: 0,
        }
    }
}

/// Demuxed metadata of a video file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssetInfo {
    pub playable: bool,
    pub tracks: Vec<TrackInfo>,
    pub duration: Option<Duration>,
}

impl AssetInfo {
    /// First playable video track, if any.
    #[must_use]
    pub fn video_track(&self) -> Option<&TrackInfo> {
        self.tracks
            .iter()
            .find(|track| track.kind == TrackKind::Video && track.playable)
    }
}

/// How frames are fitted into the layer bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoGravity {
    /// Preserve aspect ratio and fill the bounds, cropping the overflow.
    ResizeAspectFill,
    /// Preserve aspect ratio and fit inside the bounds.
    ResizeAspect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    pub muted: bool,
    pub gravity: VideoGravity,
    pub width: u32,
    pub height: u32,
}

impl PlayerConfig {
    /// Silent playback filling a display of the given size.
    pub fn wallpaper(width: u32, height: u32) -> Self {
        Self {
            muted: true,
            gravity: VideoGravity::ResizeAspectFill,
            width,
            height,
        }
    }
}

/// Player notifications a surface can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverKind {
    /// Item status, including pipeline failures.
    Status,
    Rate,
    EndOfMedia,
}

impl ObserverKind {
    /// Which observer kind a surface event is delivered through.
    #[must_use]
    pub fn of(event: &SurfaceEvent) -> Option<Self> {
        match event {
            SurfaceEvent::Loaded(_) => None,
            SurfaceEvent::EndOfMedia => Some(Self::EndOfMedia),
            SurfaceEvent::RateChanged(_) => Some(Self::Rate),
            SurfaceEvent::Failed(_) => Some(Self::Status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(pub u64);

/// The hardware composited surface a player draws into.
#[derive(Clone)]
pub struct VideoLayer {
    pub gravity: VideoGravity,
    /// Rasterize on the GPU where the compositor allows it.
    pub hardware_rasterized: bool,
    player: Option<SharedFrameQueue>,
}

impl VideoLayer {
    pub fn new(frames: SharedFrameQueue, gravity: VideoGravity) -> Self {
        Self {
            gravity,
            hardware_rasterized: true,
            player: Some(frames),
        }
    }

    /// Frames produced by the attached player.
    #[must_use]
    pub fn frames(&self) -> Option<&SharedFrameQueue> {
        self.player.as_ref()
    }

    /// Sever the link to the player.
    pub fn detach_player(&mut self) {
        self.player = None;
    }
}

impl fmt::Debug for VideoLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoLayer")
            .field("gravity", &self.gravity)
            .field("hardware_rasterized", &self.hardware_rasterized)
            .field("attached", &self.player.is_some())
            .finish()
    }
}

/// One playback engine bound to one decoded item.
///
/// Observed events are posted through the sender the player was built with,
/// tagged with its ticket. Only the main loop calls these methods.
pub trait Player {
    fn play(&mut self);

    fn pause(&mut self);

    fn seek_to_start(&mut self);

    fn add_observer(&mut self, kind: ObserverKind) -> ObserverToken;

    fn remove_observer(&mut self, token: ObserverToken);

    fn layer(&self) -> VideoLayer;

    /// Replace the current item with none, stopping decode.
    fn clear_item(&mut self);
}

pub trait MediaEngine {
    /// Load asset metadata without blocking. The result is posted as
    /// [`SurfaceEvent::Loaded`] under `ticket`; `lease` is held until then.
    fn load(&self, path: &Path, ticket: Ticket, lease: GrantLease, events: EventSender);

    fn build_player(
        &self,
        path: &Path,
        asset: &AssetInfo,
        config: &PlayerConfig,
        ticket: Ticket,
        lease: GrantLease,
        events: EventSender,
    ) -> Result<Box<dyn Player>, MediaError>;
}

/// Renders a still preview of a video as PNG bytes.
pub trait Thumbnailer: Send + Sync {
    fn thumbnail(&self, path: &Path, width: u32) -> Result<Vec<u8>, MediaError>;
}

/// Re-encodes a video into `dest`.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, source: &Path, dest: &Path) -> Result<(), IoError>;
}

/// The media backends the process was built with.
pub struct Backends {
    pub engine: Rc<dyn MediaEngine>,
    pub thumbnailer: Arc<dyn Thumbnailer>,
    pub transcoder: Arc<dyn Transcoder>,
}

impl Backends {
    /// Backends that refuse every request, for builds without video support.
    pub fn unsupported(reason: &str) -> Self {
        let backend = Arc::new(Unsupported(reason.to_owned()));
        Self {
            engine: Rc::new(Unsupported(reason.to_owned())),
            thumbnailer: backend.clone(),
            transcoder: backend,
        }
    }
}

struct Unsupported(String);

impl MediaEngine for Unsupported {
    fn load(&self, _path: &Path, ticket: Ticket, _lease: GrantLease, events: EventSender) {
        let error = MediaError::Unsupported(self.0.clone());
        let _ = events.send(Event::Surface(ticket, SurfaceEvent::Loaded(Err(error))));
    }

    fn build_player(
        &self,
        _path: &Path,
        _asset: &AssetInfo,
        _config: &PlayerConfig,
        _ticket: Ticket,
        _lease: GrantLease,
        _events: EventSender,
    ) -> Result<Box<dyn Player>, MediaError> {
        Err(MediaError::Unsupported(self.0.clone()))
    }
}

impl Thumbnailer for Unsupported {
    fn thumbnail(&self, _path: &Path, _width: u32) -> Result<Vec<u8>, MediaError> {
        Err(MediaError::Unsupported(self.0.clone()))
    }
}

impl Transcoder for Unsupported {
    fn transcode(&self, _source: &Path, _dest: &Path) -> Result<(), IoError> {
        Err(IoError::Transcode(self.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_only_asset_has_no_video_track() {
        let asset = AssetInfo {
            playable: true,
            tracks: vec![TrackInfo::audio()],
            duration: None,
        };
        assert!(asset.video_track().is_none());
    }

    #[test]
    fn unplayable_video_tracks_are_skipped() {
        let mut broken = TrackInfo::video(640, 480);
        broken.playable = false;
        let asset = AssetInfo {
            playable: true,
            tracks: vec![broken, TrackInfo::video(1280, 720)],
            duration: None,
        };
        assert_eq!(asset.video_track().map(|t| t.width), Some(1280));
    }

    #[test]
    fn wallpaper_players_are_silent_and_fill_the_display() {
        let config = PlayerConfig::wallpaper(1920, 1080);
        assert!(config.muted);
        assert_eq!(config.gravity, VideoGravity::ResizeAspectFill);
    }
}
