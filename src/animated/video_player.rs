// SPDX-License-Identifier: MPL-2.0

//! GStreamer implementation of the media engine.
//!
//! Metadata is read with `playbin` on a loader thread. Playback runs a
//! `decodebin` pipeline into an appsink that feeds the player's frame queue:
//!
//! ```text
//! filesrc ! decodebin ! videoconvert ! videocrop ! videoscale ! BGRx ! appsink ──▶ FrameQueue
//! ```
//!
//! Bus messages are read on a dedicated thread and posted to the main loop
//! as surface events for the observers that are still registered.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use gstreamer::{MessageView, prelude::*};
use tracing::{debug, error, info, trace, warn};

use crate::{
    error::MediaError,
    event::{Event, EventSender, SurfaceEvent, Ticket},
    frame_queue::{DEFAULT_QUEUE_CAPACITY, QueuedFrame, SharedFrameQueue, new_shared_queue},
    media::{
        AssetInfo, MediaEngine, ObserverKind, ObserverToken, Player, PlayerConfig, TrackInfo,
        TrackKind, VideoGravity, VideoLayer,
    },
    scaler,
    session::GrantLease,
};

use super::bus::BusWatch;

fn decode_error(why: impl std::fmt::Display) -> MediaError {
    MediaError::Decode(why.to_string())
}

/// Quote a path for `gst_parse_launch`.
pub(super) fn escape_path(path: &Path) -> Result<String, MediaError> {
    let path = path
        .to_str()
        .ok_or_else(|| decode_error(format!("path is not UTF-8: {}", path.display())))?;
    Ok(path.replace('\\', "\\\\").replace('"', "\\\""))
}

pub struct GstEngine {
    load_timeout: Duration,
}

impl GstEngine {
    pub fn new(load_timeout: Duration) -> Self {
        Self { load_timeout }
    }
}

impl MediaEngine for GstEngine {
    fn load(&self, path: &Path, ticket: Ticket, lease: GrantLease, events: EventSender) {
        let path = path.to_path_buf();
        let timeout = self.load_timeout;
        let fallback = events.clone();

        let spawned = thread::Builder::new()
            .name("deskvid-loader".into())
            .spawn(move || {
                let result = read_metadata(&path, timeout);
                let _ = events.send(Event::Surface(ticket, SurfaceEvent::Loaded(result)));
                drop(lease);
            });

        if let Err(why) = spawned {
            error!(?why, "failed to spawn loader thread");
            let _ = fallback.send(Event::Surface(
                ticket,
                SurfaceEvent::Loaded(Err(decode_error(why))),
            ));
        }
    }

    fn build_player(
        &self,
        path: &Path,
        asset: &AssetInfo,
        config: &PlayerConfig,
        ticket: Ticket,
        lease: GrantLease,
        events: EventSender,
    ) -> Result<Box<dyn Player>, MediaError> {
        GstPlayer::new(path, asset, config, ticket, lease, events)
            .map(|player| Box::new(player) as Box<dyn Player>)
    }
}

/// Preroll `path` in a `playbin` with fake sinks and read its streams.
fn read_metadata(path: &Path, timeout: Duration) -> Result<AssetInfo, MediaError> {
    gstreamer::init().map_err(decode_error)?;

    let uri = gstreamer::glib::filename_to_uri(path, None).map_err(decode_error)?;
    let playbin = gstreamer::ElementFactory::make("playbin")
        .property("uri", uri.as_str())
        .build()
        .map_err(decode_error)?;
    for sink in ["video-sink", "audio-sink"] {
        let fake = gstreamer::ElementFactory::make("fakesink")
            .build()
            .map_err(decode_error)?;
        playbin.set_property(sink, &fake);
    }

    let result = preroll(&playbin, path, timeout);
    let _ = playbin.set_state(gstreamer::State::Null);
    result
}

fn preroll(
    playbin: &gstreamer::Element,
    path: &Path,
    timeout: Duration,
) -> Result<AssetInfo, MediaError> {
    let bus = playbin
        .bus()
        .ok_or_else(|| decode_error("playbin has no bus"))?;

    if playbin.set_state(gstreamer::State::Paused).is_err() {
        return Ok(AssetInfo::default());
    }

    let message = bus.timed_pop_filtered(
        gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64),
        &[gstreamer::MessageType::AsyncDone, gstreamer::MessageType::Error],
    );

    match message.as_ref().map(|message| message.view()) {
        Some(MessageView::AsyncDone(_)) => (),
        Some(MessageView::Error(err)) => {
            let why = err.error();
            debug!(path = %path.display(), error = %why, "reading metadata failed");
            // Containers we can read but not decode are reported as unplayable.
            if why.matches(gstreamer::StreamError::CodecNotFound)
                || why.matches(gstreamer::CoreError::MissingPlugin)
                || why.matches(gstreamer::StreamError::WrongType)
            {
                return Ok(AssetInfo::default());
            }
            return Err(decode_error(why));
        }
        _ => return Err(decode_error(format!("timed out after {timeout:?}"))),
    }

    let mut tracks = Vec::new();
    let n_video = playbin.property::<i32>("n-video");
    for index in 0..n_video {
        let caps = playbin
            .emit_by_name::<Option<gstreamer::Pad>>("get-video-pad", &[&index])
            .and_then(|pad| pad.current_caps());
        let info = caps.and_then(|caps| gstreamer_video::VideoInfo::from_caps(&caps).ok());
        tracks.push(match info {
            Some(info) => TrackInfo::video(info.width(), info.height()),
            None => TrackInfo {
                kind: TrackKind::Video,
                playable: false,
                width: 0,
                height: 0,
            },
        });
    }
    for _ in 0..playbin.property::<i32>("n-audio") {
        tracks.push(TrackInfo::audio());
    }

    let duration = playbin
        .query_duration::<gstreamer::ClockTime>()
        .map(|duration| Duration::from_nanos(duration.nseconds()));

    debug!(path = %path.display(), ?tracks, ?duration, "read video metadata");
    Ok(AssetInfo {
        playable: true,
        tracks,
        duration,
    })
}

/// The `gst_parse_launch` description of a playback pipeline.
pub(super) fn pipeline_description(
    path: &str,
    track: &TrackInfo,
    config: &PlayerConfig,
) -> String {
    let fit = match config.gravity {
        VideoGravity::ResizeAspectFill => {
            let crop = scaler::fill_crop(track.width, track.height, config.width, config.height);
            format!(
                "videocrop left={} right={} top={} bottom={} ! videoscale add-borders=false",
                crop.left, crop.right, crop.top, crop.bottom
            )
        }
        VideoGravity::ResizeAspect => "videoscale add-borders=true".to_owned(),
    };

    format!(
        concat!(
            "filesrc location=\"{path}\" ! ",
            "decodebin ! ",
            "videoconvert ! ",
            "{fit} ! ",
            "video/x-raw,format=BGRx,width={width},height={height},pixel-aspect-ratio=1/1 ! ",
            "appsink name=sink sync=true max-buffers=4 drop=true"
        ),
        path = path,
        fit = fit,
        width = config.width,
        height = config.height,
    )
}

type Observers = Arc<Mutex<HashMap<ObserverToken, ObserverKind>>>;

/// A decode pipeline bound to one video.
pub struct GstPlayer {
    pipeline: gstreamer::Pipeline,
    frames: SharedFrameQueue,
    gravity: VideoGravity,
    observers: Observers,
    next_observer: u64,
    watch: BusWatch,
    /// Held until the pipeline has stopped reading the file.
    lease: Option<GrantLease>,
}

impl GstPlayer {
    fn new(
        path: &Path,
        asset: &AssetInfo,
        config: &PlayerConfig,
        ticket: Ticket,
        lease: GrantLease,
        events: EventSender,
    ) -> Result<Self, MediaError> {
        gstreamer::init().map_err(decode_error)?;

        let track = asset.video_track().ok_or(MediaError::NoVideoTrack)?;
        let description = pipeline_description(&escape_path(path)?, track, config);
        debug!(pipeline = %description, "creating playback pipeline");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(decode_error)?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| decode_error("not a pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|sink| sink.downcast::<gstreamer_app::AppSink>().ok())
            .ok_or_else(|| decode_error("pipeline has no appsink"))?;

        let frames = new_shared_queue(DEFAULT_QUEUE_CAPACITY);
        let queue = frames.clone();
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    push_sample(appsink, &queue);
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        let observers = Observers::default();
        let bus = pipeline
            .bus()
            .ok_or_else(|| decode_error("pipeline has no bus"))?;
        // Dropping the watch on an early return ends the bus thread.
        let watch = watch_bus(bus, ticket, observers.clone(), events)?;

        if let Err(why) = pipeline.set_state(gstreamer::State::Paused) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(decode_error(why));
        }

        info!(
            path = %path.display(),
            source = format!("{}x{}", track.width, track.height),
            target = format!("{}x{}", config.width, config.height),
            muted = config.muted,
            "video player ready"
        );

        Ok(Self {
            pipeline,
            frames,
            gravity: config.gravity,
            observers,
            next_observer: 0,
            watch,
            lease: Some(lease),
        })
    }

    fn set_state(&self, state: gstreamer::State) {
        if let Err(why) = self.pipeline.set_state(state) {
            warn!(?state, ?why, "pipeline state change failed");
        }
    }
}

fn push_sample(appsink: &gstreamer_app::AppSink, frames: &SharedFrameQueue) {
    let Ok(sample) = appsink.pull_sample() else {
        return;
    };
    let (Some(buffer), Some(caps)) = (sample.buffer(), sample.caps()) else {
        return;
    };
    let Ok(info) = gstreamer_video::VideoInfo::from_caps(caps) else {
        return;
    };
    let Ok(map) = buffer.map_readable() else {
        trace!("skipped frame: buffer map failed");
        return;
    };

    let stride = info.stride().first().copied().unwrap_or(0).max(0) as usize;
    frames.push(QueuedFrame::new(
        map.as_slice().to_vec(),
        info.width(),
        info.height(),
        stride,
        buffer.pts().map(|pts| pts.nseconds()),
    ));
}

/// Forward bus messages to the main loop until the player is cleared.
fn watch_bus(
    bus: gstreamer::Bus,
    ticket: Ticket,
    observers: Observers,
    events: EventSender,
) -> Result<BusWatch, MediaError> {
    let observed = move |kind: ObserverKind| {
        observers
            .lock()
            .map(|observers| observers.values().any(|observed| *observed == kind))
            .unwrap_or(false)
    };
    let post = move |event: SurfaceEvent| {
        let _ = events.send(Event::Surface(ticket, event));
    };

    let handle = move |message: gstreamer::Message| match message.view() {
        MessageView::Eos(_) if observed(ObserverKind::EndOfMedia) => {
            post(SurfaceEvent::EndOfMedia);
        }
        MessageView::Buffering(buffering) if observed(ObserverKind::Rate) => {
            let rate = if buffering.percent() < 100 { 0.0 } else { 1.0 };
            post(SurfaceEvent::RateChanged(rate));
        }
        MessageView::Error(err) => {
            error!(
                src = ?err.src().map(|s| s.path_string()),
                error = %err.error(),
                "GStreamer pipeline error"
            );
            if observed(ObserverKind::Status) {
                post(SurfaceEvent::Failed(decode_error(err.error())));
            }
        }
        MessageView::Warning(warning) => {
            warn!(
                src = ?warning.src().map(|s| s.path_string()),
                error = %warning.error(),
                "GStreamer pipeline warning"
            );
        }
        _ => (),
    };

    trace!(surface = %ticket.surface, "watching pipeline bus");
    BusWatch::spawn(
        "deskvid-bus",
        move |timeout| bus.timed_pop(gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64)),
        handle,
    )
    .map_err(decode_error)
}

impl Player for GstPlayer {
    fn play(&mut self) {
        self.set_state(gstreamer::State::Playing);
    }

    fn pause(&mut self) {
        self.set_state(gstreamer::State::Paused);
    }

    fn seek_to_start(&mut self) {
        let flags = gstreamer::SeekFlags::FLUSH | gstreamer::SeekFlags::KEY_UNIT;
        if let Err(why) = self.pipeline.seek_simple(flags, gstreamer::ClockTime::ZERO) {
            warn!(?why, "failed to seek to start");
        }
    }

    fn add_observer(&mut self, kind: ObserverKind) -> ObserverToken {
        self.next_observer += 1;
        let token = ObserverToken(self.next_observer);
        if let Ok(mut observers) = self.observers.lock() {
            observers.insert(token, kind);
        }
        token
    }

    fn remove_observer(&mut self, token: ObserverToken) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.remove(&token);
        }
    }

    fn layer(&self) -> VideoLayer {
        VideoLayer::new(self.frames.clone(), self.gravity)
    }

    fn clear_item(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };

        self.watch.stop();
        self.set_state(gstreamer::State::Null);
        self.frames.stop();
        trace!(session = lease.session().0, "player released its grant lease");
    }
}

impl Drop for GstPlayer {
    fn drop(&mut self) {
        self.clear_item();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_pipeline_crops_to_display_aspect() {
        let description = pipeline_description(
            "/videos/clip.mp4",
            &TrackInfo::video(1280, 720),
            &PlayerConfig::wallpaper(1920, 1200),
        );

        assert!(description.starts_with("filesrc location=\"/videos/clip.mp4\" ! decodebin"));
        assert!(description.contains("videocrop left=64 right=64 top=0 bottom=0"));
        assert!(description.contains("format=BGRx,width=1920,height=1200"));
        assert!(description.ends_with("appsink name=sink sync=true max-buffers=4 drop=true"));
    }

    #[test]
    fn aspect_pipeline_letterboxes() {
        let mut config = PlayerConfig::wallpaper(1920, 1200);
        config.gravity = VideoGravity::ResizeAspect;
        let description =
            pipeline_description("/v.mp4", &TrackInfo::video(1280, 720), &config);

        assert!(!description.contains("videocrop"));
        assert!(description.contains("add-borders=true"));
    }

    #[test]
    fn paths_are_quoted_for_parse_launch() {
        let escaped = escape_path(Path::new("/videos/say \"hi\".mp4")).unwrap();
        assert_eq!(escaped, "/videos/say \\\"hi\\\".mp4");
    }
}
