// SPDX-License-Identifier: MPL-2.0

//! Video support using GStreamer.
//!
//! - [`detection`]: video file detection and decoder probing
//! - `bus`: threads forwarding pipeline bus messages
//! - `video_player`: metadata probing and playback pipelines
//! - `thumbnail`: library previews
//! - `transcode`: HEVC optimization
//!
//! Decoding prefers hardware decoders through `decodebin`'s automatic
//! selection (NVDEC, VA-API, V4L2) and falls back to software decoding.
//! Without the `animated` feature only detection is built, and every media
//! request fails with [`MediaError::Unsupported`](crate::error::MediaError).

#[cfg(any(feature = "animated", test))]
mod bus;
mod detection;
#[cfg(feature = "animated")]
mod thumbnail;
#[cfg(feature = "animated")]
mod transcode;
#[cfg(feature = "animated")]
mod video_player;

use std::time::Duration;

pub use detection::{VIDEO_EXTENSIONS, collect_videos, is_video_file};

use crate::media::Backends;

/// Media backends for this build.
#[cfg(feature = "animated")]
pub fn backends(load_timeout: Duration) -> Backends {
    use std::{rc::Rc, sync::Arc};

    if let Err(why) = gstreamer::init() {
        tracing::error!(%why, "failed to initialize GStreamer");
        return Backends::unsupported(&why.to_string());
    }
    detection::demote_broken_nvidia_decoders();
    let _ = detection::get_codec_support();

    Backends {
        engine: Rc::new(video_player::GstEngine::new(load_timeout)),
        thumbnailer: Arc::new(thumbnail::GstThumbnailer::new(load_timeout)),
        transcoder: Arc::new(transcode::GstTranscoder),
    }
}

#[cfg(not(feature = "animated"))]
pub fn backends(_load_timeout: Duration) -> Backends {
    Backends::unsupported("built without the `animated` feature")
}
