// SPDX-License-Identifier: MPL-2.0

//! HEVC re-encoding of imported videos.

use std::path::Path;

use gstreamer::{MessageView, prelude::*};
use tracing::{info, warn};

use super::{detection::get_codec_support, video_player::escape_path};
use crate::{error::IoError, media::Transcoder};

/// Encodes the video stream with the best available HEVC encoder into MP4.
/// Audio is dropped, wallpapers play muted.
#[derive(Debug, Default)]
pub struct GstTranscoder;

fn transcode_error(why: impl std::fmt::Display) -> IoError {
    IoError::Transcode(why.to_string())
}

impl Transcoder for GstTranscoder {
    fn transcode(&self, source: &Path, dest: &Path) -> Result<(), IoError> {
        if !source.exists() {
            return Err(IoError::Missing(source.to_path_buf()));
        }
        gstreamer::init().map_err(transcode_error)?;

        let encoder = get_codec_support()
            .hevc_encoder
            .ok_or_else(|| transcode_error("no HEVC encoder is installed"))?;

        let description = format!(
            concat!(
                "filesrc location=\"{source}\" ! ",
                "decodebin ! ",
                "videoconvert ! ",
                "{encoder} ! ",
                "h265parse ! ",
                "mp4mux faststart=true ! ",
                "filesink location=\"{dest}\""
            ),
            source = escape_path(source).map_err(transcode_error)?,
            encoder = encoder,
            dest = escape_path(dest).map_err(transcode_error)?,
        );
        info!(source = %source.display(), encoder, "optimizing video");

        let pipeline = gstreamer::parse::launch(&description).map_err(transcode_error)?;
        let bus = pipeline
            .bus()
            .ok_or_else(|| transcode_error("pipeline has no bus"))?;

        let result = match pipeline.set_state(gstreamer::State::Playing) {
            Ok(_) => match bus
                .timed_pop_filtered(
                    gstreamer::ClockTime::NONE,
                    &[gstreamer::MessageType::Eos, gstreamer::MessageType::Error],
                )
                .as_ref()
                .map(|message| message.view())
            {
                Some(MessageView::Eos(_)) => Ok(()),
                Some(MessageView::Error(err)) => {
                    warn!(error = %err.error(), "transcode failed");
                    Err(transcode_error(err.error()))
                }
                _ => Err(transcode_error("bus closed before completion")),
            },
            Err(why) => Err(transcode_error(why)),
        };

        let _ = pipeline.set_state(gstreamer::State::Null);
        result
    }
}
