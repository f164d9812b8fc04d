// SPDX-License-Identifier: MPL-2.0

//! Still previews for the library.

use std::{io::Cursor, path::Path, time::Duration};

use gstreamer::prelude::*;
use image::{DynamicImage, ImageFormat, RgbImage};
use tracing::debug;

use super::video_player::escape_path;
use crate::{error::MediaError, media::Thumbnailer, scaler};

/// Preview frames are taken this far into the video when it is long enough.
const PREVIEW_OFFSET: Duration = Duration::from_secs(1);

pub struct GstThumbnailer {
    timeout: Duration,
}

impl GstThumbnailer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn wait_paused(&self, pipeline: &gstreamer::Pipeline) -> Result<(), MediaError> {
        let timeout = gstreamer::ClockTime::from_mseconds(self.timeout.as_millis() as u64);
        let (result, state, _) = pipeline.state(timeout);
        if result.is_err() || state != gstreamer::State::Paused {
            return Err(MediaError::NotPlayable);
        }
        Ok(())
    }
}

impl Thumbnailer for GstThumbnailer {
    fn thumbnail(&self, path: &Path, width: u32) -> Result<Vec<u8>, MediaError> {
        gstreamer::init().map_err(|why| MediaError::Decode(why.to_string()))?;

        let description = format!(
            concat!(
                "filesrc location=\"{path}\" ! ",
                "decodebin ! ",
                "videoconvert ! ",
                "video/x-raw,format=RGB ! ",
                "appsink name=sink max-buffers=1"
            ),
            path = escape_path(path)?,
        );

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|why| MediaError::Decode(why.to_string()))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| MediaError::Decode("not a pipeline".into()))?;

        let result = self.capture(&pipeline, width);
        let _ = pipeline.set_state(gstreamer::State::Null);
        result
    }
}

impl GstThumbnailer {
    fn capture(&self, pipeline: &gstreamer::Pipeline, width: u32) -> Result<Vec<u8>, MediaError> {
        let appsink = pipeline
            .by_name("sink")
            .and_then(|sink| sink.downcast::<gstreamer_app::AppSink>().ok())
            .ok_or_else(|| MediaError::Decode("pipeline has no appsink".into()))?;

        pipeline
            .set_state(gstreamer::State::Paused)
            .map_err(|_| MediaError::NotPlayable)?;
        self.wait_paused(pipeline)?;

        let long_enough = pipeline
            .query_duration::<gstreamer::ClockTime>()
            .is_some_and(|duration| duration.nseconds() > 2 * PREVIEW_OFFSET.as_nanos() as u64);
        if long_enough {
            let offset = gstreamer::ClockTime::from_mseconds(PREVIEW_OFFSET.as_millis() as u64);
            let flags = gstreamer::SeekFlags::FLUSH | gstreamer::SeekFlags::KEY_UNIT;
            if pipeline.seek_simple(flags, offset).is_ok() {
                self.wait_paused(pipeline)?;
            }
        }

        let sample = appsink
            .pull_preroll()
            .map_err(|why| MediaError::Decode(why.to_string()))?;
        let (Some(buffer), Some(caps)) = (sample.buffer(), sample.caps()) else {
            return Err(MediaError::NoVideoTrack);
        };
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .map_err(|why| MediaError::Decode(why.to_string()))?;
        let map = buffer
            .map_readable()
            .map_err(|why| MediaError::Decode(why.to_string()))?;

        let stride = info.stride().first().copied().unwrap_or(0).max(0) as usize;
        let image = rgb_image(map.as_slice(), info.width(), info.height(), stride)
            .ok_or_else(|| MediaError::Decode("short frame".into()))?;
        debug!(width = info.width(), height = info.height(), "captured preview frame");

        encode_png(&scaler::thumbnail(&DynamicImage::ImageRgb8(image), width))
    }
}

/// Copy packed RGB rows out of a strided buffer.
fn rgb_image(data: &[u8], width: u32, height: u32, stride: usize) -> Option<RgbImage> {
    let row = width as usize * 3;
    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        pixels.extend_from_slice(data.get(start..start + row)?);
    }
    RgbImage::from_raw(width, height, pixels)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, MediaError> {
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|why| MediaError::Decode(why.to_string()))?;
    Ok(png)
}
