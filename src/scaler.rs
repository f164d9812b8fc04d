// SPDX-License-Identifier: MPL-2.0-only

//! Geometry for fitting video frames into display bounds.

use image::{DynamicImage, imageops::FilterType};

use crate::media::VideoGravity;

/// Pixels trimmed from each edge of a source frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crop {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

/// Crop that gives a `width`x`height` source the aspect ratio of the layer,
/// so scaling it afterwards fills the layer without letterboxing.
pub fn fill_crop(width: u32, height: u32, layer_width: u32, layer_height: u32) -> Crop {
    if width == 0 || height == 0 || layer_width == 0 || layer_height == 0 {
        return Crop::default();
    }

    let ratio = (layer_width as f64 / width as f64).max(layer_height as f64 / height as f64);

    // Source-space extent that maps onto the layer.
    let visible_w = ((layer_width as f64 / ratio).round() as u32).min(width);
    let visible_h = ((layer_height as f64 / ratio).round() as u32).min(height);

    let (dx, dy) = (width - visible_w, height - visible_h);
    Crop {
        left: dx / 2,
        right: dx - dx / 2,
        top: dy / 2,
        bottom: dy - dy / 2,
    }
}

/// Placement of a `width`x`height` frame inside the layer: offset and size.
pub fn placement(
    gravity: VideoGravity,
    width: u32,
    height: u32,
    layer_width: u32,
    layer_height: u32,
) -> (u32, u32, u32, u32) {
    if width == 0 || height == 0 {
        return (0, 0, layer_width, layer_height);
    }

    match gravity {
        VideoGravity::ResizeAspect => {
            let ratio = (layer_width as f64 / width as f64).min(layer_height as f64 / height as f64);
            let (w, h) = (
                ((width as f64 * ratio).round() as u32).min(layer_width),
                ((height as f64 * ratio).round() as u32).min(layer_height),
            );
            ((layer_width - w) / 2, (layer_height - h) / 2, w, h)
        }
        // Frames are pre-cropped to the layer aspect, so they cover it exactly.
        VideoGravity::ResizeAspectFill => (0, 0, layer_width, layer_height),
    }
}

/// Downscale an image to `width`, preserving aspect ratio.
pub fn thumbnail(img: &DynamicImage, width: u32) -> DynamicImage {
    if img.width() <= width {
        return img.clone();
    }
    let height = (img.height() as f64 * width as f64 / img.width() as f64).round() as u32;
    img.resize_exact(width, height.max(1), FilterType::Triangle)
}
