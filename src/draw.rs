// SPDX-License-Identifier: MPL-2.0

//! Software composition of video frames into wl_shm buffers.

use std::{cell::RefCell, rc::Rc};

use cosmic_text::{
    Align, Attrs, Buffer as TextBuffer, Color, FontSystem, Metrics, Shaping, SwashCache,
};
use sctk::{
    reexports::client::{QueueHandle, protocol::wl_shm},
    shell::{WaylandSurface, wlr_layer::LayerSurface},
    shm::slot::{Buffer, CreateBufferError, SlotPool},
};

use crate::{frame_queue::QueuedFrame, media::VideoGravity, scaler, wayland::App};

/// Shown while a video loads and behind letterboxed frames.
pub const BACKDROP: [u8; 3] = [0, 0, 0];

/// Shown on displays whose video failed.
pub const PLACEHOLDER: [u8; 3] = [0x1e, 0x1e, 0x24];

const LABEL: [u8; 3] = [0xdc, 0xdc, 0xe4];

/// Label size at scale 1, in pixels.
const LABEL_FONT_SIZE: f32 = 18.0;

/// Compose `frame` into a new `width`x`height` buffer.
pub fn frame_canvas(
    pool: &mut SlotPool,
    frame: &QueuedFrame,
    gravity: VideoGravity,
    width: u32,
    height: u32,
) -> Result<Buffer, CreateBufferError> {
    let (buffer, canvas) = create(pool, width, height)?;
    blit(canvas, width, height, frame, gravity);
    Ok(buffer)
}

/// A placeholder buffer with `message` centered on it.
pub fn placeholder_canvas(
    pool: &mut SlotPool,
    labels: &Labels,
    message: &str,
    scale: i32,
    width: u32,
    height: u32,
) -> Result<Buffer, CreateBufferError> {
    let (buffer, canvas) = create(pool, width, height)?;
    fill(canvas, PLACEHOLDER);
    labels.draw(canvas, width, height, message, scale.max(1) as f32);
    Ok(buffer)
}

/// A buffer filled with one color.
pub fn solid_canvas(
    pool: &mut SlotPool,
    color: [u8; 3],
    width: u32,
    height: u32,
) -> Result<Buffer, CreateBufferError> {
    let (buffer, canvas) = create(pool, width, height)?;
    fill(canvas, color);
    Ok(buffer)
}

fn create(
    pool: &mut SlotPool,
    width: u32,
    height: u32,
) -> Result<(Buffer, &mut [u8]), CreateBufferError> {
    pool.create_buffer(
        width as i32,
        height as i32,
        width as i32 * 4,
        wl_shm::Format::Xrgb8888,
    )
}

/// Fill an Xrgb8888 canvas with `color`.
pub fn fill(canvas: &mut [u8], [r, g, b]: [u8; 3]) {
    let pixel = ((u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)).to_le_bytes();
    for dest in canvas.chunks_exact_mut(4) {
        dest.copy_from_slice(&pixel);
    }
}

/// Scale a BGRx frame into an Xrgb8888 canvas of `width`x`height` pixels.
///
/// Both formats share the same little-endian byte order, so rows are copied
/// directly when no scaling is needed.
pub fn blit(canvas: &mut [u8], width: u32, height: u32, frame: &QueuedFrame, gravity: VideoGravity) {
    let (x, y, w, h) = scaler::placement(gravity, frame.width, frame.height, width, height);
    if (w, h) != (width, height) {
        fill(canvas, BACKDROP);
    }
    if w == 0 || h == 0 || frame.width == 0 || frame.height == 0 {
        return;
    }

    let canvas_stride = width as usize * 4;
    for dy in 0..h {
        let sy = (u64::from(dy) * u64::from(frame.height) / u64::from(h)) as u32;
        let Some(row) = frame.row(sy) else {
            continue;
        };
        let start = (y + dy) as usize * canvas_stride + x as usize * 4;
        let Some(dest) = canvas.get_mut(start..start + w as usize * 4) else {
            continue;
        };

        if w == frame.width {
            dest.copy_from_slice(row);
            continue;
        }

        for (dx, pixel) in dest.chunks_exact_mut(4).enumerate() {
            let sx = (dx as u64 * u64::from(frame.width) / u64::from(w)) as usize * 4;
            pixel.copy_from_slice(&row[sx..sx + 4]);
        }
    }
}

/// Lays out and rasterizes placeholder labels.
pub struct LabelRenderer {
    fonts: FontSystem,
    glyphs: SwashCache,
}

impl LabelRenderer {
    /// A renderer using the system fonts.
    pub fn new() -> Self {
        Self::with_fonts(FontSystem::new())
    }

    fn with_fonts(fonts: FontSystem) -> Self {
        Self {
            fonts,
            glyphs: SwashCache::new(),
        }
    }

    /// Draw `text` centered on an Xrgb8888 canvas, wrapped to most of its width.
    pub fn draw(&mut self, canvas: &mut [u8], width: u32, height: u32, text: &str, scale: f32) {
        let font_size = LABEL_FONT_SIZE * scale;
        let metrics = Metrics::new(font_size, font_size * 1.4);
        let box_width = width as f32 * 0.8;

        let mut buffer = TextBuffer::new(&mut self.fonts, metrics);
        buffer.set_size(&mut self.fonts, Some(box_width), None);
        buffer.set_text(&mut self.fonts, text, Attrs::new(), Shaping::Advanced);
        for line in &mut buffer.lines {
            line.set_align(Some(Align::Center));
        }
        buffer.shape_until_scroll(&mut self.fonts, false);

        let lines = buffer.layout_runs().count() as f32;
        let left = ((width as f32 - box_width) / 2.0).round() as i32;
        let top = ((height as f32 - lines * metrics.line_height) / 2.0).round() as i32;

        let [r, g, b] = LABEL;
        buffer.draw(
            &mut self.fonts,
            &mut self.glyphs,
            Color::rgb(r, g, b),
            |x, y, w, h, color| blend(canvas, width, height, (left + x, top + y, w, h), color),
        );
    }
}

/// The label renderer shared by every window, created when first needed.
#[derive(Clone, Default)]
pub struct Labels(Rc<RefCell<Option<LabelRenderer>>>);

impl Labels {
    pub fn draw(&self, canvas: &mut [u8], width: u32, height: u32, text: &str, scale: f32) {
        self.0
            .borrow_mut()
            .get_or_insert_with(LabelRenderer::new)
            .draw(canvas, width, height, text, scale);
    }
}

/// Blend a rectangle of `color`, whose alpha is glyph coverage, onto the canvas.
fn blend(canvas: &mut [u8], width: u32, height: u32, rect: (i32, i32, u32, u32), color: Color) {
    let (x, y, w, h) = rect;
    let alpha = u32::from(color.a());
    if alpha == 0 {
        return;
    }

    let columns = x.max(0)..x.saturating_add(w as i32).min(width as i32);
    for row in y.max(0)..y.saturating_add(h as i32).min(height as i32) {
        for column in columns.clone() {
            let i = (row as usize * width as usize + column as usize) * 4;
            let Some(pixel) = canvas.get_mut(i..i + 3) else {
                continue;
            };
            for (dest, source) in pixel.iter_mut().zip([color.b(), color.g(), color.r()]) {
                *dest = ((u32::from(source) * alpha + u32::from(*dest) * (255 - alpha)) / 255) as u8;
            }
        }
    }
}

/// Attach `buffer`, request the next frame callback, and commit.
pub fn layer_surface(
    layer: &LayerSurface,
    queue_handle: &QueueHandle<App>,
    buffer: &Buffer,
    buffer_damage: (i32, i32),
) {
    let wl_surface = layer.wl_surface();

    // Damage the entire window
    wl_surface.damage_buffer(0, 0, buffer_damage.0, buffer_damage.1);

    // Request our next frame
    wl_surface.frame(queue_handle, wl_surface.clone());

    // Attach and commit to present.
    if let Err(why) = buffer.attach_to(wl_surface) {
        tracing::error!(?why, "buffer attachment failed");
    }

    wl_surface.commit();
}

/// Ask for another frame callback without presenting anything new.
pub fn request_frame(layer: &LayerSurface, queue_handle: &QueueHandle<App>) {
    let wl_surface = layer.wl_surface();
    wl_surface.frame(queue_handle, wl_surface.clone());
    wl_surface.commit();
}
