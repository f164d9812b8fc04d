// SPDX-License-Identifier: MPL-2.0

//! Bounded frame queue between a decoder thread and the Wayland renderer.
//!
//! ```text
//! GStreamer appsink ──push()──▶ FrameQueue (2-4 frames) ──get_render_frame()──▶ wl_shm canvas
//! ```
//!
//! The producer never blocks: when the queue is full the oldest frame is
//! dropped. The renderer never blocks either: when the queue is empty it
//! reuses the last frame it rendered.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

/// Frames buffered before the oldest one is dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 3;

/// A decoded BGRx frame.
#[derive(Clone, Debug)]
pub struct QueuedFrame {
    pub data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row in `data`.
    pub stride: usize,
    /// Presentation timestamp in nanoseconds.
    pub pts_ns: Option<u64>,
}

impl QueuedFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, stride: usize, pts_ns: Option<u64>) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            stride,
            pts_ns,
        }
    }

    /// Row `y` without stride padding.
    #[must_use]
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        self.data.get(start..start + self.width as usize * 4)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub frames_pushed: u64,
    /// Frames dropped because the renderer fell behind.
    pub frames_dropped: u64,
    pub frames_reused: u64,
}

#[derive(Debug)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<QueuedFrame>>,
    last_frame: Mutex<Option<QueuedFrame>>,
    capacity: usize,
    stopped: AtomicBool,
    pushed: AtomicU64,
    dropped: AtomicU64,
    reused: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            last_frame: Mutex::new(None),
            capacity,
            stopped: AtomicBool::new(false),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Queue a frame, dropping the oldest if full.
    ///
    /// Returns `false` once the queue has been stopped.
    pub fn push(&self, frame: QueuedFrame) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }

        let Ok(mut frames) = self.frames.try_lock() else {
            // Contention with the renderer: drop rather than block the decoder.
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return true;
        };

        if frames.len() >= self.capacity {
            frames.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(pts_ns = ?frame.pts_ns, "frame dropped: queue full");
        }
        frames.push_back(frame);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Take the oldest queued frame.
    pub fn try_pop(&self) -> Option<QueuedFrame> {
        let frame = self.frames.try_lock().ok()?.pop_front()?;
        if let Ok(mut last) = self.last_frame.try_lock() {
            *last = Some(frame.clone());
        }
        Some(frame)
    }

    /// A new frame if one is queued, otherwise the last rendered frame.
    pub fn get_render_frame(&self) -> Option<QueuedFrame> {
        if let Some(frame) = self.try_pop() {
            return Some(frame);
        }
        self.reused.fetch_add(1, Ordering::Relaxed);
        self.last_frame.try_lock().ok()?.clone()
    }

    /// Refuse further frames and release the buffered ones.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Ok(mut frames) = self.frames.lock() {
            frames.clear();
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.lock().map(|frames| frames.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            frames_pushed: self.pushed.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            frames_reused: self.reused.load(Ordering::Relaxed),
        }
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Shared handle to a frame queue.
pub type SharedFrameQueue = Arc<FrameQueue>;

pub fn new_shared_queue(capacity: usize) -> SharedFrameQueue {
    Arc::new(FrameQueue::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pts: u64) -> QueuedFrame {
        QueuedFrame::new(vec![pts as u8; 4], 1, 1, 4, Some(pts))
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = FrameQueue::new(2);
        queue.push(frame(1));
        queue.push(frame(2));
        queue.push(frame(3));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop().unwrap().pts_ns, Some(2));
        assert_eq!(queue.stats().frames_dropped, 1);
    }

    #[test]
    fn render_frame_reuses_last_when_empty() {
        let queue = FrameQueue::new(2);
        queue.push(frame(7));

        assert_eq!(queue.get_render_frame().unwrap().pts_ns, Some(7));
        assert!(queue.is_empty());
        assert_eq!(queue.get_render_frame().unwrap().pts_ns, Some(7));
        assert_eq!(queue.stats().frames_reused, 1);
    }

    #[test]
    fn stopped_queue_refuses_frames() {
        let queue = FrameQueue::new(2);
        queue.push(frame(1));
        queue.stop();

        assert!(queue.is_stopped());
        assert!(queue.is_empty());
        assert!(!queue.push(frame(2)));
    }

    #[test]
    fn rows_skip_stride_padding() {
        let mut data = vec![0u8; 16];
        data[8..12].copy_from_slice(&[9, 9, 9, 9]);
        let frame = QueuedFrame::new(data, 1, 2, 8, None);

        assert_eq!(frame.row(1), Some(&[9, 9, 9, 9][..]));
        assert_eq!(frame.row(2), None);
    }
}
