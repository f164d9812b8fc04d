// SPDX-License-Identifier: MPL-2.0

//! Messages marshalled back onto the main event loop.
//!
//! Loader threads, GStreamer bus threads and worker jobs never touch windows,
//! layers or players. They post an [`Event`] through an [`EventSender`] and
//! the main loop routes it to its owner.

use std::{fmt, path::PathBuf, time::Duration};

use calloop::{
    LoopHandle,
    channel::Sender,
    timer::{TimeoutAction, Timer},
};
use uuid::Uuid;

use crate::{
    error::{IoError, MediaError},
    media::AssetInfo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Identifies the surface and the epoch an asynchronous completion was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub surface: SurfaceId,
    pub epoch: u64,
}

#[derive(Debug)]
pub enum SurfaceEvent {
    /// Asset metadata finished loading.
    Loaded(Result<AssetInfo, MediaError>),
    /// Playback reached the end of the media.
    EndOfMedia,
    /// Playback rate changed; zero means playback halted.
    RateChanged(f32),
    /// The decode pipeline failed while playing.
    Failed(MediaError),
}

#[derive(Debug)]
pub enum Event {
    Surface(Ticket, SurfaceEvent),
    /// Every holder of a session's grant lease has let go of it.
    LeasesDrained(SessionId),
    /// Deferred rebuild after a display topology change.
    Restart { generation: u64 },
    Thumbnail {
        entry: Uuid,
        result: Result<Vec<u8>, MediaError>,
    },
    Transcoded {
        entry: Uuid,
        result: Result<PathBuf, IoError>,
    },
    /// The persisted library or state changed on disk.
    LibraryChanged,
}

pub type EventSender = Sender<Event>;

/// Posts an event after a delay.
pub trait Scheduler {
    fn schedule(&self, after: Duration, event: Event);
}

/// Schedules events with calloop timers on the main loop.
pub struct LoopScheduler<D: 'static> {
    handle: LoopHandle<'static, D>,
    events: EventSender,
}

impl<D: 'static> LoopScheduler<D> {
    pub fn new(handle: LoopHandle<'static, D>, events: EventSender) -> Self {
        Self { handle, events }
    }
}

impl<D: 'static> Scheduler for LoopScheduler<D> {
    fn schedule(&self, after: Duration, event: Event) {
        let events = self.events.clone();
        let mut event = Some(event);
        let inserted = self
            .handle
            .insert_source(Timer::from_duration(after), move |_, _, _| {
                if let Some(event) = event.take() {
                    let _ = events.send(event);
                }
                TimeoutAction::Drop
            });

        if let Err(why) = inserted {
            tracing::error!(error = %why.error, "failed to schedule deferred event");
        }
    }
}
