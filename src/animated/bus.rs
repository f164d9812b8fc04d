// SPDX-License-Identifier: MPL-2.0

//! Threads that forward messages from a decoder's bus.
//!
//! A bus can be flushed while its pipeline shuts down, so a watcher never
//! relies on a message to end. It polls with a timeout and checks a stop
//! flag in between.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

/// Longest a watcher blocks waiting for one message.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Ends its watcher thread when stopped or dropped.
#[derive(Debug)]
pub struct BusWatch {
    stop: Arc<AtomicBool>,
}

impl BusWatch {
    /// Spawn a thread calling `handle` for every message `next` yields.
    ///
    /// `next` waits at most the given timeout and returns `None` when nothing
    /// arrived. Both closures are dropped when the thread ends.
    pub fn spawn<M, N, H>(name: &str, mut next: N, mut handle: H) -> io::Result<Self>
    where
        N: FnMut(Duration) -> Option<M> + Send + 'static,
        H: FnMut(M) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = stop.clone();
        let thread_name = name.to_owned();

        thread::Builder::new().name(name.to_owned()).spawn(move || {
            while !stopped.load(Ordering::Acquire) {
                if let Some(message) = next(POLL_INTERVAL) {
                    if stopped.load(Ordering::Acquire) {
                        break;
                    }
                    handle(message);
                }
            }
            tracing::trace!(thread = thread_name, "bus watcher finished");
        })?;

        Ok(Self { stop })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

impl Drop for BusWatch {
    fn drop(&mut self) {
        self.stop();
    }
}
