// SPDX-License-Identifier: MPL-2.0

//! The playback session: one video shown on every connected display.

use std::{collections::HashMap, fmt, rc::Rc, sync::Arc, time::Duration};

use deskvid_config::VideoEntry;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::{
    access::{BookmarkResolver, EntryStore, LiveGrant},
    error::SessionError,
    event::{Event, EventSender, Scheduler, SessionId, SurfaceEvent, Ticket},
    media::MediaEngine,
    notifier::Notifier,
    surface::{SurfaceOutcome, SurfaceState},
    window::{DesktopWindow, DisplayServer},
};

/// A claim on a session's access grant.
///
/// Windows, players and in-flight loads each hold a clone. When the last
/// clone drops, [`Event::LeasesDrained`] is posted and the manager releases
/// the grant on the main loop.
#[derive(Clone)]
pub struct GrantLease(Arc<LeaseInner>);

struct LeaseInner {
    session: SessionId,
    events: EventSender,
}

impl GrantLease {
    pub fn new(session: SessionId, events: EventSender) -> Self {
        Self(Arc::new(LeaseInner { session, events }))
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.0.session
    }
}

impl Drop for LeaseInner {
    fn drop(&mut self) {
        trace!(session = self.session.0, "grant leases drained");
        let _ = self.events.send(Event::LeasesDrained(self.session));
    }
}

impl fmt::Debug for GrantLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GrantLease").field(&self.0.session).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Playing,
}

/// Collaborators of the session manager, built once at startup.
pub struct SessionDeps {
    pub resolver: BookmarkResolver,
    pub displays: Box<dyn DisplayServer>,
    pub engine: Rc<dyn MediaEngine>,
    pub notifier: Rc<dyn Notifier>,
    pub scheduler: Box<dyn Scheduler>,
    pub events: EventSender,
    /// Delay before rebuilding windows after a display change.
    pub restart_delay: Duration,
}

struct Session {
    id: SessionId,
    entry: Uuid,
    name: String,
    windows: Vec<DesktopWindow>,
    lease: Option<GrantLease>,
    error_reported: bool,
}

pub struct WallpaperSessionManager {
    deps: SessionDeps,
    state: SessionState,
    current: Option<Session>,
    /// Live grants of current and torn down sessions, until their leases drain.
    grants: HashMap<SessionId, LiveGrant>,
    next_session: u64,
    restart_generation: u64,
    pending_restart: Option<(u64, Uuid)>,
}

impl WallpaperSessionManager {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            state: SessionState::Stopped,
            current: None,
            grants: HashMap::new(),
            next_session: 1,
            restart_generation: 0,
            pending_restart: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn active_entry(&self) -> Option<Uuid> {
        self.current.as_ref().map(|session| session.entry)
    }

    #[must_use]
    pub fn window_count(&self) -> usize {
        self.current
            .as_ref()
            .map_or(0, |session| session.windows.len())
    }

    #[must_use]
    pub fn surface_states(&self) -> Vec<SurfaceState> {
        self.current.as_ref().map_or_else(Vec::new, |session| {
            session
                .windows
                .iter()
                .map(|window| window.surface_state().clone())
                .collect()
        })
    }

    /// Grants still held for sessions whose leases have not drained.
    #[must_use]
    pub fn pending_releases(&self) -> usize {
        self.grants.len()
    }

    #[must_use]
    pub fn restart_pending(&self) -> bool {
        self.pending_restart.is_some()
    }

    /// Point a pending display-change restart at `entry`, keeping its delay.
    /// Returns `false` if no restart is pending.
    pub fn retarget_restart(&mut self, entry: Uuid) -> bool {
        match self.pending_restart.as_mut() {
            Some((generation, pending)) => {
                debug!(generation = *generation, %entry, "pending restart retargeted");
                *pending = entry;
                true
            }
            None => false,
        }
    }

    /// Show `entry` on every connected display.
    ///
    /// The entry is resolved before the running session is touched, so a
    /// failed start leaves the current wallpaper in place.
    pub fn start(
        &mut self,
        entry: &VideoEntry,
        entries: &mut dyn EntryStore,
    ) -> Result<(), SessionError> {
        self.pending_restart = None;

        if self.active_entry() == Some(entry.id) {
            debug!(video = entry.name, "already playing");
            return Ok(());
        }

        let grant = match self.deps.resolver.resolve(entry, entries) {
            Ok(grant) => grant,
            Err(why) => {
                error!(video = entry.name, %why, "cannot access video");
                self.deps
                    .notifier
                    .error(&format!("Cannot play {}: {why}", entry.name));
                return Err(why.into());
            }
        };

        let displays = self.deps.displays.displays();
        if displays.is_empty() {
            error!(video = entry.name, "no displays to play on");
            self.deps.notifier.error("No displays are connected");
            return Err(SessionError::NoDisplays);
        }

        self.teardown();
        self.state = SessionState::Starting;

        let id = SessionId(self.next_session);
        self.next_session += 1;
        let path = grant.path().to_path_buf();
        let lease = GrantLease::new(id, self.deps.events.clone());
        self.grants.insert(id, grant);

        let mut windows = Vec::with_capacity(displays.len());
        for screen in &displays {
            match DesktopWindow::open(
                screen,
                &path,
                lease.clone(),
                self.deps.displays.as_mut(),
                self.deps.engine.clone(),
                self.deps.events.clone(),
            ) {
                Ok(window) => windows.push(window),
                Err(why) => warn!(display = screen.name, %why, "skipping display"),
            }
        }

        if windows.is_empty() {
            self.state = SessionState::Stopped;
            self.deps
                .notifier
                .error(&format!("Cannot play {}: no desktop window", entry.name));
            return Err(SessionError::NoWindows);
        }

        info!(
            video = entry.name,
            session = id.0,
            windows = windows.len(),
            "session started"
        );

        let failure = windows.iter().find_map(|window| match window.surface_state() {
            SurfaceState::Failed(message) => Some(message.clone()),
            _ => None,
        });

        self.current = Some(Session {
            id,
            entry: entry.id,
            name: entry.name.clone(),
            windows,
            lease: Some(lease),
            error_reported: false,
        });
        self.state = SessionState::Playing;
        self.deps.notifier.started(&entry.name);

        if let Some(message) = failure {
            self.report_failure(&message);
        }

        Ok(())
    }

    /// Close every window of the running session. Returns `false` if nothing
    /// was playing.
    pub fn stop(&mut self) -> bool {
        self.pending_restart = None;
        if !self.teardown() {
            return false;
        }
        self.deps.notifier.stopped();
        true
    }

    fn teardown(&mut self) -> bool {
        let Some(mut session) = self.current.take() else {
            return false;
        };
        self.state = SessionState::Stopped;

        let windows = std::mem::take(&mut session.windows);
        debug!(session = session.id.0, windows = windows.len(), "stopping session");
        for mut window in windows {
            window.close();
        }

        // The grant is released once every other lease is gone too.
        session.lease = None;
        true
    }

    /// Rebuild the window set after displays were added or removed.
    ///
    /// Changes arriving while a rebuild is pending push it back.
    pub fn restart_on_display_change(&mut self) {
        let entry = match (self.pending_restart, self.current.as_ref()) {
            (Some((_, entry)), _) => entry,
            (None, Some(session)) if self.state == SessionState::Playing => session.entry,
            _ => return,
        };

        self.teardown();
        self.restart_generation += 1;
        let generation = self.restart_generation;
        self.pending_restart = Some((generation, entry));

        info!(
            generation,
            delay_ms = self.deps.restart_delay.as_millis() as u64,
            "display topology changed, rebuilding"
        );
        self.deps
            .scheduler
            .schedule(self.deps.restart_delay, Event::Restart { generation });
    }

    /// Route an event to the session. Events meant for someone else are
    /// handed back.
    pub fn handle_event(&mut self, event: Event, entries: &mut dyn EntryStore) -> Option<Event> {
        match event {
            Event::Surface(ticket, event) => self.surface_event(ticket, event),

            Event::LeasesDrained(id) => {
                if let Some(grant) = self.grants.remove(&id) {
                    debug!(session = id.0, path = %grant.path().display(), "releasing access grant");
                }
            }

            Event::Restart { generation } => match self.pending_restart {
                Some((pending, entry)) if pending == generation => {
                    self.pending_restart = None;
                    match entries.entry(entry) {
                        Some(entry) => {
                            if let Err(why) = self.start(&entry, entries) {
                                warn!(%why, "restart after display change failed");
                            }
                        }
                        None => warn!(%entry, "video removed before restart"),
                    }
                }
                _ => trace!(generation, "superseded restart ignored"),
            },

            other => return Some(other),
        }
        None
    }

    fn surface_event(&mut self, ticket: Ticket, event: SurfaceEvent) {
        let Some(window) = self.current.as_mut().and_then(|session| {
            session
                .windows
                .iter_mut()
                .find(|window| window.surface_id() == ticket.surface)
        }) else {
            trace!(surface = %ticket.surface, "completion for a closed surface dropped");
            return;
        };

        match window.handle(ticket, event) {
            Ok(Some(SurfaceOutcome::Failed(message))) => self.report_failure(&message),
            Ok(Some(SurfaceOutcome::Playing)) => {
                debug!(surface = %ticket.surface, "surface playing");
            }
            Ok(None) => (),
            Err(why) => trace!(%why, "completion dropped"),
        }
    }

    /// One notification per session, however many displays fail.
    fn report_failure(&mut self, message: &str) {
        let Some(session) = self.current.as_mut() else {
            return;
        };
        if session.error_reported {
            return;
        }
        session.error_reported = true;
        self.deps
            .notifier
            .error(&format!("Cannot play {}: {message}", session.name));
    }
}
