// SPDX-License-Identifier: MPL-2.0

//! Fakes for the platform seams, and a calloop harness that pumps the event
//! channel the way the daemon's main loop does.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    rc::Rc,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use calloop::{EventLoop, LoopHandle, channel};
use deskvid_config::VideoEntry;
use uuid::Uuid;

use crate::{
    access::{AccessProvider, EntryStore, Resolved},
    error::{AccessError, IoError, MediaError, WindowError},
    event::{Event, EventSender, Scheduler, SurfaceEvent, Ticket},
    frame_queue::new_shared_queue,
    media::{
        AssetInfo, MediaEngine, ObserverKind, ObserverToken, Player, PlayerConfig, Thumbnailer,
        TrackInfo, Transcoder, VideoGravity, VideoLayer,
    },
    notifier::Notifier,
    session::GrantLease,
    surface::ContentView,
    window::{DisplayInfo, DisplayServer, PlatformWindow, Rect, WindowConfig},
};

static SCRATCH: AtomicUsize = AtomicUsize::new(0);

/// A fresh directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "deskvid-test-{}-{name}-{}",
        std::process::id(),
        SCRATCH.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// A placeholder video file named `<name>.mp4` in a fresh directory.
pub fn scratch_video(name: &str) -> PathBuf {
    let path = scratch_dir(name).join(format!("{name}.mp4"));
    fs::write(&path, b"not really a video").unwrap();
    path
}

impl EntryStore for Vec<VideoEntry> {
    fn entry(&self, id: Uuid) -> Option<VideoEntry> {
        self.iter().find(|entry| entry.id == id).cloned()
    }

    fn store_token(&mut self, id: Uuid, token: Vec<u8>) {
        if let Some(entry) = self.iter_mut().find(|entry| entry.id == id) {
            entry.bookmark_data = Some(token);
        }
    }
}

#[derive(Default)]
struct ProviderState {
    stale: HashSet<Vec<u8>>,
    denied: HashSet<PathBuf>,
    unresolvable: HashSet<PathBuf>,
    fail_minting: bool,
    minted: usize,
    activations: usize,
    releases: usize,
    active: HashMap<PathBuf, usize>,
}

/// Access provider with textual tokens of the form `token:<path>[#n]`.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<ProviderState>,
}

impl FakeProvider {
    pub fn token(path: &Path) -> Vec<u8> {
        format!("token:{}", path.display()).into_bytes()
    }

    pub fn mark_stale(&self, token: &[u8]) {
        self.state.lock().unwrap().stale.insert(token.to_vec());
    }

    pub fn deny(&self, path: &Path) {
        self.state.lock().unwrap().denied.insert(path.to_path_buf());
    }

    pub fn unresolvable(&self, path: &Path) {
        self.state.lock().unwrap().unresolvable.insert(path.to_path_buf());
    }

    pub fn fail_minting(&self) {
        self.state.lock().unwrap().fail_minting = true;
    }

    pub fn minted(&self) -> usize {
        self.state.lock().unwrap().minted
    }

    pub fn activations(&self) -> usize {
        self.state.lock().unwrap().activations
    }

    pub fn releases(&self) -> usize {
        self.state.lock().unwrap().releases
    }

    pub fn outstanding(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.activations - state.releases
    }
}

impl AccessProvider for FakeProvider {
    fn create_token(&self, path: &Path) -> Result<Vec<u8>, AccessError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_minting {
            return Err(AccessError::ResolutionFailed("minting disabled".into()));
        }
        state.minted += 1;
        Ok(format!("token:{}#{}", path.display(), state.minted).into_bytes())
    }

    fn resolve_token(&self, token: &[u8]) -> Result<Resolved, AccessError> {
        let state = self.state.lock().unwrap();
        let text = std::str::from_utf8(token)
            .ok()
            .and_then(|text| text.strip_prefix("token:"))
            .ok_or_else(|| AccessError::ResolutionFailed("not a token".into()))?;
        let path = match text.rsplit_once('#') {
            Some((path, serial)) if serial.parse::<usize>().is_ok() => path,
            _ => text,
        };
        let path = PathBuf::from(path);
        if state.unresolvable.contains(&path) {
            return Err(AccessError::ResolutionFailed(format!(
                "{} is gone",
                path.display()
            )));
        }
        Ok(Resolved {
            stale: state.stale.contains(token),
            path,
        })
    }

    fn start_access(&self, path: &Path) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.denied.contains(path) {
            return false;
        }
        state.activations += 1;
        *state.active.entry(path.to_path_buf()).or_default() += 1;
        true
    }

    fn stop_access(&self, path: &Path) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if let Some(count) = state.active.get_mut(path).filter(|count| **count > 0) {
            *count -= 1;
            state.releases += 1;
        }
    }
}

/// Ordered record of calls made on the fakes.
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// Entries whose first word is `name`.
    pub fn count(&self, name: &str) -> usize {
        self.0
            .borrow()
            .iter()
            .filter(|entry| entry.split(' ').next() == Some(name))
            .count()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

type HeldLoad = (Ticket, GrantLease, EventSender, Result<AssetInfo, MediaError>);

/// Media engine answering loads from a table; unknown paths load as a
/// playable 1280x720 video.
pub struct FakeEngine {
    log: Log,
    assets: RefCell<HashMap<PathBuf, Result<AssetInfo, MediaError>>>,
    hold: Cell<bool>,
    held: RefCell<Vec<HeldLoad>>,
    tickets: RefCell<Vec<Ticket>>,
    built: RefCell<Vec<PathBuf>>,
}

impl FakeEngine {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            assets: RefCell::default(),
            hold: Cell::new(false),
            held: RefCell::default(),
            tickets: RefCell::default(),
            built: RefCell::default(),
        }
    }

    pub fn set_asset(&self, path: &Path, asset: Result<AssetInfo, MediaError>) {
        self.assets.borrow_mut().insert(path.to_path_buf(), asset);
    }

    /// Keep loads in flight until [`Self::release_loads`].
    pub fn hold_loads(&self) {
        self.hold.set(true);
    }

    pub fn release_loads(&self) {
        self.hold.set(false);
        for (ticket, lease, events, result) in self.held.borrow_mut().drain(..) {
            let _ = events.send(Event::Surface(ticket, SurfaceEvent::Loaded(result)));
            drop(lease);
        }
    }

    pub fn last_ticket(&self) -> Option<Ticket> {
        self.tickets.borrow().last().copied()
    }

    pub fn built(&self) -> Vec<PathBuf> {
        self.built.borrow().clone()
    }
}

impl MediaEngine for FakeEngine {
    fn load(&self, path: &Path, ticket: Ticket, lease: GrantLease, events: EventSender) {
        self.log.push("load");
        self.tickets.borrow_mut().push(ticket);
        let result = self.assets.borrow().get(path).cloned().unwrap_or_else(|| {
            Ok(AssetInfo {
                playable: true,
                tracks: vec![TrackInfo::video(1280, 720), TrackInfo::audio()],
                duration: Some(Duration::from_secs(30)),
            })
        });

        if self.hold.get() {
            self.held.borrow_mut().push((ticket, lease, events, result));
        } else {
            let _ = events.send(Event::Surface(ticket, SurfaceEvent::Loaded(result)));
        }
    }

    fn build_player(
        &self,
        path: &Path,
        _asset: &AssetInfo,
        config: &PlayerConfig,
        _ticket: Ticket,
        lease: GrantLease,
        _events: EventSender,
    ) -> Result<Box<dyn Player>, MediaError> {
        self.log.push("build");
        self.built.borrow_mut().push(path.to_path_buf());
        Ok(Box::new(FakePlayer {
            log: self.log.clone(),
            layer: VideoLayer::new(new_shared_queue(2), config.gravity),
            observers: HashMap::new(),
            next_observer: 0,
            _lease: lease,
        }))
    }
}

pub struct FakePlayer {
    log: Log,
    layer: VideoLayer,
    observers: HashMap<ObserverToken, ObserverKind>,
    next_observer: u64,
    _lease: GrantLease,
}

impl Player for FakePlayer {
    fn play(&mut self) {
        self.log.push("play");
    }

    fn pause(&mut self) {
        self.log.push("pause");
    }

    fn seek_to_start(&mut self) {
        self.log.push("seek_to_start");
    }

    fn add_observer(&mut self, kind: ObserverKind) -> ObserverToken {
        self.next_observer += 1;
        let token = ObserverToken(self.next_observer);
        self.observers.insert(token, kind);
        self.log.push(format!("add_observer {kind:?}"));
        token
    }

    fn remove_observer(&mut self, token: ObserverToken) {
        if let Some(kind) = self.observers.remove(&token) {
            self.log.push(format!("remove_observer {kind:?}"));
        }
    }

    fn layer(&self) -> VideoLayer {
        self.layer.clone()
    }

    fn clear_item(&mut self) {
        self.log.push("clear_item");
    }
}

impl Drop for FakePlayer {
    fn drop(&mut self) {
        self.log.push("drop_player");
    }
}

pub struct FakeView {
    log: Log,
    layer: Option<VideoLayer>,
    placeholder: Option<String>,
}

impl FakeView {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            layer: None,
            placeholder: None,
        }
    }

    pub fn has_layer(&self) -> bool {
        self.layer.is_some()
    }

    pub fn placeholder(&self) -> Option<String> {
        self.placeholder.clone()
    }
}

impl ContentView for FakeView {
    fn attach_layer(&mut self, layer: VideoLayer) {
        assert_eq!(layer.gravity, VideoGravity::ResizeAspectFill);
        self.log.push("attach_layer");
        self.placeholder = None;
        self.layer = Some(layer);
    }

    fn detach_layer(&mut self) -> Option<VideoLayer> {
        let layer = self.layer.take()?;
        self.log.push("detach_layer");
        Some(layer)
    }

    fn show_placeholder(&mut self, message: &str) {
        self.log.push(format!("placeholder {message}"));
        self.placeholder = Some(message.to_owned());
    }
}

#[derive(Default)]
struct DisplaysState {
    displays: Vec<DisplayInfo>,
    open: usize,
    max_open: usize,
}

/// Display server with a configurable set of 1920x1080 displays.
#[derive(Clone)]
pub struct FakeDisplays {
    log: Log,
    state: Rc<RefCell<DisplaysState>>,
}

impl FakeDisplays {
    pub fn new(log: Log, count: u32) -> Self {
        let displays = Self {
            log,
            state: Rc::default(),
        };
        displays.set_count(count);
        displays
    }

    pub fn display(id: u32, width: u32, height: u32) -> DisplayInfo {
        DisplayInfo {
            id,
            name: format!("DP-{id}"),
            frame: Rect {
                x: (id * width) as i32,
                y: 0,
                width,
                height,
            },
        }
    }

    pub fn set_count(&self, count: u32) {
        self.state.borrow_mut().displays =
            (0..count).map(|id| Self::display(id, 1920, 1080)).collect();
    }

    pub fn open_windows(&self) -> usize {
        self.state.borrow().open
    }

    /// Most windows ever open at the same time.
    pub fn max_open_windows(&self) -> usize {
        self.state.borrow().max_open
    }

    pub fn placeholders(&self) -> usize {
        self.log.count("placeholder")
    }
}

impl DisplayServer for FakeDisplays {
    fn displays(&self) -> Vec<DisplayInfo> {
        self.state.borrow().displays.clone()
    }

    fn create_window(
        &mut self,
        display: &DisplayInfo,
        config: &WindowConfig,
    ) -> Result<Box<dyn PlatformWindow>, WindowError> {
        let mut state = self.state.borrow_mut();
        if !state.displays.iter().any(|known| known.id == display.id) {
            return Err(WindowError::UnknownDisplay(display.id));
        }
        assert!(config.mouse_transparent && !config.activates);

        state.open += 1;
        state.max_open = state.max_open.max(state.open);
        self.log.push(format!("create_window {}", display.name));
        Ok(Box::new(FakeWindow {
            view: FakeView::new(self.log.clone()),
            state: self.state.clone(),
            log: self.log.clone(),
        }))
    }
}

struct FakeWindow {
    view: FakeView,
    state: Rc<RefCell<DisplaysState>>,
    log: Log,
}

impl PlatformWindow for FakeWindow {
    fn content(&mut self) -> &mut dyn ContentView {
        &mut self.view
    }

    fn close(&mut self) {
        self.state.borrow_mut().open -= 1;
        self.log.push("close_window");
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    started: RefCell<Vec<String>>,
    stopped: Cell<usize>,
    errors: RefCell<Vec<String>>,
}

impl RecordingNotifier {
    pub fn started(&self) -> Vec<String> {
        self.started.borrow().clone()
    }

    pub fn stopped(&self) -> usize {
        self.stopped.get()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn started(&self, name: &str) {
        self.started.borrow_mut().push(name.to_owned());
    }

    fn stopped(&self) {
        self.stopped.set(self.stopped.get() + 1);
    }

    fn error(&self, message: &str) {
        self.errors.borrow_mut().push(message.to_owned());
    }
}

/// Scheduler whose events fire only when a test takes them.
#[derive(Clone, Default)]
pub struct ManualScheduler(Rc<RefCell<Vec<(Duration, Event)>>>);

impl ManualScheduler {
    pub fn take(&self) -> Vec<Event> {
        self.0.borrow_mut().drain(..).map(|(_, event)| event).collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, after: Duration, event: Event) {
        self.0.borrow_mut().push((after, event));
    }
}

/// Thumbnailer producing a fixed payload, or failing.
#[derive(Default)]
pub struct FakeThumbnailer {
    pub fail: bool,
}

impl Thumbnailer for FakeThumbnailer {
    fn thumbnail(&self, path: &Path, _width: u32) -> Result<Vec<u8>, MediaError> {
        if self.fail || !path.exists() {
            return Err(MediaError::Missing(path.to_path_buf()));
        }
        Ok(b"\x89PNG thumb".to_vec())
    }
}

/// Transcoder copying the source, or failing after writing a partial file.
#[derive(Default)]
pub struct FakeTranscoder {
    pub fail: bool,
}

impl Transcoder for FakeTranscoder {
    fn transcode(&self, source: &Path, dest: &Path) -> Result<(), IoError> {
        if self.fail {
            let _ = fs::write(dest, b"partial");
            return Err(IoError::Transcode("encoder missing".into()));
        }
        fs::copy(source, dest).map_err(|source| IoError::Write {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

/// A calloop loop receiving [`Event`]s from the channel under test.
pub struct Harness {
    event_loop: EventLoop<'static, Vec<Event>>,
    sender: EventSender,
    received: Vec<Event>,
}

impl Harness {
    pub fn new() -> Self {
        let event_loop = EventLoop::try_new().unwrap();
        let (sender, receiver) = channel::channel();
        event_loop
            .handle()
            .insert_source(receiver, |event, _, received: &mut Vec<Event>| {
                if let channel::Event::Msg(event) = event {
                    received.push(event);
                }
            })
            .map_err(|why| why.error)
            .unwrap();

        Self {
            event_loop,
            sender,
            received: Vec::new(),
        }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn handle(&self) -> LoopHandle<'static, Vec<Event>> {
        self.event_loop.handle()
    }

    /// Events already posted.
    pub fn drain(&mut self) -> Vec<Event> {
        self.wait(Duration::ZERO)
    }

    /// Events arriving within `timeout`.
    pub fn wait(&mut self, timeout: Duration) -> Vec<Event> {
        self.event_loop
            .dispatch(Some(timeout), &mut self.received)
            .unwrap();
        std::mem::take(&mut self.received)
    }
}
