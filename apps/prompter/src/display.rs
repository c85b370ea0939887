//! The display role: renders the script, runs auto-scroll, and follows the
//! remote through the session document.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use realtime_store::Store;
use sheet_source::SheetError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::scroll::{ScrollConfig, ScrollDriver, ScrollHooks, Viewport, VirtualViewport, top_for_percent};
use crate::session::{Role, SessionBinding};
use crate::state::{Field, Settings, SharedState};
use crate::store::{ConnectError, ConnectPolicy, ConnectionStatus, StatusBoard, StoreAdapter};
use crate::sync::{InboundScope, ScrollOrigin, StateObserver, SyncEngine, SyncTiming};

pub const NUDGE_PX: f64 = 50.0;

pub const MISSING_SHEET_MESSAGE: &str = "No Google Sheet URL provided.";

/// Rendering side of the display, beyond scrolling.
pub trait Surface: Send + Sync {
    fn show_text(&self, text: &str);
    fn apply_settings(&self, settings: &Settings);
    fn show_playing(&self, _playing: bool) {}
    fn toggle_fullscreen(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    TogglePlay,
    NudgeUp,
    NudgeDown,
    ToggleFullscreen,
    Reset,
}

impl KeyCommand {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            " " | "space" | "Space" => Some(KeyCommand::TogglePlay),
            "ArrowUp" | "up" | "k" => Some(KeyCommand::NudgeUp),
            "ArrowDown" | "down" | "j" => Some(KeyCommand::NudgeDown),
            "f" | "F" => Some(KeyCommand::ToggleFullscreen),
            "r" | "R" => Some(KeyCommand::Reset),
            _ => None,
        }
    }
}

/// Headless surface: a [`VirtualViewport`] plus the text it shows.
pub struct HeadlessSurface {
    viewport: VirtualViewport,
    text: Mutex<String>,
    settings: Mutex<Settings>,
    playing: Mutex<bool>,
    fullscreen: Mutex<bool>,
}

impl HeadlessSurface {
    pub fn new(client_height: f64) -> Self {
        Self {
            viewport: VirtualViewport::new(0.0, client_height),
            text: Mutex::new(String::new()),
            settings: Mutex::new(Settings::default()),
            playing: Mutex::new(false),
            fullscreen: Mutex::new(false),
        }
    }

    pub fn viewport(&self) -> &VirtualViewport {
        &self.viewport
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }

    pub fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    pub fn is_playing(&self) -> bool {
        *self.playing.lock()
    }

    pub fn is_fullscreen(&self) -> bool {
        *self.fullscreen.lock()
    }

    fn relayout(&self) {
        let lines = self.text.lock().lines().count().max(1);
        self.viewport.layout(lines, &self.settings.lock());
    }
}

impl Surface for HeadlessSurface {
    fn show_text(&self, text: &str) {
        *self.text.lock() = text.to_string();
        self.relayout();
    }

    fn apply_settings(&self, settings: &Settings) {
        *self.settings.lock() = settings.clone();
        self.relayout();
    }

    fn show_playing(&self, playing: bool) {
        *self.playing.lock() = playing;
    }

    fn toggle_fullscreen(&self) {
        let mut fullscreen = self.fullscreen.lock();
        *fullscreen = !*fullscreen;
    }
}

impl Viewport for HeadlessSurface {
    fn scroll_top(&self) -> f64 {
        self.viewport.scroll_top()
    }

    fn set_scroll_top(&self, top: f64) {
        self.viewport.set_scroll_top(top)
    }

    fn scroll_height(&self) -> f64 {
        self.viewport.scroll_height()
    }

    fn client_height(&self) -> f64 {
        self.viewport.client_height()
    }
}

/// Bridges driver callbacks to the sync engine.
struct DisplayHooks {
    engine: SyncEngine,
    surface: Arc<dyn Surface>,
}

impl ScrollHooks for DisplayHooks {
    fn speed(&self) -> f64 {
        self.engine.speed()
    }

    fn progress(&self, percent: f64) {
        self.engine.set_scroll_position(percent, ScrollOrigin::AutoScroll);
    }

    fn finished(&self, percent: f64) {
        self.engine.set_scroll_position(percent, ScrollOrigin::AutoScroll);
        self.engine.set_playing(false);
        self.surface.show_playing(false);
    }
}

#[derive(Clone)]
pub struct DisplaySession {
    inner: Arc<DisplayInner>,
}

struct DisplayInner {
    engine: SyncEngine,
    driver: ScrollDriver,
    viewport: Arc<dyn Viewport>,
    surface: Arc<dyn Surface>,
    status: StatusBoard,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DisplaySession {
    pub fn new<S>(
        binding: SessionBinding,
        surface: Arc<S>,
        timing: SyncTiming,
        scroll: ScrollConfig,
        status: StatusBoard,
    ) -> Self
    where
        S: Surface + Viewport + 'static,
    {
        let engine = SyncEngine::new(Role::Display, binding, timing, SharedState::default());
        let viewport: Arc<dyn Viewport> = surface.clone();
        let surface: Arc<dyn Surface> = surface;
        let hooks = Arc::new(DisplayHooks {
            engine: engine.clone(),
            surface: surface.clone(),
        });
        let driver = ScrollDriver::new(viewport.clone(), hooks, scroll);
        surface.apply_settings(&engine.snapshot().settings);

        let inner = Arc::new(DisplayInner {
            engine,
            driver,
            viewport,
            surface,
            status,
            tasks: Mutex::new(Vec::new()),
        });
        let weak = Arc::downgrade(&inner);
        let observer: Weak<dyn StateObserver> = weak;
        inner.engine.set_observer(observer);
        Self { inner }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.inner.engine
    }

    pub fn driver(&self) -> &ScrollDriver {
        &self.inner.driver
    }

    pub fn status(&self) -> &StatusBoard {
        &self.inner.status
    }

    pub fn is_local_only(&self) -> bool {
        self.inner.engine.is_local_only()
    }

    /// Routes every scroll of `viewport` through [`DisplaySession::on_scroll_observed`].
    pub fn observe_viewport(&self, viewport: &VirtualViewport) {
        let weak = Arc::downgrade(&self.inner);
        viewport.on_scroll(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_scroll_observed();
            }
        });
    }

    /// Binds to the session document and starts following it. A local-only
    /// display never touches the store.
    pub async fn connect(&self, store: Arc<dyn Store>, policy: ConnectPolicy) -> Result<(), ConnectError> {
        let inner = &self.inner;
        if inner.engine.is_local_only() {
            info!(target = "prompter::display", "no session; running local-only");
            inner.status.set(ConnectionStatus::LocalOnly);
            return Ok(());
        }
        let document = inner.engine.binding().document_path();
        let adapter = StoreAdapter::connect(store, document, policy, inner.status.clone()).await?;
        inner.engine.attach(adapter.clone());
        if let Err(err) = adapter.initialize_if_absent(&inner.engine.snapshot()).await {
            debug!(target = "prompter::display", error = %err, "session initialization skipped");
        }
        let handles = inner.engine.spawn_inbound(&adapter, InboundScope::Fields);
        inner.tasks.lock().extend(handles);
        Ok(())
    }

    /// Shows fetched script text, or the fetch error in its place.
    pub fn show_content(&self, content: Result<String, SheetError>) {
        match content {
            Ok(text) => {
                debug!(target = "prompter::display", lines = text.lines().count(), "script loaded");
                self.inner.surface.show_text(&text);
            }
            Err(err) => {
                warn!(target = "prompter::display", error = %err, "script unavailable");
                self.inner.surface.show_text(&format!("Error loading content: {err}"));
            }
        }
    }

    pub fn show_missing_sheet(&self) {
        warn!(target = "prompter::display", "launched without a sheet");
        self.inner.surface.show_text(MISSING_SHEET_MESSAGE);
    }

    pub fn handle_key(&self, command: KeyCommand) {
        match command {
            KeyCommand::TogglePlay => self.toggle_play(),
            KeyCommand::NudgeUp => self.nudge(-NUDGE_PX),
            KeyCommand::NudgeDown => self.nudge(NUDGE_PX),
            KeyCommand::ToggleFullscreen => self.inner.surface.toggle_fullscreen(),
            KeyCommand::Reset => self.reset(),
        }
    }

    pub fn toggle_play(&self) {
        if self.inner.driver.is_running() {
            self.inner.stop_playback();
        } else {
            self.inner.start_playback();
        }
    }

    pub fn set_speed(&self, speed: f64) {
        self.inner.engine.set_speed(speed);
    }

    /// A manual scroll by `delta` pixels.
    pub fn nudge(&self, delta: f64) {
        let viewport = &self.inner.viewport;
        viewport.set_scroll_top(viewport.scroll_top() + delta);
    }

    /// Back to the top, paused.
    pub fn reset(&self) {
        let inner = &self.inner;
        inner.driver.stop();
        inner.driver.jump_to(0.0);
        inner.engine.set_scroll_position(0.0, ScrollOrigin::Jump);
        inner.engine.set_playing(false);
        inner.surface.show_playing(false);
    }

    pub fn on_scroll_observed(&self) {
        self.inner.on_scroll_observed();
    }

    pub fn percent(&self) -> f64 {
        self.inner.driver.percent()
    }

    pub fn shutdown(&self) {
        self.inner.driver.stop();
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl DisplayInner {
    fn start_playback(&self) -> bool {
        if !self.driver.start() {
            return false;
        }
        self.engine.set_playing(true);
        self.surface.show_playing(true);
        true
    }

    fn stop_playback(&self) {
        self.driver.stop();
        self.engine.set_playing(false);
        self.surface.show_playing(false);
    }

    fn on_scroll_observed(&self) {
        if self.driver.is_programmatic() {
            return;
        }
        if self.engine.is_suppressed(Field::ScrollPosition) {
            return;
        }
        if self.driver.is_running() {
            debug!(target = "prompter::display", "manual scroll paused playback");
            self.stop_playback();
        }
        self.engine
            .set_scroll_position(self.driver.percent(), ScrollOrigin::Drag);
    }
}

impl StateObserver for DisplayInner {
    fn accepts(&self, field: Field) -> bool {
        // while auto-scrolling the display is the only source of positions
        !(field == Field::ScrollPosition && self.driver.is_running())
    }

    fn on_applied(&self, fields: &[Field], state: &SharedState) {
        for field in fields {
            match field {
                Field::ScrollPosition => {
                    let top = top_for_percent(self.viewport.as_ref(), state.scroll_position);
                    self.viewport.set_scroll_top(top);
                }
                Field::IsPlaying => {
                    if state.is_playing {
                        if !self.driver.is_running() && !self.driver.start() {
                            debug!(target = "prompter::display", "play requested with nothing to scroll");
                        }
                    } else {
                        self.driver.stop();
                    }
                    self.surface.show_playing(self.driver.is_running());
                }
                Field::Speed => {
                    debug!(target = "prompter::display", speed = state.speed, "speed updated");
                }
                Field::Settings => self.surface.apply_settings(&state.settings),
            }
        }
    }
}
