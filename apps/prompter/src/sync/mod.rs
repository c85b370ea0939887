//! Bidirectional mirroring of the session document.
//!
//! Each role keeps a local copy of [`SharedState`]. Outbound changes update
//! the copy first and then reach the store according to their
//! [`WritePolicy`]. Inbound values are merged into the copy, open a
//! [`Suppression`] window for their field, and are handed to the role's
//! [`StateObserver`]. Writes attempted while a field is suppressed are
//! deferred to the end of the window, and a write whose value the store is
//! already known to hold is skipped, so applying a remote value never echoes
//! it back.

pub mod policy;
pub mod suppression;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use realtime_store::{Subscription, Value};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace, warn};

use crate::session::{Role, SessionBinding};
use crate::state::{Field, Settings, SettingsPatch, SharedState, StatePatch, clamp_percent};
use crate::store::StoreAdapter;
use crate::telemetry;

pub use policy::{ScrollOrigin, SyncTiming, WritePolicy, WriteTarget};
pub use suppression::{Suppression, SuppressionState};

/// Receives inbound changes after they were merged into the local copy.
pub trait StateObserver: Send + Sync {
    /// Whether inbound values for `field` should be applied at all right now.
    fn accepts(&self, _field: Field) -> bool {
        true
    }

    fn on_applied(&self, fields: &[Field], state: &SharedState);
}

/// What a role listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundScope {
    /// One listener per top-level field.
    Fields,
    /// A single listener on the whole document.
    Document,
}

#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    role: Role,
    binding: SessionBinding,
    timing: SyncTiming,
    state: Mutex<EngineState>,
    adapter: RwLock<Option<StoreAdapter>>,
    observer: RwLock<Option<Weak<dyn StateObserver>>>,
}

struct EngineState {
    local: SharedState,
    last_applied_from_remote: Option<Instant>,
    suppression: Suppression,
    /// Last value known to be in the store for each target.
    stored: HashMap<WriteTarget, Value>,
    pending: HashMap<WriteTarget, Pending>,
    next_generation: u64,
}

struct Pending {
    generation: u64,
    task: JoinHandle<()>,
}

impl EngineState {
    fn value_of(&self, target: WriteTarget) -> Option<Value> {
        match target {
            WriteTarget::Field(field) => Some(self.local.field_value(field)),
            WriteTarget::Setting(key) => self.local.settings.value_of(key),
        }
    }

    fn is_pending(&self, target: WriteTarget) -> bool {
        self.pending.contains_key(&target)
    }

    /// The part of an inbound `patch` that may replace local values. A local
    /// change still waiting for its write wins over whatever the store held.
    fn without_pending(&self, patch: &StatePatch) -> StatePatch {
        let mut patch = patch
            .clone()
            .retain(|field| !self.is_pending(WriteTarget::Field(field)));
        if let Some(settings) = patch.settings.as_mut() {
            for key in Settings::KEYS {
                if self.is_pending(WriteTarget::Setting(key)) {
                    settings.clear(key);
                }
            }
            if settings.is_empty() {
                patch.settings = None;
            }
        }
        patch
    }

    /// Records `value` as stored for `target`. The whole settings record and
    /// its individual keys overlap, so writing one makes the other unknown.
    fn mark_stored(&mut self, target: WriteTarget, value: Value) {
        match target {
            WriteTarget::Field(Field::Settings) => {
                self.stored
                    .retain(|stored, _| !matches!(stored, WriteTarget::Setting(_)));
            }
            WriteTarget::Setting(_) => {
                self.stored.remove(&WriteTarget::Field(Field::Settings));
            }
            WriteTarget::Field(_) => {}
        }
        self.stored.insert(target, value);
    }
}

fn stored_targets(patch: &StatePatch) -> Vec<(WriteTarget, Value)> {
    let mut targets = Vec::new();
    if let Some(position) = patch.scroll_position {
        targets.push((WriteTarget::Field(Field::ScrollPosition), json!(position)));
    }
    if let Some(playing) = patch.is_playing {
        targets.push((WriteTarget::Field(Field::IsPlaying), json!(playing)));
    }
    if let Some(speed) = patch.speed {
        targets.push((WriteTarget::Field(Field::Speed), json!(speed)));
    }
    if let Some(settings) = &patch.settings {
        let mut scratch = Settings::default();
        scratch.merge(settings);
        for key in settings.keys() {
            if let Some(value) = scratch.value_of(key) {
                targets.push((WriteTarget::Setting(key), value));
            }
        }
    }
    targets
}

impl SyncEngine {
    pub fn new(role: Role, binding: SessionBinding, timing: SyncTiming, initial: SharedState) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                role,
                binding,
                timing,
                state: Mutex::new(EngineState {
                    local: initial,
                    last_applied_from_remote: None,
                    suppression: Suppression::new(timing.suppression_window),
                    stored: HashMap::new(),
                    pending: HashMap::new(),
                    next_generation: 0,
                }),
                adapter: RwLock::new(None),
                observer: RwLock::new(None),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn binding(&self) -> &SessionBinding {
        &self.inner.binding
    }

    pub fn timing(&self) -> SyncTiming {
        self.inner.timing
    }

    pub fn is_local_only(&self) -> bool {
        !self.inner.binding.is_bound()
    }

    /// Connects outbound writes to `adapter`. Refused for local-only roles.
    pub fn attach(&self, adapter: StoreAdapter) -> bool {
        if self.is_local_only() {
            warn!(target = "prompter::sync", role = %self.inner.role, "local-only role cannot attach a store");
            return false;
        }
        *self.inner.adapter.write() = Some(adapter);
        true
    }

    pub fn is_attached(&self) -> bool {
        self.inner.adapter.read().is_some()
    }

    pub fn set_observer(&self, observer: Weak<dyn StateObserver>) {
        *self.inner.observer.write() = Some(observer);
    }

    pub fn snapshot(&self) -> SharedState {
        self.inner.state.lock().local.clone()
    }

    pub fn speed(&self) -> f64 {
        self.inner.state.lock().local.speed
    }

    pub fn last_applied_from_remote(&self) -> Option<Instant> {
        self.inner.state.lock().last_applied_from_remote
    }

    pub fn is_suppressed(&self, field: Field) -> bool {
        self.inner
            .state
            .lock()
            .suppression
            .is_suppressed(field, Instant::now())
    }

    fn adapter(&self) -> Option<StoreAdapter> {
        self.inner.adapter.read().clone()
    }

    fn observer(&self) -> Option<Arc<dyn StateObserver>> {
        self.inner.observer.read().as_ref().and_then(Weak::upgrade)
    }

    /// Merges an inbound update into the local copy and notifies the observer
    /// of whatever changed. Returns the changed fields.
    pub fn apply_inbound(&self, patch: StatePatch) -> Vec<Field> {
        let observer = self.observer();
        let patch = match &observer {
            Some(observer) => patch.retain(|field| observer.accepts(field)),
            None => patch,
        };
        if patch.is_empty() {
            return Vec::new();
        }

        let now = Instant::now();
        let (changed, snapshot) = {
            let mut state = self.inner.state.lock();
            state.last_applied_from_remote = Some(now);
            for field in patch.fields() {
                state.suppression.suppress(field, now);
            }
            for (target, value) in stored_targets(&patch) {
                state.stored.insert(target, value);
            }
            let applicable = state.without_pending(&patch);
            let changed = state.local.apply(&applicable);
            (changed, state.local.clone())
        };

        if !changed.is_empty() {
            debug!(target = "prompter::sync", role = %self.inner.role, fields = ?changed, "applied inbound update");
            if let Some(observer) = observer {
                observer.on_applied(&changed, &snapshot);
            }
        }
        changed
    }

    /// Starts listening for inbound updates on `adapter`.
    pub fn spawn_inbound(&self, adapter: &StoreAdapter, scope: InboundScope) -> Vec<JoinHandle<()>> {
        match scope {
            InboundScope::Document => vec![self.spawn_listener(adapter.subscribe_document(), None)],
            InboundScope::Fields => Field::ALL
                .iter()
                .map(|field| self.spawn_listener(adapter.subscribe_field(*field), Some(*field)))
                .collect(),
        }
    }

    fn spawn_listener(&self, mut subscription: Subscription, field: Option<Field>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                match subscription.next().await {
                    Ok(Some(value)) => {
                        let patch = match field {
                            Some(field) => StatePatch::from_field(field, &value),
                            None => StatePatch::from_document(&value),
                        };
                        engine.apply_inbound(patch);
                    }
                    Ok(None) => {
                        trace!(target = "prompter::sync", path = %subscription.path(), "no value at path");
                    }
                    Err(err) => {
                        debug!(target = "prompter::sync", path = %subscription.path(), error = %err, "listener closed");
                        break;
                    }
                }
            }
        })
    }

    pub fn set_playing(&self, playing: bool) {
        self.inner.state.lock().local.is_playing = playing;
        self.dispatch(WriteTarget::Field(Field::IsPlaying), WritePolicy::Immediate);
    }

    /// Ignored unless `speed` is finite and positive.
    pub fn set_speed(&self, speed: f64) {
        if !(speed.is_finite() && speed > 0.0) {
            warn!(target = "prompter::sync", speed, "ignoring invalid speed");
            return;
        }
        self.inner.state.lock().local.speed = speed;
        self.dispatch(WriteTarget::Field(Field::Speed), self.inner.timing.speed_policy());
    }

    pub fn set_scroll_position(&self, percent: f64, origin: ScrollOrigin) {
        self.inner.state.lock().local.scroll_position = clamp_percent(percent);
        self.dispatch(
            WriteTarget::Field(Field::ScrollPosition),
            self.inner.timing.scroll_policy(origin),
        );
    }

    /// Merges `patch` locally and writes each populated key on its own.
    pub fn update_settings(&self, patch: &SettingsPatch) {
        self.inner.state.lock().local.settings.merge(patch);
        for key in patch.keys() {
            self.dispatch(WriteTarget::Setting(key), WritePolicy::Immediate);
        }
    }

    /// Replaces the whole settings record locally and in the store.
    pub fn replace_settings(&self, settings: Settings) {
        self.inner.state.lock().local.settings = settings;
        self.dispatch(WriteTarget::Field(Field::Settings), WritePolicy::Immediate);
    }

    fn dispatch(&self, target: WriteTarget, policy: WritePolicy) {
        if self.is_local_only() || !self.is_attached() {
            trace!(target = "prompter::sync", field = target.label(), "no store; write skipped");
            return;
        }
        match policy {
            WritePolicy::Immediate => {
                self.cancel_pending(target);
                self.flush(target);
            }
            WritePolicy::Debounce(delay) => self.schedule(target, Instant::now() + delay),
        }
    }

    /// Arms (or re-arms) the single pending write for `target`.
    fn schedule(&self, target: WriteTarget, at: Instant) {
        let engine = self.clone();
        let mut state = self.inner.state.lock();
        state.next_generation += 1;
        let generation = state.next_generation;
        let task = tokio::spawn(async move {
            sleep_until(at).await;
            engine.fire(target, generation);
        });
        if let Some(previous) = state.pending.insert(target, Pending { generation, task }) {
            previous.task.abort();
        }
    }

    fn fire(&self, target: WriteTarget, generation: u64) {
        {
            let mut state = self.inner.state.lock();
            let current = state.pending.get(&target).map(|pending| pending.generation);
            if current != Some(generation) {
                return;
            }
            state.pending.remove(&target);
        }
        self.flush(target);
    }

    fn cancel_pending(&self, target: WriteTarget) {
        if let Some(pending) = self.inner.state.lock().pending.remove(&target) {
            pending.task.abort();
        }
    }

    /// Writes the current local value for `target`, unless its field is
    /// suppressed (then the write waits for the window to close) or the
    /// store already holds that value.
    fn flush(&self, target: WriteTarget) {
        let Some(adapter) = self.adapter() else {
            return;
        };
        let now = Instant::now();
        let value = {
            let mut state = self.inner.state.lock();
            match state.suppression.expires_at(target.field(), now) {
                Some(expires_at) => Err(expires_at),
                None => {
                    let Some(value) = state.value_of(target) else {
                        return;
                    };
                    if state.stored.get(&target) == Some(&value) {
                        trace!(target = "prompter::sync", field = target.label(), "store already current");
                        return;
                    }
                    state.mark_stored(target, value.clone());
                    Ok(value)
                }
            }
        };
        match value {
            Ok(value) => {
                adapter.write(target, value);
                telemetry::record_write(target.label());
            }
            Err(expires_at) => {
                trace!(target = "prompter::sync", field = target.label(), "suppressed; write deferred");
                self.schedule(target, expires_at);
            }
        }
    }
}
