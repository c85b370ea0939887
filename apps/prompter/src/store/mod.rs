//! Session-scoped access to the realtime store.

pub mod firebase;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use realtime_store::{Store, StoreError, StorePath, Subscription, Value};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

use crate::state::{Field, SharedState, StatePatch};
use crate::sync::WriteTarget;

pub use firebase::FirebaseStore;
pub use status::{ConnectionStatus, PERMISSION_GUIDANCE, StatusBoard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("realtime store not reachable after {attempts} attempts")]
    TimedOut { attempts: u32 },
}

/// Polls connectivity up to `policy.attempts` times, `policy.interval` apart.
pub async fn wait_until_ready(
    mut connectivity: watch::Receiver<bool>,
    policy: ConnectPolicy,
) -> Result<(), ConnectError> {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if *connectivity.borrow_and_update() {
            debug!(target = "prompter::store", attempt, "store ready");
            return Ok(());
        }
        trace!(target = "prompter::store", attempt, "store not ready yet");
        match tokio::time::timeout(policy.interval, connectivity.changed()).await {
            Ok(Ok(())) | Err(_) => {}
            Ok(Err(_)) => break,
        }
    }
    if *connectivity.borrow() {
        return Ok(());
    }
    Err(ConnectError::TimedOut { attempts })
}

/// A connected store bound to one session document.
///
/// Writes are fire-and-forget: they are queued and applied in order by a
/// single writer task, and failures go to the [`StatusBoard`].
#[derive(Clone)]
pub struct StoreAdapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    store: Arc<dyn Store>,
    document: StorePath,
    status: StatusBoard,
    writes: mpsc::UnboundedSender<(StorePath, Value)>,
}

impl StoreAdapter {
    pub async fn connect(
        store: Arc<dyn Store>,
        document: StorePath,
        policy: ConnectPolicy,
        status: StatusBoard,
    ) -> Result<Self, ConnectError> {
        status.set(ConnectionStatus::Connecting);
        if let Err(err) = wait_until_ready(store.connectivity(), policy).await {
            status.report_unavailable(&err);
            return Err(err);
        }
        status.follow(store.connectivity());

        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(store.clone(), status.clone(), rx));
        if let Some(mut errors) = store.listener_errors() {
            let status = status.clone();
            tokio::spawn(async move {
                while let Ok(err) = errors.recv().await {
                    status.report("listen", &err);
                }
            });
        }

        info!(target = "prompter::store", document = %document, "session store connected");
        Ok(Self {
            inner: Arc::new(AdapterInner {
                store,
                document,
                status,
                writes,
            }),
        })
    }

    pub fn document(&self) -> &StorePath {
        &self.inner.document
    }

    pub fn status(&self) -> &StatusBoard {
        &self.inner.status
    }

    pub fn path_for(&self, target: WriteTarget) -> StorePath {
        match target {
            WriteTarget::Field(field) => self.inner.document.child(field.key()),
            WriteTarget::Setting(key) => self
                .inner
                .document
                .child(Field::Settings.key())
                .child(key),
        }
    }

    /// Seeds the document with `defaults` when it does not exist yet.
    /// Returns the existing document when there is one.
    pub async fn initialize_if_absent(
        &self,
        defaults: &SharedState,
    ) -> Result<Option<StatePatch>, StoreError> {
        let document = &self.inner.document;
        let existing = match self.inner.store.get(document).await {
            Ok(existing) => existing,
            Err(err) => {
                self.inner.status.report("read session", &err);
                return Err(err);
            }
        };
        if let Some(existing) = existing {
            debug!(target = "prompter::store", document = %document, "session document exists");
            return Ok(Some(StatePatch::from_document(&existing)));
        }
        if let Err(err) = self.inner.store.set(document, defaults.to_value()).await {
            self.inner.status.report("initialize session", &err);
            return Err(err);
        }
        info!(target = "prompter::store", document = %document, "session document initialized");
        Ok(None)
    }

    pub fn subscribe_field(&self, field: Field) -> Subscription {
        self.inner.store.subscribe(&self.inner.document.child(field.key()))
    }

    pub fn subscribe_document(&self) -> Subscription {
        self.inner.store.subscribe(&self.inner.document)
    }

    pub fn write(&self, target: WriteTarget, value: Value) {
        let path = self.path_for(target);
        trace!(target = "prompter::store", path = %path, value = %value, "queue write");
        if self.inner.writes.send((path, value)).is_err() {
            debug!(target = "prompter::store", "writer stopped; write dropped");
        }
    }
}

async fn write_loop(
    store: Arc<dyn Store>,
    status: StatusBoard,
    mut rx: mpsc::UnboundedReceiver<(StorePath, Value)>,
) {
    while let Some((path, value)) = rx.recv().await {
        if let Err(err) = store.set(&path, value).await {
            status.report(&format!("write {path}"), &err);
        }
    }
    trace!(target = "prompter::store", "writer finished");
}
