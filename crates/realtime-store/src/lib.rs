//! Realtime key-value store abstraction shared by the prompter roles.
//!
//! A store exposes a single JSON document tree. Writers `set` values at a
//! path, readers `subscribe` to a path and observe the latest value below it,
//! including the value present at subscription time.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

mod local;
mod path;

pub use local::{LocalStore, RecordedWrite};
pub use path::{merge_at, set_at, value_at, StorePath};
pub use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("permission denied at {path}: {reason}")]
    PermissionDenied { path: String, reason: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store transport error: {0}")]
    Transport(String),
    #[error("store decode error: {0}")]
    Decode(String),
    #[error("store channel closed")]
    Closed,
}

impl StoreError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, StoreError::PermissionDenied { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Registers a persistent listener on `path`. The returned subscription
    /// yields the current value first, then every change.
    fn subscribe(&self, path: &StorePath) -> Subscription;

    async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>>;

    async fn set(&self, path: &StorePath, value: Value) -> StoreResult<()>;

    /// Live connection state of the backing service.
    fn connectivity(&self) -> watch::Receiver<bool>;

    /// Failures raised by listeners after they were registered, such as a
    /// listener revoked by access rules. Stores whose listeners cannot fail
    /// return `None`.
    fn listener_errors(&self) -> Option<broadcast::Receiver<StoreError>> {
        None
    }
}

/// Listener handle returned by [`Store::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    path: StorePath,
    rx: watch::Receiver<Option<Value>>,
    primed: bool,
}

impl Subscription {
    pub fn new(path: StorePath, rx: watch::Receiver<Option<Value>>) -> Self {
        Self {
            path,
            rx,
            primed: false,
        }
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Waits for the next value at the subscribed path. The first call
    /// resolves immediately with the value present when subscribing.
    pub async fn next(&mut self) -> StoreResult<Option<Value>> {
        if self.primed {
            self.rx.changed().await.map_err(|_| StoreError::Closed)?;
        }
        self.primed = true;
        Ok(self.rx.borrow_and_update().clone())
    }
}
