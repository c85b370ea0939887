use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use crate::path::{set_at, value_at, StorePath};
use crate::{Store, StoreError, StoreResult, Subscription};

/// A write accepted by [`LocalStore`], kept so callers can audit write volume.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub path: StorePath,
    pub value: Value,
}

/// In-memory store for tests and offline runs.
///
/// Behaves like a realtime database with a single client: writes land in
/// one JSON tree, listeners on any overlapping path are notified when the
/// value at their path changes, and unchanged writes are not re-delivered.
#[derive(Debug)]
pub struct LocalStore {
    document: RwLock<Value>,
    watchers: RwLock<HashMap<StorePath, watch::Sender<Option<Value>>>>,
    connected: watch::Sender<bool>,
    denied: RwLock<Vec<StorePath>>,
    writes: Mutex<Vec<RecordedWrite>>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    pub fn new() -> Self {
        Self::with_connectivity(true)
    }

    /// A store that reports itself disconnected until [`LocalStore::set_connected`].
    pub fn offline() -> Self {
        Self::with_connectivity(false)
    }

    fn with_connectivity(connected: bool) -> Self {
        Self {
            document: RwLock::new(Value::Null),
            watchers: RwLock::new(HashMap::new()),
            connected: watch::channel(connected).0,
            denied: RwLock::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    /// Rejects every read and write at or below `prefix` with `PermissionDenied`.
    pub fn deny(&self, prefix: StorePath) {
        self.denied.write().push(prefix);
    }

    pub fn allow_all(&self) {
        self.denied.write().clear();
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    pub fn writes_at(&self, path: &StorePath) -> Vec<RecordedWrite> {
        self.writes
            .lock()
            .iter()
            .filter(|write| &write.path == path)
            .cloned()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    pub fn snapshot(&self, path: &StorePath) -> Option<Value> {
        value_at(&self.document.read(), path.segments()).cloned()
    }

    fn check_access(&self, path: &StorePath) -> StoreResult<()> {
        if self.denied.read().iter().any(|prefix| prefix.contains(path)) {
            return Err(StoreError::PermissionDenied {
                path: path.to_string(),
                reason: "rejected by local access rules".into(),
            });
        }
        Ok(())
    }

    fn sender_for(&self, path: &StorePath) -> watch::Sender<Option<Value>> {
        if let Some(sender) = self.watchers.read().get(path) {
            return sender.clone();
        }
        let current = self.snapshot(path);
        let mut guard = self.watchers.write();
        guard
            .entry(path.clone())
            .or_insert_with(|| watch::channel(current).0)
            .clone()
    }

    fn notify(&self, changed: &StorePath) {
        let document = self.document.read();
        for (path, sender) in self.watchers.read().iter() {
            if !path.overlaps(changed) {
                continue;
            }
            let next = value_at(&document, path.segments()).cloned();
            sender.send_if_modified(|current| {
                if *current == next {
                    return false;
                }
                *current = next;
                true
            });
        }
    }
}

#[async_trait]
impl Store for LocalStore {
    fn subscribe(&self, path: &StorePath) -> Subscription {
        Subscription::new(path.clone(), self.sender_for(path).subscribe())
    }

    async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        self.check_access(path)?;
        Ok(self.snapshot(path))
    }

    async fn set(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        if !*self.connected.borrow() {
            return Err(StoreError::Unavailable("local store is offline".into()));
        }
        self.check_access(path)?;
        trace!(target = "realtime_store::local", %path, "set");
        set_at(&mut self.document.write(), path.segments(), value.clone());
        self.writes.lock().push(RecordedWrite {
            path: path.clone(),
            value,
        });
        self.notify(path);
        Ok(())
    }

    fn connectivity(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn subscription_yields_initial_value_then_changes() {
        let store = LocalStore::new();
        let speed = StorePath::parse("sessions/a/speed");
        store.set(&speed, json!(1.0)).await.expect("set ok");

        let mut sub = store.subscribe(&speed);
        assert_eq!(sub.next().await.unwrap(), Some(json!(1.0)));

        store.set(&speed, json!(2.0)).await.expect("set ok");
        assert_eq!(sub.next().await.unwrap(), Some(json!(2.0)));
    }

    #[tokio::test]
    async fn document_listener_sees_field_writes() {
        let store = LocalStore::new();
        let doc = StorePath::parse("sessions/a");
        let mut sub = store.subscribe(&doc);
        assert_eq!(sub.next().await.unwrap(), None);

        store
            .set(&doc.child("settings/fontSize"), json!(60))
            .await
            .expect("set ok");
        assert_eq!(
            sub.next().await.unwrap(),
            Some(json!({"settings": {"fontSize": 60}}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_writes_are_not_redelivered() {
        let store = LocalStore::new();
        let field = StorePath::parse("sessions/a/isPlaying");
        let mut sub = store.subscribe(&field);
        let _ = sub.next().await.unwrap();

        store.set(&field, json!(true)).await.unwrap();
        assert_eq!(sub.next().await.unwrap(), Some(json!(true)));
        store.set(&field, json!(true)).await.unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(100), sub.next()).await;
        assert!(pending.is_err(), "identical write must not notify");
        assert_eq!(store.writes_at(&field).len(), 2);
    }

    #[tokio::test]
    async fn denied_prefix_rejects_writes() {
        let store = LocalStore::new();
        store.deny(StorePath::parse("sessions"));
        let err = store
            .set(&StorePath::parse("sessions/a/speed"), json!(2))
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = LocalStore::offline();
        let mut connectivity = store.connectivity();
        assert!(!*connectivity.borrow_and_update());
        let err = store
            .set(&StorePath::parse("x"), json!(1))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Unavailable("local store is offline".into()));

        store.set_connected(true);
        connectivity.changed().await.unwrap();
        assert!(*connectivity.borrow());
    }
}
