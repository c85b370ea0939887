//! Realtime database backend over the REST API: `PUT`/`GET` on
//! `<base>/<path>.json` for writes and reads, server-sent events for listeners.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use realtime_store::{
    Store, StoreError, StorePath, StoreResult, Subscription, Value, merge_at, set_at, value_at,
};
use reqwest::{Client, Response, StatusCode, header};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct FirebaseStore {
    inner: Arc<FirebaseInner>,
}

struct FirebaseInner {
    http: Client,
    base: Url,
    auth: Option<String>,
    connected: watch::Sender<bool>,
    watchers: Mutex<HashMap<StorePath, watch::Sender<Option<Value>>>>,
    errors: broadcast::Sender<StoreError>,
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

impl FirebaseStore {
    /// `base_url` is the database root, e.g. `https://<db>.firebaseio.com`.
    /// `auth` is appended to every request as the `auth` query parameter.
    pub fn new(base_url: &str, auth: Option<String>) -> StoreResult<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base = Url::parse(&format!("{trimmed}/")).map_err(|err| {
            StoreError::Transport(format!("invalid store url {base_url:?}: {err}"))
        })?;
        Ok(Self {
            inner: Arc::new(FirebaseInner {
                http: Client::new(),
                base,
                auth: auth.filter(|token| !token.trim().is_empty()),
                connected: watch::channel(false).0,
                watchers: Mutex::new(HashMap::new()),
                errors: broadcast::channel(16).0,
            }),
        })
    }

    /// Periodically checks reachability and feeds [`Store::connectivity`].
    /// Stops once the store is dropped.
    pub fn spawn_probe(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.probe().await;
                drop(inner);
                tokio::time::sleep(interval).await;
            }
        })
    }
}

impl FirebaseInner {
    fn url_for(&self, path: &StorePath) -> StoreResult<Url> {
        let relative = if path.is_root() {
            ".json".to_string()
        } else {
            format!("{path}.json")
        };
        let mut url = self
            .base
            .join(&relative)
            .map_err(|err| StoreError::Transport(format!("invalid path {path}: {err}")))?;
        if let Some(auth) = &self.auth {
            url.query_pairs_mut().append_pair("auth", auth);
        }
        Ok(url)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    fn transport_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_connect() || err.is_timeout() {
            self.set_connected(false);
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Transport(err.to_string())
        }
    }

    async fn check(&self, path: &StorePath, res: Response) -> StoreResult<Response> {
        self.set_connected(true);
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(status_error(path, status, body))
    }

    async fn probe(&self) {
        let mut url = match self.url_for(&StorePath::root()) {
            Ok(url) => url,
            Err(_) => return,
        };
        url.query_pairs_mut().append_pair("shallow", "true");
        match self.http.get(url).timeout(PROBE_TIMEOUT).send().await {
            // any answer, even a rejection, means the service is reachable
            Ok(_) => self.set_connected(true),
            Err(err) => {
                debug!(target = "prompter::firebase", error = %err, "probe failed");
                self.set_connected(false);
            }
        }
    }
}

fn status_error(path: &StorePath, status: StatusCode, body: String) -> StoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied {
            path: path.to_string(),
            reason: error_reason(&body).unwrap_or_else(|| status.to_string()),
        },
        _ => StoreError::Transport(format!("{status}: {body}")),
    }
}

/// Pulls `error` out of a `{"error": "..."}` body.
fn error_reason(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("error")?
        .as_str()
        .map(str::to_string)
}

/// Folds one `put`/`patch` stream event into the listener's local snapshot.
fn apply_stream_event(snapshot: &mut Value, kind: &str, payload: StreamPayload) {
    let segments = StorePath::parse(&payload.path).segments().to_vec();
    match (kind, payload.data) {
        ("patch", Value::Object(patch)) => merge_at(snapshot, &segments, &patch),
        (_, data) => set_at(snapshot, &segments, data),
    }
}

async fn stream_path(
    inner: Arc<FirebaseInner>,
    path: StorePath,
    sender: watch::Sender<Option<Value>>,
) {
    let url = match inner.url_for(&path) {
        Ok(url) => url,
        Err(err) => {
            let _ = inner.errors.send(err);
            return;
        }
    };
    let request = inner
        .http
        .get(url)
        .header(header::ACCEPT, "text/event-stream");
    let mut source = match EventSource::new(request) {
        Ok(source) => source,
        Err(err) => {
            warn!(target = "prompter::firebase", path = %path, error = %err, "listener not started");
            return;
        }
    };

    let mut snapshot = Value::Null;
    while let Some(event) = source.next().await {
        match event {
            Ok(Event::Open) => {
                inner.set_connected(true);
                debug!(target = "prompter::firebase", path = %path, "listener open");
            }
            Ok(Event::Message(message)) => match message.event.as_str() {
                "put" | "patch" => match serde_json::from_str::<StreamPayload>(&message.data) {
                    Ok(payload) => {
                        apply_stream_event(&mut snapshot, &message.event, payload);
                        let next = value_at(&snapshot, &[]).cloned();
                        sender.send_if_modified(|current| {
                            if *current == next {
                                return false;
                            }
                            *current = next;
                            true
                        });
                    }
                    Err(err) => {
                        warn!(target = "prompter::firebase", path = %path, error = %err, "malformed listener event");
                    }
                },
                "keep-alive" => trace!(target = "prompter::firebase", path = %path, "keep-alive"),
                "cancel" | "auth_revoked" => {
                    let reason = serde_json::from_str::<Value>(&message.data)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_else(|| message.event.clone());
                    let _ = inner.errors.send(StoreError::PermissionDenied {
                        path: path.to_string(),
                        reason,
                    });
                    source.close();
                    break;
                }
                other => trace!(target = "prompter::firebase", path = %path, event = other, "ignored listener event"),
            },
            Err(EventSourceError::InvalidStatusCode(status, _))
                if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
            {
                let _ = inner.errors.send(status_error(&path, status, String::new()));
                source.close();
                break;
            }
            Err(EventSourceError::StreamEnded) => {
                debug!(target = "prompter::firebase", path = %path, "listener stream ended; reconnecting");
            }
            Err(err) => {
                inner.set_connected(false);
                debug!(target = "prompter::firebase", path = %path, error = %err, "listener error; retrying");
            }
        }
    }
    inner.watchers.lock().remove(&path);
}

#[async_trait]
impl Store for FirebaseStore {
    fn subscribe(&self, path: &StorePath) -> Subscription {
        let mut watchers = self.inner.watchers.lock();
        if let Some(sender) = watchers.get(path) {
            return Subscription::new(path.clone(), sender.subscribe());
        }
        let (sender, rx) = watch::channel(None);
        watchers.insert(path.clone(), sender.clone());
        drop(watchers);
        tokio::spawn(stream_path(self.inner.clone(), path.clone(), sender));
        Subscription::new(path.clone(), rx)
    }

    async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        let url = self.inner.url_for(path)?;
        let res = self
            .inner
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| self.inner.transport_error(err))?;
        let res = self.inner.check(path, res).await?;
        let value: Value = res
            .json()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn set(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        let url = self.inner.url_for(path)?;
        let res = self
            .inner
            .http
            .put(url)
            .json(&value)
            .send()
            .await
            .map_err(|err| self.inner.transport_error(err))?;
        self.inner.check(path, res).await?;
        Ok(())
    }

    fn connectivity(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    fn listener_errors(&self) -> Option<broadcast::Receiver<StoreError>> {
        Some(self.inner.errors.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urls_carry_json_suffix_and_auth() {
        let store = FirebaseStore::new("https://demo.firebaseio.com/", Some("secret".into())).unwrap();
        let url = store
            .inner
            .url_for(&StorePath::parse("sessions/abc/speed"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://demo.firebaseio.com/sessions/abc/speed.json?auth=secret"
        );
        let root = store.inner.url_for(&StorePath::root()).unwrap();
        assert_eq!(root.path(), "/.json");
    }

    #[test]
    fn invalid_base_is_rejected() {
        assert!(FirebaseStore::new("not a url", None).is_err());
    }

    #[test]
    fn stream_events_fold_into_snapshot() {
        let mut snapshot = Value::Null;
        let event = |path: &str, data: Value| StreamPayload {
            path: path.into(),
            data,
        };
        apply_stream_event(&mut snapshot, "put", event("/", json!({"speed": 1.0, "settings": {"fontSize": 48}})));
        apply_stream_event(&mut snapshot, "put", event("/speed", json!(2.0)));
        apply_stream_event(&mut snapshot, "patch", event("/settings", json!({"textColor": "#fff"})));
        assert_eq!(
            snapshot,
            json!({"speed": 2.0, "settings": {"fontSize": 48, "textColor": "#fff"}})
        );
        apply_stream_event(&mut snapshot, "put", event("/", Value::Null));
        assert_eq!(value_at(&snapshot, &[]), None);
    }

    #[test]
    fn auth_statuses_map_to_permission_denied() {
        let path = StorePath::parse("sessions/x");
        let err = status_error(&path, StatusCode::UNAUTHORIZED, r#"{"error":"Permission denied"}"#.into());
        assert_eq!(
            err,
            StoreError::PermissionDenied {
                path: "sessions/x".into(),
                reason: "Permission denied".into()
            }
        );
        assert!(matches!(
            status_error(&path, StatusCode::INTERNAL_SERVER_ERROR, "boom".into()),
            StoreError::Transport(_)
        ));
    }
}
