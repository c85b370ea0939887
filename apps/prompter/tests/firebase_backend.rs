use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use prompter_core::state::Field;
use prompter_core::store::{
    ConnectPolicy, ConnectionStatus, FirebaseStore, PERMISSION_GUIDANCE, StatusBoard, StoreAdapter,
};
use prompter_core::sync::WriteTarget;
use realtime_store::{Store, StoreError, StorePath, Value, set_at, value_at};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn writes_and_reads_round_trip_through_rest() {
    let server = FakeDatabase::start().await;
    let store = FirebaseStore::new(&server.url(), Some("secret".into())).unwrap();
    let path = StorePath::parse("sessions/abc/settings");

    assert_eq!(store.get(&path).await.unwrap(), None);
    store.set(&path, json!({"fontSize": 60})).await.unwrap();
    assert_eq!(store.get(&path).await.unwrap(), Some(json!({"fontSize": 60})));

    let writes = server.writes();
    assert_eq!(writes, vec![("sessions/abc/settings".to_string(), json!({"fontSize": 60}))]);
    assert!(server.saw_auth("secret"));
}

#[tokio::test]
async fn rejected_write_is_permission_denied() {
    let server = FakeDatabase::start().await;
    let store = FirebaseStore::new(&server.url(), None).unwrap();

    let err = store
        .set(&StorePath::parse("denied/abc/speed"), json!(2.0))
        .await
        .unwrap_err();
    match err {
        StoreError::PermissionDenied { path, reason } => {
            assert_eq!(path, "denied/abc/speed");
            assert_eq!(reason, "Permission denied");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(server.writes().is_empty());
}

#[tokio::test]
async fn stream_events_feed_subscription() {
    let server = FakeDatabase::start().await;
    let store = FirebaseStore::new(&server.url(), None).unwrap();
    let mut connectivity = store.connectivity();
    let mut subscription = store.subscribe(&StorePath::parse("stream/doc"));

    let expected = json!({"speed": 2.5, "isPlaying": true, "scrollPosition": 10});
    let delivered = timeout(WAIT, async {
        loop {
            let value = subscription.next().await.unwrap();
            if value.as_ref() == Some(&expected) {
                return value;
            }
        }
    })
    .await
    .expect("stream value");
    assert_eq!(delivered, Some(expected));

    timeout(WAIT, connectivity.wait_for(|connected| *connected))
        .await
        .expect("connected")
        .unwrap();
}

#[tokio::test]
async fn revoked_listener_reports_permission_denied() {
    let server = FakeDatabase::start().await;
    let store = FirebaseStore::new(&server.url(), None).unwrap();
    let mut errors = store.listener_errors().expect("firebase reports listener errors");

    let _subscription = store.subscribe(&StorePath::parse("revoked/doc"));
    let err = timeout(WAIT, errors.recv()).await.expect("error").unwrap();
    assert_eq!(
        err,
        StoreError::PermissionDenied {
            path: "revoked/doc".into(),
            reason: "credential is no longer valid".into(),
        }
    );
}

#[tokio::test]
async fn unauthorized_listener_reports_permission_denied() {
    let server = FakeDatabase::start().await;
    let store = FirebaseStore::new(&server.url(), None).unwrap();
    let mut errors = store.listener_errors().unwrap();

    let _subscription = store.subscribe(&StorePath::parse("denied/doc"));
    let err = timeout(WAIT, errors.recv()).await.expect("error").unwrap();
    assert!(err.is_permission_denied());
}

#[tokio::test]
async fn adapter_connects_after_probe_and_surfaces_denied_writes() {
    let server = FakeDatabase::start().await;
    let store = FirebaseStore::new(&server.url(), None).unwrap();
    let probe = store.spawn_probe(Duration::from_millis(50));
    let status = StatusBoard::new("abc");

    let adapter = StoreAdapter::connect(
        Arc::new(store.clone()),
        StorePath::parse("denied/abc"),
        ConnectPolicy {
            attempts: 20,
            interval: Duration::from_millis(100),
        },
        status.clone(),
    )
    .await
    .unwrap();
    let mut updates = status.subscribe();
    timeout(WAIT, updates.wait_for(|current| *current == ConnectionStatus::Connected))
        .await
        .expect("connected")
        .unwrap();

    adapter.write(WriteTarget::Field(Field::Speed), json!(2.0));
    adapter.write(WriteTarget::Field(Field::IsPlaying), json!(true));
    timeout(WAIT, updates.wait_for(|current| matches!(current, ConnectionStatus::Failed(_))))
        .await
        .expect("status update")
        .unwrap();
    assert!(status.permission_reported());
    assert_eq!(
        status.current(),
        ConnectionStatus::Failed(PERMISSION_GUIDANCE.into())
    );
    probe.abort();
}

#[tokio::test]
async fn unreachable_store_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = FirebaseStore::new(&format!("http://{addr}"), None).unwrap();
    let probe = store.spawn_probe(Duration::from_millis(20));
    let status = StatusBoard::new("abc");
    let result = StoreAdapter::connect(
        Arc::new(store),
        StorePath::parse("sessions/abc"),
        ConnectPolicy {
            attempts: 3,
            interval: Duration::from_millis(50),
        },
        status.clone(),
    )
    .await;

    assert!(result.is_err());
    assert!(matches!(status.current(), ConnectionStatus::Failed(_)));
    probe.abort();
}

#[derive(Default)]
struct Backend {
    document: Value,
    writes: Vec<(String, Value)>,
    queries: Vec<String>,
}

type Shared = Arc<Mutex<Backend>>;

struct FakeDatabase {
    addr: SocketAddr,
    backend: Shared,
}

impl FakeDatabase {
    async fn start() -> Self {
        let backend = Shared::default();
        let app = Router::new()
            .route("/*path", get(read).put(write))
            .with_state(backend.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, backend }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn writes(&self) -> Vec<(String, Value)> {
        self.backend.lock().writes.clone()
    }

    fn saw_auth(&self, token: &str) -> bool {
        let needle = format!("auth={token}");
        self.backend
            .lock()
            .queries
            .iter()
            .any(|query| query.contains(&needle))
    }
}

fn record_path(backend: &Shared, uri: &Uri) -> String {
    if let Some(query) = uri.query() {
        backend.lock().queries.push(query.to_string());
    }
    uri.path()
        .trim_start_matches('/')
        .trim_end_matches(".json")
        .to_string()
}

fn denied() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "Permission denied"})),
    )
        .into_response()
}

async fn read(State(backend): State<Shared>, headers: HeaderMap, uri: Uri) -> Response {
    let path = record_path(&backend, &uri);
    if path.starts_with("denied") {
        return denied();
    }
    let streaming = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("text/event-stream"));
    if streaming {
        return listen(&path);
    }
    let document = backend.lock().document.clone();
    let value = value_at(&document, StorePath::parse(&path).segments())
        .cloned()
        .unwrap_or(Value::Null);
    Json(value).into_response()
}

async fn write(
    State(backend): State<Shared>,
    uri: Uri,
    Json(value): Json<Value>,
) -> Response {
    let path = record_path(&backend, &uri);
    if path.starts_with("denied") {
        return denied();
    }
    let mut guard = backend.lock();
    set_at(
        &mut guard.document,
        StorePath::parse(&path).segments(),
        value.clone(),
    );
    guard.writes.push((path, value.clone()));
    Json(value).into_response()
}

fn listen(path: &str) -> Response {
    let events = if path.starts_with("revoked") {
        vec![event("auth_revoked", json!("credential is no longer valid"))]
    } else {
        vec![
            event(
                "put",
                json!({"path": "/", "data": {"speed": 1.5, "isPlaying": false}}),
            ),
            event("keep-alive", Value::Null),
            event("patch", json!({"path": "/", "data": {"speed": 2.5, "isPlaying": true}})),
            event("put", json!({"path": "/scrollPosition", "data": 10})),
        ]
    };
    let stream = stream::iter(events.into_iter().map(Ok::<_, Infallible>))
        .chain(stream::pending());
    Sse::new(stream).into_response()
}

fn event(kind: &str, data: Value) -> Event {
    Event::default().event(kind).data(data.to_string())
}
