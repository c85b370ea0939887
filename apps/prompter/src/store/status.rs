//! Connection indicator and store failure reporting.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use realtime_store::StoreError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::ConnectError;
use crate::telemetry::throttle::{StoreLogKind, should_log_store_event};

pub const PERMISSION_GUIDANCE: &str = "the realtime store rejected access for this session; \
     check the database security rules allow reads and writes under sessions/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    /// No session was given; nothing is synchronized.
    LocalOnly,
    Failed(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => f.write_str("connecting"),
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
            ConnectionStatus::LocalOnly => f.write_str("local only"),
            ConnectionStatus::Failed(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Shared connection indicator for one session.
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<StatusInner>,
}

struct StatusInner {
    session: String,
    status: watch::Sender<ConnectionStatus>,
    permission_reported: AtomicBool,
}

impl StatusBoard {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StatusInner {
                session: session.into(),
                status: watch::channel(ConnectionStatus::Connecting).0,
                permission_reported: AtomicBool::new(false),
            }),
        }
    }

    pub fn session(&self) -> &str {
        &self.inner.session
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn current(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Updates the indicator. A permission failure stays on display.
    pub fn set(&self, status: ConnectionStatus) {
        if self.permission_reported() {
            return;
        }
        self.inner.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            info!(
                target = "prompter::status",
                session = %self.inner.session,
                from = %current,
                to = %status,
                "connection status changed"
            );
            *current = status;
            true
        });
    }

    pub fn permission_reported(&self) -> bool {
        self.inner.permission_reported.load(Ordering::Acquire)
    }

    /// Reports a failed store operation. Permission failures surface once as
    /// guidance; everything else is logged with throttling.
    pub fn report(&self, context: &str, err: &StoreError) {
        if err.is_permission_denied() {
            if !self.inner.permission_reported.swap(true, Ordering::AcqRel) {
                error!(
                    target = "prompter::status",
                    session = %self.inner.session,
                    context,
                    error = %err,
                    "{PERMISSION_GUIDANCE}"
                );
                self.inner
                    .status
                    .send_replace(ConnectionStatus::Failed(PERMISSION_GUIDANCE.into()));
            } else if should_log_store_event(StoreLogKind::PermissionDenied, &self.inner.session) {
                warn!(
                    target = "prompter::status",
                    session = %self.inner.session,
                    context,
                    "store access still denied"
                );
            }
            return;
        }
        if should_log_store_event(StoreLogKind::WriteFailure, &self.inner.session) {
            warn!(
                target = "prompter::status",
                session = %self.inner.session,
                context,
                error = %err,
                "store operation failed"
            );
        }
    }

    pub fn report_unavailable(&self, err: &ConnectError) {
        error!(target = "prompter::status", session = %self.inner.session, error = %err, "store unavailable");
        self.set(ConnectionStatus::Failed(err.to_string()));
    }

    /// Mirrors store connectivity onto the indicator until the store goes away.
    pub fn follow(&self, mut connectivity: watch::Receiver<bool>) -> JoinHandle<()> {
        let board = self.clone();
        tokio::spawn(async move {
            loop {
                let connected = *connectivity.borrow_and_update();
                board.set(if connected {
                    ConnectionStatus::Connected
                } else {
                    ConnectionStatus::Disconnected
                });
                if connectivity.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
