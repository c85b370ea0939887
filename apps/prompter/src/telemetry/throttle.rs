use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreLogKind {
    WriteFailure,
    PermissionDenied,
    ListenerFailure,
}

impl StoreLogKind {
    fn interval(self) -> Duration {
        match self {
            StoreLogKind::WriteFailure => Duration::from_secs(10),
            StoreLogKind::PermissionDenied => Duration::from_secs(60),
            StoreLogKind::ListenerFailure => Duration::from_secs(30),
        }
    }
}

#[derive(Eq, PartialEq, Hash)]
struct LogKey {
    kind: StoreLogKind,
    session: String,
}

static STORE_LOG_MEMORY: Lazy<Mutex<HashMap<LogKey, Instant>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// True at most once per interval for each kind and session.
pub fn should_log_store_event(kind: StoreLogKind, session: &str) -> bool {
    let mut guard = STORE_LOG_MEMORY.lock();
    let key = LogKey {
        kind,
        session: session.to_string(),
    };
    let now = Instant::now();
    if let Some(last) = guard.get(&key) {
        if now.duration_since(*last) < kind.interval() {
            return false;
        }
    }
    guard.insert(key, now);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_are_throttled_per_session() {
        assert!(should_log_store_event(StoreLogKind::WriteFailure, "throttle-a"));
        assert!(!should_log_store_event(StoreLogKind::WriteFailure, "throttle-a"));
        assert!(should_log_store_event(StoreLogKind::WriteFailure, "throttle-b"));
        assert!(should_log_store_event(StoreLogKind::PermissionDenied, "throttle-a"));
    }
}
