use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::debug;

use super::storage::LocalStorage;

/// Storage key holding this device's last session token.
pub const SESSION_KEY: &str = "teleprompter_session";

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 9;

/// `session_<unix millis>_<9 base36 chars>`.
pub fn generate_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("session_{millis}_{suffix}")
}

/// Picks the session token: a supplied one wins and is remembered, otherwise
/// the remembered one is reused, otherwise a fresh one is generated and
/// remembered. Storage failures only cost persistence.
pub fn resolve_session_id(supplied: Option<&str>, storage: &dyn LocalStorage) -> String {
    if let Some(token) = supplied.map(str::trim).filter(|token| !token.is_empty()) {
        remember(storage, token);
        return token.to_string();
    }

    match storage.get(SESSION_KEY) {
        Ok(Some(token)) if !token.trim().is_empty() => return token,
        Ok(_) => {}
        Err(err) => debug!(target = "prompter::session", error = %err, "session token lookup failed"),
    }

    let token = generate_session_id();
    remember(storage, &token);
    token
}

fn remember(storage: &dyn LocalStorage, token: &str) {
    if let Err(err) = storage.set(SESSION_KEY, token) {
        debug!(target = "prompter::session", error = %err, "session token not persisted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::storage::{MemoryStorage, StorageError};

    struct BrokenStorage;

    impl LocalStorage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("disabled".into()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disabled".into()))
        }
    }

    #[test]
    fn generated_ids_have_expected_shape() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "session");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(generate_session_id(), generate_session_id());
    }

    #[test]
    fn supplied_token_is_persisted() {
        let storage = MemoryStorage::default();
        assert_eq!(resolve_session_id(Some("abc"), &storage), "abc");
        assert_eq!(storage.get(SESSION_KEY).unwrap().as_deref(), Some("abc"));
        assert_eq!(resolve_session_id(None, &storage), "abc");
    }

    #[test]
    fn generated_token_is_reused() {
        let storage = MemoryStorage::default();
        let first = resolve_session_id(None, &storage);
        let second = resolve_session_id(None, &storage);
        assert_eq!(first, second);
    }

    #[test]
    fn unavailable_storage_still_yields_a_token() {
        let token = resolve_session_id(None, &BrokenStorage);
        assert!(token.starts_with("session_"));
        assert_eq!(resolve_session_id(Some("given"), &BrokenStorage), "given");
    }
}
