//! Which role this process plays and which session document it binds to.

pub mod identity;
pub mod storage;

use std::fmt;

use realtime_store::StorePath;

pub use identity::{SESSION_KEY, generate_session_id, resolve_session_id};
pub use storage::{
    FileStorage, LocalStorage, MemoryStorage, SETTINGS_KEY, StorageError, load_settings,
    open_storage, save_settings,
};

/// Root under which every session document lives.
pub const SESSIONS_ROOT: &str = "sessions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Display,
    Remote,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Display => f.write_str("display"),
            Role::Remote => f.write_str("remote"),
        }
    }
}

/// Parameters a role is launched with, as carried by a share link query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchParams {
    pub session: Option<String>,
    pub sheet: Option<String>,
    pub range: Option<String>,
}

impl LaunchParams {
    /// Parses a full launch URL such as `https://host/display?session=..&sheet=..`.
    pub fn from_url(raw: &str) -> Result<Self, url::ParseError> {
        let url = url::Url::parse(raw)?;
        Ok(Self::from_query(url.query().unwrap_or_default()))
    }

    /// Parses a bare query string. Blank values count as absent.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "session" => params.session = Some(value.to_string()),
                "sheet" => params.sheet = Some(value.to_string()),
                "range" => params.range = Some(value.to_string()),
                _ => {}
            }
        }
        params
    }

    /// Fills any field still unset from `other`.
    pub fn or(self, other: LaunchParams) -> Self {
        Self {
            session: self.session.or(other.session),
            sheet: self.sheet.or(other.sheet),
            range: self.range.or(other.range),
        }
    }
}

/// The session a role is bound to. A display launched without a session is
/// local-only: `present` is false and nothing it does reaches the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBinding {
    pub present: bool,
    pub token: String,
}

impl SessionBinding {
    pub fn resolve(role: Role, launch: &LaunchParams, storage: &dyn LocalStorage) -> Self {
        let supplied = launch.session.as_deref();
        let token = resolve_session_id(supplied, storage);
        let present = match role {
            Role::Display => supplied.is_some(),
            Role::Remote => true,
        };
        Self { present, token }
    }

    pub fn local_only(token: impl Into<String>) -> Self {
        Self {
            present: false,
            token: token.into(),
        }
    }

    pub fn bound(token: impl Into<String>) -> Self {
        Self {
            present: true,
            token: token.into(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.present && !self.token.is_empty()
    }

    pub fn document_path(&self) -> StorePath {
        StorePath::parse(SESSIONS_ROOT).child(&self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing_skips_blank_and_unknown_keys() {
        let params = LaunchParams::from_query("?session=abc&sheet=&foo=bar&range=Sheet2!B:B");
        assert_eq!(params.session.as_deref(), Some("abc"));
        assert_eq!(params.sheet, None);
        assert_eq!(params.range.as_deref(), Some("Sheet2!B:B"));
    }

    #[test]
    fn url_parsing_decodes_sheet_link() {
        let params = LaunchParams::from_url(
            "https://prompter.example/display?session=s1&sheet=https%3A%2F%2Fdocs.google.com%2Fspreadsheets%2Fd%2Fabc%2Fedit",
        )
        .expect("valid url");
        assert_eq!(params.session.as_deref(), Some("s1"));
        assert_eq!(
            params.sheet.as_deref(),
            Some("https://docs.google.com/spreadsheets/d/abc/edit")
        );
    }

    #[test]
    fn display_without_session_is_local_only() {
        let storage = MemoryStorage::default();
        let binding = SessionBinding::resolve(Role::Display, &LaunchParams::default(), &storage);
        assert!(!binding.present);
        assert!(!binding.is_bound());
    }

    #[test]
    fn remote_is_always_bound() {
        let storage = MemoryStorage::default();
        let binding = SessionBinding::resolve(Role::Remote, &LaunchParams::default(), &storage);
        assert!(binding.is_bound());
        assert!(binding.token.starts_with("session_"));
        assert_eq!(
            binding.document_path().to_string(),
            format!("sessions/{}", binding.token)
        );
    }

    #[test]
    fn explicit_params_win_over_link() {
        let explicit = LaunchParams {
            session: Some("flag".into()),
            ..LaunchParams::default()
        };
        let merged = explicit.or(LaunchParams::from_query("session=link&sheet=s"));
        assert_eq!(merged.session.as_deref(), Some("flag"));
        assert_eq!(merged.sheet.as_deref(), Some("s"));
    }
}
