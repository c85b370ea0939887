use std::env;
use std::path::PathBuf;
use std::time::Duration;

use sheet_source::{DEFAULT_DOCS_BASE, DEFAULT_VALUES_BASE};

use crate::store::ConnectPolicy;
use crate::sync::SyncTiming;

/// Runtime tunables read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub connect_attempts: u32,
    pub connect_interval_ms: u64,
    pub probe_interval_ms: u64,
    pub suppression_window_ms: u64,
    pub drag_debounce_ms: u64,
    pub speed_debounce_ms: u64,
    pub sheets_docs_base: String,
    pub sheets_values_base: String,
    pub sheets_api_key: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_attempts: 10,
            connect_interval_ms: 500,
            probe_interval_ms: 5_000,
            suppression_window_ms: 50,
            drag_debounce_ms: 100,
            speed_debounce_ms: 150,
            sheets_docs_base: DEFAULT_DOCS_BASE.to_string(),
            sheets_values_base: DEFAULT_VALUES_BASE.to_string(),
            sheets_api_key: None,
            data_dir: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    env::var(var).ok().and_then(|v| v.trim().parse().ok())
}

fn env_nonblank(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            connect_attempts: env_parse("PROMPTER_CONNECT_ATTEMPTS")
                .filter(|attempts| *attempts > 0)
                .unwrap_or(defaults.connect_attempts),
            connect_interval_ms: env_parse("PROMPTER_CONNECT_INTERVAL_MS")
                .unwrap_or(defaults.connect_interval_ms),
            probe_interval_ms: env_parse("PROMPTER_PROBE_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.probe_interval_ms),
            suppression_window_ms: env_parse("PROMPTER_SUPPRESSION_MS")
                .unwrap_or(defaults.suppression_window_ms),
            drag_debounce_ms: env_parse("PROMPTER_DRAG_DEBOUNCE_MS")
                .unwrap_or(defaults.drag_debounce_ms),
            speed_debounce_ms: env_parse("PROMPTER_SPEED_DEBOUNCE_MS")
                .unwrap_or(defaults.speed_debounce_ms),
            sheets_docs_base: env_nonblank("PROMPTER_SHEETS_BASE")
                .unwrap_or(defaults.sheets_docs_base),
            sheets_values_base: env_nonblank("PROMPTER_SHEETS_VALUES_BASE")
                .unwrap_or(defaults.sheets_values_base),
            sheets_api_key: env_nonblank("PROMPTER_SHEETS_API_KEY"),
            data_dir: env_nonblank("PROMPTER_DATA_DIR").map(PathBuf::from),
        }
    }

    pub fn connect_policy(&self) -> ConnectPolicy {
        ConnectPolicy {
            attempts: self.connect_attempts,
            interval: Duration::from_millis(self.connect_interval_ms),
        }
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn sync_timing(&self) -> SyncTiming {
        SyncTiming {
            suppression_window: Duration::from_millis(self.suppression_window_ms),
            drag_debounce: Duration::from_millis(self.drag_debounce_ms),
            speed_debounce: Duration::from_millis(self.speed_debounce_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;
    use std::sync::Mutex;

    // environment variables are process-wide
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "PROMPTER_CONNECT_ATTEMPTS",
        "PROMPTER_CONNECT_INTERVAL_MS",
        "PROMPTER_SPEED_DEBOUNCE_MS",
        "PROMPTER_SHEETS_API_KEY",
        "PROMPTER_DATA_DIR",
    ];

    fn clear() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn defaults_match_sync_contract() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();
        let config = Config::from_env();
        assert_eq!(config.connect_attempts, 10);
        assert_eq!(config.sync_timing(), SyncTiming::default());
        assert_eq!(config.connect_policy().interval, Duration::from_millis(500));
        assert!(config.sheets_api_key.is_none());
    }

    #[test]
    fn overrides_are_read_and_bad_values_ignored() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();
        unsafe {
            env::set_var("PROMPTER_CONNECT_ATTEMPTS", "3");
            env::set_var("PROMPTER_CONNECT_INTERVAL_MS", "not-a-number");
            env::set_var("PROMPTER_SPEED_DEBOUNCE_MS", "300");
            env::set_var("PROMPTER_SHEETS_API_KEY", "   ");
            env::set_var("PROMPTER_DATA_DIR", "/tmp/prompter-test");
        }
        let config = Config::from_env();
        clear();

        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.connect_interval_ms, 500);
        assert_eq!(config.sync_timing().speed_debounce, Duration::from_millis(300));
        assert_eq!(config.sheets_api_key, None);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/prompter-test")));
    }
}
