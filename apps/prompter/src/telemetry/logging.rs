//! Subscriber setup for the `prompter` binary. Stdout carries the role's own
//! view, so log lines go to stderr or to a file.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

const FILTER_ENV: &str = "PROMPTER_LOG_FILTER";
const TRACE_DEPS_ENV: &str = "PROMPTER_TRACE_DEPS";

/// Crates whose targets follow `--log-level` at debug and trace.
const OWN_TARGETS: &[&str] = &["prompter", "prompter_core", "realtime_store", "sheet_source"];

/// Transport crates held at info while tracing our own targets.
const NOISY_TARGETS: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "reqwest_eventsource",
    "eventsource_stream",
    "rustls",
    "mio",
    "h2",
];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LogOutput {
    #[default]
    Stderr,
    File(PathBuf),
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("cannot open log file {path:?}: {source}")]
    OpenFile { path: PathBuf, source: io::Error },
    #[error("another logger is already installed: {0}")]
    Install(#[from] SetGlobalDefaultError),
}

/// Held for the life of the process so buffered lines are flushed on exit.
static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Repeated calls keep the first setup.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if WRITER_GUARD.get().is_some() {
        return Ok(());
    }

    let (writer, guard) = open_writer(&config.output)?;
    let (filter, quiet_deps) = match std::env::var(FILTER_ENV) {
        Ok(raw) => (raw, false),
        Err(_) => {
            let quiet = config.level == LogLevel::Trace && !trace_deps_requested();
            (filter_directives(config.level, quiet), quiet)
        }
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(config.level >= LogLevel::Debug)
        .with_thread_ids(config.level == LogLevel::Trace)
        .with_ansi(config.output == LogOutput::Stderr)
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = WRITER_GUARD.set(guard);

    if quiet_deps {
        tracing::info!(
            target = "prompter::log",
            "transport crates held at info; set {TRACE_DEPS_ENV}=1 or {FILTER_ENV} to trace them"
        );
    }
    Ok(())
}

fn open_writer(output: &LogOutput) -> Result<(NonBlocking, WorkerGuard), InitError> {
    match output {
        LogOutput::Stderr => Ok(tracing_appender::non_blocking(io::stderr())),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::OpenFile {
                    path: path.clone(),
                    source,
                })?;
            Ok(tracing_appender::non_blocking(file))
        }
    }
}

fn trace_deps_requested() -> bool {
    super::env_truthy(TRACE_DEPS_ENV).unwrap_or(false)
}

/// `EnvFilter` directives for `level`. Below debug every crate shares the
/// level; at debug and trace only our own crates are raised.
fn filter_directives(level: LogLevel, quiet_deps: bool) -> String {
    let own = LevelFilter::from(level);
    if level < LogLevel::Debug {
        return own.to_string().to_lowercase();
    }
    let mut directives = vec!["info".to_string()];
    directives.extend(
        OWN_TARGETS
            .iter()
            .map(|target| format!("{target}={}", own.to_string().to_lowercase())),
    );
    if quiet_deps {
        directives.extend(NOISY_TARGETS.iter().map(|target| format!("{target}=info")));
    }
    directives.join(",")
}
