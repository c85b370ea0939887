//! Perf counters behind `PROMPTER_PERF`, logging setup and log throttling.

pub mod logging;
pub mod throttle;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::info;

pub(crate) fn env_truthy(var: &str) -> Option<bool> {
    std::env::var(var).map(|v| v != "0" && !v.is_empty()).ok()
}

static PERF_ENABLED: Lazy<bool> = Lazy::new(|| env_truthy("PROMPTER_PERF").unwrap_or(false));

static STATS: Lazy<Mutex<HashMap<&'static str, PerfStat>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

static WRITES: Lazy<Mutex<HashMap<&'static str, u64>>> = Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Default)]
struct PerfStat {
    total_ns: u128,
    max_ns: u128,
    count: u64,
}

pub fn enabled() -> bool {
    *PERF_ENABLED
}

pub fn record_duration(label: &'static str, duration: Duration) {
    if !enabled() {
        return;
    }
    let mut stats = STATS.lock();
    let entry = stats.entry(label).or_default();
    entry.count += 1;
    let nanos = duration.as_nanos();
    entry.total_ns += nanos;
    entry.max_ns = entry.max_ns.max(nanos);
    if entry.count % 500 == 0 {
        let avg_us = (entry.total_ns / entry.count as u128) as f64 / 1_000.0;
        let max_us = entry.max_ns as f64 / 1_000.0;
        info!(
            target = "prompter::perf",
            label,
            count = entry.count,
            "avg={avg_us:.2}µs max={max_us:.2}µs"
        );
    }
}

/// Counts one outbound store write for `field`.
pub fn record_write(field: &'static str) {
    if !enabled() {
        return;
    }
    let mut writes = WRITES.lock();
    let count = writes.entry(field).or_default();
    *count += 1;
    if *count % 50 == 0 {
        info!(target = "prompter::perf", field, writes = *count, "outbound writes");
    }
}

pub struct PerfGuard {
    label: &'static str,
    start: Instant,
}

impl PerfGuard {
    pub fn new(label: &'static str) -> Option<Self> {
        if !enabled() {
            return None;
        }
        Some(Self {
            label,
            start: Instant::now(),
        })
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        record_duration(self.label, self.start.elapsed());
    }
}
