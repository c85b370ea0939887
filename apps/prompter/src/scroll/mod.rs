//! Auto-scroll driver: advances the viewport on a fixed tick until the end
//! of content, reporting progress at a slower cadence.

pub mod viewport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, trace};

use crate::telemetry::PerfGuard;

pub use viewport::{Viewport, VirtualViewport, percent_of, scroll_extent, top_for_percent};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollConfig {
    pub tick: Duration,
    /// Pixels advanced per tick at speed 1.
    pub pixels_per_tick: f64,
    /// Distance from the end that counts as the end.
    pub end_epsilon: f64,
    /// Consecutive non-advancing ticks (away from the top) that end a run.
    pub stall_ticks: u32,
    pub report_interval: Duration,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(16),
            pixels_per_tick: 2.0,
            end_epsilon: 2.0,
            stall_ticks: 5,
            report_interval: Duration::from_millis(200),
        }
    }
}

/// Where the driver gets its speed and where it reports to.
pub trait ScrollHooks: Send + Sync {
    /// Read every tick, so changes apply on the next tick.
    fn speed(&self) -> f64;
    fn progress(&self, percent: f64);
    /// Called once per run when the end of content is reached.
    fn finished(&self, percent: f64);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriverPhase {
    Stopped,
    Running { last_reported_percent: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TickOutcome {
    Advanced(f64),
    Finished(f64),
}

#[derive(Clone)]
pub struct ScrollDriver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    viewport: Arc<dyn Viewport>,
    hooks: Arc<dyn ScrollHooks>,
    config: ScrollConfig,
    programmatic: AtomicBool,
    run: Mutex<RunState>,
}

struct RunState {
    phase: DriverPhase,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl ScrollDriver {
    pub fn new(viewport: Arc<dyn Viewport>, hooks: Arc<dyn ScrollHooks>, config: ScrollConfig) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                viewport,
                hooks,
                config,
                programmatic: AtomicBool::new(false),
                run: Mutex::new(RunState {
                    phase: DriverPhase::Stopped,
                    generation: 0,
                    task: None,
                }),
            }),
        }
    }

    pub fn phase(&self) -> DriverPhase {
        self.inner.run.lock().phase
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase(), DriverPhase::Running { .. })
    }

    /// True while the driver itself is moving the viewport.
    pub fn is_programmatic(&self) -> bool {
        self.inner.programmatic.load(Ordering::Acquire)
    }

    pub fn percent(&self) -> f64 {
        percent_of(self.inner.viewport.as_ref())
    }

    /// Starts ticking. Returns false when already running or when there is
    /// nothing to scroll.
    pub fn start(&self) -> bool {
        let mut run = self.inner.run.lock();
        if matches!(run.phase, DriverPhase::Running { .. }) {
            return false;
        }
        if scroll_extent(self.inner.viewport.as_ref()) <= 0.0 {
            debug!(target = "prompter::scroll", "nothing to scroll");
            return false;
        }
        run.generation += 1;
        run.phase = DriverPhase::Running {
            last_reported_percent: self.percent(),
        };
        run.task = Some(tokio::spawn(tick_loop(self.inner.clone(), run.generation)));
        debug!(target = "prompter::scroll", generation = run.generation, "auto-scroll started");
        true
    }

    /// Cancels the tick timer. Returns whether a run was in progress.
    pub fn stop(&self) -> bool {
        let mut run = self.inner.run.lock();
        let was_running = matches!(run.phase, DriverPhase::Running { .. });
        if let Some(task) = run.task.take() {
            task.abort();
        }
        run.phase = DriverPhase::Stopped;
        run.generation += 1;
        if was_running {
            debug!(target = "prompter::scroll", "auto-scroll stopped");
        }
        was_running
    }

    /// Moves the viewport as the driver, so observers do not mistake the
    /// move for user input.
    pub fn jump_to(&self, top: f64) {
        self.inner.assign(top);
    }
}

impl DriverInner {
    fn assign(&self, top: f64) {
        self.programmatic.store(true, Ordering::Release);
        self.viewport.set_scroll_top(top);
        self.programmatic.store(false, Ordering::Release);
    }

    fn step(&self, stalled: &mut u32) -> TickOutcome {
        let viewport = self.viewport.as_ref();
        let extent = scroll_extent(viewport);
        if extent <= 0.0 {
            return TickOutcome::Finished(0.0);
        }

        let before = viewport.scroll_top();
        let advance = self.hooks.speed().max(0.0) * self.config.pixels_per_tick;
        self.assign((before + advance).min(extent));
        let after = viewport.scroll_top();

        if extent - after <= self.config.end_epsilon {
            self.assign(extent);
            return TickOutcome::Finished(100.0);
        }
        if after <= before && after > 0.0 {
            *stalled += 1;
            if *stalled >= self.config.stall_ticks {
                trace!(target = "prompter::scroll", after, extent, "scroll stalled short of end");
                return TickOutcome::Finished(percent_of(viewport));
            }
        } else {
            *stalled = 0;
        }
        TickOutcome::Advanced(percent_of(viewport))
    }

    fn record_report(&self, generation: u64, percent: f64) -> bool {
        let mut run = self.run.lock();
        if run.generation != generation {
            return false;
        }
        run.phase = DriverPhase::Running {
            last_reported_percent: percent,
        };
        true
    }

    /// Ends the run from inside the tick loop. False if it was already stopped.
    fn finish(&self, generation: u64) -> bool {
        let mut run = self.run.lock();
        if run.generation != generation {
            return false;
        }
        run.phase = DriverPhase::Stopped;
        run.task = None;
        run.generation += 1;
        true
    }
}

async fn tick_loop(inner: Arc<DriverInner>, generation: u64) {
    let mut ticker = interval(inner.config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately
    ticker.tick().await;

    let mut last_report = Instant::now();
    let mut stalled = 0;
    loop {
        ticker.tick().await;
        let _perf = PerfGuard::new("scroll.tick");
        match inner.step(&mut stalled) {
            TickOutcome::Advanced(percent) => {
                if last_report.elapsed() >= inner.config.report_interval {
                    last_report = Instant::now();
                    if inner.record_report(generation, percent) {
                        inner.hooks.progress(percent);
                    }
                }
            }
            TickOutcome::Finished(percent) => {
                if inner.finish(generation) {
                    debug!(target = "prompter::scroll", percent, "reached end of content");
                    inner.hooks.finished(percent);
                }
                break;
            }
        }
    }
}
