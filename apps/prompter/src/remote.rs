//! The remote role: a control panel that writes intents into the session
//! document and mirrors whatever the document holds.

use std::str::FromStr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use realtime_store::Store;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::session::{LocalStorage, Role, SessionBinding, load_settings, save_settings};
use crate::state::{Field, Settings, SettingsPatch, SharedState};
use crate::store::{ConnectError, ConnectPolicy, StatusBoard, StoreAdapter};
use crate::sync::{InboundScope, ScrollOrigin, StateObserver, SyncEngine, SyncTiming};

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCommand {
    Play,
    Pause,
    TogglePlay,
    Reset,
    Speed(f64),
    Scroll(f64),
    Setting(SettingsPatch),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command {0:?}; try `help`")]
    Unknown(String),
    #[error("`{0}` needs a value")]
    MissingValue(&'static str),
    #[error("invalid value {value:?} for `{name}`")]
    InvalidValue { name: &'static str, value: String },
}

pub const HELP: &str = "commands: play | pause | toggle | reset | speed <x> | scroll <0-100> | \
font <px> | line-height <x> | bg <color> | text <color> | guide <color> | guide-width <px> | \
status | quit";

fn number(name: &'static str, raw: Option<&str>) -> Result<f64, CommandError> {
    let raw = raw.ok_or(CommandError::MissingValue(name))?;
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| CommandError::InvalidValue {
            name,
            value: raw.to_string(),
        })
}

fn pixels(name: &'static str, raw: Option<&str>) -> Result<u32, CommandError> {
    let value = number(name, raw)?;
    if value < 0.0 {
        return Err(CommandError::InvalidValue {
            name,
            value: value.to_string(),
        });
    }
    Ok(value.round() as u32)
}

fn color(name: &'static str, raw: Option<&str>) -> Result<String, CommandError> {
    raw.map(str::to_string).ok_or(CommandError::MissingValue(name))
}

impl FromStr for RemoteCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Ok(RemoteCommand::TogglePlay);
        };
        let arg = parts.next();
        let setting = |patch: SettingsPatch| -> Result<Self, CommandError> {
            Ok(RemoteCommand::Setting(patch))
        };
        match verb.to_ascii_lowercase().as_str() {
            "play" => Ok(RemoteCommand::Play),
            "pause" | "stop" => Ok(RemoteCommand::Pause),
            "toggle" => Ok(RemoteCommand::TogglePlay),
            "reset" => Ok(RemoteCommand::Reset),
            "speed" => {
                let speed = number("speed", arg)?;
                if speed <= 0.0 {
                    return Err(CommandError::InvalidValue {
                        name: "speed",
                        value: speed.to_string(),
                    });
                }
                Ok(RemoteCommand::Speed(speed))
            }
            "scroll" => Ok(RemoteCommand::Scroll(number("scroll", arg)?)),
            "font" => setting(SettingsPatch {
                font_size: Some(pixels("font", arg)?.max(1)),
                ..SettingsPatch::default()
            }),
            "line-height" => {
                let line_height = number("line-height", arg)?;
                if line_height <= 0.0 {
                    return Err(CommandError::InvalidValue {
                        name: "line-height",
                        value: line_height.to_string(),
                    });
                }
                setting(SettingsPatch {
                    line_height: Some(line_height),
                    ..SettingsPatch::default()
                })
            }
            "bg" => setting(SettingsPatch {
                background_color: Some(color("bg", arg)?),
                ..SettingsPatch::default()
            }),
            "text" => setting(SettingsPatch {
                text_color: Some(color("text", arg)?),
                ..SettingsPatch::default()
            }),
            "guide" => setting(SettingsPatch {
                guide_line_color: Some(color("guide", arg)?),
                ..SettingsPatch::default()
            }),
            "guide-width" => setting(SettingsPatch {
                guide_line_thickness: Some(pixels("guide-width", arg)?),
                ..SettingsPatch::default()
            }),
            "status" => Ok(RemoteCommand::Status),
            "help" | "?" => Ok(RemoteCommand::Help),
            "quit" | "exit" | "q" => Ok(RemoteCommand::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Renders the remote's view of the session.
pub trait ControlPanel: Send + Sync {
    fn render(&self, state: &SharedState);
}

/// Panel that reports state through the log.
pub struct LogPanel;

impl ControlPanel for LogPanel {
    fn render(&self, state: &SharedState) {
        info!(
            target = "prompter::remote",
            playing = state.is_playing,
            speed = state.speed,
            position = format_args!("{:.1}%", state.scroll_position),
            font_size = state.settings.font_size,
            line_height = state.settings.line_height,
            "session state"
        );
    }
}

#[derive(Clone)]
pub struct RemoteSession {
    inner: Arc<RemoteInner>,
}

struct RemoteInner {
    engine: SyncEngine,
    panel: Arc<dyn ControlPanel>,
    storage: Arc<dyn LocalStorage>,
    status: StatusBoard,
    saved: Option<Settings>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RemoteSession {
    pub fn new(
        binding: SessionBinding,
        panel: Arc<dyn ControlPanel>,
        storage: Arc<dyn LocalStorage>,
        timing: SyncTiming,
        status: StatusBoard,
    ) -> Self {
        let saved = load_settings(storage.as_ref());
        let initial = SharedState {
            settings: saved.clone().unwrap_or_default(),
            ..SharedState::default()
        };
        let engine = SyncEngine::new(Role::Remote, binding, timing, initial.clone());
        let inner = Arc::new(RemoteInner {
            engine,
            panel,
            storage,
            status,
            saved,
            tasks: Mutex::new(Vec::new()),
        });
        let weak = Arc::downgrade(&inner);
        let observer: Weak<dyn StateObserver> = weak;
        inner.engine.set_observer(observer);
        inner.panel.render(&initial);
        Self { inner }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.inner.engine
    }

    pub fn status(&self) -> &StatusBoard {
        &self.inner.status
    }

    pub fn state(&self) -> SharedState {
        self.inner.engine.snapshot()
    }

    /// Binds to the session document, creating it when missing, pushes any
    /// saved settings, and mirrors the whole document from then on.
    pub async fn connect(&self, store: Arc<dyn Store>, policy: ConnectPolicy) -> Result<(), ConnectError> {
        let inner = &self.inner;
        let document = inner.engine.binding().document_path();
        let adapter = StoreAdapter::connect(store, document, policy, inner.status.clone()).await?;
        inner.engine.attach(adapter.clone());

        let existing = match adapter.initialize_if_absent(&inner.engine.snapshot()).await {
            Ok(existing) => existing,
            Err(err) => {
                debug!(target = "prompter::remote", error = %err, "session initialization skipped");
                None
            }
        };
        if let Some(mut existing) = existing {
            if let Some(saved) = inner.saved.clone() {
                debug!(target = "prompter::remote", "pushing saved settings");
                inner.engine.replace_settings(saved);
                existing.settings = None;
            }
            inner.engine.apply_inbound(existing);
        }

        let handles = inner.engine.spawn_inbound(&adapter, InboundScope::Document);
        inner.tasks.lock().extend(handles);
        Ok(())
    }

    pub fn play(&self) {
        self.inner.engine.set_playing(true);
        self.refresh();
    }

    pub fn pause(&self) {
        self.inner.engine.set_playing(false);
        self.refresh();
    }

    pub fn toggle_play(&self) {
        if self.state().is_playing {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn reset(&self) {
        self.inner.engine.set_scroll_position(0.0, ScrollOrigin::Jump);
        self.inner.engine.set_playing(false);
        self.refresh();
    }

    pub fn set_speed(&self, speed: f64) {
        self.inner.engine.set_speed(speed);
        self.refresh();
    }

    /// A slider drag to `percent`.
    pub fn scroll_to(&self, percent: f64) {
        self.inner.engine.set_scroll_position(percent, ScrollOrigin::Drag);
        self.refresh();
    }

    /// Applies and persists a settings change.
    pub fn update_settings(&self, patch: &SettingsPatch) {
        self.inner.engine.update_settings(patch);
        save_settings(self.inner.storage.as_ref(), &self.state().settings);
        self.refresh();
    }

    /// Runs a state-changing command. Returns false for commands the caller
    /// handles itself (`status`, `help`, `quit`).
    pub fn execute(&self, command: &RemoteCommand) -> bool {
        match command {
            RemoteCommand::Play => self.play(),
            RemoteCommand::Pause => self.pause(),
            RemoteCommand::TogglePlay => self.toggle_play(),
            RemoteCommand::Reset => self.reset(),
            RemoteCommand::Speed(speed) => self.set_speed(*speed),
            RemoteCommand::Scroll(percent) => self.scroll_to(*percent),
            RemoteCommand::Setting(patch) => self.update_settings(patch),
            RemoteCommand::Status | RemoteCommand::Help | RemoteCommand::Quit => return false,
        }
        true
    }

    pub fn shutdown(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn refresh(&self) {
        self.inner.panel.render(&self.state());
    }
}

impl StateObserver for RemoteInner {
    fn on_applied(&self, fields: &[Field], state: &SharedState) {
        debug!(target = "prompter::remote", fields = ?fields, "session changed remotely");
        self.panel.render(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<RemoteCommand, CommandError> {
        line.parse()
    }

    #[test]
    fn commands_parse() {
        assert_eq!(parse("play"), Ok(RemoteCommand::Play));
        assert_eq!(parse(""), Ok(RemoteCommand::TogglePlay));
        assert_eq!(parse("speed 1.5"), Ok(RemoteCommand::Speed(1.5)));
        assert_eq!(parse("scroll 40"), Ok(RemoteCommand::Scroll(40.0)));
        assert_eq!(
            parse("font 60"),
            Ok(RemoteCommand::Setting(SettingsPatch {
                font_size: Some(60),
                ..SettingsPatch::default()
            }))
        );
        assert_eq!(
            parse("text #eeeeee"),
            Ok(RemoteCommand::Setting(SettingsPatch {
                text_color: Some("#eeeeee".into()),
                ..SettingsPatch::default()
            }))
        );
        assert_eq!(parse("Q"), Ok(RemoteCommand::Quit));
    }

    #[test]
    fn bad_commands_are_rejected() {
        assert_eq!(parse("speed"), Err(CommandError::MissingValue("speed")));
        assert!(matches!(
            parse("speed -2"),
            Err(CommandError::InvalidValue { name: "speed", .. })
        ));
        assert!(matches!(
            parse("scroll abc"),
            Err(CommandError::InvalidValue { name: "scroll", .. })
        ));
        assert_eq!(parse("jump"), Err(CommandError::Unknown("jump".into())));
    }
}
