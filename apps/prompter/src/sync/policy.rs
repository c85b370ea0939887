use std::time::Duration;

use crate::state::Field;

/// How an outbound change reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    Immediate,
    /// Trailing-edge debounce: only the last value of a burst is written,
    /// `delay` after the burst ends.
    Debounce(Duration),
}

/// Where a scroll position change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOrigin {
    /// Manual scrolling or slider dragging.
    Drag,
    /// Progress reports from the auto-scroll driver, already rate limited.
    AutoScroll,
    /// A discrete jump such as reset.
    Jump,
}

/// A single writable location in the session document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteTarget {
    Field(Field),
    /// One key under `settings`.
    Setting(&'static str),
}

impl WriteTarget {
    pub fn field(self) -> Field {
        match self {
            WriteTarget::Field(field) => field,
            WriteTarget::Setting(_) => Field::Settings,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WriteTarget::Field(field) => field.key(),
            WriteTarget::Setting(key) => key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTiming {
    pub suppression_window: Duration,
    pub drag_debounce: Duration,
    pub speed_debounce: Duration,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            suppression_window: Duration::from_millis(50),
            drag_debounce: Duration::from_millis(100),
            speed_debounce: Duration::from_millis(150),
        }
    }
}

impl SyncTiming {
    pub fn scroll_policy(&self, origin: ScrollOrigin) -> WritePolicy {
        match origin {
            ScrollOrigin::Drag => WritePolicy::Debounce(self.drag_debounce),
            ScrollOrigin::AutoScroll | ScrollOrigin::Jump => WritePolicy::Immediate,
        }
    }

    pub fn speed_policy(&self) -> WritePolicy {
        WritePolicy::Debounce(self.speed_debounce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scroll_origins_map_to_policies() {
        let timing = SyncTiming::default();
        assert_eq!(
            timing.scroll_policy(ScrollOrigin::Drag),
            WritePolicy::Debounce(Duration::from_millis(100))
        );
        assert_eq!(timing.scroll_policy(ScrollOrigin::AutoScroll), WritePolicy::Immediate);
        assert_eq!(timing.scroll_policy(ScrollOrigin::Jump), WritePolicy::Immediate);
        assert_eq!(
            timing.speed_policy(),
            WritePolicy::Debounce(Duration::from_millis(150))
        );
    }

    #[test]
    fn setting_targets_belong_to_settings_field() {
        assert_eq!(WriteTarget::Setting("fontSize").field(), Field::Settings);
        assert_eq!(WriteTarget::Setting("fontSize").label(), "fontSize");
        assert_eq!(WriteTarget::Field(Field::Speed).label(), "speed");
    }
}
