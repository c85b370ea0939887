//! Per-field echo suppression. Applying an inbound value opens a short
//! window during which the same field must not be written back.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::state::Field;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionState {
    Idle,
    Suppressed { expires_at: Instant },
}

#[derive(Debug)]
pub struct Suppression {
    window: Duration,
    fields: HashMap<Field, SuppressionState>,
}

impl Suppression {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            fields: HashMap::new(),
        }
    }

    /// Opens (or extends) the window for `field` starting at `now`.
    pub fn suppress(&mut self, field: Field, now: Instant) {
        self.fields.insert(
            field,
            SuppressionState::Suppressed {
                expires_at: now + self.window,
            },
        );
    }

    pub fn state(&mut self, field: Field, now: Instant) -> SuppressionState {
        let state = self
            .fields
            .get(&field)
            .copied()
            .unwrap_or(SuppressionState::Idle);
        match state {
            SuppressionState::Suppressed { expires_at } if expires_at <= now => {
                self.fields.insert(field, SuppressionState::Idle);
                SuppressionState::Idle
            }
            state => state,
        }
    }

    pub fn expires_at(&mut self, field: Field, now: Instant) -> Option<Instant> {
        match self.state(field, now) {
            SuppressionState::Suppressed { expires_at } => Some(expires_at),
            SuppressionState::Idle => None,
        }
    }

    pub fn is_suppressed(&mut self, field: Field, now: Instant) -> bool {
        self.expires_at(field, now).is_some()
    }
}
