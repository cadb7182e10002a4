//! Progress Estimator
//!
//! Heuristic completion percentage. The backend rarely says how far along it
//! is, so progress is inferred from the kinds of messages seen: each status,
//! action and observation nudges the counter up by a fixed weight. The value
//! never reaches 100 until the session completes.

use serde::{Deserialize, Serialize};

use crate::classifier::MessageKind;

/// Weights and ceiling for the estimator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Highest value reachable before completion (must be below 100)
    pub ceiling: u8,
    /// Increment per status message
    pub status_weight: u8,
    /// Increment per action step
    pub action_weight: u8,
    /// Increment per observation step
    pub observation_weight: u8,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            ceiling: 90,
            status_weight: 5,
            action_weight: 10,
            observation_weight: 10,
        }
    }
}

impl ProgressConfig {
    fn weight(&self, kind: MessageKind) -> u8 {
        match kind {
            MessageKind::Status => self.status_weight,
            MessageKind::ActionStep => self.action_weight,
            MessageKind::ObservationStep => self.observation_weight,
            _ => 0,
        }
    }
}

/// Monotonic progress counter for one session
#[derive(Clone, Debug, Default)]
pub struct ProgressEstimator {
    config: ProgressConfig,
    value: u8,
}

impl ProgressEstimator {
    /// Create an estimator starting at 0
    #[must_use]
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            config,
            value: 0,
        }
    }

    /// Current value in `0..=100`
    #[must_use]
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Configured ceiling
    #[must_use]
    pub fn ceiling(&self) -> u8 {
        self.config.ceiling.min(99)
    }

    /// Account for one accepted message
    pub fn observe(&mut self, kind: MessageKind) -> u8 {
        let weight = self.config.weight(kind);
        if weight > 0 {
            self.raise(self.value.saturating_add(weight));
        }
        self.value
    }

    /// Adopt a backend-announced percentage, if it moves the counter forward
    pub fn hint(&mut self, percent: u8) -> u8 {
        self.raise(percent);
        self.value
    }

    /// Snap to 100 on successful completion
    pub fn complete(&mut self) {
        self.value = 100;
    }

    fn raise(&mut self, target: u8) {
        if self.value >= 100 {
            return;
        }
        let capped = target.min(self.ceiling());
        if capped > self.value {
            self.value = capped;
        }
    }
}
