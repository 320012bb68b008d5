//! Synthetic progress for transport calls that do not report their own.
//!
//! The ramp moves a job forward by a fixed step on every tick and stops at a
//! cap below 1.0, so a job never looks finished before its url is known.

use crate::config::{AggregatorConfig, MAX_PROGRESS_CAP};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRamp {
    step: f64,
    cap: f64,
}

impl ProgressRamp {
    pub fn new(step: f64, cap: f64) -> Self {
        Self {
            step: step.max(0.0),
            cap: cap.clamp(0.0, MAX_PROGRESS_CAP),
        }
    }

    pub fn from_config(config: &AggregatorConfig) -> Self {
        Self::new(config.progress_step, config.progress_cap)
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    /// Next value after `current`, or `None` when the ramp has nothing to add.
    pub fn advance(&self, current: f64) -> Option<f64> {
        let next = (current + self.step).min(self.cap);
        if next > current {
            Some(next)
        } else {
            None
        }
    }
}
