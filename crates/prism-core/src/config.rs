//! Dispatch configuration
//!
//! Policy knobs for the router and session store. Per-specialist timeouts
//! live on each [`CapabilityDescriptor`](crate::registry::CapabilityDescriptor),
//! not here.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Smallest step budget that still fits a two-specialist chain with one retry
pub const RECOMMENDED_MIN_STEP_BUDGET: usize = 4;

/// How a task waits when its session lane is already held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneMode {
    /// Wait for the running task to finish (default)
    #[default]
    Queue,
    /// Fail immediately with `SessionBusy`
    Reject,
}

impl std::fmt::Display for LaneMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queue => write!(f, "queue"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// Configuration for dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum specialist invocations per task
    #[serde(default = "default_step_budget")]
    pub step_budget: usize,
    /// Attempts of the same specialist for one step, first call included
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_step: usize,
    /// Whether a failed step may switch to another specialist of the same modality
    #[serde(default = "default_true")]
    pub allow_fallback: bool,
    /// Concurrent tasks on the same session
    #[serde(default)]
    pub lane_mode: LaneMode,
    /// Bounded channel capacity for streamed events
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Idle time after which a session may be evicted
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Broadcast capacity of the observer bus
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_step_budget() -> usize {
    6
}

fn default_max_attempts() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_event_buffer() -> usize {
    32
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_bus_capacity() -> usize {
    256
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            step_budget: default_step_budget(),
            max_attempts_per_step: default_max_attempts(),
            allow_fallback: true,
            lane_mode: LaneMode::default(),
            event_buffer: default_event_buffer(),
            session_ttl_secs: default_session_ttl(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

impl DispatchConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the step budget
    #[must_use]
    pub fn with_step_budget(mut self, budget: usize) -> Self {
        self.step_budget = budget;
        self
    }

    /// Set the attempts allowed per step
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts_per_step = attempts;
        self
    }

    /// Enable or disable same-modality fallback
    #[must_use]
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.allow_fallback = enabled;
        self
    }

    /// Set the lane mode
    #[must_use]
    pub fn with_lane_mode(mut self, mode: LaneMode) -> Self {
        self.lane_mode = mode;
        self
    }

    /// Set the streamed event buffer
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Set the session idle TTL
    #[must_use]
    pub fn with_session_ttl(mut self, secs: u64) -> Self {
        self.session_ttl_secs = secs;
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.step_budget == 0 {
            return Err(invalid("step_budget", "must be at least 1"));
        }
        if self.max_attempts_per_step == 0 {
            return Err(invalid("max_attempts_per_step", "must be at least 1"));
        }
        if self.event_buffer == 0 {
            return Err(invalid("event_buffer", "must be at least 1"));
        }
        if self.bus_capacity == 0 {
            return Err(invalid("bus_capacity", "must be at least 1"));
        }
        if self.step_budget < RECOMMENDED_MIN_STEP_BUDGET {
            warn!(
                step_budget = self.step_budget,
                "step budget below {} cannot fit a two-specialist chain with a retry",
                RECOMMENDED_MIN_STEP_BUDGET
            );
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> Error {
    Error::InvalidConfig {
        field: field.to_string(),
        message: message.to_string(),
    }
}
