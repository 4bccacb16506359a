//! Result samples emitted by the execution engine.
//!
//! A [`StepResult`] is the smallest unit the engine produces — one executed
//! directive. A [`ScenarioResult`] closes out one full iteration of a
//! scenario by one virtual user. Both flow over the results channel into the
//! aggregator task.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    Request,
    Assert,
    Wait,
}

/// Outcome of one executed directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub scenario: String,
    pub kind: StepKind,
    pub success: bool,
    pub latency: Duration,
    /// Diagnostic for failed requests and assertions.
    pub error: Option<String>,
    pub timestamp: SystemTime,
}

impl StepResult {
    pub fn new(scenario: &str, kind: StepKind, success: bool, latency: Duration) -> Self {
        StepResult {
            scenario: scenario.to_string(),
            kind,
            success,
            latency,
            error: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// One pass through a scenario's steps by one virtual user. The iteration
/// fails if any request or assert step in it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub passed: bool,
    /// False when cancellation interrupted the pass before every step ran.
    /// An interrupted pass with no observed failure counts neither as a
    /// passed nor as a failed iteration; its requests still count.
    pub completed: bool,
    /// Requests issued during this iteration, transport failures included.
    pub requests: u64,
}

/// Everything a virtual-user task sends to the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    Step(StepResult),
    Scenario(ScenarioResult),
}
