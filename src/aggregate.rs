//! Run aggregation.
//!
//! [`RunAggregate`] stores compact, mergeable raw totals — counts only, no
//! derived statistics; deriving belongs to the report stage. A single
//! aggregator task owns one instance and folds every [`RunEvent`] into it, so
//! the hot path needs no locking at all. `merge` is associative and
//! commutative, so switching to worker-local aggregates folded at the end
//! would not change the report stage.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compiler::Plan;
use crate::error::{Error, Result};
use crate::metric::{RunEvent, StepKind, StepResult};

/// Raw per-scenario totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTotals {
    pub name: String,
    pub iterations: u64,
    pub failed_iterations: u64,
    pub requests: u64,
    pub failed_requests: u64,
    pub failed_asserts: u64,
    pub total_latency: Duration,
}

impl ScenarioTotals {
    pub fn passed(&self) -> bool {
        self.failed_iterations == 0
    }
}

/// Mutable accumulator owned by the aggregator task. Scenario order follows
/// the plan, not event arrival, so reports are deterministic. Lookups are
/// linear — scripts hold a handful of scenarios, not thousands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAggregate {
    scenarios: Vec<ScenarioTotals>,
    total_requests: u64,
}

impl RunAggregate {
    /// An empty aggregate pre-seeded with the plan's scenarios so every one
    /// appears in the report even if cancellation lands before its first
    /// iteration.
    pub fn for_plan(plan: &Plan) -> Self {
        let scenarios = plan
            .scenarios
            .iter()
            .map(|s| ScenarioTotals { name: s.name.clone(), ..Default::default() })
            .collect();
        RunAggregate { scenarios, total_requests: 0 }
    }

    fn totals_mut(&mut self, scenario: &str) -> Option<&mut ScenarioTotals> {
        self.scenarios.iter_mut().find(|s| s.name == scenario)
    }

    /// Fold one event into the totals.
    pub fn consume(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Step(step) => self.consume_step(step),
            RunEvent::Scenario(result) => {
                self.total_requests += result.requests;
                if let Some(totals) = self.totals_mut(&result.scenario) {
                    totals.requests += result.requests;
                    if !result.passed {
                        totals.iterations += 1;
                        totals.failed_iterations += 1;
                    } else if result.completed {
                        totals.iterations += 1;
                    }
                    // A clean pass cut short by cancellation counts neither.
                }
            }
        }
    }

    fn consume_step(&mut self, step: &StepResult) {
        let latency = step.latency;
        let (kind, success) = (step.kind, step.success);
        if let Some(totals) = self.totals_mut(&step.scenario) {
            match kind {
                StepKind::Request => {
                    totals.total_latency += latency;
                    if !success {
                        totals.failed_requests += 1;
                    }
                }
                StepKind::Assert => {
                    if !success {
                        totals.failed_asserts += 1;
                    }
                }
                StepKind::Wait => {}
            }
        }
    }

    /// Combine another aggregate into this one. Order must not matter.
    pub fn merge(&mut self, other: Self) {
        self.total_requests += other.total_requests;
        for theirs in other.scenarios {
            if let Some(ours) = self.totals_mut(&theirs.name) {
                ours.iterations += theirs.iterations;
                ours.failed_iterations += theirs.failed_iterations;
                ours.requests += theirs.requests;
                ours.failed_requests += theirs.failed_requests;
                ours.failed_asserts += theirs.failed_asserts;
                ours.total_latency += theirs.total_latency;
            }
        }
    }

    /// Freeze the totals into a snapshot, checking that the global request
    /// count still equals the per-scenario sum. A divergence means an
    /// aggregation bug and aborts the run.
    pub fn snapshot(&self, elapsed: Duration) -> Result<RunSnapshot> {
        let per_scenario_sum: u64 = self.scenarios.iter().map(|s| s.requests).sum();
        if per_scenario_sum != self.total_requests {
            return Err(Error::Internal(format!(
                "aggregate divergence: global requests {} != per-scenario sum {}",
                self.total_requests, per_scenario_sum
            )));
        }
        Ok(RunSnapshot {
            scenarios: self.scenarios.clone(),
            total_requests: self.total_requests,
            elapsed,
        })
    }
}

/// Point-in-time totals for an entire run. Input to the report generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Plan-ordered.
    pub scenarios: Vec<ScenarioTotals>,
    pub total_requests: u64,
    pub elapsed: Duration,
}

impl RunSnapshot {
    pub fn scenarios_passed(&self) -> u64 {
        self.scenarios.iter().filter(|s| s.iterations > 0 && s.passed()).count() as u64
    }

    pub fn scenarios_failed(&self) -> u64 {
        self.scenarios.iter().filter(|s| !s.passed()).count() as u64
    }
}
