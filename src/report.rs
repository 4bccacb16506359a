//! Report generation.
//!
//! A [`RunReport`] derives the human-facing view from a [`RunSnapshot`];
//! a [`Reporter`] then delivers the rendered text somewhere. The rendered
//! format is fixed — the CLI layer writes it to stdout verbatim and turns
//! [`RunReport::exit_code`] into the process exit status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::aggregate::RunSnapshot;
use crate::error::Result;

/// One rendered line per scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioLine {
    pub name: String,
    pub passed: bool,
    pub requests: u64,
}

/// Final report for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub duration_seconds: f64,
    pub scenarios: Vec<ScenarioLine>,
    pub passed: u64,
    pub failed: u64,
    pub total_requests: u64,
}

impl From<RunSnapshot> for RunReport {
    fn from(snapshot: RunSnapshot) -> Self {
        let scenarios = snapshot
            .scenarios
            .iter()
            .map(|s| ScenarioLine { name: s.name.clone(), passed: s.passed(), requests: s.requests })
            .collect();
        RunReport {
            duration_seconds: snapshot.elapsed.as_secs_f64(),
            passed: snapshot.scenarios_passed(),
            failed: snapshot.scenarios_failed(),
            total_requests: snapshot.total_requests,
            scenarios,
        }
    }
}

impl RunReport {
    /// The fixed textual report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("LoadForge Test Report\n");
        out.push_str(&format!("Duration: {:.3}s\n\n", self.duration_seconds));

        for line in &self.scenarios {
            let mark = if line.passed { "PASS" } else { "FAIL" };
            out.push_str(&format!("  {mark}  {}  (requests: {})\n", line.name, line.requests));
        }

        out.push_str("\nSummary:\n");
        out.push_str(&format!(
            "  Scenarios: {} ({} passed, {} failed)\n",
            self.scenarios.len(),
            self.passed,
            self.failed
        ));
        out.push_str(&format!("  Total requests: {}\n", self.total_requests));
        out
    }

    /// A run succeeds only with zero failed scenarios.
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Consumes rendered reports and sends them somewhere.
#[async_trait]
pub trait Reporter {
    async fn report(&self, report: &RunReport) -> Result<()>;
}

/// Writes the rendered report to stdout.
pub struct StdoutReporter;

#[async_trait]
impl Reporter for StdoutReporter {
    async fn report(&self, report: &RunReport) -> Result<()> {
        print!("{}", report.render());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ScenarioTotals;
    use std::time::Duration;

    fn totals(name: &str, iterations: u64, failed: u64, requests: u64) -> ScenarioTotals {
        ScenarioTotals {
            name: name.to_string(),
            iterations,
            failed_iterations: failed,
            requests,
            ..Default::default()
        }
    }

    #[test]
    fn renders_fixed_format() {
        let snapshot = RunSnapshot {
            scenarios: vec![totals("search", 1, 0, 1), totals("search again", 1, 0, 1)],
            total_requests: 2,
            elapsed: Duration::from_millis(123),
        };
        let report = RunReport::from(snapshot);
        assert_eq!(
            report.render(),
            "LoadForge Test Report\n\
             Duration: 0.123s\n\
             \n\
             \x20 PASS  search  (requests: 1)\n\
             \x20 PASS  search again  (requests: 1)\n\
             \n\
             Summary:\n\
             \x20 Scenarios: 2 (2 passed, 0 failed)\n\
             \x20 Total requests: 2\n"
        );
        assert!(report.success());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn failed_scenario_flips_exit_status() {
        let snapshot = RunSnapshot {
            scenarios: vec![totals("ok", 2, 0, 4), totals("broken", 2, 1, 4)],
            total_requests: 8,
            elapsed: Duration::from_secs(1),
        };
        let report = RunReport::from(snapshot);
        assert!(report.render().contains("  FAIL  broken  (requests: 4)"));
        assert!(report.render().contains("Scenarios: 2 (1 passed, 1 failed)"));
        assert!(!report.success());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn scenario_never_run_counts_as_not_passed() {
        // Cancellation before the first iteration: present in the report,
        // counted neither way as passed.
        let snapshot = RunSnapshot {
            scenarios: vec![totals("ran", 1, 0, 1), totals("skipped", 0, 0, 0)],
            total_requests: 1,
            elapsed: Duration::from_secs(1),
        };
        let report = RunReport::from(snapshot);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 0);
        assert!(report.passed + report.failed <= report.scenarios.len() as u64);
    }
}
