//! Assertion evaluator.
//!
//! Evaluates one compiled [`AssertStep`] against a captured [`Response`].
//! Evaluation never errors: data-shape mismatches (non-numeric latency bound,
//! missing header) fail the assertion with a diagnostic instead of aborting
//! the run.

use crate::client::Response;
use crate::compiler::{AssertStep, CmpOp, Predicate};
use crate::script::AssertTarget;

/// Outcome of evaluating a single assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub passed: bool,
    pub detail: String,
}

impl Verdict {
    fn pass(detail: String) -> Self {
        Verdict { passed: true, detail }
    }

    fn fail(detail: String) -> Self {
        Verdict { passed: false, detail }
    }
}

/// Evaluate an assert step against the most recently captured response.
pub fn evaluate(step: &AssertStep, response: &Response) -> Verdict {
    let actual = match extract(&step.target, response) {
        Some(value) => value,
        None => {
            return Verdict::fail(format!(
                "assert {}: target not present in response",
                step.target
            ));
        }
    };

    match &step.predicate {
        Predicate::Equals(expected) => {
            if actual == *expected {
                Verdict::pass(format!("{} == {expected}", step.target))
            } else {
                Verdict::fail(format!(
                    "expected {} {expected}, got {actual}",
                    step.target
                ))
            }
        }
        Predicate::Contains(expected) => {
            if actual.contains(expected.as_str()) {
                Verdict::pass(format!("{} contains {expected:?}", step.target))
            } else {
                Verdict::fail(format!(
                    "expected {} to contain {expected:?}, got {actual:?}",
                    step.target,
                ))
            }
        }
        Predicate::Matches(regex) => {
            if regex.is_match(&actual) {
                Verdict::pass(format!("{} matches /{}/", step.target, regex.as_str()))
            } else {
                Verdict::fail(format!(
                    "expected {} to match /{}/, got {actual:?}",
                    step.target,
                    regex.as_str(),
                ))
            }
        }
        Predicate::Numeric(op, expected) => numeric(step, &actual, *op, expected),
    }
}

fn extract(target: &AssertTarget, response: &Response) -> Option<String> {
    match target {
        AssertTarget::Status => Some(response.status.to_string()),
        AssertTarget::Body => Some(response.body.clone()),
        AssertTarget::Latency => Some(response.latency.as_millis().to_string()),
        AssertTarget::Header(name) => response.header(name).map(str::to_string),
    }
}

fn numeric(step: &AssertStep, actual: &str, op: CmpOp, expected: &str) -> Verdict {
    let Ok(expected_n) = expected.trim().parse::<f64>() else {
        return Verdict::fail(format!(
            "assert {}: expected value `{expected}` is not numeric",
            step.target
        ));
    };
    let Ok(actual_n) = actual.trim().parse::<f64>() else {
        return Verdict::fail(format!(
            "assert {}: actual value `{actual}` is not numeric",
            step.target
        ));
    };

    let passed = match op {
        CmpOp::Lt => actual_n < expected_n,
        CmpOp::Le => actual_n <= expected_n,
        CmpOp::Gt => actual_n > expected_n,
        CmpOp::Ge => actual_n >= expected_n,
    };

    if passed {
        Verdict::pass(format!("{} {} {expected}", step.target, op.symbol()))
    } else {
        Verdict::fail(format!(
            "expected {} {} {expected}, got {actual}",
            step.target,
            op.symbol(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use std::collections::HashMap;
    use std::time::Duration;

    fn fixture() -> Response {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Response {
            status: 200,
            headers,
            body: "x".to_string(),
            latency: Duration::from_millis(120),
        }
    }

    fn step(target: AssertTarget, predicate: Predicate) -> AssertStep {
        AssertStep { target, predicate }
    }

    #[test]
    fn status_equality_passes() {
        let v = evaluate(
            &step(AssertTarget::Status, Predicate::Equals("200".into())),
            &fixture(),
        );
        assert!(v.passed);
    }

    #[test]
    fn status_mismatch_names_actual_value() {
        let v = evaluate(
            &step(AssertTarget::Status, Predicate::Equals("404".into())),
            &fixture(),
        );
        assert!(!v.passed);
        assert!(v.detail.contains("200"), "detail was: {}", v.detail);
        assert!(v.detail.contains("404"), "detail was: {}", v.detail);
    }

    #[test]
    fn body_contains() {
        let v = evaluate(
            &step(AssertTarget::Body, Predicate::Contains("x".into())),
            &fixture(),
        );
        assert!(v.passed);
    }

    #[test]
    fn header_regex_match() {
        let v = evaluate(
            &step(
                AssertTarget::Header("content-type".into()),
                Predicate::Matches(Regex::new("json$").unwrap()),
            ),
            &fixture(),
        );
        assert!(v.passed);
    }

    #[test]
    fn missing_header_fails_with_diagnostic() {
        let v = evaluate(
            &step(
                AssertTarget::Header("x-trace".into()),
                Predicate::Equals("abc".into()),
            ),
            &fixture(),
        );
        assert!(!v.passed);
        assert!(v.detail.contains("not present"));
    }

    #[test]
    fn latency_numeric_comparison() {
        let v = evaluate(
            &step(AssertTarget::Latency, Predicate::Numeric(CmpOp::Lt, "250".into())),
            &fixture(),
        );
        assert!(v.passed);
        let v = evaluate(
            &step(AssertTarget::Latency, Predicate::Numeric(CmpOp::Gt, "250".into())),
            &fixture(),
        );
        assert!(!v.passed);
        assert!(v.detail.contains("120"), "detail was: {}", v.detail);
    }

    #[test]
    fn non_numeric_expected_fails_instead_of_erroring() {
        let v = evaluate(
            &step(AssertTarget::Latency, Predicate::Numeric(CmpOp::Lt, "fast".into())),
            &fixture(),
        );
        assert!(!v.passed);
        assert!(v.detail.contains("not numeric"));
    }

    #[test]
    fn non_numeric_actual_fails_instead_of_erroring() {
        let v = evaluate(
            &step(AssertTarget::Body, Predicate::Numeric(CmpOp::Ge, "1".into())),
            &fixture(),
        );
        assert!(!v.passed);
        assert!(v.detail.contains("`x`"));
    }
}
