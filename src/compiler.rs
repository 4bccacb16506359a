//! Scenario compiler: static validation of a parsed [`Script`] against frozen
//! environment bindings, producing an immutable [`Plan`].
//!
//! Resolution is symbolic: the compiler only proves that every `${NAME}` can
//! resolve at runtime — names come either from the environment or from a
//! `capture` on an earlier request of the same scenario. Actual substitution
//! happens during execution against the live context. Repeat blocks are kept
//! as bounded-iteration nodes rather than unrolled; flat unrolling would let
//! captures from one sub-iteration leak into the next.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use regex::Regex;

use crate::error::{Error, Result};
use crate::script::{
    AssertOp, AssertTarget, Capture, Directive, Method, Scenario, Script, Template,
};

/// Compiled form of a whole script. Shared read-only across all virtual
/// users, typically behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Plan {
    pub scenarios: Vec<ScenarioPlan>,
}

#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub name: String,
    pub steps: Vec<Step>,
}

impl ScenarioPlan {
    /// Number of step results one iteration of this plan produces, repeat
    /// bodies counted `count` times over.
    pub fn effective_step_count(&self) -> u64 {
        fn count(steps: &[Step]) -> u64 {
            steps
                .iter()
                .map(|s| match s {
                    Step::Repeat { count: n, body } => n * count(body),
                    _ => 1,
                })
                .sum()
        }
        count(&self.steps)
    }
}

/// One executable step. The engine handles this set exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Request(RequestStep),
    Assert(AssertStep),
    Wait { min: Duration, max: Duration },
    Repeat { count: u64, body: Vec<Step> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestStep {
    pub method: Method,
    pub url: Template,
    pub headers: Vec<(String, Template)>,
    pub body: Option<Template>,
    pub captures: Vec<Capture>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssertStep {
    pub target: AssertTarget,
    pub predicate: Predicate,
}

/// Comparison an assert step applies to its target field. Regexes are
/// compiled here so a bad pattern is a compile-time Structural error, never a
/// runtime surprise.
#[derive(Debug, Clone)]
pub enum Predicate {
    Equals(String),
    Contains(String),
    Matches(Regex),
    /// Numeric comparison. The expected side stays textual; the evaluator
    /// parses both sides and fails the assertion (with a diagnostic) on
    /// non-numeric data instead of aborting.
    Numeric(CmpOp, String),
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Predicate::Equals(a), Predicate::Equals(b)) => a == b,
            (Predicate::Contains(a), Predicate::Contains(b)) => a == b,
            (Predicate::Matches(a), Predicate::Matches(b)) => a.as_str() == b.as_str(),
            (Predicate::Numeric(ao, a), Predicate::Numeric(bo, b)) => ao == bo && a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Compile a script against frozen environment bindings.
///
/// Bindings are resolved by name only; they are never mutated or reloaded
/// mid-run.
pub fn compile(script: &Script, env: &HashMap<String, String>) -> Result<Plan> {
    let mut seen = HashSet::new();
    for scenario in &script.scenarios {
        if !seen.insert(scenario.name.as_str()) {
            return Err(Error::Structural(format!(
                "duplicate scenario name `{}`",
                scenario.name
            )));
        }
    }

    let scenarios = script
        .scenarios
        .iter()
        .map(|s| compile_scenario(s, env))
        .collect::<Result<Vec<_>>>()?;

    Ok(Plan { scenarios })
}

/// Symbolic view of what will be resolvable at a given point of execution.
/// One frame per repeat scope; captures land in the innermost frame and
/// vanish when it pops.
struct Namespace<'a> {
    env: &'a HashMap<String, String>,
    frames: Vec<HashSet<String>>,
}

impl<'a> Namespace<'a> {
    fn new(env: &'a HashMap<String, String>) -> Self {
        Namespace { env, frames: vec![HashSet::new()] }
    }

    fn resolvable(&self, name: &str) -> bool {
        self.frames.iter().any(|f| f.contains(name)) || self.env.contains_key(name)
    }

    fn define(&mut self, name: &str) {
        self.frames
            .last_mut()
            .expect("namespace always has a root frame")
            .insert(name.to_string());
    }
}

fn compile_scenario(scenario: &Scenario, env: &HashMap<String, String>) -> Result<ScenarioPlan> {
    if scenario.directives.is_empty() {
        return Err(Error::Structural(format!(
            "scenario `{}` has no directives",
            scenario.name
        )));
    }

    let mut ns = Namespace::new(env);
    let mut has_response = false;
    let steps = compile_directives(&scenario.name, &scenario.directives, &mut ns, &mut has_response)?;

    Ok(ScenarioPlan { name: scenario.name.clone(), steps })
}

fn compile_directives(
    scenario: &str,
    directives: &[Directive],
    ns: &mut Namespace<'_>,
    has_response: &mut bool,
) -> Result<Vec<Step>> {
    let mut steps = Vec::with_capacity(directives.len());

    for directive in directives {
        match directive {
            Directive::Request(req) => {
                check_template(scenario, &req.url, ns)?;
                for (_, value) in &req.headers {
                    check_template(scenario, value, ns)?;
                }
                if let Some(body) = &req.body {
                    check_template(scenario, body, ns)?;
                }
                for capture in &req.captures {
                    ns.define(&capture.name);
                }
                *has_response = true;
                steps.push(Step::Request(RequestStep {
                    method: req.method,
                    url: req.url.clone(),
                    headers: req.headers.clone(),
                    body: req.body.clone(),
                    captures: req.captures.clone(),
                }));
            }
            Directive::Assert(assert) => {
                if !*has_response {
                    return Err(Error::InvalidReference {
                        scenario: scenario.to_string(),
                        message: format!(
                            "assert on `{}` before any request (line {})",
                            assert.target, assert.line
                        ),
                    });
                }
                let predicate = build_predicate(assert.target.clone(), assert.op, &assert.expected)?;
                steps.push(Step::Assert(AssertStep { target: assert.target.clone(), predicate }));
            }
            Directive::Wait { min, max } => {
                steps.push(Step::Wait { min: *min, max: *max });
            }
            Directive::Repeat { count, body } => {
                if *count == 0 {
                    return Err(Error::Structural(format!(
                        "repeat count must be at least 1 in scenario `{scenario}`"
                    )));
                }
                if body.is_empty() {
                    return Err(Error::Structural(format!(
                        "empty repeat body in scenario `{scenario}`"
                    )));
                }
                // Captures made inside the body are scoped to it.
                ns.frames.push(HashSet::new());
                let body_steps = compile_directives(scenario, body, ns, has_response)?;
                ns.frames.pop();
                steps.push(Step::Repeat { count: *count, body: body_steps });
            }
        }
    }

    Ok(steps)
}

fn check_template(scenario: &str, template: &Template, ns: &Namespace<'_>) -> Result<()> {
    for name in template.var_names() {
        if !ns.resolvable(name) {
            return Err(Error::UnresolvedVariable {
                scenario: scenario.to_string(),
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn build_predicate(target: AssertTarget, op: AssertOp, expected: &str) -> Result<Predicate> {
    if target == AssertTarget::Latency && matches!(op, AssertOp::Contains | AssertOp::Matches) {
        return Err(Error::Structural(format!(
            "operator `{op}` cannot apply to latency"
        )));
    }
    Ok(match op {
        AssertOp::Eq => Predicate::Equals(expected.to_string()),
        AssertOp::Contains => Predicate::Contains(expected.to_string()),
        AssertOp::Matches => {
            let regex = Regex::new(expected).map_err(|e| {
                Error::Structural(format!("invalid regex `{expected}`: {e}"))
            })?;
            Predicate::Matches(regex)
        }
        AssertOp::Lt => Predicate::Numeric(CmpOp::Lt, expected.to_string()),
        AssertOp::Le => Predicate::Numeric(CmpOp::Le, expected.to_string()),
        AssertOp::Gt => Predicate::Numeric(CmpOp::Gt, expected.to_string()),
        AssertOp::Ge => Predicate::Numeric(CmpOp::Ge, expected.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn compile_text(text: &str, env_pairs: &[(&str, &str)]) -> Result<Plan> {
        compile(&parse_str(text).unwrap(), &env(env_pairs))
    }

    #[test]
    fn resolves_environment_variables() {
        let plan = compile_text(
            r#"scenario "s" { request GET "${BASE}/users" }"#,
            &[("BASE", "http://api.test")],
        )
        .unwrap();
        assert_eq!(plan.scenarios.len(), 1);
        assert_eq!(plan.scenarios[0].effective_step_count(), 1);
    }

    #[test]
    fn unresolved_variable_fails_before_execution() {
        let err = compile_text(r#"scenario "s" { request GET "${MISSING}/x" }"#, &[]).unwrap_err();
        match err {
            Error::UnresolvedVariable { scenario, name } => {
                assert_eq!(scenario, "s");
                assert_eq!(name, "MISSING");
            }
            other => panic!("expected unresolved variable, got {other:?}"),
        }
    }

    #[test]
    fn capture_makes_name_resolvable_for_later_steps() {
        compile_text(
            r#"
            scenario "chained" {
                request POST "/login" { capture token = body }
                request GET "/me?t=${token}"
            }
            "#,
            &[],
        )
        .unwrap();
    }

    #[test]
    fn capture_is_not_resolvable_before_its_request() {
        let err = compile_text(
            r#"
            scenario "order" {
                request GET "/a?t=${token}"
                request POST "/login" { capture token = body }
            }
            "#,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnresolvedVariable { .. }));
    }

    #[test]
    fn repeat_scopes_captures() {
        // `inner` is captured inside the repeat body; referencing it after
        // the repeat must fail because the scope is discarded per iteration.
        let err = compile_text(
            r#"
            scenario "scoped" {
                repeat 2 {
                    request GET "/a" { capture inner = status }
                    request GET "/b?x=${inner}"
                }
                request GET "/c?x=${inner}"
            }
            "#,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnresolvedVariable { name, .. } if name == "inner"));
    }

    #[test]
    fn assert_before_any_request_is_invalid_reference() {
        let err = compile_text(r#"scenario "s" { assert status == 200 }"#, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidReference { .. }));
    }

    #[test]
    fn request_inside_repeat_satisfies_later_asserts() {
        compile_text(
            r#"
            scenario "s" {
                repeat 2 { request GET "/a" }
                assert status == 200
            }
            "#,
            &[],
        )
        .unwrap();
    }

    #[test]
    fn empty_scenario_is_structural() {
        let err = compile_text(r#"scenario "empty" { }"#, &[]).unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn duplicate_scenario_names_are_structural() {
        let err = compile_text(
            r#"
            scenario "dup" { request GET "/a" }
            scenario "dup" { request GET "/b" }
            "#,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Structural(msg) if msg.contains("dup")));
    }

    #[test]
    fn zero_repeat_count_is_structural() {
        let err =
            compile_text(r#"scenario "s" { repeat 0 { request GET "/a" } }"#, &[]).unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn latency_contains_is_structural() {
        let err = compile_text(
            r#"scenario "s" { request GET "/a" assert latency contains "5" }"#,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn invalid_regex_is_structural() {
        let err = compile_text(
            r#"scenario "s" { request GET "/a" assert body matches "(" }"#,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Structural(msg) if msg.contains("regex")));
    }

    #[test]
    fn repeat_counts_toward_effective_steps() {
        let plan = compile_text(
            r#"
            scenario "s" {
                request GET "/a"
                repeat 3 {
                    request GET "/b"
                    assert status == 200
                }
            }
            "#,
            &[],
        )
        .unwrap();
        // 1 + 3 * 2
        assert_eq!(plan.scenarios[0].effective_step_count(), 7);
    }

    #[test]
    fn compiling_same_script_twice_is_identical() {
        let text = r#"
            scenario "a" { request GET "/x" assert status == 200 wait 10ms }
            scenario "b" { repeat 2 { request GET "/y" } }
        "#;
        let p1 = compile_text(text, &[]).unwrap();
        let p2 = compile_text(text, &[]).unwrap();
        assert_eq!(p1.scenarios.len(), p2.scenarios.len());
        for (a, b) in p1.scenarios.iter().zip(&p2.scenarios) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.steps, b.steps);
        }
    }
}
