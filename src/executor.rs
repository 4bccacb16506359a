//! Execution engine — virtual users, cancellation, and the results pipeline.
//!
//! One tokio task per virtual user; each task replays the full scenario list
//! for its configured iteration count (or until the run deadline), executing
//! steps strictly in plan order because later steps may consume captures made
//! by earlier ones. Across users nothing is shared except the compiled plan
//! (read-only) and the results channel.
//!
//! Results flow as [`RunEvent`]s over an unbounded mpsc channel into a single
//! aggregator task that owns the mutable [`RunAggregate`] — no locks on the
//! hot path, no lost or double-counted updates.
//!
//! Cancellation is a `watch` channel. Workers check it between steps only; an
//! in-flight request is allowed to complete or time out. A `duration` run
//! mode is just a deadline task firing the same signal.
//!
//! # Failure isolation
//!
//! A transport failure marks the step and the iteration failed but the
//! remaining steps still run — asserts downstream of a failed request see no
//! captured response and fail with an explicit diagnostic rather than
//! crashing. A failed assert likewise marks the iteration failed without
//! halting it; pass/fail is reported per scenario iteration, not per step.
//! Only internal errors (a template miss the compiler should have caught,
//! aggregate divergence) abort the run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use typed_builder::TypedBuilder;

use crate::aggregate::{RunAggregate, RunSnapshot};
use crate::assertion;
use crate::client::{HttpClient, HttpRequest, Response};
use crate::compiler::{AssertStep, Plan, RequestStep, Step};
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::metric::{RunEvent, ScenarioResult, StepKind, StepResult};
use crate::script::CaptureField;

/// Run configuration.
///
/// `iterations` is per virtual user and counts full passes over the scenario
/// list. When `duration` is set it takes precedence: users iterate until the
/// deadline fires. `ramp_up` staggers user starts evenly across its span;
/// `pacing` inserts a fixed sleep between iterations.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RunConfig {
    #[builder(default = 1)]
    pub users: usize,
    #[builder(default = 1)]
    pub iterations: u64,
    #[builder(default, setter(strip_option))]
    pub duration: Option<Duration>,
    #[builder(default = Duration::ZERO)]
    pub ramp_up: Duration,
    #[builder(default, setter(strip_option))]
    pub pacing: Option<Duration>,
    #[builder(default = Duration::from_secs(30))]
    pub request_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig::builder().build()
    }
}

/// Handle for cancelling a run from outside. Clonable and cheap.
#[derive(Debug, Clone)]
pub struct CancelToken(watch::Sender<bool>);

impl CancelToken {
    pub fn cancel(&self) {
        // Receivers may already be gone if the run finished; that's fine.
        let _ = self.0.send(true);
    }
}

/// Drives compiled plans to completion and returns the final snapshot.
pub struct Runner {
    config: RunConfig,
    client: Arc<dyn HttpClient>,
    shutdown: watch::Sender<bool>,
}

impl Runner {
    pub fn new(config: RunConfig, client: Arc<dyn HttpClient>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Runner { config, client, shutdown }
    }

    /// Token observable by every virtual user; checked between steps.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken(self.shutdown.clone())
    }

    /// Execute the whole plan under the configured concurrency and return
    /// the aggregated snapshot.
    pub async fn run(
        &self,
        plan: Arc<Plan>,
        env: Arc<HashMap<String, String>>,
    ) -> Result<RunSnapshot> {
        if self.config.users == 0 {
            return Err(Error::Structural("virtual user count must be at least 1".into()));
        }

        let started = Instant::now();
        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<RunEvent>();

        let mut aggregate = RunAggregate::for_plan(&plan);
        let aggregator = tokio::spawn(async move {
            while let Some(event) = results_rx.recv().await {
                aggregate.consume(&event);
            }
            aggregate
        });

        // A deadline is just cancellation on a timer.
        let deadline = self.config.duration.map(|duration| {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                let _ = shutdown.send(true);
            })
        });

        let stagger = if self.config.users > 1 && !self.config.ramp_up.is_zero() {
            self.config.ramp_up / self.config.users as u32
        } else {
            Duration::ZERO
        };

        tracing::info!(
            users = self.config.users,
            scenarios = plan.scenarios.len(),
            "starting run"
        );

        let mut handles = Vec::with_capacity(self.config.users);
        for user in 0..self.config.users {
            if *self.shutdown.subscribe().borrow() {
                break;
            }
            let worker = VirtualUser {
                id: user,
                plan: Arc::clone(&plan),
                env: Arc::clone(&env),
                client: Arc::clone(&self.client),
                config: self.config.clone(),
                results: results_tx.clone(),
                shutdown: self.shutdown.subscribe(),
            };
            let abort = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                let outcome = worker.run().await;
                if outcome.is_err() {
                    // An internal error in one user aborts the whole run.
                    let _ = abort.send(true);
                }
                outcome
            }));
            if !stagger.is_zero() && user + 1 < self.config.users {
                let mut shutdown = self.shutdown.subscribe();
                tokio::select! {
                    _ = tokio::time::sleep(stagger) => {}
                    _ = shutdown.wait_for(|b| *b) => break,
                }
            }
        }
        // The aggregator drains and exits once every worker clone is gone.
        drop(results_tx);

        let mut run_error = None;
        for join in join_all(handles).await {
            match join {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    run_error.get_or_insert(e);
                }
                Err(e) => {
                    run_error
                        .get_or_insert(Error::Internal(format!("virtual user task panicked: {e}")));
                }
            }
        }
        if let Some(handle) = deadline {
            handle.abort();
        }

        let aggregate = aggregator
            .await
            .map_err(|e| Error::Internal(format!("aggregator task panicked: {e}")))?;

        if let Some(error) = run_error {
            return Err(error);
        }

        let snapshot = aggregate.snapshot(started.elapsed())?;
        tracing::info!(
            requests = snapshot.total_requests,
            failed = snapshot.scenarios_failed(),
            "run complete"
        );
        Ok(snapshot)
    }
}

/// Per-iteration mutable state threaded through the step walk.
struct IterationState {
    failed: bool,
    requests: u64,
    last_response: Option<Response>,
}

struct VirtualUser {
    id: usize,
    plan: Arc<Plan>,
    env: Arc<HashMap<String, String>>,
    client: Arc<dyn HttpClient>,
    config: RunConfig,
    results: mpsc::UnboundedSender<RunEvent>,
    shutdown: watch::Receiver<bool>,
}

impl VirtualUser {
    fn cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn run(self) -> Result<()> {
        let mut iterations = 0u64;
        loop {
            if self.cancelled() {
                break;
            }
            if self.config.duration.is_none() && iterations >= self.config.iterations {
                break;
            }
            iterations += 1;

            for scenario_index in 0..self.plan.scenarios.len() {
                if self.cancelled() {
                    break;
                }
                self.run_iteration(scenario_index).await?;
            }

            if let Some(pacing) = self.config.pacing {
                if !self.cancelled() {
                    tokio::time::sleep(pacing).await;
                }
            }
        }
        tracing::debug!(user = self.id, iterations, "virtual user finished");
        Ok(())
    }

    /// One pass through one scenario. Always emits a `ScenarioResult`, even
    /// when cancellation cuts the pass short, so every issued request is
    /// accounted for — but a pass interrupted before its last step is marked
    /// incomplete, never retroactively passed.
    async fn run_iteration(&self, scenario_index: usize) -> Result<()> {
        let scenario = &self.plan.scenarios[scenario_index];
        let mut ctx = ExecutionContext::new(Arc::clone(&self.env));
        let mut state = IterationState { failed: false, requests: 0, last_response: None };

        self.run_steps(scenario_index, &scenario.steps, &mut ctx, &mut state).await?;

        let _ = self.results.send(RunEvent::Scenario(ScenarioResult {
            scenario: scenario.name.clone(),
            passed: !state.failed,
            completed: !self.cancelled(),
            requests: state.requests,
        }));
        Ok(())
    }

    /// Walk a step list in order. Boxed because repeat bodies recurse.
    fn run_steps<'a>(
        &'a self,
        scenario_index: usize,
        steps: &'a [Step],
        ctx: &'a mut ExecutionContext,
        state: &'a mut IterationState,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for step in steps {
                if self.cancelled() {
                    return Ok(());
                }
                match step {
                    Step::Request(request) => {
                        self.run_request(scenario_index, request, ctx, state).await?;
                    }
                    Step::Assert(assert) => {
                        self.run_assert(scenario_index, assert, state);
                    }
                    Step::Wait { min, max } => {
                        self.run_wait(scenario_index, *min, *max).await;
                    }
                    Step::Repeat { count, body } => {
                        for _ in 0..*count {
                            if self.cancelled() {
                                break;
                            }
                            // Fresh capture scope per sub-iteration, layered
                            // on the parent's captures.
                            ctx.push_scope();
                            let walked = self.run_steps(scenario_index, body, ctx, state).await;
                            ctx.pop_scope();
                            walked?;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    async fn run_request(
        &self,
        scenario_index: usize,
        step: &RequestStep,
        ctx: &mut ExecutionContext,
        state: &mut IterationState,
    ) -> Result<()> {
        let scenario = &self.plan.scenarios[scenario_index].name;

        let url = ctx.render(&step.url)?;
        let mut headers = Vec::with_capacity(step.headers.len());
        for (name, template) in &step.headers {
            headers.push((name.clone(), ctx.render(template)?));
        }
        let body = match &step.body {
            Some(template) => Some(ctx.render(template)?),
            None => None,
        };

        let request = HttpRequest {
            method: step.method,
            url,
            headers,
            body,
            timeout: self.config.request_timeout,
        };

        state.requests += 1;
        let dispatched = Instant::now();
        match self.client.issue(request).await {
            Ok(response) => {
                let _ = self.results.send(RunEvent::Step(StepResult::new(
                    scenario,
                    StepKind::Request,
                    true,
                    response.latency,
                )));
                for capture in &step.captures {
                    let value = match &capture.field {
                        CaptureField::Status => response.status.to_string(),
                        CaptureField::Body => response.body.clone(),
                        CaptureField::Header(name) => {
                            response.header(name).unwrap_or_default().to_string()
                        }
                    };
                    ctx.capture(&capture.name, value);
                }
                state.last_response = Some(response);
            }
            Err(error) => {
                tracing::warn!(scenario = %scenario, user = self.id, %error, "request failed");
                state.failed = true;
                state.last_response = None;
                let _ = self.results.send(RunEvent::Step(
                    StepResult::new(scenario, StepKind::Request, false, dispatched.elapsed())
                        .with_error(error.to_string()),
                ));
            }
        }
        Ok(())
    }

    fn run_assert(&self, scenario_index: usize, step: &AssertStep, state: &mut IterationState) {
        let scenario = &self.plan.scenarios[scenario_index].name;
        let result = match &state.last_response {
            Some(response) => {
                let verdict = assertion::evaluate(step, response);
                if verdict.passed {
                    StepResult::new(scenario, StepKind::Assert, true, Duration::ZERO)
                } else {
                    state.failed = true;
                    StepResult::new(scenario, StepKind::Assert, false, Duration::ZERO)
                        .with_error(verdict.detail)
                }
            }
            None => {
                state.failed = true;
                StepResult::new(scenario, StepKind::Assert, false, Duration::ZERO).with_error(
                    format!(
                        "assert {}: no response captured (previous request failed?)",
                        step.target
                    ),
                )
            }
        };
        let _ = self.results.send(RunEvent::Step(result));
    }

    async fn run_wait(&self, scenario_index: usize, min: Duration, max: Duration) {
        let scenario = &self.plan.scenarios[scenario_index].name;
        let wait = wait_span(min, max);
        // Suspends only this virtual user's task.
        tokio::time::sleep(wait).await;
        let _ = self
            .results
            .send(RunEvent::Step(StepResult::new(scenario, StepKind::Wait, true, wait)));
    }
}

/// Draw a wait from a range, uniform over whole milliseconds. Bounds beyond
/// `u64::MAX` milliseconds saturate rather than truncate.
fn wait_span(min: Duration, max: Duration) -> Duration {
    if min == max {
        return min;
    }
    let lo = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
    let hi = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}
