//! LoadForge — a script-driven HTTP load-testing engine.
//!
//! LoadForge runs `.lf` scripts: small scenario descriptions made of
//! `request`, `assert`, `wait` and `repeat` directives. The engine compiles
//! a script into an immutable plan, replays it under N concurrent virtual
//! users through an injected HTTP client, and aggregates every outcome into
//! one deterministic report.
//!
//! # Architecture
//!
//! The pipeline is strictly one-directional:
//!
//! - [`parser`]: script text → [`Script`](script::Script) AST. Pure and
//!   deterministic; `${NAME}` markers are recognized but left unresolved.
//! - [`compiler`]: AST + frozen environment bindings → immutable
//!   [`Plan`](compiler::Plan). All names are proven resolvable and all
//!   operator/target combinations validated before a single request goes out.
//! - [`executor`]: runs plans — one task per virtual user, strict step order
//!   within an iteration, no shared mutable state across users.
//! - [`assertion`]: checks one expectation against one captured response.
//! - [`aggregate`]: a single aggregator task folds results from all users
//!   into a [`RunSnapshot`](aggregate::RunSnapshot); no locks, no lost counts.
//! - [`report`]: renders the snapshot into the fixed textual report and the
//!   process exit status.
//!
//! Transport belongs to the caller: anything implementing
//! [`HttpClient`](client::HttpClient) can be injected. [`ReqwestClient`] is
//! the stock adapter; tests use in-memory mocks.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use loadforge::{
//!     compile, parse_str, ReqwestClient, Reporter, RunConfig, Runner, RunReport, StdoutReporter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let script = parse_str(
//!         r#"
//!         scenario "health" {
//!             request GET "${BASE}/health"
//!             assert status == 200
//!             assert latency < 500
//!         }
//!         "#,
//!     )?;
//!
//!     let mut env = HashMap::new();
//!     env.insert("BASE".to_string(), "http://localhost:3000".to_string());
//!     let plan = Arc::new(compile(&script, &env)?);
//!
//!     let config = RunConfig::builder().users(10).iterations(5).build();
//!     let runner = Runner::new(config, Arc::new(ReqwestClient::new()));
//!     let snapshot = runner.run(plan, Arc::new(env)).await?;
//!
//!     let report = RunReport::from(snapshot);
//!     StdoutReporter.report(&report).await?;
//!     std::process::exit(report.exit_code());
//! }
//! ```
//!
//! # Failure policy
//!
//! Syntax and compile errors abort before execution; internal invariant
//! violations abort the run. Everything else — transport failures, failed
//! assertions — is recorded against its scenario iteration and the run keeps
//! going, so a load test always ends with a report.

pub mod aggregate;
pub mod assertion;
pub mod client;
pub mod compiler;
pub mod context;
pub mod error;
pub mod executor;
pub mod metric;
pub mod parser;
pub mod report;
pub mod script;

pub use aggregate::{RunAggregate, RunSnapshot};
pub use client::{HttpClient, HttpRequest, ReqwestClient, Response, TransportError};
pub use compiler::{compile, Plan};
pub use context::ExecutionContext;
pub use error::{Error, Result};
pub use executor::{CancelToken, RunConfig, Runner};
pub use metric::{RunEvent, ScenarioResult, StepKind, StepResult};
pub use parser::parse_str;
pub use report::{Reporter, RunReport, StdoutReporter};
pub use script::{Directive, Script};
