//! End-to-end demo against a local server.
//!
//! Start anything that answers on port 3000, then:
//! `cargo run --example http`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use loadforge::{
    compile, parse_str, ReqwestClient, Reporter, RunConfig, Runner, RunReport, StdoutReporter,
};

const SCRIPT: &str = r#"
scenario "front page" {
    request GET "${BASE}/"
    assert status == 200
    assert latency < 1000
    wait 50ms..200ms
}

scenario "burst" {
    repeat 5 {
        request GET "${BASE}/"
        assert status == 200
    }
}
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let script = parse_str(SCRIPT)?;

    let mut env = HashMap::new();
    env.insert("BASE".to_string(), "http://localhost:3000".to_string());
    let plan = Arc::new(compile(&script, &env)?);

    let config = RunConfig::builder()
        .users(10)
        .iterations(20)
        .ramp_up(Duration::from_secs(2))
        .build();
    let runner = Runner::new(config, Arc::new(ReqwestClient::new()));
    let snapshot = runner.run(plan, Arc::new(env)).await?;

    let report = RunReport::from(snapshot);
    StdoutReporter.report(&report).await?;
    std::process::exit(report.exit_code());
}
