//! Fan-out demo with the mock worker: one flaky monitor, two subscribers.
//!
//! Shows the retry machinery end to end without any network: the scripted
//! worker alternates success and failure, the coordinator applies the fixed
//! backoff policy, and both rules observe the same envelope stream.
//!
//! ```bash
//! cargo run --example mock_fanout
//! ```

use std::sync::Arc;

use argos::{ErrorKind, MockOutcome, MockWorker, SubscriberRegistry, Supervisor, WorkerRegistry};
use serde_json::json;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "argos=debug".into()),
        )
        .init();

    let mut workers = WorkerRegistry::new();
    workers.register(Arc::new(MockWorker::new(vec![
        MockOutcome::Data(json!({"temperature": 21.5})),
        MockOutcome::Data(json!({"temperature": 21.7})),
        MockOutcome::error(ErrorKind::Network, "sensor unreachable"),
    ])));

    let document = json!({
        "monitors": {"single": [{
            "name": "sensor",
            "type": "mock",
            "config": {"interval": 500},
            "retry_policy": {"max_retries": 2, "retry_timeout": 250,
                             "backoff_strategy": "linear"}
        }]},
        "rules": [
            {"name": "dashboard", "monitor": "sensor"},
            {"name": "alerting", "monitor": "sensor"}
        ]
    });

    let registry = SubscriberRegistry::new();
    let mut dashboard = registry.subscribe("dashboard");
    let mut alerting = registry.subscribe("alerting");

    let supervisor = Supervisor::start(&document, &workers, registry)
        .unwrap_or_else(|errors| panic!("invalid document: {:#?}", errors));

    let printer = |label: &'static str| {
        move |message: argos::RuleMessage| {
            println!(
                "[{label}] {} from '{}'",
                message.tag(),
                message.envelope().monitor_id
            );
        }
    };

    let print_dashboard = printer("dashboard");
    let print_alerting = printer("alerting");

    // Drain both inboxes for a while, then shut down.
    let deadline = tokio::time::sleep(std::time::Duration::from_secs(5));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            Some(message) = dashboard.recv() => print_dashboard(message),
            Some(message) = alerting.recv() => print_alerting(message),
            _ = &mut deadline => break,
        }
    }

    supervisor.shutdown().await;
}
