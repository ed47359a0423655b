//! Probe a URL (or run a full config document) and print every envelope.
//!
//! ```bash
//! cargo run --example http_probe -- http://localhost:8080/health
//! cargo run --example http_probe -- monitors.json
//! ```

use argos::{parse_document, SubscriberRegistry, Supervisor, WorkerRegistry};
use serde_json::{json, Value};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "argos=info".into()),
        )
        .init();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8080/health".to_string());

    // A .json argument is a full document; anything else is a URL wrapped
    // in a single-monitor document.
    let document: Value = if target.ends_with(".json") {
        parse_document(&std::fs::read_to_string(&target)?)?
    } else {
        json!({
            "monitors": {"single": [{
                "name": "probe",
                "type": "http",
                "config": {"url": target, "interval": 2000, "timeout": 3000},
                "retry_policy": {"max_retries": 3, "retry_timeout": 1000,
                                 "backoff_strategy": "exponential"}
            }]},
            "rules": [{"name": "print", "monitor": "probe"}]
        })
    };

    // One shared inbox registered under every rule name in the document.
    let registry = SubscriberRegistry::new();
    let (tx, mut inbox) = mpsc::unbounded_channel();
    if let Some(rules) = document["rules"].as_array() {
        for rule in rules {
            if let Some(name) = rule["name"].as_str() {
                registry.register(name, tx.clone());
            }
        }
    }
    drop(tx);

    let supervisor = match Supervisor::start(&document, &WorkerRegistry::builtin(), registry) {
        Ok(supervisor) => supervisor,
        Err(errors) => {
            eprintln!("invalid document:");
            for error in errors {
                eprintln!("  - {}", error);
            }
            std::process::exit(1);
        }
    };

    println!("watching {:?} (ctrl-c to stop)", supervisor.monitor_ids());
    loop {
        tokio::select! {
            message = inbox.recv() => match message {
                Some(message) => println!(
                    "{} {}",
                    message.tag(),
                    serde_json::to_string_pretty(message.envelope()).unwrap_or_default()
                ),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    supervisor.shutdown().await;
    Ok(())
}
