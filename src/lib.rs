//! # Argos
//!
//! Configuration-driven monitoring runtime. Argos continuously probes
//! external endpoints over several transports (HTTP polling, MQTT
//! subscription, WebSocket streaming) and emits a uniform, structured
//! stream of success/error envelopes to the downstream subscribers named
//! in the operator's document.
//!
//! The operator describes every probe and its fan-out in one declarative
//! JSON document; the runtime validates the document (accumulating every
//! fault before refusing a bad one), spawns one supervised worker per
//! monitor, classifies failures, applies the configured retry/backoff
//! policy, and delivers every envelope to the subscribed rules.
//!
//! ## Core Concepts
//!
//! - **[`Envelope`]** — the normalized success-or-error record every
//!   protocol worker emits; subscribers are protocol-agnostic.
//! - **[`Supervisor`]** — validates the document and runs one coordinator
//!   per monitor, one-for-one isolated.
//! - **[`Coordinator`](coordinator::Coordinator)** — owns one protocol
//!   worker and its retry count; serializes all per-monitor events.
//! - **[`SubscriberRegistry`]** — the shared many-to-many index from rule
//!   names to live inboxes, used for fan-out.
//! - **[`ProtocolWorker`]** — factory trait each transport implements;
//!   [`WorkerRegistry`] discovers installed transports at startup.
//! - **[`decide`]** — the pure retry policy engine: retry-after-delay or
//!   shutdown, under fixed/linear/exponential backoff.
//!
//! ## Quick Start
//!
//! ```no_run
//! use argos::{SubscriberRegistry, Supervisor, WorkerRegistry};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let document = json!({
//!         "monitors": {"single": [{
//!             "name": "api_health",
//!             "type": "http",
//!             "config": {"url": "http://localhost:8080/health", "interval": 1000},
//!             "retry_policy": {"max_retries": 3, "retry_timeout": 1000,
//!                              "backoff_strategy": "exponential"}
//!         }]},
//!         "rules": [{"name": "alert_on_api", "monitor": "api_health"}]
//!     });
//!
//!     let registry = SubscriberRegistry::new();
//!     let mut inbox = registry.subscribe("alert_on_api");
//!
//!     let supervisor = Supervisor::start(&document, &WorkerRegistry::builtin(), registry)
//!         .unwrap_or_else(|errors| panic!("invalid document: {:?}", errors));
//!
//!     while let Some(message) = inbox.recv().await {
//!         println!("{}: {}", message.tag(), message.envelope().monitor_id);
//!     }
//!     supervisor.shutdown().await;
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! document ──► Supervisor ──► Coordinator (per monitor) ──► ProtocolWorker
//!                  │               │    ▲                    (http/mqtt/ws)
//!                  │          fan-out   └── Envelope stream ◄──────┘
//!                  ▼               ▼         recover(retry|shutdown)
//!            validate_document  SubscriberRegistry ──► rule inboxes
//! ```
//!
//! Every coordinator and worker is an independent task with a serialized
//! inbox; the subscriber registry is the only shared structure. Per-monitor
//! ordering is guaranteed end to end; nothing is ordered across monitors.

pub mod config;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod policy;
pub mod registry;
pub mod schema;
pub mod supervisor;
pub mod worker;

pub use config::{parse_document, validate_document, MonitorSpec};
pub use coordinator::{CoordinatorHandle, TERMINATION_GRACE};
pub use envelope::{ConnectionStatus, Envelope, EnvelopeBody, ErrorInfo, ErrorKind, Meta};
pub use error::{ArgosError, Result};
pub use policy::{decide, BackoffStrategy, RecoveryAction, RetryPolicy};
pub use registry::{RuleMessage, Subscriber, SubscriberRegistry};
pub use schema::{FieldSchema, FieldType};
pub use supervisor::Supervisor;
pub use worker::{
    HttpWorker, MockOutcome, MockWorker, MqttWorker, ProtocolWorker, WebSocketWorker,
    WorkerContext, WorkerHandle, WorkerRegistry,
};
