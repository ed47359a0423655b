//! Protocol workers and the factory registry.
//!
//! A protocol worker is the concurrent unit performing the actual network
//! interaction for one monitor. Each transport contributes a factory
//! implementing [`ProtocolWorker`]: a stable tag, a field-schema list for
//! config validation, and `spawn`, which starts the collection loop as a
//! task and returns a [`WorkerHandle`].
//!
//! ## Contract (all transports)
//!
//! - Emit exclusively normalized [`Envelope`]s to the owning coordinator's
//!   inbox, via [`WorkerContext::emit`].
//! - After emitting an *error* envelope, arm no timer and perform no further
//!   probing; wait for a `recover` command.
//! - `recover(Retry { delay })` cancels any pending timer and re-arms after
//!   `delay`; `recover(Shutdown)` — or a dropped command channel — cancels
//!   outstanding work and terminates the task.
//!
//! ## Architecture
//!
//! ```text
//! Coordinator ──spawn──► ProtocolWorker factory ──► worker task
//!      ▲                                                │
//!      └────────────── Envelope stream ◄────────────────┘
//!      ───────────── recover(RecoveryAction) ──────────►
//! ```
//!
//! The [`WorkerRegistry`] is the tag → factory map and the runtime's only
//! extensibility point: a new transport registers its factory at program
//! init and the core never changes.

pub mod http;
pub mod mock;
pub mod mqtt;
pub mod ws;

pub use http::HttpWorker;
pub use mock::{MockOutcome, MockWorker};
pub use mqtt::MqttWorker;
pub use ws::WebSocketWorker;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::envelope::Envelope;
use crate::policy::RecoveryAction;
use crate::schema::FieldSchema;

/// What a worker receives from its owning coordinator at spawn time.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Id of the monitor this worker probes for; stamped into every envelope.
    pub monitor_id: String,
    /// The coordinator's inbox.
    pub events: mpsc::UnboundedSender<Envelope>,
}

impl WorkerContext {
    pub fn new(monitor_id: impl Into<String>, events: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            events,
        }
    }

    /// Emit an envelope to the coordinator. Returns `false` when the
    /// coordinator is gone, which a worker treats as a shutdown signal.
    pub fn emit(&self, envelope: Envelope) -> bool {
        self.events.send(envelope).is_ok()
    }
}

/// Handle to a spawned worker task, owned by its coordinator.
#[derive(Debug)]
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<RecoveryAction>,
    /// The worker task; the coordinator awaits it (bounded) during shutdown.
    pub join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn new(commands: mpsc::UnboundedSender<RecoveryAction>, join: JoinHandle<()>) -> Self {
        Self { commands, join }
    }

    /// Send a recover command. Returns `false` if the worker already ended.
    pub fn recover(&self, action: RecoveryAction) -> bool {
        self.commands.send(action).is_ok()
    }
}

/// Factory for one transport's workers.
///
/// Object-safe; the supervisor holds factories as `Arc<dyn ProtocolWorker>`.
pub trait ProtocolWorker: Send + Sync + std::fmt::Debug {
    /// Stable protocol tag referenced by the document's `type` field.
    fn tag(&self) -> &'static str;

    /// Field schemas for this protocol's `config` map.
    fn schema(&self) -> Vec<FieldSchema>;

    /// Start the collection loop for one monitor.
    ///
    /// `config` is the validated map produced by the config validator —
    /// every schema-declared field is present (defaults applied) and
    /// type-checked.
    fn spawn(&self, config: &Map<String, Value>, ctx: WorkerContext) -> WorkerHandle;
}

/// Tag → factory map, built at program init.
///
/// # Example
///
/// ```
/// use argos::worker::WorkerRegistry;
///
/// let registry = WorkerRegistry::builtin();
/// assert!(registry.get("http").is_some());
/// assert!(registry.schemas().contains_key("websocket"));
/// ```
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    factories: HashMap<String, Arc<dyn ProtocolWorker>>,
}

impl WorkerRegistry {
    /// An empty registry. Useful for tests and fully custom deployments.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in transports: `http`, `mqtt`, `websocket`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HttpWorker));
        registry.register(Arc::new(MqttWorker));
        registry.register(Arc::new(WebSocketWorker));
        registry
    }

    /// Register a factory under its tag. A later registration under the
    /// same tag replaces the earlier one.
    pub fn register(&mut self, factory: Arc<dyn ProtocolWorker>) -> &mut Self {
        self.factories.insert(factory.tag().to_string(), factory);
        self
    }

    /// Look up the factory for a tag.
    pub fn get(&self, tag: &str) -> Option<Arc<dyn ProtocolWorker>> {
        self.factories.get(tag).cloned()
    }

    /// Look up the factory for a tag, erroring on unknown tags.
    pub fn try_get(&self, tag: &str) -> crate::Result<Arc<dyn ProtocolWorker>> {
        self.get(tag)
            .ok_or_else(|| crate::ArgosError::UnknownProtocol(tag.to_string()))
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// The protocol-tag → field-schema table consumed by the validator.
    pub fn schemas(&self) -> HashMap<String, Vec<FieldSchema>> {
        self.factories
            .iter()
            .map(|(tag, factory)| (tag.clone(), factory.schema()))
            .collect()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

/// Decode raw bytes as JSON when possible, falling back to a string.
///
/// Workers share this when normalizing payloads into the `data` map:
/// subscribers get structured JSON when the endpoint speaks it, and the
/// raw text otherwise.
pub(crate) fn decode_payload(bytes: &[u8]) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        return value;
    }
    Value::String(String::from_utf8_lossy(bytes).into_owned())
}

/// Emit an error envelope, then hold until the coordinator commands
/// recovery. On a retry command the commanded delay is waited out (still
/// honoring a shutdown that arrives mid-pause).
///
/// Returns `true` when the worker should reconnect, `false` when it should
/// stop — on shutdown, a closed channel, or a coordinator that is gone.
///
/// Connection-oriented workers (MQTT, WebSocket) share this as their
/// error-path tail; the polling HTTP worker re-arms a timer instead.
pub(crate) async fn report_and_hold(
    ctx: &WorkerContext,
    commands: &mut mpsc::UnboundedReceiver<RecoveryAction>,
    envelope: Envelope,
) -> bool {
    if !ctx.emit(envelope) {
        return false;
    }
    match commands.recv().await {
        Some(RecoveryAction::Retry { delay }) => pause_before_reconnect(commands, delay).await,
        Some(RecoveryAction::Shutdown) | None => false,
    }
}

/// Wait out a commanded retry delay. Returns `false` when a shutdown
/// arrives mid-pause (the pause is a pending timer and must be cancellable).
pub(crate) async fn pause_before_reconnect(
    commands: &mut mpsc::UnboundedReceiver<RecoveryAction>,
    delay: std::time::Duration,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        cmd = commands.recv() => match cmd {
            Some(RecoveryAction::Retry { .. }) => true,
            Some(RecoveryAction::Shutdown) | None => false,
        },
    }
}
