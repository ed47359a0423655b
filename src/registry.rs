//! Subscriber registry: many-to-many fan-out from rule names to live inboxes.
//!
//! Coordinators publish every envelope their monitor emits to the rule names
//! in the monitor's `inform_to` list; subscribers register an inbox under the
//! rule name they care about. A name may have any number of inboxes, and the
//! same inbox may listen under several names. Dispatch is non-blocking and
//! best-effort: an inbox whose receiver has been dropped is pruned, a name
//! with no inboxes swallows the message, and delivery to one inbox never
//! blocks delivery to the others.
//!
//! The registry is the only shared structure in the runtime. `register` and
//! `dispatch` are atomic with respect to each other (one mutex, never held
//! across an `.await`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::envelope::Envelope;

/// A message delivered to subscribers: the envelope, tagged by arm.
#[derive(Debug, Clone)]
pub enum RuleMessage {
    /// A success envelope from a monitor.
    MonitorData(Envelope),
    /// An error envelope from a monitor.
    MonitorError(Envelope),
}

impl RuleMessage {
    /// The wrapped envelope, whichever the tag.
    pub fn envelope(&self) -> &Envelope {
        match self {
            RuleMessage::MonitorData(env) | RuleMessage::MonitorError(env) => env,
        }
    }

    /// Stable tag string (`"monitor_data"` / `"monitor_error"`).
    pub fn tag(&self) -> &'static str {
        match self {
            RuleMessage::MonitorData(_) => "monitor_data",
            RuleMessage::MonitorError(_) => "monitor_error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RuleMessage::MonitorError(_))
    }
}

/// An inbox handle registered under a subscriber name.
pub type SubscriberInbox = mpsc::UnboundedSender<RuleMessage>;

/// A downstream consumer attached by rule name.
///
/// Handlers must not block the inbox loop; dispatch heavy work to a
/// separate task.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// The rule name this subscriber listens under.
    fn rule(&self) -> &str;

    /// Called once per message, in per-monitor emission order.
    async fn on_message(&self, message: RuleMessage);
}

/// Process-local many-to-many index from subscriber name to live inboxes.
///
/// Cloning is cheap and every clone shares the same index.
///
/// # Example
///
/// ```
/// use argos::registry::{RuleMessage, SubscriberRegistry};
/// use argos::envelope::Envelope;
/// use serde_json::json;
///
/// let registry = SubscriberRegistry::new();
/// let mut inbox = registry.subscribe("r1");
///
/// let msg = RuleMessage::MonitorData(Envelope::data("m1", json!({})));
/// assert_eq!(registry.dispatch("r1", &msg), 1);
/// assert!(inbox.try_recv().is_ok());
/// ```
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<HashMap<String, Vec<SubscriberInbox>>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inbox under `name`.
    ///
    /// Idempotent per (name, channel) pair: registering the same channel
    /// twice under one name keeps a single entry.
    pub fn register(&self, name: &str, inbox: SubscriberInbox) {
        let mut map = self.inner.lock().expect("subscriber registry lock poisoned");
        let entries = map.entry(name.to_string()).or_default();
        if !entries.iter().any(|tx| tx.same_channel(&inbox)) {
            entries.push(inbox);
        }
    }

    /// Create a fresh inbox, register its sender under `name`, and return
    /// the receiving half. Dropping the receiver unregisters automatically
    /// (the dead sender is pruned on the next dispatch).
    pub fn subscribe(&self, name: &str) -> mpsc::UnboundedReceiver<RuleMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(name, tx);
        rx
    }

    /// Attach a [`Subscriber`], spawning its drain loop.
    ///
    /// The loop ends when the registry drops the inbox (process shutdown)
    /// or the task is aborted via the returned handle.
    pub fn attach(&self, subscriber: Arc<dyn Subscriber>) -> JoinHandle<()> {
        let mut rx = self.subscribe(subscriber.rule());
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                subscriber.on_message(message).await;
            }
        })
    }

    /// Send `message` to every live inbox under `name`.
    ///
    /// Returns the number of inboxes reached. Inboxes whose receiver is gone
    /// are removed. No subscriber under `name` is not an error — the message
    /// is silently dropped.
    pub fn dispatch(&self, name: &str, message: &RuleMessage) -> usize {
        let mut map = self.inner.lock().expect("subscriber registry lock poisoned");
        let Some(entries) = map.get_mut(name) else {
            debug!(rule = %name, "no subscriber registered, dropping message");
            return 0;
        };

        let mut delivered = 0;
        entries.retain(|tx| match tx.send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => false,
        });
        if entries.is_empty() {
            map.remove(name);
        }
        delivered
    }

    /// Number of live inboxes currently registered under `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        let mut map = self.inner.lock().expect("subscriber registry lock poisoned");
        match map.get_mut(name) {
            Some(entries) => {
                entries.retain(|tx| !tx.is_closed());
                entries.len()
            }
            None => 0,
        }
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.inner.lock().expect("subscriber registry lock poisoned");
        let mut counts: Vec<(&str, usize)> =
            map.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        counts.sort_unstable();
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &counts)
            .finish()
    }
}
