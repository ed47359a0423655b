//! Monitor coordinator: owns one protocol worker and its retry state.
//!
//! The coordinator is the concurrent unit between a protocol worker and the
//! subscriber registry. It processes its inbox strictly sequentially, which
//! gives the per-monitor ordering guarantee: no two envelopes of one monitor
//! are ever dispatched concurrently, and every subscriber sees them in
//! emission order.
//!
//! Event handling:
//!
//! - success envelope → fan out `monitor_data`, reset the retry count;
//! - error envelope → fan out `monitor_error` *first* (delivery is never
//!   gated by the retry decision), then consult the policy engine and either
//!   command the worker to retry after the computed delay or shut the
//!   monitor down;
//! - worker termination without a shutdown command → terminal;
//! - shutdown signal from the supervisor → forward to the worker, wait
//!   bounded, terminate.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::config::MonitorSpec;
use crate::envelope::Envelope;
use crate::policy::{decide, RecoveryAction};
use crate::registry::{RuleMessage, SubscriberRegistry};
use crate::worker::{ProtocolWorker, WorkerContext, WorkerHandle};

/// How long a canceller waits for the unit below it to terminate before
/// escalating to forced termination.
pub const TERMINATION_GRACE: Duration = Duration::from_millis(5000);

/// Handle to a running coordinator, owned by the supervisor.
#[derive(Debug)]
pub struct CoordinatorHandle {
    /// Id of the supervised monitor.
    pub monitor_id: String,
    shutdown: watch::Sender<bool>,
    /// The coordinator task.
    pub join: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Signal shutdown without waiting. Used by the supervisor to stop all
    /// coordinators in parallel before awaiting each.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Signal shutdown and wait (bounded by [`TERMINATION_GRACE`]) for the
    /// coordinator to terminate, aborting it on timeout.
    pub async fn shutdown(self) {
        self.signal_shutdown();
        let mut join = self.join;
        if timeout(TERMINATION_GRACE, &mut join).await.is_err() {
            warn!(monitor_id = %self.monitor_id, "coordinator did not stop in time, aborting");
            join.abort();
        }
    }

    /// Whether the coordinator task has ended (normally or otherwise).
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// The per-monitor coordination unit.
pub struct Coordinator {
    spec: MonitorSpec,
    registry: SubscriberRegistry,
    worker: WorkerHandle,
    events: mpsc::UnboundedReceiver<Envelope>,
    retry_count: u32,
}

impl Coordinator {
    /// Spawn the coordinator for one validated monitor.
    ///
    /// The protocol worker is spawned first, wired to the coordinator's
    /// inbox; the coordinator task then serializes every event the worker
    /// emits.
    pub fn spawn(
        spec: MonitorSpec,
        factory: Arc<dyn ProtocolWorker>,
        registry: SubscriberRegistry,
    ) -> CoordinatorHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let worker = factory.spawn(&spec.config, WorkerContext::new(spec.id.clone(), events_tx));

        let monitor_id = spec.id.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Coordinator {
            spec,
            registry,
            worker,
            events: events_rx,
            retry_count: 0,
        };
        let join = tokio::spawn(coordinator.run(shutdown_rx));

        CoordinatorHandle {
            monitor_id,
            shutdown: shutdown_tx,
            join,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        debug!(monitor_id = %self.spec.id, kind = %self.spec.kind, "monitor started");

        loop {
            tokio::select! {
                // A changed signal or a dropped supervisor handle both mean
                // this monitor should stop.
                _ = shutdown.changed() => {
                    debug!(monitor_id = %self.spec.id, "shutdown requested");
                    self.worker.recover(RecoveryAction::Shutdown);
                    await_worker_end(&self.spec.id, &mut self.worker).await;
                    break;
                }
                event = self.events.recv() => match event {
                    Some(envelope) if !envelope.is_error() => {
                        self.fan_out(envelope);
                        self.retry_count = 0;
                    }
                    Some(envelope) => {
                        // Dispatch before classification: subscribers see
                        // every envelope regardless of the retry decision.
                        self.fan_out(envelope);
                        if !self.handle_failure().await {
                            break;
                        }
                    }
                    None => {
                        warn!(monitor_id = %self.spec.id, "worker terminated unexpectedly");
                        break;
                    }
                },
            }
        }

        debug!(monitor_id = %self.spec.id, "monitor stopped");
    }

    /// Wrap and deliver an envelope to every rule subscribed to this monitor.
    fn fan_out(&self, envelope: Envelope) {
        let message = if envelope.is_error() {
            RuleMessage::MonitorError(envelope)
        } else {
            RuleMessage::MonitorData(envelope)
        };
        for rule in &self.spec.inform_to {
            self.registry.dispatch(rule, &message);
        }
    }

    /// Consult the retry policy for the failure that was just dispatched.
    /// Returns `false` when the monitor is done.
    async fn handle_failure(&mut self) -> bool {
        match decide(self.retry_count, &self.spec.retry_policy) {
            RecoveryAction::Retry { delay } => {
                info!(
                    monitor_id = %self.spec.id,
                    "Calculated backoff delay: {}ms for attempt {}",
                    delay.as_millis(),
                    self.retry_count + 1
                );
                if !self.worker.recover(RecoveryAction::Retry { delay }) {
                    warn!(monitor_id = %self.spec.id, "worker gone before retry command");
                    return false;
                }
                self.retry_count += 1;
                true
            }
            RecoveryAction::Shutdown => {
                error!(
                    "Monitor {} shutting down after {} retries",
                    self.spec.id, self.retry_count
                );
                self.worker.recover(RecoveryAction::Shutdown);
                await_worker_end(&self.spec.id, &mut self.worker).await;
                false
            }
        }
    }
}

/// Bounded wait for the worker task; escalate to abort on timeout.
async fn await_worker_end(monitor_id: &str, worker: &mut WorkerHandle) {
    if timeout(TERMINATION_GRACE, &mut worker.join).await.is_err() {
        warn!(monitor_id = %monitor_id, "worker did not stop in time, aborting");
        worker.join.abort();
    }
}
