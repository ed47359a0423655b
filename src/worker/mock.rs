//! Mock worker for testing without a live endpoint.
//!
//! [`MockWorker`] replays a scripted sequence of outcomes, one per probe,
//! cycling back to the beginning when exhausted. It honors the full worker
//! contract — periodic emission, no probing after an error until `recover`,
//! shutdown on command — so coordinator and supervisor behavior can be
//! tested deterministically.

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};

use super::{ProtocolWorker, WorkerContext, WorkerHandle};
use crate::envelope::{Envelope, ErrorInfo, ErrorKind};
use crate::policy::RecoveryAction;
use crate::schema::FieldSchema;

/// One scripted probe outcome.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Emit a success envelope with this data map.
    Data(Value),
    /// Emit a classified error envelope, then wait for `recover`.
    Error { kind: ErrorKind, message: String },
}

impl MockOutcome {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }
}

/// A worker factory that replays canned outcomes in order.
///
/// Cycles when the script is exhausted, so a single
/// [`MockOutcome::Error`] entry produces an uninterrupted failure run.
///
/// # Example
///
/// ```
/// use argos::worker::{MockOutcome, MockWorker};
/// use argos::envelope::ErrorKind;
/// use serde_json::json;
///
/// let flaky = MockWorker::new(vec![
///     MockOutcome::Data(json!({"status": "ok"})),
///     MockOutcome::error(ErrorKind::Network, "connection reset"),
/// ]);
/// ```
#[derive(Debug, Clone)]
pub struct MockWorker {
    script: Vec<MockOutcome>,
}

impl MockWorker {
    /// Create a mock worker with the given script.
    ///
    /// # Panics
    ///
    /// Panics if `script` is empty.
    pub fn new(script: Vec<MockOutcome>) -> Self {
        assert!(!script.is_empty(), "MockWorker requires at least one outcome");
        Self { script }
    }

    /// A worker whose every probe succeeds with `{"status": "ok"}`.
    pub fn succeeding() -> Self {
        Self::new(vec![MockOutcome::Data(json!({"status": "ok"}))])
    }

    /// A worker whose every probe fails with the given classification.
    pub fn failing(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(vec![MockOutcome::error(kind, message)])
    }
}

impl ProtocolWorker for MockWorker {
    fn tag(&self) -> &'static str {
        "mock"
    }

    fn schema(&self) -> Vec<FieldSchema> {
        vec![FieldSchema::integer("interval").default_value(10).min(0.0)]
    }

    fn spawn(&self, config: &Map<String, Value>, ctx: WorkerContext) -> WorkerHandle {
        let interval = Duration::from_millis(
            config
                .get("interval")
                .and_then(Value::as_u64)
                .unwrap_or(10),
        );
        let script = self.script.clone();
        let (commands_tx, mut commands) = mpsc::unbounded_channel();

        let join = tokio::spawn(async move {
            let mut cursor = 0usize;
            let mut last_success = None;
            let mut next = Instant::now();

            loop {
                tokio::select! {
                    cmd = commands.recv() => match cmd {
                        Some(RecoveryAction::Retry { delay }) => next = Instant::now() + delay,
                        Some(RecoveryAction::Shutdown) | None => break,
                    },
                    _ = sleep_until(next) => {
                        let outcome = script[cursor % script.len()].clone();
                        cursor += 1;

                        match outcome {
                            MockOutcome::Data(data) => {
                                let envelope = Envelope::data(&ctx.monitor_id, data);
                                last_success = envelope.meta.last_success;
                                if !ctx.emit(envelope) {
                                    break;
                                }
                                next = Instant::now() + interval;
                            }
                            MockOutcome::Error { kind, message } => {
                                let envelope =
                                    Envelope::error(&ctx.monitor_id, ErrorInfo::new(kind, message))
                                        .with_last_success(last_success);
                                if !ctx.emit(envelope) {
                                    break;
                                }
                                // Contract: no probing until told how to recover.
                                match commands.recv().await {
                                    Some(RecoveryAction::Retry { delay }) => {
                                        next = Instant::now() + delay;
                                    }
                                    Some(RecoveryAction::Shutdown) | None => break,
                                }
                            }
                        }
                    }
                }
            }
        });

        WorkerHandle::new(commands_tx, join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn spawn_mock(worker: &MockWorker) -> (WorkerHandle, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = worker.spawn(&Map::new(), WorkerContext::new("m1", tx));
        (handle, rx)
    }

    #[tokio::test]
    async fn test_succeeding_worker_emits_periodically() {
        let worker = MockWorker::succeeding();
        let (handle, mut rx) = spawn_mock(&worker);

        for _ in 0..3 {
            let env = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("envelope within deadline")
                .expect("worker alive");
            assert!(!env.is_error());
            assert_eq!(env.monitor_id, "m1");
            assert_eq!(env.data_value().unwrap()["status"], "ok");
        }

        handle.recover(RecoveryAction::Shutdown);
        timeout(Duration::from_secs(1), handle.join)
            .await
            .expect("worker terminates")
            .unwrap();
    }

    #[tokio::test]
    async fn test_failing_worker_waits_for_recover() {
        let worker = MockWorker::failing(ErrorKind::Network, "down");
        let (handle, mut rx) = spawn_mock(&worker);

        let env = rx.recv().await.unwrap();
        assert!(env.is_error());

        // No second emission until recover arrives.
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

        handle.recover(RecoveryAction::Retry {
            delay: Duration::from_millis(1),
        });
        let env = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("retry probe")
            .unwrap();
        assert_eq!(env.error_info().unwrap().kind, ErrorKind::Network);

        handle.recover(RecoveryAction::Shutdown);
        timeout(Duration::from_secs(1), handle.join)
            .await
            .expect("worker terminates")
            .unwrap();
    }

    #[tokio::test]
    async fn test_script_cycles_and_tracks_last_success() {
        let worker = MockWorker::new(vec![
            MockOutcome::Data(json!({"n": 1})),
            MockOutcome::error(ErrorKind::Timeout, "slow"),
        ]);
        let (handle, mut rx) = spawn_mock(&worker);

        let first = rx.recv().await.unwrap();
        assert!(!first.is_error());

        let second = rx.recv().await.unwrap();
        assert!(second.is_error());
        // The error remembers when the monitor last succeeded.
        assert_eq!(second.meta.last_success, first.meta.last_success);

        handle.recover(RecoveryAction::Retry {
            delay: Duration::from_millis(1),
        });
        let third = rx.recv().await.unwrap();
        assert!(!third.is_error(), "script cycles back to the data outcome");

        handle.recover(RecoveryAction::Shutdown);
        let _ = handle.join.await;
    }

    #[tokio::test]
    async fn test_shutdown_while_idle() {
        let worker = MockWorker::new(vec![MockOutcome::Data(json!({}))]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut config = Map::new();
        config.insert("interval".to_string(), json!(60_000));
        let handle = worker.spawn(&config, WorkerContext::new("m1", tx));

        // First probe at t=0, then a long idle timer.
        rx.recv().await.unwrap();
        handle.recover(RecoveryAction::Shutdown);
        timeout(Duration::from_secs(1), handle.join)
            .await
            .expect("shutdown cancels the pending timer")
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_stops_when_coordinator_gone() {
        let worker = MockWorker::succeeding();
        let (handle, rx) = spawn_mock(&worker);
        drop(rx);

        timeout(Duration::from_secs(1), handle.join)
            .await
            .expect("worker ends when its coordinator inbox closes")
            .unwrap();
    }
}
