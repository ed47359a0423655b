//! Monitor supervisor: validate the document, run the monitor set.
//!
//! The supervisor is the entry point of the runtime: given the operator's
//! document and the installed worker factories, it validates everything up
//! front — refusing to start *any* monitor when the document has faults —
//! and then spawns one [`Coordinator`] per validated monitor.
//!
//! Lifecycle is one-for-one: each coordinator runs independently, a monitor
//! that exhausts its retry policy (or whose worker crashes) terminates alone,
//! and siblings are never affected. A terminated coordinator is not
//! restarted — restart semantics belong to the operator's process manager,
//! not to this runtime.

use serde_json::Value;
use tracing::{error, info};

use crate::config::validate_document;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::registry::SubscriberRegistry;
use crate::worker::WorkerRegistry;

/// The running monitor set.
///
/// # Example
///
/// ```no_run
/// use argos::registry::SubscriberRegistry;
/// use argos::supervisor::Supervisor;
/// use argos::worker::WorkerRegistry;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let document = json!({
///     "monitors": {"single": [{
///         "name": "m1",
///         "type": "http",
///         "config": {"url": "http://localhost:8080/health", "interval": 1000},
///         "retry_policy": {"max_retries": 3, "retry_timeout": 1000,
///                          "backoff_strategy": "exponential"}
///     }]},
///     "rules": [{"name": "r1", "monitor": "m1"}]
/// });
///
/// let registry = SubscriberRegistry::new();
/// let mut inbox = registry.subscribe("r1");
/// let supervisor = Supervisor::start(&document, &WorkerRegistry::builtin(), registry)
///     .expect("valid document");
///
/// let message = inbox.recv().await.unwrap();
/// println!("{} from {}", message.tag(), message.envelope().monitor_id);
/// supervisor.shutdown().await;
/// # }
/// ```
pub struct Supervisor {
    coordinators: Vec<CoordinatorHandle>,
    registry: SubscriberRegistry,
}

impl Supervisor {
    /// Validate `document` against the factories installed in `workers` and
    /// spawn one coordinator per monitor.
    ///
    /// On validation failure the aggregated reason list is returned and no
    /// monitor is started.
    pub fn start(
        document: &Value,
        workers: &WorkerRegistry,
        registry: SubscriberRegistry,
    ) -> Result<Self, Vec<String>> {
        let specs = validate_document(document, &workers.schemas())?;
        info!(monitors = specs.len(), "configuration valid, starting monitors");

        let mut coordinators = Vec::with_capacity(specs.len());
        for spec in specs {
            match workers.try_get(&spec.kind) {
                Ok(factory) => {
                    coordinators.push(Coordinator::spawn(spec, factory, registry.clone()));
                }
                // Validation ran against this registry's schema table, so
                // every validated tag resolves.
                Err(e) => error!(monitor_id = %spec.id, "{}", e),
            }
        }

        Ok(Self {
            coordinators,
            registry,
        })
    }

    /// The shared subscriber registry this monitor set dispatches through.
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Ids of all supervised monitors, running or already terminated.
    pub fn monitor_ids(&self) -> Vec<&str> {
        self.coordinators
            .iter()
            .map(|c| c.monitor_id.as_str())
            .collect()
    }

    /// Number of coordinators still running.
    pub fn running(&self) -> usize {
        self.coordinators.iter().filter(|c| !c.is_finished()).count()
    }

    /// Stop every monitor: signal all coordinators in parallel, then wait
    /// (bounded per coordinator) for each to terminate.
    pub async fn shutdown(self) {
        info!(monitors = self.coordinators.len(), "supervisor shutting down");
        for coordinator in &self.coordinators {
            coordinator.signal_shutdown();
        }
        futures::future::join_all(
            self.coordinators
                .into_iter()
                .map(CoordinatorHandle::shutdown),
        )
        .await;
        info!("supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ErrorKind;
    use crate::worker::{MockWorker, WorkerRegistry};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn mock_registry() -> WorkerRegistry {
        let mut workers = WorkerRegistry::new();
        workers.register(Arc::new(MockWorker::succeeding()));
        workers
    }

    fn mock_monitor(name: &str, max_retries: u64) -> Value {
        json!({
            "name": name,
            "type": "mock",
            "config": {"interval": 5},
            "retry_policy": {
                "max_retries": max_retries,
                "retry_timeout": 5,
                "backoff_strategy": "fixed"
            }
        })
    }

    async fn wait_until_running(supervisor: &Supervisor, expected: usize) {
        for _ in 0..200 {
            if supervisor.running() == expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} running monitors, still {}",
            expected,
            supervisor.running()
        );
    }

    #[tokio::test]
    async fn test_invalid_document_starts_nothing() {
        let document = json!({
            "monitors": {"single": [{
                "name": "m1",
                "type": "mock",
                "config": {"interval": "soon"},
                "retry_policy": {"max_retries": 0, "retry_timeout": 0, "backoff_strategy": "warp"}
            }]},
            "rules": []
        });

        let errors = Supervisor::start(
            &document,
            &mock_registry(),
            SubscriberRegistry::new(),
        )
        .err()
        .expect("validation must fail");

        // Independent faults all surface at once.
        assert!(errors.iter().any(|e| e.contains("config.interval")));
        assert!(errors.iter().any(|e| e.contains("retry_policy.retry_timeout")));
        assert!(errors.iter().any(|e| e.contains("retry_policy.backoff_strategy")));
        assert!(errors.iter().any(|e| e.contains("not targeted by any rule")));
    }

    #[tokio::test]
    async fn test_one_coordinator_per_monitor() {
        let document = json!({
            "monitors": {"single": [mock_monitor("m1", 3), mock_monitor("m2", 3)]},
            "rules": [{"name": "r1", "monitor": ["m1", "m2"]}]
        });

        let registry = SubscriberRegistry::new();
        let mut inbox = registry.subscribe("r1");
        let supervisor =
            Supervisor::start(&document, &mock_registry(), registry).expect("valid document");

        assert_eq!(supervisor.running(), 2);
        let mut ids = supervisor.monitor_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec!["m1", "m2"]);

        // Both monitors reach the shared subscriber.
        let mut seen = std::collections::HashSet::new();
        while seen.len() < 2 {
            let msg = timeout(Duration::from_secs(2), inbox.recv())
                .await
                .expect("messages from both monitors")
                .unwrap();
            seen.insert(msg.envelope().monitor_id.clone());
        }

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_monitor_leaves_siblings_alone() {
        let mut workers = WorkerRegistry::new();
        workers.register(Arc::new(MockWorker::failing(ErrorKind::Network, "down")));

        // m_bad exhausts immediately; the sibling set shrinks to the rest.
        let document = json!({
            "monitors": {"single": [mock_monitor("m_bad", 0)]},
            "rules": [{"name": "r1", "monitor": "m_bad"}]
        });
        let registry = SubscriberRegistry::new();
        let mut inbox = registry.subscribe("r1");
        let supervisor = Supervisor::start(&document, &workers, registry.clone()).unwrap();

        let msg = timeout(Duration::from_secs(2), inbox.recv()).await.unwrap().unwrap();
        assert_eq!(msg.tag(), "monitor_error");
        wait_until_running(&supervisor, 0).await;

        // A second, healthy monitor set on the same registry keeps flowing.
        let healthy = json!({
            "monitors": {"single": [mock_monitor("m_ok", 3)]},
            "rules": [{"name": "r1", "monitor": "m_ok"}]
        });
        let sibling = Supervisor::start(&healthy, &mock_registry(), registry).unwrap();
        let msg = timeout(Duration::from_secs(2), inbox.recv()).await.unwrap().unwrap();
        assert_eq!(msg.envelope().monitor_id, "m_ok");

        supervisor.shutdown().await;
        sibling.shutdown().await;
    }

    #[tokio::test]
    async fn test_sibling_survives_exhausted_monitor_in_same_set() {
        let mut workers = WorkerRegistry::new();
        workers.register(Arc::new(MockWorker::new(vec![
            crate::worker::MockOutcome::error(ErrorKind::Network, "down"),
            crate::worker::MockOutcome::Data(json!({"status": "ok"})),
        ])));

        // Both monitors share the flaky script; m_fragile dies on its first
        // failure, m_sturdy retries through and keeps emitting.
        let document = json!({
            "monitors": {"single": [mock_monitor("m_fragile", 0), mock_monitor("m_sturdy", 5)]},
            "rules": [
                {"name": "r_fragile", "monitor": "m_fragile"},
                {"name": "r_sturdy", "monitor": "m_sturdy"}
            ]
        });

        let registry = SubscriberRegistry::new();
        let mut sturdy_inbox = registry.subscribe("r_sturdy");
        let supervisor = Supervisor::start(&document, &workers, registry).unwrap();

        wait_until_running(&supervisor, 1).await;

        // The sturdy monitor recovered past its first failure and produced
        // data after the sibling died.
        let mut saw_data = false;
        for _ in 0..10 {
            let msg = timeout(Duration::from_secs(2), sturdy_inbox.recv())
                .await
                .expect("sturdy monitor still emitting")
                .unwrap();
            if !msg.is_error() {
                saw_data = true;
                break;
            }
        }
        assert!(saw_data);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_terminates_all_monitors() {
        let document = json!({
            "monitors": {"single": [mock_monitor("m1", 3), mock_monitor("m2", 3), mock_monitor("m3", 3)]},
            "rules": [{"name": "r1", "monitor": ["m1", "m2", "m3"]}]
        });
        let supervisor = Supervisor::start(
            &document,
            &mock_registry(),
            SubscriberRegistry::new(),
        )
        .unwrap();
        assert_eq!(supervisor.running(), 3);

        timeout(Duration::from_secs(2), supervisor.shutdown())
            .await
            .expect("parallel shutdown completes within grace");
    }

    #[tokio::test]
    async fn test_empty_document_starts_empty_set() {
        let supervisor = Supervisor::start(
            &json!({"monitors": {"single": []}, "rules": []}),
            &WorkerRegistry::builtin(),
            SubscriberRegistry::new(),
        )
        .unwrap();
        assert_eq!(supervisor.running(), 0);
        supervisor.shutdown().await;
    }

    mod http_end_to_end {
        use super::*;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;
        use tokio::task::JoinHandle;

        async fn fixture_server(status: &str, body: &'static str) -> (String, JoinHandle<()>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let handle = tokio::spawn(async move {
                loop {
                    let Ok((mut stream, _)) = listener.accept().await else {
                        break;
                    };
                    let response = response.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = stream.read(&mut buf).await;
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    });
                }
            });
            (format!("http://{}", addr), handle)
        }

        fn http_document(url: &str, max_retries: u64, backoff: &str) -> Value {
            json!({
                "monitors": {"single": [{
                    "name": "m1",
                    "type": "http",
                    "config": {"url": url, "interval": 1000, "timeout": 5000},
                    "retry_policy": {
                        "max_retries": max_retries,
                        "retry_timeout": 1000,
                        "backoff_strategy": backoff
                    }
                }]},
                "rules": [{"name": "r1", "monitor": "m1"}]
            })
        }

        #[tokio::test]
        async fn test_success_scenario() {
            let (url, server) = fixture_server("200 OK", r#"{"status": "ok"}"#).await;
            let document = http_document(&format!("{}/success", url), 3, "exponential");

            let registry = SubscriberRegistry::new();
            let mut inbox = registry.subscribe("r1");
            let supervisor =
                Supervisor::start(&document, &WorkerRegistry::builtin(), registry).unwrap();

            let msg = timeout(Duration::from_millis(1500), inbox.recv())
                .await
                .expect("first probe fires immediately")
                .unwrap();
            assert_eq!(msg.tag(), "monitor_data");
            let data = msg.envelope().data_value().unwrap();
            assert_eq!(data["status_code"], 200);
            assert_eq!(data["body"]["status"], "ok");

            supervisor.shutdown().await;
            server.abort();
        }

        #[tokio::test]
        async fn test_immediate_shutdown_scenario() {
            let (url, server) = fixture_server("404 Not Found", r#"{"error": "gone"}"#).await;
            let document = http_document(&format!("{}/not_found", url), 0, "linear");

            let registry = SubscriberRegistry::new();
            let mut inbox = registry.subscribe("r1");
            let supervisor =
                Supervisor::start(&document, &WorkerRegistry::builtin(), registry).unwrap();

            let msg = timeout(Duration::from_secs(2), inbox.recv()).await.unwrap().unwrap();
            assert_eq!(msg.tag(), "monitor_error");
            let info = msg.envelope().error_info().unwrap();
            assert_eq!(info.kind, ErrorKind::HttpError);
            assert_eq!(info.details["status_code"], 404);

            wait_until_running(&supervisor, 0).await;
            assert!(inbox.try_recv().is_err(), "exactly one error envelope");

            supervisor.shutdown().await;
            server.abort();
        }
    }
}
