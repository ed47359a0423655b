//! HTTP protocol worker: periodic polling with outcome classification.
//!
//! The worker fires immediately at start, then re-arms its timer for
//! `interval` after every success. Outcomes are classified into the
//! normalized taxonomy:
//!
//! - 2xx → success envelope, `data = {status_code, body, headers}` with the
//!   body JSON-decoded when possible;
//! - unfollowed 3xx → `redirect`;
//! - 4xx/5xx → `http_error`;
//! - transport failures → `timeout` or `client_error`;
//! - request construction failures → `exception`.
//!
//! After an error emission the worker arms nothing and waits for the
//! coordinator's `recover` command.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

use super::{decode_payload, ProtocolWorker, WorkerContext, WorkerHandle};
use crate::envelope::{Envelope, ErrorInfo, ErrorKind};
use crate::policy::RecoveryAction;
use crate::schema::FieldSchema;

/// Factory for HTTP polling workers.
#[derive(Debug, Clone)]
pub struct HttpWorker;

impl ProtocolWorker for HttpWorker {
    fn tag(&self) -> &'static str {
        "http"
    }

    fn schema(&self) -> Vec<FieldSchema> {
        vec![
            FieldSchema::string("url").required().pattern("^https?://.+"),
            FieldSchema::string("method").default_value("GET"),
            FieldSchema::map("headers").default_value(json!({})),
            FieldSchema::integer("interval")
                .required()
                .min(100.0)
                .max(3_600_000.0),
            FieldSchema::integer("timeout")
                .default_value(5000)
                .min(100.0)
                .max(30_000.0),
            FieldSchema::boolean("follow_redirect").default_value(true),
            FieldSchema::boolean("verify_ssl").default_value(false),
            FieldSchema::string("request_body").default_value(""),
            FieldSchema::map("request_params").default_value(json!({})),
        ]
    }

    fn spawn(&self, config: &Map<String, Value>, ctx: WorkerContext) -> WorkerHandle {
        let config = HttpConfig::from_validated(config);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let join = tokio::spawn(run(config, ctx, commands));
        WorkerHandle::new(commands_tx, join)
    }
}

/// Typed view of the validated `config` map.
#[derive(Debug, Clone)]
pub(crate) struct HttpConfig {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub follow_redirect: bool,
    pub verify_ssl: bool,
    pub request_body: String,
    pub request_params: HashMap<String, String>,
}

impl HttpConfig {
    /// Read the validated map back into typed fields.
    ///
    /// The validator guarantees presence and types for every schema field,
    /// so lookups fall back to the schema defaults rather than erroring.
    pub(crate) fn from_validated(config: &Map<String, Value>) -> Self {
        Self {
            url: get_string(config, "url", ""),
            method: get_string(config, "method", "GET"),
            headers: get_string_map(config, "headers"),
            interval: Duration::from_millis(get_u64(config, "interval", 1000)),
            timeout: Duration::from_millis(get_u64(config, "timeout", 5000)),
            follow_redirect: get_bool(config, "follow_redirect", true),
            verify_ssl: get_bool(config, "verify_ssl", false),
            request_body: get_string(config, "request_body", ""),
            request_params: get_string_map(config, "request_params"),
        }
    }
}

fn get_string(config: &Map<String, Value>, key: &str, default: &str) -> String {
    config
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn get_u64(config: &Map<String, Value>, key: &str, default: u64) -> u64 {
    config.get(key).and_then(Value::as_u64).unwrap_or(default)
}

fn get_bool(config: &Map<String, Value>, key: &str, default: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Flatten a JSON map into string pairs; non-string values are rendered
/// as their JSON text.
fn get_string_map(config: &Map<String, Value>, key: &str) -> HashMap<String, String> {
    config
        .get(key)
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), text)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The collection loop: probe on timer, emit, await recover after errors.
async fn run(
    config: HttpConfig,
    ctx: WorkerContext,
    mut commands: mpsc::UnboundedReceiver<RecoveryAction>,
) {
    let client = match build_client(&config) {
        Ok(client) => client,
        Err(info) => {
            // Nothing to probe with; report and follow the recover protocol
            // until the coordinator gives up.
            fault_loop(&ctx, &mut commands, info).await;
            return;
        }
    };

    let mut last_success = None;
    let mut next = Instant::now();

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(RecoveryAction::Retry { delay }) => next = Instant::now() + delay,
                Some(RecoveryAction::Shutdown) | None => break,
            },
            _ = sleep_until(next) => {
                let envelope = match probe(&client, &config).await {
                    Ok(data) => Envelope::data(&ctx.monitor_id, data),
                    Err(info) => {
                        Envelope::error(&ctx.monitor_id, info).with_last_success(last_success)
                    }
                };

                let failed = envelope.is_error();
                if !failed {
                    last_success = envelope.meta.last_success;
                }
                if !ctx.emit(envelope) {
                    break;
                }

                if failed {
                    match commands.recv().await {
                        Some(RecoveryAction::Retry { delay }) => {
                            next = Instant::now() + delay;
                        }
                        Some(RecoveryAction::Shutdown) | None => break,
                    }
                } else {
                    next = Instant::now() + config.interval;
                }
            }
        }
    }
    debug!(monitor_id = %ctx.monitor_id, "http worker stopped");
}

/// Emit the same fault on every probe attempt; used when the worker cannot
/// even construct its HTTP client.
async fn fault_loop(
    ctx: &WorkerContext,
    commands: &mut mpsc::UnboundedReceiver<RecoveryAction>,
    info: ErrorInfo,
) {
    loop {
        if !ctx.emit(Envelope::error(&ctx.monitor_id, info.clone())) {
            return;
        }
        match commands.recv().await {
            Some(RecoveryAction::Retry { delay }) => tokio::time::sleep(delay).await,
            Some(RecoveryAction::Shutdown) | None => return,
        }
    }
}

fn build_client(config: &HttpConfig) -> Result<Client, ErrorInfo> {
    let redirect = if config.follow_redirect {
        reqwest::redirect::Policy::default()
    } else {
        reqwest::redirect::Policy::none()
    };

    Client::builder()
        .timeout(config.timeout)
        .redirect(redirect)
        .danger_accept_invalid_certs(!config.verify_ssl)
        .build()
        .map_err(|e| {
            ErrorInfo::new(ErrorKind::Exception, "failed to build HTTP client")
                .with_details(json!({"kind": "client_builder", "error": e.to_string()}))
        })
}

/// Perform one probe and classify the outcome.
async fn probe(client: &Client, config: &HttpConfig) -> Result<Value, ErrorInfo> {
    let method = Method::from_bytes(config.method.to_uppercase().as_bytes()).map_err(|e| {
        ErrorInfo::new(ErrorKind::Exception, format!("invalid method '{}'", config.method))
            .with_details(json!({"kind": "invalid_method", "error": e.to_string()}))
    })?;

    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            ErrorInfo::new(ErrorKind::Exception, format!("invalid header name '{}'", name))
                .with_details(json!({"kind": "invalid_header", "error": e.to_string()}))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            ErrorInfo::new(ErrorKind::Exception, format!("invalid header value for '{}'", name))
                .with_details(json!({"kind": "invalid_header", "error": e.to_string()}))
        })?;
        headers.insert(name, value);
    }

    let mut request = client
        .request(method, &config.url)
        .headers(headers)
        .query(&config.request_params);
    if !config.request_body.is_empty() {
        request = request.body(config.request_body.clone());
    }

    let response = request.send().await.map_err(classify_transport_error)?;

    let status = response.status();
    let status_code = status.as_u16();

    if status.is_redirection() {
        let redirect_url = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        return Err(ErrorInfo::new(
            ErrorKind::Redirect,
            format!("redirect not followed (HTTP {})", status_code),
        )
        .with_details(json!({"status_code": status_code, "redirect_url": redirect_url})));
    }

    let response_headers = headers_to_value(response.headers());
    let body = response.bytes().await.map_err(classify_transport_error)?;

    if status.is_success() {
        return Ok(json!({
            "status_code": status_code,
            "body": decode_payload(&body),
            "headers": response_headers,
        }));
    }

    Err(
        ErrorInfo::new(ErrorKind::HttpError, format!("HTTP {}", status_code)).with_details(json!({
            "status_code": status_code,
            "body": String::from_utf8_lossy(&body).into_owned(),
        })),
    )
}

fn classify_transport_error(error: reqwest::Error) -> ErrorInfo {
    let kind = if error.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::ClientError
    };
    ErrorInfo::new(kind, error.to_string()).with_details(json!({"reason": error.to_string()}))
}

fn headers_to_value(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        map.insert(
            name.as_str().to_string(),
            Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        );
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    /// Minimal fixture server: answers every connection with the same
    /// canned HTTP response.
    async fn fixture_server(response: String) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
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

    fn canned(status: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
            status,
            body.len(),
            headers,
            body
        )
    }

    fn test_config(url: &str) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert("url".to_string(), json!(url));
        config.insert("method".to_string(), json!("GET"));
        config.insert("headers".to_string(), json!({}));
        config.insert("interval".to_string(), json!(100));
        config.insert("timeout".to_string(), json!(500));
        config.insert("follow_redirect".to_string(), json!(false));
        config.insert("verify_ssl".to_string(), json!(false));
        config.insert("request_body".to_string(), json!(""));
        config.insert("request_params".to_string(), json!({}));
        config
    }

    fn spawn_worker(
        config: &Map<String, Value>,
    ) -> (WorkerHandle, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = HttpWorker.spawn(config, WorkerContext::new("m1", tx));
        (handle, rx)
    }

    #[tokio::test]
    async fn test_success_probe_and_reschedule() {
        let (url, server) = fixture_server(canned(
            "200 OK",
            "Content-Type: application/json\r\n",
            r#"{"status": "ok"}"#,
        ))
        .await;
        let (handle, mut rx) = spawn_worker(&test_config(&url));

        // First probe fires at t=0; the second after `interval`.
        for _ in 0..2 {
            let env = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("probe within deadline")
                .unwrap();
            assert!(!env.is_error());
            let data = env.data_value().unwrap();
            assert_eq!(data["status_code"], 200);
            assert_eq!(data["body"]["status"], "ok");
            assert_eq!(data["headers"]["content-type"], "application/json");
        }

        handle.recover(RecoveryAction::Shutdown);
        let _ = handle.join.await;
        server.abort();
    }

    #[tokio::test]
    async fn test_http_error_classified_and_waits_for_recover() {
        let (url, server) = fixture_server(canned("404 Not Found", "", "not found")).await;
        let (handle, mut rx) = spawn_worker(&test_config(&url));

        let env = rx.recv().await.unwrap();
        let info = env.error_info().unwrap();
        assert_eq!(info.kind, ErrorKind::HttpError);
        assert_eq!(info.details["status_code"], 404);
        assert_eq!(info.details["body"], "not found");

        // Contract: no autonomous rescheduling after an error.
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());

        handle.recover(RecoveryAction::Retry {
            delay: Duration::from_millis(10),
        });
        let env = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(env.is_error());

        handle.recover(RecoveryAction::Shutdown);
        let _ = handle.join.await;
        server.abort();
    }

    #[tokio::test]
    async fn test_unfollowed_redirect_classified() {
        let (url, server) = fixture_server(canned(
            "302 Found",
            "Location: http://example.com/elsewhere\r\n",
            "",
        ))
        .await;
        let (handle, mut rx) = spawn_worker(&test_config(&url));

        let env = rx.recv().await.unwrap();
        let info = env.error_info().unwrap();
        assert_eq!(info.kind, ErrorKind::Redirect);
        assert_eq!(info.details["status_code"], 302);
        assert_eq!(info.details["redirect_url"], "http://example.com/elsewhere");

        handle.recover(RecoveryAction::Shutdown);
        let _ = handle.join.await;
        server.abort();
    }

    #[tokio::test]
    async fn test_connection_refused_is_client_error() {
        // Bind then drop to obtain a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (handle, mut rx) = spawn_worker(&test_config(&format!("http://{}", addr)));

        let env = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        let info = env.error_info().unwrap();
        assert_eq!(info.kind, ErrorKind::ClientError);
        assert!(info.details["reason"].is_string());

        handle.recover(RecoveryAction::Shutdown);
        let _ = handle.join.await;
    }

    #[tokio::test]
    async fn test_unresponsive_server_is_timeout() {
        // Accepts connections but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let mut config = test_config(&format!("http://{}", addr));
        config.insert("timeout".to_string(), json!(200));
        let (handle, mut rx) = spawn_worker(&config);

        let env = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(env.error_info().unwrap().kind, ErrorKind::Timeout);

        handle.recover(RecoveryAction::Shutdown);
        let _ = handle.join.await;
        server.abort();
    }

    #[tokio::test]
    async fn test_error_envelope_preserves_last_success() {
        let (url, server) = fixture_server(canned("200 OK", "", "ok")).await;
        let mut config = test_config(&url);
        config.insert("interval".to_string(), json!(100));
        let (handle, mut rx) = spawn_worker(&config);

        let first = rx.recv().await.unwrap();
        assert!(!first.is_error());
        server.abort();

        // Next probe hits a dead server; the error still carries the
        // last success instant.
        let env = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(env.is_error());
        assert_eq!(env.meta.last_success, Some(first.timestamp));

        handle.recover(RecoveryAction::Shutdown);
        let _ = handle.join.await;
    }

    #[test]
    fn test_config_from_validated() {
        let mut raw = test_config("http://localhost:9999/x");
        raw.insert("headers".to_string(), json!({"x-token": "abc", "x-n": 3}));
        let config = HttpConfig::from_validated(&raw);

        assert_eq!(config.url, "http://localhost:9999/x");
        assert_eq!(config.interval, Duration::from_millis(100));
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert!(!config.follow_redirect);
        assert_eq!(config.headers["x-token"], "abc");
        // Non-string header values are rendered as JSON text.
        assert_eq!(config.headers["x-n"], "3");
    }
}
