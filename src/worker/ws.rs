//! WebSocket protocol worker: streaming with per-message emission.
//!
//! Push-based like the MQTT worker: the worker connects, then emits one
//! success envelope per inbound text/binary frame. A close frame or
//! transport error emits a classified error envelope, after which the worker
//! waits for the coordinator's `recover` command; a retry reconnects from
//! scratch after the commanded delay. An optional ping timer keeps
//! intermediaries from dropping idle connections.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::ClientRequestBuilder;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use super::{decode_payload, report_and_hold, ProtocolWorker, WorkerContext, WorkerHandle};
use crate::envelope::{Envelope, ErrorInfo, ErrorKind};
use crate::policy::RecoveryAction;
use crate::schema::FieldSchema;

/// Factory for WebSocket streaming workers.
#[derive(Debug, Clone)]
pub struct WebSocketWorker;

impl ProtocolWorker for WebSocketWorker {
    fn tag(&self) -> &'static str {
        "websocket"
    }

    fn schema(&self) -> Vec<FieldSchema> {
        vec![
            FieldSchema::string("url").required().pattern("^wss?://.+"),
            FieldSchema::map("headers").default_value(json!({})),
            // 0 disables the keep-alive ping.
            FieldSchema::integer("ping_interval")
                .default_value(30_000)
                .min(0.0),
        ]
    }

    fn spawn(&self, config: &Map<String, Value>, ctx: WorkerContext) -> WorkerHandle {
        let config = WsConfig::from_validated(config);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let join = tokio::spawn(run(config, ctx, commands));
        WorkerHandle::new(commands_tx, join)
    }
}

/// Typed view of the validated `config` map.
#[derive(Debug, Clone)]
pub(crate) struct WsConfig {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub ping_interval: Duration,
}

impl WsConfig {
    pub(crate) fn from_validated(config: &Map<String, Value>) -> Self {
        let headers = config
            .get("headers")
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
            .unwrap_or_default();

        Self {
            url: config
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            headers,
            ping_interval: Duration::from_millis(
                config
                    .get("ping_interval")
                    .and_then(Value::as_u64)
                    .unwrap_or(30_000),
            ),
        }
    }
}

/// Classify a tungstenite error into the normalized taxonomy, with details.
pub(crate) fn classify_ws_error(error: &WsError) -> ErrorInfo {
    let (kind, details) = match error {
        WsError::Http(response) => (
            ErrorKind::HttpError,
            json!({"status_code": response.status().as_u16()}),
        ),
        WsError::Io(_) | WsError::Tls(_) => {
            (ErrorKind::Network, json!({"reason": error.to_string()}))
        }
        WsError::Protocol(_) | WsError::ConnectionClosed | WsError::AlreadyClosed => {
            (ErrorKind::Protocol, json!({"reason": error.to_string()}))
        }
        WsError::Url(_) => (ErrorKind::Exception, json!({"reason": error.to_string()})),
        _ => (ErrorKind::Unknown, json!({"reason": error.to_string()})),
    };
    ErrorInfo::new(kind, error.to_string()).with_details(details)
}

fn build_request(config: &WsConfig) -> Result<ClientRequestBuilder, ErrorInfo> {
    let uri: Uri = config.url.parse().map_err(|e| {
        ErrorInfo::new(ErrorKind::Exception, format!("invalid url '{}'", config.url))
            .with_details(json!({"kind": "invalid_url", "error": format!("{e}")}))
    })?;

    let mut request = ClientRequestBuilder::new(uri);
    for (name, value) in &config.headers {
        request = request.with_header(name.clone(), value.clone());
    }
    Ok(request)
}

/// Session loop: connect, stream frames, reconnect on commanded retries.
async fn run(
    config: WsConfig,
    ctx: WorkerContext,
    mut commands: mpsc::UnboundedReceiver<RecoveryAction>,
) {
    let mut last_success = None;

    'session: loop {
        let request = match build_request(&config) {
            Ok(request) => request,
            Err(info) => {
                let envelope =
                    Envelope::error(&ctx.monitor_id, info).with_last_success(last_success);
                if report_and_hold(&ctx, &mut commands, envelope).await {
                    continue 'session;
                }
                return;
            }
        };

        debug!(monitor_id = %ctx.monitor_id, url = %config.url, "websocket connecting");
        let (stream, _response) = match connect_async(request).await {
            Ok(ok) => ok,
            Err(e) => {
                let envelope = Envelope::error(&ctx.monitor_id, classify_ws_error(&e))
                    .with_last_success(last_success);
                if report_and_hold(&ctx, &mut commands, envelope).await {
                    continue 'session;
                }
                return;
            }
        };

        let (mut sink, mut messages) = stream.split();
        let ping_enabled = !config.ping_interval.is_zero();
        let mut ping = tokio::time::interval(if ping_enabled {
            config.ping_interval
        } else {
            Duration::from_secs(86_400)
        });
        // The first interval tick completes immediately; skip it so pings
        // start one period after connect.
        ping.tick().await;

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(RecoveryAction::Retry { delay }) => {
                        if super::pause_before_reconnect(&mut commands, delay).await {
                            continue 'session;
                        }
                        return;
                    }
                    Some(RecoveryAction::Shutdown) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                },
                _ = ping.tick(), if ping_enabled => {
                    if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                        let envelope = Envelope::error(&ctx.monitor_id, classify_ws_error(&e))
                            .with_last_success(last_success);
                        if report_and_hold(&ctx, &mut commands, envelope).await {
                            continue 'session;
                        }
                        return;
                    }
                },
                frame = messages.next() => {
                    let envelope = match frame {
                        Some(Ok(Message::Text(text))) => {
                            Envelope::data(&ctx.monitor_id, json!({"message": decode_payload(text.as_bytes())}))
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            Envelope::data(&ctx.monitor_id, json!({"message": decode_payload(&bytes)}))
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let details = match frame {
                                Some(frame) => json!({
                                    "code": u16::from(frame.code),
                                    "reason": frame.reason.to_string(),
                                }),
                                None => json!({}),
                            };
                            let info = ErrorInfo::new(ErrorKind::Protocol, "connection closed by peer")
                                .with_details(details);
                            Envelope::error(&ctx.monitor_id, info).with_last_success(last_success)
                        }
                        // Pings and pongs are handled by the protocol layer.
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => Envelope::error(&ctx.monitor_id, classify_ws_error(&e))
                            .with_last_success(last_success),
                        None => {
                            let info = ErrorInfo::new(ErrorKind::Protocol, "stream ended");
                            Envelope::error(&ctx.monitor_id, info).with_last_success(last_success)
                        }
                    };

                    if envelope.is_error() {
                        if report_and_hold(&ctx, &mut commands, envelope).await {
                            continue 'session;
                        }
                        return;
                    }

                    last_success = envelope.meta.last_success;
                    if !ctx.emit(envelope) {
                        return;
                    }
                }
            }
        }
    }
}
