//! MQTT protocol worker: broker subscription with per-message emission.
//!
//! Push-based: the worker connects, subscribes to the configured topic, and
//! emits one success envelope per inbound publish. Connection-level failures
//! emit a single classified error envelope, after which the worker holds the
//! line until the coordinator's `recover` command — a retry tears the session
//! down and reconnects from scratch after the commanded delay.

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::debug;

use super::{
    decode_payload, pause_before_reconnect, report_and_hold, ProtocolWorker, WorkerContext,
    WorkerHandle,
};
use crate::envelope::{Envelope, ErrorInfo, ErrorKind};
use crate::policy::RecoveryAction;
use crate::schema::FieldSchema;

/// Factory for MQTT subscription workers.
#[derive(Debug, Clone)]
pub struct MqttWorker;

impl ProtocolWorker for MqttWorker {
    fn tag(&self) -> &'static str {
        "mqtt"
    }

    fn schema(&self) -> Vec<FieldSchema> {
        vec![
            FieldSchema::string("host").required(),
            FieldSchema::integer("port")
                .default_value(1883)
                .min(1.0)
                .max(65_535.0),
            FieldSchema::string("topic").required(),
            FieldSchema::string("client_id").default_value("argos"),
            FieldSchema::string("username").default_value(""),
            FieldSchema::string("password").default_value(""),
            FieldSchema::integer("keep_alive")
                .default_value(60)
                .min(5.0)
                .max(3600.0),
            FieldSchema::integer("qos").default_value(0).min(0.0).max(2.0),
        ]
    }

    fn spawn(&self, config: &Map<String, Value>, ctx: WorkerContext) -> WorkerHandle {
        let config = MqttConfig::from_validated(config);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let join = tokio::spawn(run(config, ctx, commands));
        WorkerHandle::new(commands_tx, join)
    }
}

/// Typed view of the validated `config` map.
#[derive(Debug, Clone)]
pub(crate) struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    pub qos: QoS,
}

impl MqttConfig {
    pub(crate) fn from_validated(config: &Map<String, Value>) -> Self {
        let get_str = |key: &str, default: &str| {
            config
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        let get_u64 =
            |key: &str, default: u64| config.get(key).and_then(Value::as_u64).unwrap_or(default);

        Self {
            host: get_str("host", ""),
            port: u16::try_from(get_u64("port", 1883)).unwrap_or(1883),
            topic: get_str("topic", ""),
            client_id: get_str("client_id", "argos"),
            username: get_str("username", ""),
            password: get_str("password", ""),
            keep_alive: Duration::from_secs(get_u64("keep_alive", 60)),
            qos: qos_from_level(get_u64("qos", 0)),
        }
    }
}

pub(crate) fn qos_from_level(level: u64) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// Classify a connection-level failure into the normalized taxonomy.
pub(crate) fn classify_connection_error(error: &ConnectionError) -> ErrorKind {
    match error {
        ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized,
        ) => ErrorKind::Authentication,
        ConnectionError::ConnectionRefused(_) => ErrorKind::Protocol,
        ConnectionError::MqttState(_) | ConnectionError::NotConnAck(_) => ErrorKind::Protocol,
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => ErrorKind::Timeout,
        _ => ErrorKind::Network,
    }
}

/// Session loop: each pass builds a fresh client/event loop; a commanded
/// retry re-enters from the top after the delay.
async fn run(
    config: MqttConfig,
    ctx: WorkerContext,
    mut commands: mpsc::UnboundedReceiver<RecoveryAction>,
) {
    let mut last_success = None;

    'session: loop {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        debug!(monitor_id = %ctx.monitor_id, host = %config.host, "mqtt session starting");

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    // A mid-session retry tears the session down and
                    // reconnects; shutdown ends the worker.
                    Some(RecoveryAction::Retry { delay }) => {
                        if !pause_before_reconnect(&mut commands, delay).await {
                            return;
                        }
                        continue 'session;
                    }
                    Some(RecoveryAction::Shutdown) | None => return,
                },
                event = event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        if let Err(e) = client.subscribe(config.topic.clone(), config.qos).await {
                            let info = ErrorInfo::new(ErrorKind::Protocol, "subscribe failed")
                                .with_details(json!({"topic": config.topic, "reason": e.to_string()}));
                            let envelope = Envelope::error(&ctx.monitor_id, info)
                                .with_last_success(last_success);
                            if report_and_hold(&ctx, &mut commands, envelope).await {
                                continue 'session;
                            }
                            return;
                        }
                        debug!(monitor_id = %ctx.monitor_id, topic = %config.topic, "mqtt subscribed");
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let data = json!({
                            "topic": publish.topic,
                            "payload": decode_payload(&publish.payload),
                            "qos": qos_level(publish.qos),
                            "retain": publish.retain,
                        });
                        let envelope = Envelope::data(&ctx.monitor_id, data);
                        last_success = envelope.meta.last_success;
                        if !ctx.emit(envelope) {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let info = ErrorInfo::new(classify_connection_error(&e), e.to_string())
                            .with_details(json!({
                                "host": config.host,
                                "port": config.port,
                                "reason": e.to_string(),
                            }));
                        let envelope =
                            Envelope::error(&ctx.monitor_id, info).with_last_success(last_success);
                        if report_and_hold(&ctx, &mut commands, envelope).await {
                            continue 'session;
                        }
                        return;
                    }
                },
            }
        }
    }
}
