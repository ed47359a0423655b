//! Normalized envelope — the single shape crossing every internal boundary.
//!
//! Every protocol worker, whatever its transport, emits [`Envelope`]s to its
//! coordinator. Downstream subscribers therefore never see transport-specific
//! types: an HTTP probe, an MQTT subscription, and a WebSocket stream all
//! produce the same success/error record, differing only in the `data` map.
//!
//! ## Shape
//!
//! ```text
//! success: { monitor_id, timestamp, status: "ok",    data,  meta }
//! error:   { monitor_id, timestamp, status: "error", error, meta }
//! ```
//!
//! Exactly one of `data`/`error` exists — the two arms are a closed union,
//! not a pair of nullable fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of an operational failure.
///
/// Every error envelope carries exactly one kind. The retry policy engine
/// treats all kinds identically — classification exists for subscribers and
/// operators, not for the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport could not reach the endpoint (DNS, refused, reset).
    Network,
    /// The endpoint violated its protocol (bad frame, unexpected close).
    Protocol,
    /// The endpoint rejected the configured credentials.
    Authentication,
    /// The operation exceeded its configured deadline.
    Timeout,
    /// A payload could not be decoded.
    Parse,
    /// A redirect response that the worker was configured not to follow.
    Redirect,
    /// An HTTP 4xx/5xx response.
    HttpError,
    /// A client-side transport failure that is not more specifically
    /// classifiable.
    ClientError,
    /// An unexpected failure in the request path itself.
    Exception,
    /// None of the above.
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Network => "network",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Parse => "parse",
            ErrorKind::Redirect => "redirect",
            ErrorKind::HttpError => "http_error",
            ErrorKind::ClientError => "client_error",
            ErrorKind::Exception => "exception",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Coarse connection state reported in [`Meta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Connecting,
    Error,
}

/// Monitor-level metadata attached to every envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Connection state at emission time.
    pub status: ConnectionStatus,
    /// When this monitor last produced a success envelope, if ever.
    pub last_success: Option<DateTime<Utc>>,
}

/// Details of a classified operational failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Failure classification.
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Free-form transport context (e.g. HTTP status code, response body).
    pub details: Value,
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
    /// Backtrace-ish context, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

impl ErrorInfo {
    /// Create an error record with empty details, stamped now.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Value::Object(serde_json::Map::new()),
            timestamp: Utc::now(),
            stacktrace: None,
        }
    }

    /// Attach transport-specific details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Attach stacktrace-like context.
    pub fn with_stacktrace(mut self, trace: impl Into<String>) -> Self {
        self.stacktrace = Some(trace.into());
        self
    }
}

/// The success-or-error arm of an envelope.
///
/// Internally tagged with `status`, so the serialized form carries
/// `"status": "ok"` next to `data`, or `"status": "error"` next to `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnvelopeBody {
    /// A successful probe result. `data` is protocol-shaped.
    Ok { data: Value },
    /// A classified failure.
    Error { error: ErrorInfo },
}

/// The normalized record emitted by every protocol worker.
///
/// # Example
///
/// ```
/// use argos::envelope::Envelope;
/// use serde_json::json;
///
/// let env = Envelope::data("m1", json!({"status_code": 200}));
/// assert!(!env.is_error());
/// assert_eq!(env.monitor_id, "m1");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Id of the emitting monitor.
    pub monitor_id: String,
    /// Emission instant, always UTC.
    pub timestamp: DateTime<Utc>,
    /// The success/error arm.
    #[serde(flatten)]
    pub body: EnvelopeBody,
    /// Monitor-level metadata.
    pub meta: Meta,
}

impl Envelope {
    /// Build a success envelope stamped now.
    ///
    /// `meta.status` is `Connected` and `meta.last_success` is the envelope's
    /// own timestamp; use [`with_last_success`](Self::with_last_success) to
    /// override with the worker's tracked value.
    pub fn data(monitor_id: impl Into<String>, data: Value) -> Self {
        let now = Utc::now();
        Self {
            monitor_id: monitor_id.into(),
            timestamp: now,
            body: EnvelopeBody::Ok { data },
            meta: Meta {
                status: ConnectionStatus::Connected,
                last_success: Some(now),
            },
        }
    }

    /// Build an error envelope stamped now. `meta.status` is `Error`.
    pub fn error(monitor_id: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            timestamp: Utc::now(),
            body: EnvelopeBody::Error { error },
            meta: Meta {
                status: ConnectionStatus::Error,
                last_success: None,
            },
        }
    }

    /// Override `meta.last_success` (workers track this across probes).
    pub fn with_last_success(mut self, last: Option<DateTime<Utc>>) -> Self {
        self.meta.last_success = last;
        self
    }

    /// Override `meta.status`.
    pub fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.meta.status = status;
        self
    }

    /// Whether this is the error arm.
    pub fn is_error(&self) -> bool {
        matches!(self.body, EnvelopeBody::Error { .. })
    }

    /// The success data, if this is the success arm.
    pub fn data_value(&self) -> Option<&Value> {
        match &self.body {
            EnvelopeBody::Ok { data } => Some(data),
            EnvelopeBody::Error { .. } => None,
        }
    }

    /// The error record, if this is the error arm.
    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match &self.body {
            EnvelopeBody::Ok { .. } => None,
            EnvelopeBody::Error { error } => Some(error),
        }
    }
}
