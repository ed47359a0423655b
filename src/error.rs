use thiserror::Error;

/// Errors produced by the runtime's library surface.
///
/// Validation failures are deliberately *not* represented here: the config
/// validator aggregates every fault into a plain `Vec<String>` reason list
/// (see [`validate_document`](crate::config::validate_document)), because a
/// rejected document is an operator-facing report, not a single error value.
/// Likewise, operational probe failures travel as classified
/// [`ErrorInfo`](crate::envelope::ErrorInfo) envelopes, never as `Err`s.
#[derive(Error, Debug)]
pub enum ArgosError {
    /// The document text is not valid JSON.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// No worker factory is registered under the given protocol tag.
    #[error("Unknown protocol type '{0}'")]
    UnknownProtocol(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for ArgosError {
    fn from(err: anyhow::Error) -> Self {
        ArgosError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArgosError>;
