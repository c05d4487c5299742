use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the SDK.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// SDK key is empty or blank.
    #[error("invalid server_sdk_key, the key must not be blank")]
    InvalidSdkKey,

    /// One of the configured URLs cannot be parsed.
    #[error("invalid url configuration")]
    InvalidUrl(#[source] url::ParseError),

    /// Server rejected the SDK key.
    #[error("unauthorized, server_sdk_key is likely invalid")]
    Unauthorized,

    /// Server responded with a non-2xx status.
    #[error("unexpected http status: {0}")]
    Http(reqwest::StatusCode),

    /// Network error while talking to the server.
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// Failure to read a local file or to spawn a thread.
    #[error(transparent)]
    Io(Arc<std::io::Error>),

    /// Repository or event payload could not be (de)serialized.
    #[error("failed to parse json: {0}")]
    Json(Arc<serde_json::Error>),

    /// Realtime (websocket) channel failure.
    #[error("realtime channel error: {0}")]
    Realtime(String),

    /// A background thread panicked.
    #[error("background thread panicked")]
    ThreadPanicked,

    /// Toggle evaluation failed.
    #[error(transparent)]
    Evaluation(#[from] EvalError),
}

/// Errors raised by the evaluation engine when server data is inconsistent.
///
/// These are never surfaced from the value getters on [`FeatureProbe`](crate::FeatureProbe):
/// the caller's default is served instead with a diagnostic reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvalError {
    /// Prerequisite chain is deeper than allowed. Usually a sign of a cycle.
    #[error("prerequisite depth overflow")]
    PrerequisiteDepthOverflow,

    /// A serve selected a variation that does not exist on the toggle.
    #[error("variation index {index} is out of range for toggle {toggle}")]
    InvalidVariationIndex {
        /// Toggle being evaluated.
        toggle: String,
        /// Offending index.
        index: usize,
    },

    /// Condition references a segment absent from the repository.
    #[error("segment {0} not found")]
    SegmentNotFound(String),

    /// Toggle has no serve for the outcome being resolved.
    #[error("toggle {0} has no serve configured")]
    MissingServe(String),

    /// Datetime condition contains a literal that is not an integer timestamp.
    #[error("invalid datetime literal in condition: {0}")]
    InvalidDatetime(String),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Network(Arc::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(Arc::new(value))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Realtime(value.to_string())
    }
}
