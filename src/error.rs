//! Error types for loading configuration and serving requests.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn a configuration source into a [`Configuration`](crate::config::Configuration).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ConfigError::Invalid(msg.into())
    }
}

/// Errors surfaced while the server runs.
///
/// The request-path variants are never fatal: each one maps onto a JSON
/// `{"error": ...}` reply through [`MockError::status`] and [`MockError::message`].
#[derive(Debug, Error)]
pub enum MockError {
    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("request does not satisfy the endpoint matchers")]
    PredicateMismatch,

    #[error("endpoint has no default response")]
    NoDefaultResponse,

    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("failed to render response body: {0}")]
    Render(String),

    #[error("failed to write response: {0}")]
    ResponseWrite(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server is {0}, cannot change state")]
    Busy(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl MockError {
    /// HTTP status used when this error becomes a reply.
    pub fn status(&self) -> u16 {
        match self {
            MockError::RouteNotFound { .. } | MockError::PredicateMismatch => 404,
            MockError::BodyTooLarge { .. } => 413,
            MockError::BodyRead(_) => 400,
            _ => 500,
        }
    }

    /// Message placed in the `error` field of the reply body.
    pub fn message(&self) -> String {
        match self {
            MockError::RouteNotFound { .. } => {
                "No responses configured for this endpoint".to_string()
            }
            MockError::PredicateMismatch => "Request does not match endpoint matchers".to_string(),
            MockError::NoDefaultResponse => {
                "No default response configured for this endpoint".to_string()
            }
            other => other.to_string(),
        }
    }
}
