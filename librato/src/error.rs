//! Error types for the Librato submission pipeline.
//!
//! Client errors (4xx) are classified into [`ClientError`] from the HTTP
//! status code and the decoded response payload. Server errors (5xx) never
//! surface here directly: the transport retries them, and only reports a
//! [`TransportError`] once its [`RetryPolicy`](crate::retry::RetryPolicy)
//! gives up.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Boxed error used at the HTTP seam, so fake clients can report failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for all Librato operations.
#[derive(Error, Debug)]
pub enum LibratoError {
    /// The API rejected the request with a 4xx status.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// The request could not be delivered.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Connection configuration was invalid or could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A request body could not be serialized.
    #[error("failed to serialize request body: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A request body serialized to something other than a JSON object.
    #[error("request body must be a JSON object, got {0}")]
    InvalidBody(&'static str),
}

/// A classified 4xx response.
///
/// Displays as `[<code>] <message>`, where the message is extracted from the
/// response payload by [`ClientError::classify`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// 400 Bad Request.
    #[error("[400] {message}")]
    BadRequest {
        /// Human-readable message parsed from the payload.
        message: String,
    },

    /// 401 Unauthorized.
    #[error("[401] {message}")]
    Unauthorized {
        /// Human-readable message parsed from the payload.
        message: String,
    },

    /// 403 Forbidden.
    #[error("[403] {message}")]
    Forbidden {
        /// Human-readable message parsed from the payload.
        message: String,
    },

    /// 404 Not Found.
    #[error("[404] {message}")]
    NotFound {
        /// Human-readable message parsed from the payload.
        message: String,
    },

    /// Any other client error status.
    #[error("[{code}] {message}")]
    Other {
        /// The raw HTTP status code.
        code: u16,
        /// Human-readable message parsed from the payload.
        message: String,
    },
}

impl ClientError {
    /// Classifies a client error response.
    ///
    /// `payload` is the decoded response body: a JSON string is used
    /// verbatim, an object with an `errors` key is flattened into
    /// `key: message` entries, and an object with a singular `error` key
    /// (rate-limit responses) uses that value verbatim.
    pub fn classify(status: u16, payload: Option<&Value>) -> Self {
        let message = payload.map(parse_error_message).unwrap_or_default();
        match status {
            400 => Self::BadRequest { message },
            401 => Self::Unauthorized { message },
            403 => Self::Forbidden { message },
            404 => Self::NotFound { message },
            code => Self::Other { code, message },
        }
    }

    /// Returns the HTTP status code this error was classified from.
    pub fn code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Unauthorized { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Other { code, .. } => *code,
        }
    }

    /// Returns the parsed message without the status prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message }
            | Self::Unauthorized { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::Other { message, .. } => message,
        }
    }
}

/// Extracts a readable message from an error payload.
fn parse_error_message(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            if let Some(Value::Object(errors)) = map.get("errors") {
                let mut parts = Vec::new();
                for (key, value) in errors {
                    match value {
                        // Each top-level list entry carries its own key prefix.
                        Value::Array(items) => {
                            parts.extend(items.iter().map(|m| format!("{key}: {}", scalar(m))));
                        }
                        Value::Object(nested) => {
                            for (sub, sub_value) in nested {
                                parts.push(format!("{key}: {sub}: {}", flatten(sub_value)));
                            }
                        }
                        other => parts.push(format!("{key}: {}", scalar(other))),
                    }
                }
                parts.join(", ")
            } else if let Some(error) = map.get("error") {
                scalar(error)
            } else {
                payload.to_string()
            }
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Flattens a nested error value: lists are joined, objects recurse.
fn flatten(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(scalar).collect::<Vec<_>>().join(", "),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", flatten(v)))
            .collect::<Vec<_>>()
            .join(", "),
        other => scalar(other),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Errors raised while delivering a request.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to create the HTTP client.
    #[error("failed to create HTTP client: {source}")]
    ClientCreate {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The peer closed the connection before a response could be read.
    #[error("connection closed before response: {source}")]
    ConnectionClosed {
        /// The underlying error.
        #[source]
        source: BoxError,
    },

    /// The request failed at the network level (DNS, refused, timeout).
    #[error("HTTP request failed: {source}")]
    Request {
        /// The underlying error.
        #[source]
        source: BoxError,
    },

    /// The retry policy allowed no further attempts after server errors.
    #[error("server returned status {status} after {attempts} attempts")]
    RetriesExhausted {
        /// The last 5xx status observed.
        status: u16,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The retry policy deadline passed while the server kept failing.
    #[error("server returned status {status}; retry deadline of {deadline:?} exceeded")]
    DeadlineExceeded {
        /// The last 5xx status observed.
        status: u16,
        /// The configured deadline.
        deadline: Duration,
    },
}

/// Errors raised while building a connection configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the config file.
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The protocol is neither `http` nor `https`.
    #[error("unsupported protocol '{0}' (expected http or https)")]
    InvalidProtocol(String),

    /// A required setting is missing or empty.
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// Type alias for `Result<T, LibratoError>`.
pub type Result<T> = std::result::Result<T, LibratoError>;
