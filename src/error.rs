use hyper::StatusCode;
use thiserror::Error;

/// Unified error type for the Requests Debugger
#[derive(Error, Debug)]
pub enum DebuggerError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Error in creating {folder} folder at path: {path}. Message: {source}")]
    LogDirectory {
        folder: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    // Upstream errors
    #[error("Upstream proxy is not configured")]
    UpstreamProxyMissing,

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Requests Debugger operations
pub type Result<T> = std::result::Result<T, DebuggerError>;

impl DebuggerError {
    /// Get the HTTP status code a listener answers with when this error stops
    /// a request before it is relayed
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            DebuggerError::InvalidRequest(_) | DebuggerError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }

            // 405 Method Not Allowed
            DebuggerError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,

            // 502 Bad Gateway
            DebuggerError::UpstreamProxyMissing | DebuggerError::HttpClient(_) => {
                StatusCode::BAD_GATEWAY
            }

            // 500 Internal Server Error
            DebuggerError::LogDirectory { .. }
            | DebuggerError::Io(_)
            | DebuggerError::Http(_)
            | DebuggerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Convert from hyper errors
impl From<hyper::Error> for DebuggerError {
    fn from(err: hyper::Error) -> Self {
        DebuggerError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for DebuggerError {
    fn from(err: url::ParseError) -> Self {
        DebuggerError::InvalidRequest(err.to_string())
    }
}

/// Failure of a single relay attempt.
///
/// `topic` names the stage that failed and is carried into the log line of
/// the retry wrapper, so every attempt can be told apart in `Requests.log`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The client's own request stream failed. The client is gone, so there
    /// is nothing to retry for.
    #[error("{message}")]
    ClientStream { message: String, topic: String },

    /// Connect/write/read failure or a forced timeout on the outbound side.
    #[error("{message}")]
    Transport { message: String, topic: String },
}

impl RelayError {
    pub fn client_stream(message: impl Into<String>, topic: impl Into<String>) -> Self {
        RelayError::ClientStream {
            message: message.into(),
            topic: topic.into(),
        }
    }

    pub fn transport(message: impl Into<String>, topic: impl Into<String>) -> Self {
        RelayError::Transport {
            message: message.into(),
            topic: topic.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RelayError::ClientStream { message, .. } | RelayError::Transport { message, .. } => {
                message
            }
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            RelayError::ClientStream { topic, .. } | RelayError::Transport { topic, .. } => topic,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Transport { .. })
    }
}
