// Error handling module
// Defines the client error taxonomy and HTTP status classification

use thiserror::Error;

/// Category of a failed transport exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailureKind {
    Timeout,
    Connect,
    Tls,
    Request,
    Body,
    /// The exchange completed but the controller answered with a 5xx status
    ServerError,
    Other,
}

impl TransportFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportFailureKind::Timeout => "timeout",
            TransportFailureKind::Connect => "connection_failed",
            TransportFailureKind::Tls => "tls_error",
            TransportFailureKind::Request => "request_error",
            TransportFailureKind::Body => "body_error",
            TransportFailureKind::ServerError => "server_error",
            TransportFailureKind::Other => "unknown",
        }
    }
}

impl std::fmt::Display for TransportFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by every client operation
#[derive(Error, Debug)]
pub enum ClientError {
    /// The HTTP/TLS stack could not be built. Fatal, never retried.
    #[error("Transport initialization failed: {0}")]
    TransportInit(String),

    /// Network, TLS or 5xx failure. Safe to retry at the caller's discretion.
    #[error("Transport error during {operation} ({kind}): {message}")]
    Transport {
        operation: String,
        kind: TransportFailureKind,
        status: Option<u16>,
        message: String,
    },

    /// 401/403 from the controller, or a rejected grant at the token endpoint
    #[error("Authentication failed during {operation}: {status} - {message}")]
    Authentication {
        operation: String,
        status: u16,
        message: String,
    },

    /// No credential is stored for an operation that requires one
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// 404 from the controller, or a named resource that does not exist
    #[error("Not found during {operation}: {message}")]
    NotFound { operation: String, message: String },

    /// Malformed local input, rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing client configuration such as the target space
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Any other 4xx, with the remote message verbatim
    #[error("Remote error during {operation}: {status} - {message}")]
    Remote {
        operation: String,
        status: u16,
        message: String,
    },

    /// A 2xx response whose body could not be decoded
    #[error("Invalid response during {operation}: {message}")]
    Decode { operation: String, message: String },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ClientError {
    /// HTTP status attached to this error, if the controller answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transport { status, .. } => *status,
            ClientError::Authentication { status, .. } | ClientError::Remote { status, .. } => {
                Some(*status)
            }
            ClientError::NotFound { .. } => Some(404),
            _ => None,
        }
    }

    /// Only transport failures are worth retrying; the client itself never does
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport { .. })
    }

    /// True for both a rejected credential and a missing one
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            ClientError::Authentication { .. } | ClientError::Unauthenticated(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

/// Map a non-2xx controller status to the error taxonomy
pub fn classify_status(operation: &str, status: u16, body: &str) -> ClientError {
    let message = remote_message(body);
    match status {
        401 | 403 => ClientError::Authentication {
            operation: operation.to_string(),
            status,
            message,
        },
        404 => ClientError::NotFound {
            operation: operation.to_string(),
            message,
        },
        500..=599 => ClientError::Transport {
            operation: operation.to_string(),
            kind: TransportFailureKind::ServerError,
            status: Some(status),
            message,
        },
        _ => ClientError::Remote {
            operation: operation.to_string(),
            status,
            message,
        },
    }
}

/// Pull the human readable part out of a controller or UAA error body
///
/// Controller errors look like `{"code":100004,"description":"...","error_code":"..."}`,
/// UAA errors like `{"error":"invalid_grant","error_description":"..."}`.
/// Anything else is surfaced verbatim.
pub fn remote_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let pick = |key: &str| json.get(key).and_then(|v| v.as_str()).map(str::to_string);
        if let Some(description) = pick("description").or_else(|| pick("error_description")) {
            return match pick("error_code").or_else(|| pick("error")) {
                Some(code) => format!("{} ({})", description, code),
                None => description,
            };
        }
        if let Some(code) = pick("error") {
            return code;
        }
    }
    body.trim().to_string()
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
