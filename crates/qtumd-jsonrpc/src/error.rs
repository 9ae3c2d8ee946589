use serde::Deserialize;

/// The `{code, message}` object the daemon embeds in a failed response.
///
/// Reserved codes, per the daemon's RPC protocol: `-28` means the daemon is
/// still warming up (retryable), `-5` means "not found" and is sometimes
/// remapped by callers to an empty success value rather than an error.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

impl ErrorObject {
    pub const WARMING_UP: i64 = -28;
    pub const NOT_FOUND: i64 = -5;

    /// Whether this error indicates the daemon has not finished loading and
    /// the caller should retry after a delay.
    pub const fn is_warming_up(&self) -> bool {
        self.code == Self::WARMING_UP
    }

    pub const fn is_not_found(&self) -> bool {
        self.code == Self::NOT_FOUND
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.message)
    }
}

/// Error returned while making or decoding a single RPC call.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The daemon returned `{error: {code, message}}`.
    #[error("{0}")]
    Server(ErrorObject),
    /// The response had neither `result` nor `error` populated.
    #[error("daemon returned a response with no result and no error")]
    NullResult,
    /// The request could not be serialized.
    #[error("failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),
    /// The response body could not be parsed as a `Response` envelope.
    #[error("failed to deserialize response: {0}")]
    Deserialize(#[source] serde_json::Error),
    /// The underlying HTTP transport failed (connection refused, timeout, TLS, ...).
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RpcError {
    /// Whether the Node Pool should treat this as transient and move on to
    /// the next endpoint rather than surfacing it to the caller immediately.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Server(e) if e.is_warming_up())
    }

    /// The error code, if this wraps a server-side error object.
    pub const fn code(&self) -> Option<i64> {
        match self {
            Self::Server(e) => Some(e.code),
            _ => None,
        }
    }
}
