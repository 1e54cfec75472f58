use thiserror::Error;

/// Error taxonomy for the admission/scheduling core (spec.md §7).
///
/// Each variant carries its own retryability and default backoff so the
/// (external) HTTP layer can map these onto status codes without reaching
/// back into this crate's internals.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    #[error("fragment sequence gap")]
    SeqRetry,

    #[error("adapter timeout")]
    Timeout,

    #[error("circuit open for adapter {adapter}")]
    CircuitOpen { adapter: String },

    #[error("policy denied: {reason}")]
    PolicyDenied { reason: String },

    #[error("invalid frame or payload: {0}")]
    BadInput(String),

    #[error("window or context budget exceeded")]
    ContextExceeded,

    #[error("adapter returned a server error: {0}")]
    Adapter(String),

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("cost budget exceeded")]
    CostLimit,

    #[error("admission timed out waiting for a fair-scheduler slot")]
    AdmissionTimeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("scheduler invariant violated: {0}")]
    SchedulerInvariant(String),
}

impl RouterError {
    /// Stable error code surfaced in `{code, message, retryable, backoff_ms?}`.
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::SeqRetry => "ESEQ_RETRY",
            RouterError::Timeout => "ETIMEOUT",
            RouterError::CircuitOpen { .. } => "ECIRCUIT",
            RouterError::PolicyDenied { .. } => "EPOLICY",
            RouterError::BadInput(_) => "EBAD_INPUT",
            RouterError::ContextExceeded => "ECONTEXT",
            RouterError::Adapter(_) => "EADAPTER",
            RouterError::RateLimit => "ERATE_LIMIT",
            RouterError::CostLimit => "ECOST_LIMIT",
            RouterError::AdmissionTimeout => "EADMIT_TIMEOUT",
            RouterError::Cancelled => "ECANCELLED",
            RouterError::SchedulerInvariant(_) => "ESCHED_INVARIANT",
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(
            self,
            RouterError::SeqRetry
                | RouterError::Timeout
                | RouterError::CircuitOpen { .. }
                | RouterError::ContextExceeded
                | RouterError::Adapter(_)
                | RouterError::RateLimit
                | RouterError::CostLimit
                | RouterError::AdmissionTimeout
        )
    }

    /// Default backoff in milliseconds, per spec.md §7. `None` for
    /// not-retryable errors and for cancellation.
    pub fn backoff_ms(&self) -> Option<u64> {
        match self {
            RouterError::SeqRetry => Some(20),
            RouterError::Timeout => Some(100),
            RouterError::CircuitOpen { .. } => Some(200),
            RouterError::ContextExceeded => Some(50),
            RouterError::Adapter(_) => Some(80),
            _ => None,
        }
    }

    /// HTTP status an external transport layer would use; this crate never
    /// binds a socket, but the mapping is part of the documented contract.
    pub fn http_status(&self) -> u16 {
        match self {
            RouterError::BadInput(_) => 400,
            RouterError::PolicyDenied { .. } => 403,
            RouterError::RateLimit | RouterError::CostLimit | RouterError::AdmissionTimeout => 429,
            RouterError::CircuitOpen { .. } => 503,
            RouterError::Cancelled => 499,
            RouterError::ContextExceeded => 413,
            _ => 502,
        }
    }
}

/// Wire-shape error payload, per spec.md §7: `{code, message, retryable, backoff_ms?, detail?}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&RouterError> for ErrorPayload {
    fn from(e: &RouterError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            retryable: e.retryable(),
            backoff_ms: e.backoff_ms(),
            detail: None,
        }
    }
}
