//! Error types for the HEC ingestion client

/// Unified error type for the client.
///
/// Cancellation is a dedicated variant rather than a wrapped cause so that
/// callers (and the retry engine) can always tell "cancelled" apart from an
/// ordinary transport failure.
#[derive(Debug, thiserror::Error)]
pub enum HecError {
    /// Invalid URL or option combination, surfaced from the constructor.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The client has been shut down; pushes are rejected synchronously.
    #[error("client has been shut down")]
    Shutdown,

    /// Network failure, request timeout, or non-2xx collector response.
    #[error("HEC transport error{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Transport {
        /// HTTP status, when a response was received at all.
        status: Option<u16>,
        message: String,
    },

    /// All retry attempts were exhausted; wraps the last failure.
    #[error("retries exhausted after {attempts} attempts, last error: {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: Box<HecError>,
    },

    /// The cancellation sentinel: the operation was aborted, not failed.
    #[error("aborted")]
    Cancelled,

    /// Bad record shape, e.g. a non-finite metric value.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The gzip encoder failed.
    #[error("compression failed: {0}")]
    Compression(#[source] std::io::Error),
}

// Manual impl: `Compression` carries an `io::Error`, which is rebuilt from
// its kind and message so flush outcomes can be fanned out to every waiter.
impl Clone for HecError {
    fn clone(&self) -> Self {
        match self {
            Self::Config(msg) => Self::Config(msg.clone()),
            Self::Shutdown => Self::Shutdown,
            Self::Transport { status, message } => {
                Self::Transport { status: *status, message: message.clone() }
            }
            Self::RetriesExhausted { attempts, last } => {
                Self::RetriesExhausted { attempts: *attempts, last: last.clone() }
            }
            Self::Cancelled => Self::Cancelled,
            Self::Serialization(msg) => Self::Serialization(msg.clone()),
            Self::Compression(e) => {
                Self::Compression(std::io::Error::new(e.kind(), e.to_string()))
            }
        }
    }
}

impl HecError {
    /// Check whether this is the cancellation sentinel.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check whether this error was caused by pushing after shutdown.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    /// Check whether this error is due to retry exhaustion.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    /// The HTTP status of a transport error, if a response was received.
    ///
    /// For `RetriesExhausted` this looks through to the wrapped last error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport { status: None, message: message.into() }
    }

    pub(crate) fn transport_status(status: u16) -> Self {
        Self::Transport { status: Some(status), message: format!("HEC responded with status {status}") }
    }
}

impl From<reqwest::Error> for HecError {
    fn from(e: reqwest::Error) -> Self {
        HecError::Transport {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}
