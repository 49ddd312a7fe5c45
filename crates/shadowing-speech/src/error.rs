use crate::types::BackendKind;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by speech backends, the cache-backed synthesizer, the batch
/// assembler and the playback sequencer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    /// Missing or invalid settings, raised before any network activity
    #[error(
        "Configuration error: {0}\nSuggestion: Check the credentials and options of the selected backend"
    )]
    Configuration(String),

    /// The request never reached the service, or the connection broke
    #[error("Transport error ({backend} backend): {message}")]
    Transport {
        backend: BackendKind,
        message: String,
    },

    /// The service answered with a non-success application code
    #[error("{backend} backend rejected the request with code {code}: {message}")]
    Application {
        backend: BackendKind,
        code: i64,
        message: String,
    },

    /// Malformed, unparseable or empty response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Streaming call hit its deadline before any audio arrived
    #[error(
        "{backend} synthesis timed out after {after:?} without receiving audio\nSuggestion: Retry, or switch to a different backend"
    )]
    Timeout {
        backend: BackendKind,
        after: Duration,
    },

    /// Rendering engine fault other than an expected interruption
    #[error("Playback error: {0}")]
    Playback(String),
}

impl SynthesisError {
    /// Transport failure that could not reach the service at all.
    pub fn unreachable(backend: BackendKind, target: &str, cause: impl std::fmt::Display) -> Self {
        Self::Transport {
            backend,
            message: format!(
                "could not reach {target}: {cause}\nSuggestion: Check your network connection, or set a proxy_url if direct requests are blocked"
            ),
        }
    }

    pub fn transport(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Transport {
            backend,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Backend the error originated from, when known.
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            Self::Transport { backend, .. }
            | Self::Application { backend, .. }
            | Self::Timeout { backend, .. } => Some(*backend),
            _ => None,
        }
    }
}

/// Result type for speech operations
pub type SynthesisResult<T> = Result<T, SynthesisError>;
