//! Error types and status mapping.
//!
//! FReD surfaces a small, fixed set of error conditions. Each maps to an
//! HTTP-style status code so that the external API surface and the peering
//! acknowledgements can carry the error kind across process boundaries.

use thiserror::Error;

/// Common FReD error conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FredError {
    /// Referenced node, keygroup or item is absent.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Duplicate create of an already-present unique relationship.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Operation requires a seeded self identity (or another missing prerequisite).
    #[error("not ready: {message}")]
    NotReady { message: String },

    /// Peering send or coordination request failed.
    #[error("transport error ({target}): {message}")]
    Transport { target: String, message: String },

    /// Malformed vector clock bytes, wire frame or membership record.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Invalid name, identifier or address.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl FredError {
    /// Create a NotFound error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a NotReady error.
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady {
            message: message.into(),
        }
    }

    /// Create a Transport error for the given target (usually `host:port`).
    pub fn transport(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a Decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an InvalidArgument error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is a NotFound.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is a Conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if this error is a NotReady.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }

    /// Check if this error is a Transport error.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Check if the failed operation may succeed when retried by the caller.
    ///
    /// The core never retries on its own.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::NotReady { .. })
    }

    /// HTTP-style status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::NotReady { .. } => 503,
            Self::Transport { .. } => 502,
            Self::Decode { .. } => 400,
            Self::InvalidArgument { .. } => 400,
            Self::Internal { .. } => 500,
        }
    }

    /// Rebuild an error from a status code reported by a remote node.
    ///
    /// Used when a peer acknowledges a request with a failure. Codes that
    /// do not name a client-visible kind collapse into `Internal`.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            404 => Self::NotFound { message },
            409 => Self::Conflict { message },
            503 => Self::NotReady { message },
            400 => Self::InvalidArgument { message },
            _ => Self::Internal { message },
        }
    }
}

/// Result type using FredError.
pub type FredResult<T> = Result<T, FredError>;
