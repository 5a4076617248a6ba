//! Error types for the OCI control-plane client.

use thiserror::Error;

/// HTTP status the control plane returns when a resource already exists.
pub const CONFLICT_STATUS: u16 = 409;
const NOT_FOUND_STATUS: u16 = 404;

/// Errors raised by [`super::CloudClient`] implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// Raised when the API answers with a non-success status.
    #[error("{operation} failed with status {status} ({code}): {message}")]
    Api {
        /// Operation that was attempted, for example `AttachVolume`.
        operation: String,
        /// HTTP status returned by the service.
        status: u16,
        /// Service error code such as `Conflict` or `NotAuthorizedOrNotFound`.
        code: String,
        /// Message returned by the service.
        message: String,
    },
    /// Raised when the request never produced a response.
    #[error("{operation} request failed: {message}")]
    Transport {
        /// Operation that was attempted.
        operation: String,
        /// Error message from the HTTP client.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode {operation} response: {message}")]
    Decode {
        /// Operation whose response was malformed.
        operation: String,
        /// Decoder error message.
        message: String,
    },
}

impl CloudError {
    /// Returns the HTTP status carried by an API error.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport { .. } | Self::Decode { .. } => None,
        }
    }

    /// Returns `true` when the service reported a resource conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self.status(), Some(CONFLICT_STATUS))
    }

    /// Returns `true` when the service reported that the resource is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(NOT_FOUND_STATUS))
    }

    /// Builds an API error, mostly useful for test doubles.
    #[must_use]
    pub fn api(
        operation: impl Into<String>,
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Api {
            operation: operation.into(),
            status,
            code: code.into(),
            message: message.into(),
        }
    }
}
