//! Classified errors for the l2bridge driver.
//!
//! Every error the driver returns carries an [`ErrorKind`] that tells the
//! caller how to treat the failure. Callers dispatch on [`DriverError::kind`]
//! instead of matching on individual variants.

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`DriverError`].
pub type DriverResult<T> = Result<T, DriverError>;

/// Caller-visible classification of a driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing request data.
    BadRequest,
    /// The request is well formed but not allowed in the current state.
    Forbidden,
    /// A referenced network or endpoint does not exist.
    NotFound,
    /// An internal condition the caller may safely ignore.
    Maskable,
    /// A transient failure; the caller may retry.
    Retry,
    /// A required service is not available.
    NoService,
    /// The operation is not supported by this driver.
    NotImplemented,
    /// The operation did not complete in time.
    Timeout,
    /// An unexpected failure inside the driver or the kernel.
    Internal,
}

impl ErrorKind {
    /// Name used when logging the classification.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequestError",
            Self::Forbidden => "ForbiddenError",
            Self::NotFound => "NotFoundError",
            Self::Maskable => "MaskableError",
            Self::Retry => "RetryError",
            Self::NoService => "NoServiceError",
            Self::NotImplemented => "NotImplementedError",
            Self::Timeout => "TimeoutError",
            Self::Internal => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the l2bridge driver.
#[derive(Error, Diagnostic, Debug)]
pub enum DriverError {
    /// Malformed request.
    #[error("{message}")]
    #[diagnostic(code(l2bridge::bad_request))]
    BadRequest {
        /// The error message.
        message: String,
    },

    /// Request not allowed.
    #[error("{message}")]
    #[diagnostic(code(l2bridge::forbidden))]
    Forbidden {
        /// The error message.
        message: String,
    },

    /// Unknown network or endpoint.
    #[error("{message}")]
    #[diagnostic(code(l2bridge::not_found))]
    NotFound {
        /// The error message.
        message: String,
    },

    /// Internal condition that callers may ignore.
    #[error("{message}")]
    #[diagnostic(code(l2bridge::maskable))]
    Maskable {
        /// The error message.
        message: String,
    },

    /// Transient failure.
    #[error("{message}")]
    #[diagnostic(code(l2bridge::retry))]
    Retry {
        /// The error message.
        message: String,
    },

    /// Missing service.
    #[error("{message}")]
    #[diagnostic(code(l2bridge::no_service))]
    NoService {
        /// The error message.
        message: String,
    },

    /// Unsupported operation.
    #[error("{message}")]
    #[diagnostic(code(l2bridge::not_implemented))]
    NotImplemented {
        /// The error message.
        message: String,
    },

    /// Operation timed out.
    #[error("{message}")]
    #[diagnostic(code(l2bridge::timeout))]
    Timeout {
        /// The error message.
        message: String,
    },

    /// Internal error.
    #[error("{message}")]
    #[diagnostic(
        code(l2bridge::internal),
        help("This is most likely a driver bug or an unexpected kernel state")
    )]
    Internal {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(l2bridge::io))]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Maskable { .. } => ErrorKind::Maskable,
            Self::Retry { .. } => ErrorKind::Retry,
            Self::NoService { .. } => ErrorKind::NoService,
            Self::NotImplemented { .. } => ErrorKind::NotImplemented,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Internal { .. } | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Build a [`DriverError::BadRequest`].
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Build a [`DriverError::Forbidden`].
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Build a [`DriverError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Build a [`DriverError::Maskable`].
    pub fn maskable(message: impl Into<String>) -> Self {
        Self::Maskable {
            message: message.into(),
        }
    }

    /// Build a [`DriverError::NotImplemented`].
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    /// Build a [`DriverError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The default gateway lies outside the network's pool.
    #[must_use]
    pub fn invalid_gateway() -> Self {
        Self::bad_request("default gateway ip must be part of the network")
    }

    /// A negative MTU was requested.
    #[must_use]
    pub fn invalid_mtu(mtu: i64) -> Self {
        Self::bad_request(format!("invalid MTU number: {mtu}"))
    }

    /// Endpoint options could not be understood.
    #[must_use]
    pub fn invalid_endpoint_config() -> Self {
        Self::bad_request("trying to create an endpoint with an invalid endpoint configuration")
    }

    /// Exposed port metadata could not be decoded.
    #[must_use]
    pub fn invalid_transport_ports() -> Self {
        Self::bad_request("specified transport ports could not be decoded")
    }

    /// An empty or malformed endpoint id.
    pub fn invalid_endpoint_id(id: impl fmt::Display) -> Self {
        Self::bad_request(format!("invalid endpoint id: {id}"))
    }

    /// No endpoint with the given id.
    pub fn endpoint_not_found(id: impl fmt::Display) -> Self {
        Self::not_found(format!("endpoint not found: {id}"))
    }

    /// An endpoint with the given id is already attached.
    pub fn endpoint_exists(id: impl fmt::Display) -> Self {
        Self::forbidden(format!("endpoint ({id}) already exists"))
    }

    /// The registry returned a network whose id differs from the key.
    pub fn invalid_network_id(id: impl fmt::Display) -> Self {
        Self::internal(format!("invalid network id {id}"))
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("malformed request: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DriverError::endpoint_not_found("abc123");
        assert_eq!(err.to_string(), "endpoint not found: abc123");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_error_from_io_is_internal() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DriverError = io_err.into();
        assert!(matches!(err, DriverError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_from_json_is_bad_request() {
        let err: DriverError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_helper_classifications() {
        assert_eq!(DriverError::invalid_gateway().kind(), ErrorKind::BadRequest);
        assert_eq!(DriverError::invalid_mtu(-1).kind(), ErrorKind::BadRequest);
        assert_eq!(DriverError::endpoint_exists("ep").kind(), ErrorKind::Forbidden);
        assert_eq!(DriverError::invalid_network_id("n").kind(), ErrorKind::Internal);
        assert_eq!(DriverError::invalid_mtu(-5).to_string(), "invalid MTU number: -5");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::Maskable.to_string(), "MaskableError");
        assert_eq!(ErrorKind::NotImplemented.as_str(), "NotImplementedError");
    }
}
