//! Error types for LDAP object reconciliation.
//!
//! Directory failures are split so that callers can tell a missing entry (`noSuchObject`)
//! apart from every other protocol failure. Nothing in this workspace retries; every error is
//! surfaced once and the caller decides what to do with it.

use thiserror::Error;

/// LDAP result code returned when the target entry does not exist.
pub const NO_SUCH_OBJECT: u32 = 32;

/// Main error type for directory reconciliation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No entry exists for the requested distinguished name
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other directory failure (permissions, malformed request, connectivity)
    #[error("Directory error (code {code:?}): {message}")]
    Directory {
        /// LDAP result code, when the server returned one
        code: Option<u32>,
        /// Error message
        message: String,
    },

    /// Attribute values could not be encoded for storage
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Specialized result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds a directory error from an LDAP result code and diagnostic text.
    ///
    /// Result code 32 is mapped to [`Error::NotFound`].
    #[must_use]
    pub fn from_result_code(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        if code == NO_SUCH_OBJECT {
            Self::NotFound(message)
        } else {
            Self::Directory {
                code: Some(code),
                message,
            }
        }
    }

    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Directory { .. } => "DIRECTORY_ERROR",
            Self::Encoding(_) => "ENCODING_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    /// Returns true if the error means the entry is absent on the server.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::Directory { .. } | Self::Encoding(_) | Self::Config(_)
        )
    }
}

// Conversions from external error types
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}
