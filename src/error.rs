//! Error types for the SciToken gateway

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the SciToken gateway
pub type Result<T> = std::result::Result<T, Error>;

/// SciToken gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Neither a directory file nor a directory URL is configured
    #[error("No identity directory source configured (neither file nor url)")]
    SourceUnavailable,

    /// Directory payload could not be parsed
    #[error("Unable to parse identity directory from {source_name}: {reason}")]
    Parse {
        /// File path or URL the payload came from
        source_name: String,
        /// Parser message
        reason: String,
    },

    /// Client certificate chain failed verification during the TLS handshake
    #[error("TLS handshake rejected: {0}")]
    HandshakeRejected(String),

    /// None of the presented certificate subjects matched a directory entry
    #[error("No directory identity matches the presented certificate subjects: {0}")]
    IdentityNotFound(String),

    /// The request carried no client certificate
    #[error("No credentials found in TLS authentication")]
    NoCredentials,

    /// The resolved identity has no roles
    #[error("No applicable roles found")]
    NoApplicableRoles,

    /// Neither requested nor role-derived scopes remain
    #[error("No applicable scopes for this user")]
    NoApplicableScopes,

    /// `grant_type` other than `client_credentials`
    #[error("Incorrect grant_type {0}")]
    UnsupportedGrant(String),

    /// Malformed request body
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Signing key unavailable or signing failed
    #[error("Unable to sign token: {0}")]
    Signing(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a parse error for the given source
    pub fn parse(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// `true` for failures caused by the client's request or credentials.
    #[must_use]
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::IdentityNotFound(_)
                | Self::NoCredentials
                | Self::NoApplicableRoles
                | Self::NoApplicableScopes
                | Self::UnsupportedGrant(_)
                | Self::BadRequest(_)
        )
    }

    /// HTTP status returned to the token endpoint caller
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        if self.is_request_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<Error> for rustls::Error {
    fn from(err: Error) -> Self {
        rustls::Error::General(err.to_string())
    }
}
