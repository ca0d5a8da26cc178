//! Audit logging for token endpoint events.
//!
//! Every event is emitted via `tracing::info!` with the whole event as a JSON
//! blob in the `audit` field, so the trail can be extracted by any log
//! aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `token.issued` | A token was signed and returned |
//! | `token.denied` | Identity, role or scope checks failed |
//! | `token.invalid` | The request itself was malformed (form, grant type) |
//! | `token.error` | Signing failed |

use std::net::SocketAddr;

use serde::Serialize;

use super::claims::ScitokenClaims;
use crate::Error;

/// Structured audit event emitted for every token request outcome.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g. `"token.issued"`).
    pub event: &'static str,
    /// Token subject (for `token.issued`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Token issuer (for `token.issued`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// JTI of the issued token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_jti: Option<String>,
    /// Granted scopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Expiry of the issued token (Unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Client address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_addr: Option<SocketAddr>,
    /// Human-readable reason for non-issued events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// Construct a `token.issued` event.
    #[must_use]
    pub fn issued(claims: &ScitokenClaims, client_addr: Option<SocketAddr>) -> Self {
        Self {
            event: "token.issued",
            subject: Some(claims.sub.clone()),
            issuer: Some(claims.iss.clone()),
            token_jti: Some(claims.jti.clone()),
            scope: Some(claims.scope.clone()),
            exp: Some(claims.exp),
            client_addr,
            reason: None,
        }
    }

    /// Construct the event matching a failed request.
    #[must_use]
    pub fn failed(error: &Error, client_addr: Option<SocketAddr>) -> Self {
        let event = match error {
            Error::BadRequest(_) | Error::UnsupportedGrant(_) => "token.invalid",
            e if e.is_request_error() => "token.denied",
            _ => "token.error",
        };
        Self {
            event,
            subject: None,
            issuer: None,
            token_jti: None,
            scope: None,
            exp: None,
            client_addr,
            reason: Some(error.to_string()),
        }
    }
}

/// Emit an audit event via `tracing::info!`.
///
/// ```text
/// INFO scitoken_gateway::token::audit audit={"event":"token.issued","subject":...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "token audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
