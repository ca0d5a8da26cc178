//! Token request, claims and response types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The only grant type the token endpoint accepts.
pub const CLIENT_CREDENTIALS: &str = "client_credentials";

/// Form body of `POST {base}/token`.
#[derive(Debug, Clone, Default)]
pub struct TokenRequest {
    /// OAuth grant type
    pub grant_type: String,
    /// Space-separated requested scopes
    pub scopes: String,
}

impl TokenRequest {
    /// Parse an `application/x-www-form-urlencoded` body. A field sent more
    /// than once takes its first value; unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] if the body is not a valid form.
    pub fn from_form(body: &[u8]) -> Result<Self> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
            .map_err(|e| Error::BadRequest(format!("could not parse http form: {e}")))?;
        let first = |name: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        };
        Ok(Self {
            grant_type: first("grant_type"),
            scopes: first("scopes"),
        })
    }

    /// Reject every grant type except `client_credentials`.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedGrant`] echoing the offending value.
    pub fn validate_grant(&self) -> Result<()> {
        if self.grant_type == CLIENT_CREDENTIALS {
            Ok(())
        } else {
            Err(Error::UnsupportedGrant(self.grant_type.clone()))
        }
    }

    /// Requested scopes, split on whitespace.
    pub fn requested_scopes(&self) -> impl Iterator<Item = &str> {
        self.scopes.split_whitespace()
    }
}

/// Union requested scopes with the role names of the identity.
///
/// Order is requested scopes first, then roles in name order; duplicates are
/// dropped.
///
/// # Errors
///
/// [`Error::NoApplicableRoles`] when `roles` is empty,
/// [`Error::NoApplicableScopes`] when the union is empty.
pub fn compute_scopes<'a>(
    requested: impl IntoIterator<Item = &'a str>,
    roles: &'a BTreeMap<String, Vec<String>>,
) -> Result<Vec<String>> {
    if roles.is_empty() {
        return Err(Error::NoApplicableRoles);
    }

    let mut scopes: Vec<String> = Vec::new();
    for scope in requested.into_iter().chain(roles.keys().map(String::as_str)) {
        if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }

    if scopes.is_empty() {
        return Err(Error::NoApplicableScopes);
    }
    Ok(scopes)
}

/// SciToken JWT payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScitokenClaims {
    /// Issuer
    pub iss: String,
    /// Subject (directory display name)
    pub sub: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Not before (Unix seconds)
    pub nbf: i64,
    /// Expiry (Unix seconds)
    pub exp: i64,
    /// Unique token ID
    pub jti: String,
    /// Space-joined scopes
    pub scope: String,
}

/// Successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed compact JWT
    pub access_token: String,
    /// Always `bearer`
    pub token_type: String,
    /// Absolute expiry as Unix seconds
    pub expires_in: i64,
}
