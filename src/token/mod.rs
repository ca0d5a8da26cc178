//! SciToken minting.
//!
//! A token request moves through
//! `Received → GrantValidated → IdentityRequired → ScopesComputed → Signed`
//! and leaves through an error at any step:
//!
//! 1. the form body is parsed ([`TokenRequest::from_form`]),
//! 2. `grant_type` must be `client_credentials`,
//! 3. requested scopes are split on whitespace,
//! 4. the caller's identity is resolved from its certificates,
//! 5. its role names are unioned into the scopes (no roles, no token),
//! 6. an empty scope list is refused,
//! 7. claims get a fresh hyphenless UUID as `jti`,
//! 8. `iat = nbf = now`, `exp = now + lifetime`,
//! 9. claims are signed RS256 by the [`SigningKey`].
//!
//! The response's `expires_in` is the absolute expiry, not a duration.

pub mod audit;
pub mod claims;
pub mod handler;
pub mod keys;

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};
use uuid::Uuid;

pub use claims::{ScitokenClaims, TokenRequest, TokenResponse, compute_scopes};
pub use keys::SigningKey;

use crate::config::ScitokensConfig;
use crate::mtls::ResolvedIdentity;
use crate::Result;

/// Token type reported in every successful response.
pub const TOKEN_TYPE: &str = "bearer";

/// A signed token and the claims it carries.
#[derive(Debug, Clone)]
pub struct MintedToken {
    /// Signed claims
    pub claims: ScitokenClaims,
    /// Compact JWT
    pub token: String,
}

impl MintedToken {
    /// Body of the token endpoint response.
    #[must_use]
    pub fn response(&self) -> TokenResponse {
        TokenResponse {
            access_token: self.token.clone(),
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.claims.exp,
        }
    }
}

/// Mints SciTokens for resolved identities.
#[derive(Debug)]
pub struct TokenIssuer {
    key: SigningKey,
    lifetime_secs: i64,
    default_issuer: String,
    verbose: bool,
}

impl TokenIssuer {
    /// Create an issuer signing with `key`.
    #[must_use]
    pub fn new(key: SigningKey, config: &ScitokensConfig) -> Self {
        Self {
            key,
            lifetime_secs: i64::try_from(config.lifetime.saturating_mul(60)).unwrap_or(i64::MAX),
            default_issuer: config.issuer.clone(),
            verbose: config.verbose,
        }
    }

    /// Create an issuer with the key named by the configuration.
    ///
    /// # Errors
    ///
    /// See [`SigningKey::from_config`].
    pub fn from_config(config: &ScitokensConfig) -> Result<Self> {
        Ok(Self::new(SigningKey::from_config(config)?, config))
    }

    /// Signing key (for the JWKS endpoint).
    #[must_use]
    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    /// Token lifetime in seconds.
    #[must_use]
    pub fn lifetime_secs(&self) -> i64 {
        self.lifetime_secs
    }

    /// Configured `iss`, used when the certificate issuer is unavailable and
    /// advertised by the discovery document.
    #[must_use]
    pub fn default_issuer(&self) -> &str {
        &self.default_issuer
    }

    /// Run the whole request flow. `resolve_identity` is only called once
    /// the grant type has been accepted.
    ///
    /// # Errors
    ///
    /// `UnsupportedGrant`, any error of `resolve_identity`,
    /// `NoApplicableRoles`, `NoApplicableScopes` or `Signing`.
    pub fn issue<F>(&self, request: &TokenRequest, resolve_identity: F) -> Result<MintedToken>
    where
        F: FnOnce() -> Result<ResolvedIdentity>,
    {
        request.validate_grant()?;
        let identity = resolve_identity()?;
        if self.verbose {
            info!(identity = ?identity, "Resolved token request identity");
        }
        let scopes = compute_scopes(request.requested_scopes(), &identity.roles)?;
        self.mint(&identity, &scopes)
    }

    /// Sign a token for `identity` with `scopes`, valid from now.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Signing`] when signing fails.
    pub fn mint(&self, identity: &ResolvedIdentity, scopes: &[String]) -> Result<MintedToken> {
        self.mint_at(identity, scopes, unix_now())
    }

    /// Sign a token for `identity` with `scopes`, issued at `now`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Signing`] when signing fails.
    pub fn mint_at(
        &self,
        identity: &ResolvedIdentity,
        scopes: &[String],
        now: i64,
    ) -> Result<MintedToken> {
        let iss = if identity.issuer.is_empty() {
            self.default_issuer.clone()
        } else {
            identity.issuer.clone()
        };
        let claims = ScitokenClaims {
            iss,
            sub: identity.name.clone(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(self.lifetime_secs),
            jti: generate_jti(),
            scope: scopes.join(" "),
        };
        let token = self.key.sign(&claims)?;
        debug!(jti = %claims.jti, sub = %claims.sub, exp = claims.exp, "Signed token");
        Ok(MintedToken { claims, token })
    }
}

/// Random 128-bit token ID in compact (hyphenless) form.
#[must_use]
pub fn generate_jti() -> String {
    Uuid::new_v4().simple().to_string()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
