//! SciToken gateway library
//!
//! Exchanges an X.509 client certificate, presented over mutual TLS, for a
//! short-lived RS256-signed SciToken.
//!
//! # Features
//!
//! - **mTLS**: chain verification that tolerates grid proxy certificates
//!   with unhandled critical extensions
//! - **Identity directory**: periodically refreshed from a file or a
//!   remote endpoint, swapped atomically
//! - **Token endpoint**: OAuth2 `client_credentials` grant, role-derived scopes
//! - **Discovery**: JWKS and OpenID configuration for token validators

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod directory;
pub mod error;
pub mod mtls;
pub mod server;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("tracing: {e}")))
}
