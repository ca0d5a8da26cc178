//! HTTP handlers for the token service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `{base}/token` | Mint a SciToken for the TLS client identity |
//! | `GET` | `{base}/server` | Non-secret server settings and directory status |
//! | `GET` | `{base}/.well-known/openid-configuration` | Issuer metadata |
//! | `GET` | `{base}/.well-known/jwks.json` | Public signing key |
//!
//! ## Token request
//!
//! ```text
//! POST /token
//! Content-Type: application/x-www-form-urlencoded
//!
//! grant_type=client_credentials&scopes=read:/store write:/store/user/alice
//! ```
//!
//! Success is `200` with `{"access_token", "token_type": "bearer",
//! "expires_in"}` and `Cache-Control: no-store`; every failure is a JSON
//! `{"error": "..."}` body, `400` for request problems and `500` for signing.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{Extensions, HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{
    TokenIssuer, TokenRequest, TokenResponse,
    audit::{self, AuditEvent},
    claims::CLIENT_CREDENTIALS,
};
use crate::config::Config;
use crate::directory::DirectoryCache;
use crate::mtls::resolve;
use crate::server::TlsConnectionInfo;

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state of the token routes.
#[derive(Clone)]
pub struct AppState {
    /// Identity directory
    pub directory: Arc<DirectoryCache>,
    /// Token minter
    pub issuer: Arc<TokenIssuer>,
    /// Settings exposed on `{base}/server`
    pub settings: Arc<ServerSettings>,
}

/// Non-secret view of the configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSettings {
    /// Route prefix
    pub base: String,
    /// Listening port
    pub port: u16,
    /// Token endpoint enabled
    pub scitokens_enabled: bool,
    /// Token lifetime in minutes
    pub lifetime_minutes: u64,
    /// `kid` of the signing key
    pub key_id: String,
    /// Signing key generated at startup
    pub ephemeral_key: bool,
    /// Directory file source
    pub directory_file: Option<String>,
    /// Directory URL source
    pub directory_url: Option<String>,
    /// Directory refresh interval in seconds
    pub refresh_interval_secs: u64,
    /// Client certificates required at the handshake
    pub require_client_cert: bool,
}

impl ServerSettings {
    /// Collect settings from `config`.
    #[must_use]
    pub fn from_config(config: &Config, ephemeral_key: bool) -> Self {
        Self {
            base: config.server.base.clone(),
            port: config.server.port,
            scitokens_enabled: config.scitokens.enabled,
            lifetime_minutes: config.scitokens.lifetime,
            key_id: config.scitokens.key_id.clone(),
            ephemeral_key,
            directory_file: config.directory.file.clone(),
            directory_url: config.directory.url.clone(),
            refresh_interval_secs: config.directory.effective_interval().as_secs(),
            require_client_cert: config.tls.require_client_cert,
        }
    }

    /// Route path under the configured base, e.g. `/scitokens/token`.
    #[must_use]
    pub fn route(&self, path: &str) -> String {
        format!("{}{path}", self.base.trim_end_matches('/'))
    }
}

// ── Route builder ─────────────────────────────────────────────────────────

/// Build the token service routes under `settings.base`.
///
/// The token endpoint is only mounted when `scitokens_enabled` is set.
pub fn routes(state: AppState) -> Router {
    let settings = Arc::clone(&state.settings);
    let mut router = Router::new()
        .route(&settings.route("/server"), get(server_settings))
        .route(
            &settings.route("/.well-known/openid-configuration"),
            get(openid_configuration),
        )
        .route(&settings.route("/.well-known/jwks.json"), get(jwks));

    if settings.scitokens_enabled {
        router = router.route(&settings.route("/token"), post(token_endpoint));
    } else {
        warn!("scitokens.enabled is false, token endpoint not mounted");
    }

    router.with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST {base}/token` - mint a token for the TLS client identity.
async fn token_endpoint(
    State(state): State<AppState>,
    extensions: Extensions,
    body: Bytes,
) -> Response {
    let connection = extensions.get::<TlsConnectionInfo>();
    let client_addr = connection.map(|c| c.peer_addr);

    let outcome = TokenRequest::from_form(&body).and_then(|request| {
        state.issuer.issue(&request, || {
            let certificates = connection.map_or(&[][..], |c| c.certificates.as_slice());
            resolve(certificates, &state.directory)
        })
    });

    match outcome {
        Ok(minted) => {
            audit::emit(&AuditEvent::issued(&minted.claims, client_addr));
            token_response(&minted.response())
        }
        Err(e) => {
            warn!(error = %e, client = ?client_addr, "Token request rejected");
            audit::emit(&AuditEvent::failed(&e, client_addr));
            error_response(e.status_code(), &e.to_string())
        }
    }
}

/// `GET {base}/server` - settings plus live directory status.
async fn server_settings(State(state): State<AppState>) -> Response {
    let snapshot = state.directory.snapshot();
    let refreshed_at = snapshot
        .refreshed_at
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs());

    Json(json!({
        "settings": state.settings.as_ref(),
        "directory": {
            "records": snapshot.directory.len(),
            "tokens": snapshot.index.len(),
            "source": snapshot.source,
            "refreshed_at": refreshed_at,
            "key": state.directory.key_mode(),
        },
    }))
    .into_response()
}

/// `GET {base}/.well-known/openid-configuration`.
///
/// `issuer` is the configured default issuer, never taken from the request.
/// Endpoint locations follow the `Host` the client reached us on.
async fn openid_configuration(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let location = format!("https://{host}{}", state.settings.route(""));
    let issuer = state.issuer.default_issuer();
    debug!(issuer = %issuer, location = %location, "Serving openid-configuration");

    Json(json!({
        "issuer": issuer,
        "token_endpoint": format!("{location}/token"),
        "jwks_uri": format!("{location}/.well-known/jwks.json"),
        "grant_types_supported": [CLIENT_CREDENTIALS],
        "token_endpoint_auth_methods_supported": ["tls_client_auth"],
        "token_endpoint_auth_signing_alg_values_supported": ["RS256"],
    }))
    .into_response()
}

/// `GET {base}/.well-known/jwks.json`.
async fn jwks(State(state): State<AppState>) -> Response {
    Json(state.issuer.key().jwks()).into_response()
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn token_response(body: &TokenResponse) -> Response {
    (
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(body),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
