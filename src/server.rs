//! Token server: mutual-TLS listener, router and lifecycle.
//!
//! Connections are accepted by hand so the client certificate chain of each
//! TLS session can be attached to every request served on it:
//!
//! ```text
//! TcpListener::accept
//!   → TlsAcceptor::accept (ChainVerifier runs here, bounded by read_timeout)
//!   → peer certificates → TlsConnectionInfo → request extension
//!   → hyper-util auto (HTTP/1.1 + HTTP/2) → axum Router
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Router, http::StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::CertificateDer;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ServerConfig};
use crate::directory::DirectoryCache;
use crate::mtls::build_tls_config;
use crate::token::TokenIssuer;
use crate::token::handler::{AppState, ServerSettings, routes};
use crate::{Error, Result};

/// Per-connection TLS facts, attached to every request of the connection.
#[derive(Debug, Clone)]
pub struct TlsConnectionInfo {
    /// Remote address
    pub peer_addr: SocketAddr,
    /// Client certificate chain as presented (leaf first); empty when the
    /// client sent none
    pub certificates: Arc<Vec<CertificateDer<'static>>>,
}

/// SciToken gateway server
pub struct TokenServer {
    config: Config,
    state: AppState,
    tls: Arc<rustls::ServerConfig>,
}

impl TokenServer {
    /// Build the TLS config, directory cache and token issuer.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS material, the signing key or the directory
    /// client cannot be loaded.
    pub fn new(config: Config) -> Result<Self> {
        let tls = Arc::new(build_tls_config(&config.tls)?);
        let directory = Arc::new(DirectoryCache::from_config(&config.directory)?);
        let issuer = Arc::new(TokenIssuer::from_config(&config.scitokens)?);
        let settings = Arc::new(ServerSettings::from_config(&config, issuer.key().is_ephemeral()));

        Ok(Self {
            config,
            state: AppState {
                directory,
                issuer,
                settings,
            },
            tls,
        })
    }

    /// Shared handler state.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run until Ctrl-C / SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address is invalid or cannot be bound.
    pub async fn run(self) -> Result<()> {
        let server = &self.config.server;
        let addr = SocketAddr::new(
            server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            server.port,
        );
        let listener = TcpListener::bind(addr).await?;

        let (shutdown_tx, _) = broadcast::channel(4);
        let refresh = self
            .state
            .directory
            .spawn_refresh_loop(self.config.directory.effective_interval(), shutdown_tx.subscribe());
        tokio::spawn(shutdown_signal(shutdown_tx.clone()));

        info!("============================================================");
        info!(addr = %addr, base = %server.base, "SciToken gateway listening (mTLS)");
        info!(
            lifetime_minutes = self.config.scitokens.lifetime,
            kid = %self.state.issuer.key().key_id(),
            ephemeral_key = self.state.issuer.key().is_ephemeral(),
            "Token issuer ready"
        );
        info!("============================================================");

        let app = router(self.state.clone(), server);
        serve(
            listener,
            Arc::clone(&self.tls),
            app,
            server.read_timeout,
            shutdown_tx.subscribe(),
        )
        .await?;

        if tokio::time::timeout(server.shutdown_timeout, refresh).await.is_err() {
            warn!("Directory refresh task did not stop within shutdown_timeout");
        }
        info!("Shutdown complete");
        Ok(())
    }
}

/// Token routes with the HTTP middleware stack.
pub fn router(state: AppState, server: &ServerConfig) -> Router {
    with_middleware(routes(state), server)
}

/// Requests running past `write_timeout` are answered with `408`.
fn with_middleware(app: Router, server: &ServerConfig) -> Router {
    app.layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        server.write_timeout,
    ))
    .layer(CatchPanicLayer::new())
    .layer(PropagateRequestIdLayer::x_request_id())
    .layer(TraceLayer::new_for_http())
    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Accept TLS connections on `listener` and serve `app` on each until
/// `shutdown` fires.
///
/// Handshakes that fail verification or exceed `handshake_timeout` are
/// dropped before any handler runs.
///
/// # Errors
///
/// Returns an error if the listener address cannot be read.
pub async fn serve(
    listener: TcpListener,
    tls: Arc<rustls::ServerConfig>,
    app: Router,
    handshake_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let acceptor = TlsAcceptor::from(tls);
    debug!(addr = %listener.local_addr()?, "Accepting TLS connections");

    loop {
        let (tcp, peer_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
            _ = shutdown.recv() => {
                info!("Listener shutting down");
                break;
            }
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let stream = match tokio::time::timeout(handshake_timeout, acceptor.accept(tcp)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!(peer = %peer_addr, error = %e, "TLS handshake failed");
                    return;
                }
                Err(_) => {
                    debug!(peer = %peer_addr, "TLS handshake timed out");
                    return;
                }
            };

            let certificates = stream
                .get_ref()
                .1
                .peer_certificates()
                .map(<[CertificateDer<'static>]>::to_vec)
                .unwrap_or_default();
            debug!(peer = %peer_addr, certificates = certificates.len(), "TLS session established");

            let info = TlsConnectionInfo {
                peer_addr,
                certificates: Arc::new(certificates),
            };
            let service = TowerToHyperService::new(app.layer(Extension(info)));
            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(peer = %peer_addr, error = %e, "Connection closed with error");
            }
        });
    }

    Ok(())
}

/// Wait for Ctrl-C or SIGTERM, then broadcast shutdown.
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
