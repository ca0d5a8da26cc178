//! Mutual TLS: listener configuration, client chain verification, and
//! certificate to identity resolution.
//!
//! # Architecture
//!
//! ```text
//! TCP connection
//!   → TLS handshake  (ChainVerifier runs verify_chain on the client chain)
//!   → peer certificates captured by the server loop
//!   → injected into request extensions
//!   → token handler calls identity::resolve against the directory
//! ```
//!
//! # Modules
//!
//! - [`config`]: YAML configuration types (`TlsConfig`, `TlsVersion`)
//! - [`verifier`]: chain filtering and verification (`verify_chain`, `ChainVerifier`)
//! - [`identity`]: subject decomposition and directory lookup (`resolve`)
//! - [`cert_manager`]: rustls config building and certificate generation helpers
//!
//! # Quick start
//!
//! ```yaml
//! tls:
//!   server_cert: "/etc/grid-security/hostcert.pem"
//!   server_key:  "/etc/grid-security/hostkey.pem"
//!   root_cas:    "/etc/grid-security/certificates"
//!   require_client_cert: true
//! ```

pub mod cert_manager;
pub mod config;
pub mod identity;
pub mod verifier;

pub use cert_manager::{
    CaParams, CertGenerator, GeneratedCert, LeafCertParams, LeafUsage, build_tls_config,
    load_certs, load_private_key, load_root_dir,
};
pub use config::{TlsConfig, TlsVersion};
pub use identity::{ResolvedIdentity, resolve};
pub use verifier::{ChainVerifier, TrustedRoots, VerifiedChain, verify_chain};
