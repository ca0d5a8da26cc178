//! TLS configuration types.
//!
//! # Example YAML
//!
//! ```yaml
//! tls:
//!   server_cert: "/etc/grid-security/hostcert.pem"
//!   server_key:  "/etc/grid-security/hostkey.pem"
//!   root_cas:    "/etc/grid-security/certificates"
//!   min_version: tls12
//!   max_version: tls13
//!   require_client_cert: true
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

/// TLS listener configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to the PEM-encoded server certificate file.
    pub server_cert: String,

    /// Path to the PEM-encoded server private key file.
    pub server_key: String,

    /// Directory of PEM CA files trusted for client certificates.
    ///
    /// Every regular file is read; files without a PEM certificate are
    /// skipped (grid CA directories also hold CRLs, namespaces and signing
    /// policies).
    pub root_cas: String,

    /// Lowest protocol version offered.
    pub min_version: TlsVersion,

    /// Highest protocol version offered.
    pub max_version: TlsVersion,

    /// When `true`, connections without a client certificate fail the
    /// handshake. When `false`, they reach the token endpoint and are
    /// refused there with a `NoCredentials` error.
    pub require_client_cert: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            server_cert: String::new(),
            server_key: String::new(),
            root_cas: String::new(),
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            require_client_cert: true,
        }
    }
}

impl TlsConfig {
    /// Protocol versions to enable, clamped to what rustls implements.
    #[must_use]
    pub fn protocol_versions(&self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        let min = self.min_version.clamped();
        let max = self.max_version.clamped();
        if max < min {
            warn!(?min, ?max, "tls.max_version below tls.min_version, using min_version only");
            return vec![min.rustls_version()];
        }
        [TlsVersion::Tls12, TlsVersion::Tls13]
            .into_iter()
            .filter(|v| *v >= min && *v <= max)
            .map(TlsVersion::rustls_version)
            .collect()
    }
}

/// TLS protocol version names as used in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsVersion {
    /// TLS 1.0 (not implemented by rustls, clamped to 1.2)
    Tls10,
    /// TLS 1.1 (not implemented by rustls, clamped to 1.2)
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    fn clamped(self) -> Self {
        match self {
            Self::Tls10 | Self::Tls11 => {
                warn!(requested = ?self, "TLS versions below 1.2 are unsupported, using tls12");
                Self::Tls12
            }
            other => other,
        }
    }

    fn rustls_version(self) -> &'static rustls::SupportedProtocolVersion {
        match self {
            Self::Tls13 => &rustls::version::TLS13,
            _ => &rustls::version::TLS12,
        }
    }
}
