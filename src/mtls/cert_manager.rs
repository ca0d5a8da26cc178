//! Certificate management: loading, rustls config building, and CLI helpers.
//!
//! Provides:
//! - [`build_tls_config`]: build a `rustls::ServerConfig` from [`TlsConfig`]
//! - [`load_certs`] / [`load_private_key`] / [`load_root_dir`]: PEM loading
//! - [`CertGenerator`]: `rcgen`-backed cert generation for the
//!   `scitoken-gateway tls` commands and for tests
//!
//! All certificate and key files are expected in **PEM format**.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    Ia5String, IsCa, KeyPair, SanType, date_time_ymd,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{RootCertStore, ServerConfig};
use tracing::{debug, info};

use crate::mtls::config::TlsConfig;
use crate::mtls::verifier::{ChainVerifier, TrustedRoots};
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Public: build TLS server config
// ─────────────────────────────────────────────────────────────────────────────

/// Build a `rustls::ServerConfig` whose client certificates are checked by
/// [`ChainVerifier`] against the CA directory in `config.root_cas`.
///
/// # Errors
///
/// Returns an error if any certificate or key file cannot be read or parsed,
/// the CA directory holds no usable certificate, or the rustls config cannot
/// be built (e.g. mismatched cert/key pair).
pub fn build_tls_config(config: &TlsConfig) -> Result<ServerConfig> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let server_certs = load_certs(&config.server_cert)?;
    let server_key = load_private_key(&config.server_key)?;
    let root_store = load_root_dir(&config.root_cas)?;

    let roots = TrustedRoots::new(root_store, Arc::clone(&provider))?;
    let verifier = ChainVerifier::new(roots, config.require_client_cert);

    let mut tls_cfg = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&config.protocol_versions())
        .map_err(|e| Error::Config(format!("Unsupported TLS protocol versions: {e}")))?
        .with_client_cert_verifier(Arc::new(verifier))
        .with_single_cert(server_certs, server_key)
        .map_err(|e| Error::Config(format!("TLS config error (cert/key mismatch?): {e}")))?;

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(
        server_cert = %config.server_cert,
        root_cas = %config.root_cas,
        require_client_cert = config.require_client_cert,
        "TLS config built"
    );

    Ok(tls_cfg)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs = parse_pem_certs(&pem_data)
        .map_err(|e| Error::Config(format!("Failed to parse certs from '{path}': {e}")))?;

    if certs.is_empty() {
        return Err(Error::Config(format!("No certificates found in '{path}'")));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// Supports RSA (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`), and EC keys.
///
/// # Errors
///
/// Returns an error if the file cannot be read, contains no private key, or
/// the key format is unsupported.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    let key = rustls_pemfile::private_key(&mut pem_data.as_slice())
        .map_err(|e| Error::Config(format!("Failed to parse private key from '{path}': {e}")))?
        .ok_or_else(|| Error::Config(format!("No private key found in '{path}'")))?;

    Ok(key)
}

/// Build a root store from every PEM certificate found in `dir`.
///
/// Unreadable files and files without certificates are skipped, since grid
/// CA directories mix certificates with CRLs and policy files.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed or yields no
/// certificate at all.
pub fn load_root_dir(dir: &str) -> Result<RootCertStore> {
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::Config(format!("Unable to list files in '{dir}': {e}")))?;

    let mut store = RootCertStore::empty();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(pem_data) = fs::read(&path) else {
            debug!(file = %path.display(), "Unable to read CA file");
            continue;
        };
        let Ok(certs) = parse_pem_certs(&pem_data) else {
            debug!(file = %path.display(), "Invalid PEM format while importing trust chain");
            continue;
        };
        for cert in certs {
            if let Err(e) = store.add(cert) {
                debug!(file = %path.display(), error = %e, "Skipping CA certificate");
            }
        }
    }

    if store.is_empty() {
        return Err(Error::Config(format!("No CA certificates found in '{dir}'")));
    }
    info!(dir = %dir, roots = store.len(), "Loaded client CA roots");
    Ok(store)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: certificate generation (CLI helpers)
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for generating a CA certificate.
#[derive(Debug)]
pub struct CaParams<'a> {
    /// Common Name for the root CA (e.g. `"Test Grid CA"`).
    pub cn: &'a str,
    /// Organisation (optional).
    pub organization: Option<&'a str>,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Intended use of a leaf certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafUsage {
    /// TLS server (host certificate)
    Server,
    /// TLS client (user certificate)
    Client,
}

/// Parameters for generating a leaf certificate (server or client).
#[derive(Debug)]
pub struct LeafCertParams<'a> {
    /// Common Name.
    pub cn: &'a str,
    /// Organisation (optional).
    pub organization: Option<&'a str>,
    /// Organisational Unit (optional).
    pub ou: Option<&'a str>,
    /// Subject Alternative Names: DNS entries.
    pub san_dns: Vec<String>,
    /// Subject Alternative Names: e-mail entries.
    pub emails: Vec<String>,
    /// Extended key usage.
    pub usage: LeafUsage,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Generated certificate and key pair in PEM format.
#[derive(Debug)]
pub struct GeneratedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

impl GeneratedCert {
    /// DER form of the certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if `cert_pem` holds no certificate.
    pub fn cert_der(&self) -> Result<CertificateDer<'static>> {
        parse_pem_certs(self.cert_pem.as_bytes())
            .ok()
            .and_then(|certs| certs.into_iter().next())
            .ok_or_else(|| Error::Config("Generated PEM holds no certificate".to_string()))
    }
}

/// Certificate generator backed by `rcgen`.
pub struct CertGenerator;

impl CertGenerator {
    /// Generate a self-signed CA certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or certificate serialisation fails.
    pub fn init_ca(params: &CaParams<'_>) -> Result<GeneratedCert> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::Config(format!("Failed to generate CA key: {e}")))?;

        let mut ca_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        if let Some(o) = params.organization {
            dn.push(DnType::OrganizationName, o);
        }
        dn.push(DnType::CommonName, params.cn);
        ca_params.distinguished_name = dn;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.not_after = validity_to_date(params.validity_days)?;

        let ca_cert = ca_params
            .self_signed(&key_pair)
            .map_err(|e| Error::Config(format!("CA cert generation failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: ca_cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// Issue a leaf certificate signed by `ca_cert_pem` / `ca_key_pem`.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA cert/key cannot be parsed, key generation
    /// fails, or certificate serialisation fails.
    pub fn issue_leaf(
        params: &LeafCertParams<'_>,
        ca_cert_pem: &str,
        ca_key_pem: &str,
    ) -> Result<GeneratedCert> {
        let ca_key = KeyPair::from_pem(ca_key_pem)
            .map_err(|e| Error::Config(format!("Failed to parse CA key: {e}")))?;

        let ca_cert_params = CertificateParams::from_ca_cert_pem(ca_cert_pem)
            .map_err(|e| Error::Config(format!("Failed to parse CA cert: {e}")))?;
        let ca_cert = ca_cert_params
            .self_signed(&ca_key)
            .map_err(|e| Error::Config(format!("Failed to rebuild CA cert for signing: {e}")))?;

        let leaf_key = KeyPair::generate()
            .map_err(|e| Error::Config(format!("Failed to generate leaf key: {e}")))?;

        let mut leaf_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        if let Some(o) = params.organization {
            dn.push(DnType::OrganizationName, o);
        }
        if let Some(ou) = params.ou {
            dn.push(DnType::OrganizationalUnitName, ou);
        }
        dn.push(DnType::CommonName, params.cn);
        leaf_params.distinguished_name = dn;
        leaf_params.not_after = validity_to_date(params.validity_days)?;
        leaf_params.extended_key_usages = vec![match params.usage {
            LeafUsage::Server => ExtendedKeyUsagePurpose::ServerAuth,
            LeafUsage::Client => ExtendedKeyUsagePurpose::ClientAuth,
        }];

        let mut sans: Vec<SanType> = Vec::new();
        for dns in &params.san_dns {
            let ia5 = Ia5String::try_from(dns.as_str())
                .map_err(|e| Error::Config(format!("Invalid DNS SAN '{dns}': {e}")))?;
            sans.push(SanType::DnsName(ia5));
        }
        for email in &params.emails {
            let ia5 = Ia5String::try_from(email.as_str())
                .map_err(|e| Error::Config(format!("Invalid e-mail SAN '{email}': {e}")))?;
            sans.push(SanType::Rfc822Name(ia5));
        }
        leaf_params.subject_alt_names = sans;

        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &ca_cert, &ca_key)
            .map_err(|e| Error::Config(format!("Leaf cert signing failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: leaf_cert.pem(),
            key_pem: leaf_key.serialize_pem(),
        })
    }

    /// Write a [`GeneratedCert`] to disk as `<stem>.crt` and `<stem>.key`
    /// under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the files
    /// cannot be written.
    pub fn write_to_dir(cert: &GeneratedCert, dir: &Path, stem: &str) -> Result<()> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Config(format!("Cannot create dir '{}': {e}", dir.display())))?;

        fs::write(dir.join(format!("{stem}.crt")), &cert.cert_pem)
            .map_err(|e| Error::Config(format!("Cannot write cert: {e}")))?;

        fs::write(dir.join(format!("{stem}.key")), &cert.key_pem)
            .map_err(|e| Error::Config(format!("Cannot write key: {e}")))?;

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Config(format!("Cannot read '{path}': {e}")))
}

fn parse_pem_certs(pem_data: &[u8]) -> std::io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut &*pem_data).collect()
}

/// Convert a validity period (days) into a future date for `rcgen`.
fn validity_to_date(days: u32) -> Result<time::OffsetDateTime> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Config(format!("System time error: {e}")))?
        .as_secs();

    let future_secs = now_secs.saturating_add(u64::from(days) * 86_400);

    let dt = time::OffsetDateTime::from_unix_timestamp(
        i64::try_from(future_secs).unwrap_or(i64::MAX),
    )
    .map_err(|e| Error::Config(format!("Date calculation error: {e}")))?;

    Ok(date_time_ymd(dt.year(), dt.month() as u8, dt.day()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
