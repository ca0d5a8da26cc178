//! Directory sources - where a full directory payload is loaded from.
//!
//! The [`DirectoryProvider`] trait abstracts over sources. Two are provided:
//! [`FileProvider`] reads a local JSON dump, [`HttpProvider`] fetches the
//! registry endpoint with an optional client identity.

use std::time::Duration;

use tracing::debug;

use super::record::{IdentityDirectory, KeyMode, parse_directory};
use crate::config::DirectoryConfig;
use crate::{Error, Result};

/// A source of full directory snapshots.
///
/// Implementations must be `Send + Sync` because the provider is owned by the
/// background refresh task.
#[async_trait::async_trait]
pub trait DirectoryProvider: Send + Sync + 'static {
    /// Human-readable location (path or URL) for logs.
    fn name(&self) -> &str;

    /// Load and parse the whole directory.
    async fn load(&self, mode: KeyMode) -> Result<IdentityDirectory>;
}

/// Local JSON file.
#[derive(Debug, Clone)]
pub struct FileProvider {
    path: String,
}

impl FileProvider {
    /// Create a provider reading `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl DirectoryProvider for FileProvider {
    fn name(&self) -> &str {
        &self.path
    }

    async fn load(&self, mode: KeyMode) -> Result<IdentityDirectory> {
        let bytes = tokio::fs::read(&self.path).await?;
        debug!(path = %self.path, bytes = bytes.len(), "Read directory file");
        parse_directory(&bytes, &self.path, mode)
    }
}

/// Remote registry endpoint.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    url: String,
    http: reqwest::Client,
}

impl HttpProvider {
    /// Build a provider for `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client certificate, key or CA file cannot be
    /// read or parsed, or the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        identity: Option<(&str, &str)>,
        ca_file: Option<&str>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("scitoken-gateway/", env!("CARGO_PKG_VERSION")));

        if let Some((cert_path, key_path)) = identity {
            let mut pem = std::fs::read(cert_path)
                .map_err(|e| Error::Config(format!("Cannot read '{cert_path}': {e}")))?;
            pem.push(b'\n');
            pem.extend(
                std::fs::read(key_path)
                    .map_err(|e| Error::Config(format!("Cannot read '{key_path}': {e}")))?,
            );
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| Error::Config(format!("Invalid directory client identity: {e}")))?;
            builder = builder.identity(identity);
        }

        if let Some(path) = ca_file {
            let pem = std::fs::read(path)
                .map_err(|e| Error::Config(format!("Cannot read '{path}': {e}")))?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem)
                .map_err(|e| Error::Config(format!("Invalid CA bundle '{path}': {e}")))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        Ok(Self {
            url: url.into(),
            http: builder.build()?,
        })
    }

    /// Build from the `directory` configuration section, if it names a URL.
    ///
    /// # Errors
    ///
    /// See [`HttpProvider::new`].
    pub fn from_config(config: &DirectoryConfig) -> Result<Option<Self>> {
        let Some(ref url) = config.url else {
            return Ok(None);
        };
        let identity = match (&config.client_cert, &config.client_key) {
            (Some(cert), Some(key)) => Some((cert.as_str(), key.as_str())),
            (None, None) => None,
            _ => {
                return Err(Error::Config(
                    "directory.client_cert and directory.client_key must be set together"
                        .to_string(),
                ));
            }
        };
        Self::new(url.as_str(), config.timeout, identity, config.ca_file.as_deref()).map(Some)
    }
}

#[async_trait::async_trait]
impl DirectoryProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.url
    }

    async fn load(&self, mode: KeyMode) -> Result<IdentityDirectory> {
        let response = self
            .http
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        debug!(url = %self.url, bytes = bytes.len(), "Fetched directory payload");
        parse_directory(&bytes, &self.url, mode)
    }
}
