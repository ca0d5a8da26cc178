//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::directory::KeyMode;
use crate::mtls::TlsConfig;
use crate::{Error, Result};

/// Default directory refresh interval (one hour)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// TLS / client certificate verification
    pub tls: TlsConfig,
    /// Identity directory source and refresh
    pub directory: DirectoryConfig,
    /// Token issuance
    pub scitokens: ScitokensConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // SCITOKEN_GATEWAY_SCITOKENS__LIFETIME=30 etc.
        figment = figment.merge(Env::prefixed("SCITOKEN_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Check cross-field constraints that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.tls.server_cert.is_empty() || self.tls.server_key.is_empty() {
            return Err(Error::Config(
                "tls.server_cert and tls.server_key are required".to_string(),
            ));
        }
        if self.tls.root_cas.is_empty() {
            return Err(Error::Config("tls.root_cas is required".to_string()));
        }
        if let Some(ref raw) = self.directory.url {
            url::Url::parse(raw)
                .map_err(|e| Error::Config(format!("Invalid directory.url '{raw}': {e}")))?;
        }
        if self.directory.file.is_none() && self.directory.url.is_none() {
            tracing::warn!("No directory file or url configured; every token request will fail");
        }
        if self.scitokens.lifetime == 0 {
            return Err(Error::Config("scitokens.lifetime must be > 0".to_string()));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in path-like values
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        for value in [
            &mut self.tls.server_cert,
            &mut self.tls.server_key,
            &mut self.tls.root_cas,
            &mut self.scitokens.issuer_key,
        ] {
            *value = expand_string(&re, value);
        }
        for value in [
            &mut self.directory.file,
            &mut self.directory.url,
            &mut self.directory.client_cert,
            &mut self.directory.client_key,
            &mut self.directory.ca_file,
        ]
        .into_iter()
        .flatten()
        {
            *value = expand_string(&re, value);
        }
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// URL prefix for every route (e.g. `/scitokens`)
    pub base: String,
    /// Budget for the TLS handshake and for reading a request
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Budget for producing a response
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            base: String::new(),
            read_timeout: Duration::from_secs(300),
            write_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Identity directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Local JSON directory dump
    pub file: Option<String>,
    /// Remote directory endpoint
    pub url: Option<String>,
    /// Directory keying mode
    pub key: KeyMode,
    /// Refresh interval (`0s` means the one-hour default)
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Request timeout for remote fetches
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// PEM client certificate presented to the remote endpoint
    pub client_cert: Option<String>,
    /// PEM private key matching `client_cert`
    pub client_key: Option<String>,
    /// Extra PEM CA bundle trusted for the remote endpoint
    pub ca_file: Option<String>,
    /// Record dump level after each refresh (0 none, >0 one, >2 all)
    pub verbose: u8,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            file: None,
            url: None,
            key: KeyMode::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            timeout: Duration::from_secs(60),
            client_cert: None,
            client_key: None,
            ca_file: None,
            verbose: 0,
        }
    }
}

impl DirectoryConfig {
    /// Refresh interval with the zero value mapped to the default.
    #[must_use]
    pub fn effective_interval(&self) -> Duration {
        if self.refresh_interval.is_zero() {
            DEFAULT_REFRESH_INTERVAL
        } else {
            self.refresh_interval
        }
    }
}

/// Token issuance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScitokensConfig {
    /// Serve the token endpoint
    pub enabled: bool,
    /// Token lifetime in minutes
    pub lifetime: u64,
    /// PEM RSA private key; empty means an ephemeral key per process
    pub issuer_key: String,
    /// Issuer used when the client certificate issuer is unavailable
    pub issuer: String,
    /// `kid` header value and JWKS key id
    pub key_id: String,
    /// Log the resolved identity of each request
    pub verbose: bool,
}

impl Default for ScitokensConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lifetime: 60,
            issuer_key: String::new(),
            issuer: "scitoken-gateway".to_string(),
            key_id: "key-rs256".to_string(),
            verbose: false,
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "1h", "100ms")
    ///
    /// Bare integers are read as seconds.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
