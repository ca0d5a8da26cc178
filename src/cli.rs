//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// X.509 to SciToken gateway - mutual TLS in, short-lived bearer tokens out
#[derive(Parser, Debug)]
#[command(name = "scitoken-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SCITOKEN_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "SCITOKEN_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "SCITOKEN_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "SCITOKEN_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SCITOKEN_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the token server (default)
    Serve,

    /// Load and validate the configuration, then exit
    CheckConfig,

    /// Development certificate helpers
    #[command(subcommand)]
    Tls(TlsCommand),
}

/// Certificate subcommands
#[derive(Subcommand, Debug)]
pub enum TlsCommand {
    /// Create a self-signed CA (`<out>/ca.crt`, `<out>/ca.key`)
    InitCa {
        /// Common Name of the CA
        #[arg(long, default_value = "scitoken-gateway dev CA")]
        cn: String,

        /// Organisation
        #[arg(long)]
        org: Option<String>,

        /// Validity in days
        #[arg(long, default_value_t = 3650)]
        days: u32,

        /// Output directory
        #[arg(short, long, default_value = "certs")]
        out: PathBuf,
    },

    /// Issue a server or client certificate signed by the CA
    Issue {
        /// Common Name (host name or person name)
        #[arg(long)]
        cn: String,

        /// Organisation
        #[arg(long)]
        org: Option<String>,

        /// Organisational Unit
        #[arg(long)]
        ou: Option<String>,

        /// DNS Subject Alternative Names (repeatable)
        #[arg(long = "dns")]
        san_dns: Vec<String>,

        /// E-mail Subject Alternative Names (repeatable)
        #[arg(long = "email")]
        emails: Vec<String>,

        /// Issue a client certificate instead of a server certificate
        #[arg(long)]
        client: bool,

        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: u32,

        /// CA certificate
        #[arg(long, default_value = "certs/ca.crt")]
        ca_cert: PathBuf,

        /// CA private key
        #[arg(long, default_value = "certs/ca.key")]
        ca_key: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "certs")]
        out: PathBuf,

        /// File stem for `<stem>.crt` / `<stem>.key` (defaults to `server` or `client`)
        #[arg(long)]
        name: Option<String>,
    },
}
