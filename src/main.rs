//! SciToken gateway - X.509 client certificates in, SciTokens out.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use scitoken_gateway::{
    cli::{Cli, Command, TlsCommand},
    config::Config,
    mtls::{CaParams, CertGenerator, LeafCertParams, LeafUsage},
    server::TokenServer,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Tls(ref cmd)) => run_tls_command(cmd),
        Some(Command::CheckConfig) => check_config(&cli),
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Validate configuration and report the effective settings
fn check_config(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };
    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    match serde_yaml::to_string(&config) {
        Ok(yaml) => {
            println!("{yaml}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to render configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run certificate helper commands
fn run_tls_command(cmd: &TlsCommand) -> ExitCode {
    let result = match cmd {
        TlsCommand::InitCa { cn, org, days, out } => CertGenerator::init_ca(&CaParams {
            cn,
            organization: org.as_deref(),
            validity_days: *days,
        })
        .and_then(|ca| CertGenerator::write_to_dir(&ca, out, "ca"))
        .map(|()| out.join("ca.crt")),

        TlsCommand::Issue {
            cn,
            org,
            ou,
            san_dns,
            emails,
            client,
            days,
            ca_cert,
            ca_key,
            out,
            name,
        } => {
            let stem = name
                .clone()
                .unwrap_or_else(|| if *client { "client" } else { "server" }.to_string());
            let params = LeafCertParams {
                cn,
                organization: org.as_deref(),
                ou: ou.as_deref(),
                san_dns: san_dns.clone(),
                emails: emails.clone(),
                usage: if *client {
                    LeafUsage::Client
                } else {
                    LeafUsage::Server
                },
                validity_days: *days,
            };
            std::fs::read_to_string(ca_cert)
                .and_then(|cert| Ok((cert, std::fs::read_to_string(ca_key)?)))
                .map_err(scitoken_gateway::Error::from)
                .and_then(|(cert, key)| CertGenerator::issue_leaf(&params, &cert, &key))
                .and_then(|leaf| CertGenerator::write_to_dir(&leaf, out, &stem))
                .map(|()| out.join(format!("{stem}.crt")))
        }
    };

    match result {
        Ok(path) => {
            println!("Wrote {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Certificate generation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the token server
async fn run_server(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        directory_file = ?config.directory.file,
        directory_url = ?config.directory.url,
        "Starting SciToken gateway"
    );

    let server = match TokenServer::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
