//! Certificate Signer - short-lived SSH certificates for bearer-token holders

use std::process::ExitCode;

use cert_policy::TokenMap;
use clap::Parser;
use tracing::{error, info, warn};

use cert_signer::{
    cli::{Cli, Command},
    config::Config,
    issuer::FileTokenStore,
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::CheckConfig) => run_check_config(&config).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> cert_signer::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }
    Ok(config)
}

/// Validate the configuration and the token file, then exit
async fn run_check_config(config: &Config) -> ExitCode {
    let store = FileTokenStore::new(config.tokens.path.clone());
    let tokens = match store.read().await {
        Ok(tokens) => tokens,
        Err(cert_signer::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %store.path().display(), "Token file not found, no tokens are valid");
            TokenMap::new()
        }
        Err(e) => {
            error!(path = %store.path().display(), "Token file invalid: {e}");
            return ExitCode::FAILURE;
        }
    };

    let active = tokens.values().filter(|t| t.active).count();
    for entry in tokens.values() {
        if entry.active && entry.principals.is_empty() {
            warn!(token_name = %entry.display_name(), "Active token allows no principals");
        }
    }

    if !config.signer.ca_key.exists() {
        warn!(path = %config.signer.ca_key.display(), "CA key not found");
    }

    println!("Configuration OK");
    println!("  listen:  {}:{}", config.server.host, config.server.port);
    println!("  tokens:  {} ({} total, {} active)", store.path().display(), tokens.len(), active);
    println!("  signer:  {} -s {}", config.signer.program, config.signer.ca_key.display());
    println!(
        "  policy:  default_ttl={}s global_max_ttl={}s",
        config.policy.default_ttl, config.policy.global_max_ttl
    );
    ExitCode::SUCCESS
}

/// Run the signing server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting certificate signer"
    );

    if let Err(e) = Server::new(config).run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
