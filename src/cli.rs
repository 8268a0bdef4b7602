//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Short-lived SSH certificate signer
#[derive(Parser, Debug)]
#[command(name = "cert-signer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CERT_SIGNER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CERT_SIGNER_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "CERT_SIGNER_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CERT_SIGNER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CERT_SIGNER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the signing server (default)
    Serve,

    /// Load and validate the configuration and token file, then exit
    CheckConfig,
}
