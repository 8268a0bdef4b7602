//! Certificate Signer Library
//!
//! Issues short-lived OpenSSH user certificates to holders of bearer tokens.
//!
//! # Features
//!
//! - **Token policy**: each token lists the principals it may request and
//!   its own TTL cap; a global cap applies on top
//! - **Live revocation**: the token file is re-read per request (or cached
//!   with file-watch invalidation)
//! - **Scoped signing**: every signing stages its key in a private temporary
//!   directory that is removed before the response goes out
//! - **Audit trail**: one structured event per request outcome

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod issuer;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
