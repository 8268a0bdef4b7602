//! Certificate issuer — bearer token to short-lived SSH certificate.
//!
//! 1. **Authorization**: the bearer token is looked up in a freshly loaded
//!    token map ([`store`]). Unknown tokens and tokens with `active: false`
//!    are refused; a missing `active` field means active.
//!
//! 2. **Policy**: the requested principal and TTL are checked against the
//!    token entry by [`cert_policy::validate`].
//!
//! 3. **Signing**: the public key is staged in a private temporary directory
//!    and signed by the CA program ([`signer`]); the directory is removed
//!    before the response is sent.
//!
//! 4. **Audit**: every outcome is emitted as a structured event ([`audit`]).
//!
//! # Architecture
//!
//! ```text
//! Request arrives
//!   -> Extract bearer token                      -- 401 if absent/malformed
//!   -> Issuer::authorize (TokenSource::load)     -- 403 if unknown/inactive
//!   -> Issuer::validate  (principal, ttl caps)   -- 403 / 400
//!   -> Issuer::sign      (CertSigner)            -- 500 on failure
//!   -> 200 {"cert": ...}
//! ```

pub mod audit;
pub mod handler;
pub mod signer;
pub mod store;
pub mod watcher;

use std::sync::Arc;
use std::time::Duration;

use cert_policy::{PolicyLimits, SignRequest, TokenEntry, ValidatedRequest, validate};
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::{Config, ServerConfig};

pub use audit::{AuditEvent, RequestContext, Stage};
pub use signer::{CertSigner, IssuedCertificate, SshKeygenSigner};
pub use store::{CachedTokenStore, FileTokenStore, TokenSource};
pub use watcher::TokenFileWatcher;

/// The issuer — central coordinator for certificate requests.
///
/// Built once from [`Config`] and shared by all request handlers.
pub struct Issuer {
    /// Token map source (file, optionally cached)
    pub store: Arc<dyn TokenSource>,
    /// CA signing primitive
    pub signer: Arc<dyn CertSigner>,
    /// TTL limits
    pub limits: PolicyLimits,
    /// Honour `X-Forwarded-For` / `X-Real-IP` for audit client addresses
    pub trust_forwarded_for: bool,
    /// Deadline for a whole `/sign-cert` request, signing included
    pub request_timeout: Duration,
    _watcher: Option<TokenFileWatcher>,
}

impl Issuer {
    /// Create an issuer from configuration.
    ///
    /// With `tokens.cache_ttl` above zero the token file is cached and a
    /// watcher invalidates the cache on change. A watcher that cannot be
    /// started is logged; the cache then relies on its TTL alone.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let file_store: Arc<dyn TokenSource> =
            Arc::new(FileTokenStore::new(config.tokens.path.clone()));

        let (store, watcher): (Arc<dyn TokenSource>, Option<TokenFileWatcher>) =
            if config.tokens.cache_ttl.is_zero() {
                (file_store, None)
            } else {
                let cache = Arc::new(CachedTokenStore::new(file_store, config.tokens.cache_ttl));
                let watcher =
                    match TokenFileWatcher::start(&config.tokens.path, Arc::clone(&cache)) {
                        Ok(w) => Some(w),
                        Err(e) => {
                            warn!(error = %e, "Token file watcher unavailable, cache expires by TTL only");
                            None
                        }
                    };
                info!(ttl = ?config.tokens.cache_ttl, "Token cache enabled");
                (cache as Arc<dyn TokenSource>, watcher)
            };

        Self {
            store,
            signer: Arc::new(SshKeygenSigner::new(&config.signer)),
            limits: config.policy.into(),
            trust_forwarded_for: config.server.trust_forwarded_for,
            request_timeout: config.server.request_timeout,
            _watcher: watcher,
        }
    }

    /// Assemble an issuer from explicit parts.
    #[must_use]
    pub fn from_parts(
        store: Arc<dyn TokenSource>,
        signer: Arc<dyn CertSigner>,
        limits: PolicyLimits,
    ) -> Self {
        Self {
            store,
            signer,
            limits,
            trust_forwarded_for: false,
            request_timeout: ServerConfig::default().request_timeout,
            _watcher: None,
        }
    }

    /// Resolve a bearer token to its entry.
    ///
    /// Returns `None` if the token is unknown or explicitly inactive.
    pub async fn authorize(&self, bearer: &str) -> Option<TokenEntry> {
        let tokens = self.store.load().await;
        let entry = store::find_entry(&tokens, bearer)?;
        if !entry.active {
            debug!(token_name = %entry.display_name(), "Inactive token presented");
            return None;
        }
        Some(entry.clone())
    }

    /// Check a request against the token's policy and the service limits.
    pub fn validate(&self, entry: &TokenEntry, request: SignRequest) -> Result<ValidatedRequest> {
        Ok(validate(entry, request, self.limits)?)
    }

    /// Sign a validated request.
    pub async fn sign(&self, request: &ValidatedRequest) -> Result<IssuedCertificate> {
        self.signer.sign(request).await
    }
}
