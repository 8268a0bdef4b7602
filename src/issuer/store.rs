//! Token store — read access to the bearer-token policy file.
//!
//! The [`TokenSource`] trait abstracts over how the token map is obtained.
//! [`FileTokenStore`] re-reads the JSON file on every call so that revoking a
//! token takes effect on the very next request. [`CachedTokenStore`] wraps any
//! source with a short-lived snapshot for deployments where a read per request
//! is too expensive.
//!
//! # Failure policy
//!
//! Loading never fails. A missing file means "no valid tokens"; an unreadable
//! or malformed file is logged and also yields an empty map. A half-parsed
//! file is never used.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use cert_policy::{TokenEntry, TokenMap};
use parking_lot::RwLock;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{debug, error};

/// Trait abstracting the token map backend.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// request tasks.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// Load the current token map. Never fails; returns an empty map when
    /// the backing data is absent or invalid.
    async fn load(&self) -> Arc<TokenMap>;
}

/// On-disk layout: `{"tokens": {"<bearer>": {...}}}`.
#[derive(Debug, Deserialize)]
struct TokenFile {
    #[serde(default)]
    tokens: TokenMap,
}

/// Token store backed by a JSON file, read fresh on each load.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Create a store reading from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the file, surfacing every failure.
    ///
    /// Used by `check-config`; request handling goes through
    /// [`TokenSource::load`].
    pub async fn read(&self) -> crate::Result<TokenMap> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(Self::parse(&bytes)?)
    }

    /// Parse the file contents. All or nothing.
    fn parse(bytes: &[u8]) -> Result<TokenMap, serde_json::Error> {
        serde_json::from_slice::<TokenFile>(bytes).map(|file| file.tokens)
    }
}

#[async_trait::async_trait]
impl TokenSource for FileTokenStore {
    async fn load(&self) -> Arc<TokenMap> {
        match self.read().await {
            Ok(tokens) => {
                debug!(count = tokens.len(), "Loaded token file");
                Arc::new(tokens)
            }
            Err(crate::Error::Io(e)) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Token file not found, no tokens are valid");
                Arc::default()
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to load token file");
                Arc::default()
            }
        }
    }
}

/// A loaded map and when it was loaded.
struct Snapshot {
    loaded_at: Instant,
    tokens: Arc<TokenMap>,
}

/// Short-lived snapshot cache in front of another [`TokenSource`].
///
/// A snapshot older than `ttl` is reloaded. [`invalidate`](Self::invalidate)
/// drops it immediately; a load that was already in flight when the cache
/// was invalidated is returned to its caller but not stored.
pub struct CachedTokenStore {
    inner: Arc<dyn TokenSource>,
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,
    generation: AtomicU64,
}

impl CachedTokenStore {
    /// Wrap `inner`, keeping snapshots for `ttl`.
    #[must_use]
    pub fn new(inner: Arc<dyn TokenSource>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            snapshot: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Drop the current snapshot so the next load hits the backing source.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.snapshot.write() = None;
        debug!("Token cache invalidated");
    }

    fn fresh_snapshot(&self) -> Option<Arc<TokenMap>> {
        let guard = self.snapshot.read();
        guard
            .as_ref()
            .filter(|s| s.loaded_at.elapsed() < self.ttl)
            .map(|s| Arc::clone(&s.tokens))
    }
}

#[async_trait::async_trait]
impl TokenSource for CachedTokenStore {
    async fn load(&self) -> Arc<TokenMap> {
        if let Some(tokens) = self.fresh_snapshot() {
            return tokens;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let tokens = self.inner.load().await;

        let mut guard = self.snapshot.write();
        if self.generation.load(Ordering::SeqCst) == generation {
            *guard = Some(Snapshot {
                loaded_at: Instant::now(),
                tokens: Arc::clone(&tokens),
            });
        }
        tokens
    }
}

/// Find the entry for `bearer`, comparing every stored key in constant time.
#[must_use]
pub fn find_entry<'a>(tokens: &'a TokenMap, bearer: &str) -> Option<&'a TokenEntry> {
    let mut found = None;
    for (key, entry) in tokens {
        if bool::from(key.as_bytes().ct_eq(bearer.as_bytes())) {
            found = Some(entry);
        }
    }
    found
}
