//! Token file watcher
//!
//! When the token cache is enabled, watches the token file's directory and
//! invalidates the cache whenever the file is created, modified or removed.
//! The directory is watched rather than the file so atomic replace-by-rename
//! is seen too.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::store::CachedTokenStore;
use crate::{Error, Result};

/// Keeps the underlying watcher alive; dropping it stops watching.
pub struct TokenFileWatcher {
    _watcher: Mutex<RecommendedWatcher>,
}

impl TokenFileWatcher {
    /// Start watching `token_file`, invalidating `cache` on every change.
    pub fn start(token_file: &Path, cache: Arc<CachedTokenStore>) -> Result<Self> {
        let dir = token_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name: Option<OsString> = token_file.file_name().map(OsString::from);

        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let is_relevant = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) && event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(OsString::from) == file_name);

                    if is_relevant {
                        debug!(paths = ?event.paths, kind = ?event.kind, "Token file change");
                        cache.invalidate();
                    }
                }
                Err(e) => {
                    error!(error = %e, "Token file watcher error");
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| Error::Internal(format!("Failed to create file watcher: {e}")))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Internal(format!("Failed to watch {}: {e}", dir.display())))?;
        info!(directory = %dir.display(), "Watching token file for changes");

        Ok(Self {
            _watcher: Mutex::new(watcher),
        })
    }
}
