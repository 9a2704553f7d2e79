// SPDX-License-Identifier: Apache-2.0

use crate::config::DEFAULT_SEARCH_BACKEND;
use opscreen_match::{SnapshotError, WatchlistSnapshot};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug)]
pub enum SnapshotLookupError {
    /// Caller named a backend this deployment does not carry.
    UnknownBackend(String),
    /// The snapshot exists in configuration but cannot be opened.
    Unavailable(String),
}

/// Named watchlist snapshots selectable via the request's `search_backend`
/// tag. Snapshots load lazily on first use and are replaced wholesale on
/// refresh; readers always hold an immutable `Arc` handle.
pub struct SnapshotRegistry {
    paths: HashMap<String, PathBuf>,
    loaded: RwLock<HashMap<String, Arc<WatchlistSnapshot>>>,
}

impl SnapshotRegistry {
    #[must_use]
    pub fn new(default_watchlist: Option<PathBuf>) -> Self {
        let mut paths = HashMap::new();
        if let Some(path) = default_watchlist {
            paths.insert(DEFAULT_SEARCH_BACKEND.to_string(), path);
        }
        Self {
            paths,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Test seam: register an already-built snapshot under a backend name.
    pub async fn install(&self, backend: &str, snapshot: WatchlistSnapshot) {
        self.loaded
            .write()
            .await
            .insert(backend.to_string(), Arc::new(snapshot));
    }

    #[must_use]
    pub fn knows(&self, backend: &str) -> bool {
        self.paths.contains_key(backend)
    }

    /// Resolve a read handle, loading from disk on first use.
    pub async fn handle(
        &self,
        backend: Option<&str>,
        include_peps: bool,
    ) -> Result<Arc<WatchlistSnapshot>, SnapshotLookupError> {
        let name = backend.unwrap_or(DEFAULT_SEARCH_BACKEND);
        if let Some(snapshot) = self.loaded.read().await.get(name) {
            return Ok(Arc::clone(snapshot));
        }
        let Some(path) = self.paths.get(name) else {
            return Err(SnapshotLookupError::UnknownBackend(name.to_string()));
        };
        let path = path.clone();
        let loaded = tokio::task::spawn_blocking(move || WatchlistSnapshot::load(&path, include_peps))
            .await
            .map_err(|e| SnapshotLookupError::Unavailable(e.to_string()))?
            .map_err(|SnapshotError(msg)| SnapshotLookupError::Unavailable(msg))?;
        let snapshot = Arc::new(loaded);
        self.loaded
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&snapshot));
        info!(backend = name, rows = snapshot.row_count(), "watchlist snapshot loaded");
        Ok(snapshot)
    }

    /// Force a reload from disk, replacing the cached handle.
    pub async fn reload(
        &self,
        backend: &str,
        include_peps: bool,
    ) -> Result<Arc<WatchlistSnapshot>, SnapshotLookupError> {
        if let Some(path) = self.paths.get(backend) {
            let path = path.clone();
            let loaded =
                tokio::task::spawn_blocking(move || WatchlistSnapshot::load(&path, include_peps))
                    .await
                    .map_err(|e| SnapshotLookupError::Unavailable(e.to_string()))?
                    .map_err(|SnapshotError(msg)| SnapshotLookupError::Unavailable(msg))?;
            let snapshot = Arc::new(loaded);
            self.loaded
                .write()
                .await
                .insert(backend.to_string(), Arc::clone(&snapshot));
            info!(backend, rows = snapshot.row_count(), "watchlist snapshot reloaded");
            return Ok(snapshot);
        }
        // Installed-only registries (tests, embedded deployments) fall back
        // to whatever handle is already cached.
        if let Some(snapshot) = self.loaded.read().await.get(backend) {
            return Ok(Arc::clone(snapshot));
        }
        Err(SnapshotLookupError::UnknownBackend(backend.to_string()))
    }
}
