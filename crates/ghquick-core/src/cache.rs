//! In-memory repository info cache with a fixed TTL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::debug;

/// Default lifetime of a cache entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Facts about a working directory's repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub name: String,
    pub path: PathBuf,
    /// Remote URL without credentials.
    pub remote: String,
    pub branch: String,
    /// Set by [`RepoCache::set`].
    pub updated_at: Instant,
}

impl RepoInfo {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        remote: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            remote: remote.into(),
            branch: branch.into(),
            updated_at: Instant::now(),
        }
    }
}

/// Path-keyed [`RepoInfo`] cache safe for concurrent readers and writers.
#[derive(Debug)]
pub struct RepoCache {
    entries: RwLock<HashMap<PathBuf, RepoInfo>>,
    ttl: Duration,
}

impl Default for RepoCache {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl RepoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Return the entry for `path` unless it is missing or expired.
    ///
    /// Expired entries are removed.
    pub fn get(&self, path: &Path) -> Option<RepoInfo> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(path) {
                None => return None,
                Some(info) if info.updated_at.elapsed() <= self.ttl => return Some(info.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        // Another writer may have refreshed the entry since the read lock was released.
        if entries
            .get(path)
            .is_some_and(|info| info.updated_at.elapsed() > self.ttl)
        {
            entries.remove(path);
            debug!(path = %path.display(), "evicted expired repo info");
            return None;
        }
        entries.get(path).cloned()
    }

    /// Store `info` for `path`, stamping it with the current time.
    pub fn set(&self, path: impl Into<PathBuf>, mut info: RepoInfo) {
        info.updated_at = Instant::now();
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), info);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
