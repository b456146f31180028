use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::loader;
use crate::schema::{AgentConfig, Config, TeamConfig};

/// Cache time-to-live ceiling (spec.md §4.2: "short time-to-live cache (≤ 5 s)").
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(5);

/// An immutable, by-value snapshot of configuration, consumed by every other
/// component (spec.md §9: "consume immutable snapshots by value; never pass
/// mutable maps between components").
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub agents: Arc<IndexMap<String, AgentConfig>>,
    pub teams: Arc<IndexMap<String, TeamConfig>>,
    pub workspace: PathBuf,
}

impl ConfigSnapshot {
    fn from_config(cfg: Config) -> Self {
        let mut agents = cfg.agents;
        if agents.is_empty() {
            let implicit = AgentConfig::synthesize_default(cfg.model.as_ref());
            agents.insert(implicit.id.clone(), implicit);
        }
        Self {
            agents: Arc::new(agents),
            teams: Arc::new(cfg.teams),
            workspace: cfg.workspace,
        }
    }

    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.get(id)
    }

    pub fn team(&self, id: &str) -> Option<&TeamConfig> {
        self.teams.get(id)
    }
}

struct Cached {
    loaded_at: Instant,
    snapshot: Arc<ConfigSnapshot>,
}

/// Live, cached configuration, hot-reloaded on a short TTL with an explicit
/// invalidation hook (spec.md §4.2).
pub struct ConfigProvider {
    path: PathBuf,
    ttl: Duration,
    cache: Mutex<Option<Cached>>,
}

impl ConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        Self::with_ttl(path, MAX_CACHE_TTL)
    }

    pub fn with_ttl(path: PathBuf, ttl: Duration) -> Self {
        let ttl = ttl.min(MAX_CACHE_TTL);
        Self {
            path,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Return the current snapshot, reloading from disk if the cache has
    /// expired or was never populated.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        let mut guard = self.cache.lock().unwrap();
        if let Some(cached) = guard.as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                return Arc::clone(&cached.snapshot);
            }
        }
        let snapshot = Arc::new(ConfigSnapshot::from_config(loader::load(&self.path)));
        *guard = Some(Cached {
            loaded_at: Instant::now(),
            snapshot: Arc::clone(&snapshot),
        });
        snapshot
    }

    /// Force the next `snapshot()` call to reload from disk regardless of
    /// TTL freshness.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_agents_synthesizes_default() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let provider = ConfigProvider::new(f.path().to_path_buf());
        let snap = provider.snapshot();
        assert!(snap.agent("default").is_some());
    }

    #[test]
    fn cache_is_reused_within_ttl() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "workspace: /tmp/a").unwrap();
        let provider = ConfigProvider::with_ttl(f.path().to_path_buf(), Duration::from_secs(5));
        let first = provider.snapshot();
        writeln!(f, "workspace: /tmp/b").unwrap();
        let second = provider.snapshot();
        assert_eq!(first.workspace, second.workspace);
    }

    #[test]
    fn invalidate_forces_reload() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "workspace: /tmp/a").unwrap();
        let provider = ConfigProvider::with_ttl(f.path().to_path_buf(), Duration::from_secs(5));
        let _ = provider.snapshot();
        std::fs::write(f.path(), "workspace: /tmp/b\n").unwrap();
        provider.invalidate();
        let snap = provider.snapshot();
        assert_eq!(snap.workspace, PathBuf::from("/tmp/b"));
    }

    #[test]
    fn ttl_is_clamped_to_five_seconds() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let provider = ConfigProvider::with_ttl(f.path().to_path_buf(), Duration::from_secs(60));
        assert_eq!(provider.ttl, MAX_CACHE_TTL);
    }
}
