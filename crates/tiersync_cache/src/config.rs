//! Configuration for the tiered cache.

use crate::policy::EvictionPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Static cache configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Memory tier budget in bytes.
    pub memory_capacity_bytes: u64,
    /// Disk tier budget in bytes.
    pub disk_capacity_bytes: u64,
    /// TTL applied when `set` is called without one. `None` means entries
    /// never expire by default.
    pub default_ttl: Option<Duration>,
    /// Policy used to pick memory victims.
    pub eviction_policy: EvictionPolicy,
    /// Directory for the file-backed disk tier. `None` disables the
    /// built-in file tier.
    pub disk_path: Option<PathBuf>,
}

impl CacheConfig {
    /// Creates a configuration with the given memory budget.
    pub fn new(memory_capacity_bytes: u64) -> Self {
        Self {
            memory_capacity_bytes,
            disk_capacity_bytes: 256 * 1024 * 1024,
            default_ttl: None,
            eviction_policy: EvictionPolicy::Lru,
            disk_path: None,
        }
    }

    /// Sets the disk budget.
    pub fn with_disk_capacity(mut self, bytes: u64) -> Self {
        self.disk_capacity_bytes = bytes;
        self
    }

    /// Sets the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Sets the eviction policy.
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Enables the file-backed disk tier rooted at `path`.
    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = Some(path.into());
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_config_builder() {
        let config = CacheConfig::new(1024)
            .with_disk_capacity(4096)
            .with_default_ttl(Duration::from_secs(60))
            .with_eviction_policy(EvictionPolicy::Lfu)
            .with_disk_path("/tmp/cache");

        assert_eq!(config.memory_capacity_bytes, 1024);
        assert_eq!(config.disk_capacity_bytes, 4096);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(60)));
        assert_eq!(config.eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(config.disk_path, Some(PathBuf::from("/tmp/cache")));
    }

    #[test]
    fn defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.memory_capacity_bytes, 64 * 1024 * 1024);
        assert_eq!(config.default_ttl, None);
        assert_eq!(config.eviction_policy, EvictionPolicy::Lru);
        assert!(config.disk_path.is_none());
    }
}
