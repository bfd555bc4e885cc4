//! Eviction policies.
//!
//! A policy only ranks entries; the store removes what the policy picks.
//! Every policy orders entries by a total key ending in the unique
//! insertion sequence, so victim choice is deterministic.

use crate::entry::CacheEntry;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Strategy for choosing which entries leave memory when it is over capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EvictionPolicy {
    /// Least recently accessed first. Ties: lowest insertion sequence.
    #[default]
    Lru,
    /// Least frequently accessed first. Ties: oldest access, then insertion.
    Lfu,
    /// Oldest insertion first.
    Fifo,
    /// Soonest expiry first. Entries without expiry go last, in FIFO order.
    Ttl,
}

/// Sort key for one entry. Smaller ranks are evicted first.
type Rank = (u64, u64, u64);

impl EvictionPolicy {
    /// Returns the policy name used in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
            EvictionPolicy::Ttl => "ttl",
        }
    }

    fn rank(&self, entry: &CacheEntry) -> Rank {
        match self {
            EvictionPolicy::Lru => (entry.last_accessed_at, entry.insertion_sequence, 0),
            EvictionPolicy::Lfu => (
                entry.access_count,
                entry.last_accessed_at,
                entry.insertion_sequence,
            ),
            EvictionPolicy::Fifo => (entry.insertion_sequence, 0, 0),
            EvictionPolicy::Ttl => match entry.expires_at {
                Some(at) => (0, at, entry.insertion_sequence),
                None => (1, entry.insertion_sequence, 0),
            },
        }
    }

    /// Picks the single entry this policy would evict next.
    pub fn select_victim<'a, I>(&self, entries: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a CacheEntry>,
    {
        entries
            .into_iter()
            .min_by_key(|entry| self.rank(entry))
            .map(|entry| entry.key.as_str())
    }

    /// Picks victims, in eviction order, until at least `bytes_to_free` bytes
    /// would be released.
    ///
    /// This ranks the whole set once instead of rescanning per victim.
    pub fn select_victims<'a, I>(&self, entries: I, bytes_to_free: u64) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a CacheEntry>,
    {
        if bytes_to_free == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<(Rank, &'a CacheEntry)> = entries
            .into_iter()
            .map(|entry| (self.rank(entry), entry))
            .collect();
        ranked.sort_unstable_by_key(|(rank, _)| *rank);

        let mut freed = 0u64;
        let mut victims = Vec::new();
        for (_, entry) in ranked {
            if freed >= bytes_to_free {
                break;
            }
            freed = freed.saturating_add(entry.size_bytes);
            victims.push(entry.key.as_str());
        }
        victims
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown policy name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown eviction policy: {0}")]
pub struct UnknownPolicy(pub String);

impl FromStr for EvictionPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            "ttl" => Ok(EvictionPolicy::Ttl),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}
