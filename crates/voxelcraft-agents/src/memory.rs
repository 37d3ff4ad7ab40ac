//! Private per-agent key/value memory.
//!
//! Entries may carry an absolute expiry tick. Expired entries are dropped
//! lazily on load and filtered out of snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use voxelcraft_types::MemoryKv;

/// Total bytes of keys plus values an agent may store.
pub const MEMORY_BUDGET_BYTES: usize = 64 * 1024;

/// Longest accepted key.
pub const MAX_KEY_LEN: usize = 128;

/// Default LOAD_MEMORY page size.
pub const DEFAULT_LOAD_LIMIT: usize = 64;

/// Largest LOAD_MEMORY page size.
pub const MAX_LOAD_LIMIT: usize = 256;

/// One stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Stored text.
    pub value: String,
    /// Tick at which the entry expires; 0 never expires.
    #[serde(default)]
    pub expiry_tick: u64,
}

impl MemoryEntry {
    /// Whether the entry is still readable at `now`.
    pub const fn is_live(&self, now: u64) -> bool {
        self.expiry_tick == 0 || now < self.expiry_tick
    }
}

/// An agent's memory map.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Memory {
    entries: BTreeMap<String, MemoryEntry>,
}

impl Memory {
    /// Whether writing `key = value` would exceed the byte budget.
    pub fn over_budget(&self, key: &str, value: &str) -> bool {
        let used: usize = self
            .entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, e)| k.len().saturating_add(e.value.len()))
            .sum();
        used.saturating_add(key.len()).saturating_add(value.len()) > MEMORY_BUDGET_BYTES
    }

    /// Store `value` under `key`; `ttl_ticks == 0` never expires.
    pub fn save(&mut self, key: &str, value: &str, ttl_ticks: u64, now: u64) {
        let expiry_tick = if ttl_ticks == 0 { 0 } else { now.saturating_add(ttl_ticks) };
        self.entries.insert(
            key.to_owned(),
            MemoryEntry {
                value: value.to_owned(),
                expiry_tick,
            },
        );
    }

    /// Up to `limit` live entries whose key starts with `prefix`, in key
    /// order. Expired matches encountered on the way are deleted.
    pub fn load(&mut self, prefix: &str, limit: usize, now: u64) -> Vec<MemoryKv> {
        let limit = if limit == 0 || limit > MAX_LOAD_LIMIT { DEFAULT_LOAD_LIMIT } else { limit };
        let mut expired = Vec::new();
        let mut out = Vec::new();
        for (k, e) in self.entries.iter().filter(|(k, _)| k.starts_with(prefix)) {
            if !e.is_live(now) {
                expired.push(k.clone());
                continue;
            }
            out.push(MemoryKv {
                key: k.clone(),
                value: e.value.clone(),
            });
            if out.len() >= limit {
                break;
            }
        }
        for k in expired {
            self.entries.remove(&k);
        }
        out
    }

    /// Live entries at `now`, in key order.
    pub fn live(&self, now: u64) -> impl Iterator<Item = (&String, &MemoryEntry)> {
        self.entries.iter().filter(move |(_, e)| e.is_live(now))
    }

    /// Look up a live value.
    pub fn get(&self, key: &str, now: u64) -> Option<&str> {
        self.entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.as_str())
    }

    /// Replace the contents from a snapshot.
    pub fn load_entries(entries: BTreeMap<String, MemoryEntry>) -> Self {
        Self { entries }
    }

    /// Number of stored entries, live or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_expires_entries() {
        let mut m = Memory::default();
        m.save("plan", "mine north", 10, 100);
        m.save("home", "0,0,0", 0, 100);
        assert_eq!(m.get("plan", 109), Some("mine north"));
        assert_eq!(m.get("plan", 110), None);
        let loaded = m.load("", 0, 110);
        assert_eq!(loaded.len(), 1);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn load_filters_prefix_and_limits() {
        let mut m = Memory::default();
        for i in 0..5 {
            m.save(&format!("note/{i}"), "x", 0, 0);
        }
        m.save("other", "y", 0, 0);
        let page = m.load("note/", 3, 0);
        assert_eq!(page.len(), 3);
        assert_eq!(page.first().map(|kv| kv.key.as_str()), Some("note/0"));
    }

    #[test]
    fn budget_counts_replacements_once() {
        let mut m = Memory::default();
        let big = "v".repeat(MEMORY_BUDGET_BYTES - 10);
        m.save("k", &big, 0, 0);
        assert!(!m.over_budget("k", &big));
        assert!(m.over_budget("k2", "0123456789"));
    }
}
