//! Cache entry and index types persisted as JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use crucible_core::CollectionFingerprint;
use serde::{Deserialize, Serialize};

/// Recorded content hash for one dependency file at the time an entry was
/// cached, used to detect staleness on lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySnapshot {
    pub path: String,
    pub content_hash: String,
}

/// One index record: where a cached result lives and what it depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub spec_name: String,
    pub cached_at: DateTime<Utc>,
    pub result_file_path: String,
    pub dependencies: Vec<DependencySnapshot>,
}

/// The on-disk index: `fingerprint → entry`, loaded wholesale on open and
/// rewritten wholesale on each mutation (single-writer discipline).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheIndex {
    pub entries: BTreeMap<String, CacheEntry>,
}

impl CacheIndex {
    pub fn get(&self, fingerprint: &CollectionFingerprint) -> Option<&CacheEntry> {
        self.entries.get(fingerprint.as_str())
    }

    pub fn insert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.fingerprint.clone(), entry);
    }

    pub fn remove(&mut self, fingerprint: &CollectionFingerprint) -> Option<CacheEntry> {
        self.entries.remove(fingerprint.as_str())
    }

    pub fn retain_younger_than(&mut self, cutoff: DateTime<Utc>) {
        self.entries.retain(|_, entry| entry.cached_at >= cutoff);
    }
}
