//! State store
//!
//! Authoritative keyed storage of current resource records. Writers must go
//! through [`StateStore::compare_and_set`] so that the read-decide-write of a
//! single key can never interleave undetected with another batch.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::error::StoreError;
use super::types::{RecordStamp, ResourceKey, ResourceRecord, Timestamp};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Keyed store with per-key compare-and-set
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the current record for a key
    async fn get(&self, key: &ResourceKey) -> StoreResult<Option<ResourceRecord>>;

    /// Replace the record at `key` if its current state matches `expected`
    ///
    /// `expected = None` means the key must be absent; `new = None` removes
    /// the key. Returns `false` when the precondition no longer holds.
    async fn compare_and_set(
        &self,
        key: &ResourceKey,
        expected: Option<RecordStamp>,
        new: Option<ResourceRecord>,
    ) -> StoreResult<bool>;

    /// Records written strictly after `cursor`, oldest first
    async fn scan_since(&self, cursor: Option<Timestamp>) -> StoreResult<Vec<ResourceRecord>>;

    /// Number of stored records
    async fn len(&self) -> StoreResult<usize>;
}

const DEFAULT_SHARDS: usize = 16;

/// In-memory store
///
/// Keys are spread across independently locked shards, so a CAS only blocks
/// writers that hash to the same shard.
pub struct MemoryStateStore {
    shards: Vec<RwLock<HashMap<ResourceKey, ResourceRecord>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(count: usize) -> Self {
        let count = count.max(1);
        Self {
            shards: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &ResourceKey) -> &RwLock<HashMap<ResourceKey, ResourceRecord>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &ResourceKey) -> StoreResult<Option<ResourceRecord>> {
        Ok(self.shard(key).read().get(key).cloned())
    }

    async fn compare_and_set(
        &self,
        key: &ResourceKey,
        expected: Option<RecordStamp>,
        new: Option<ResourceRecord>,
    ) -> StoreResult<bool> {
        let mut shard = self.shard(key).write();

        let current = shard.get(key).map(ResourceRecord::stamp);
        if current != expected {
            return Ok(false);
        }

        match new {
            Some(record) => {
                shard.insert(key.clone(), record);
            }
            None => {
                shard.remove(key);
            }
        }
        Ok(true)
    }

    async fn scan_since(&self, cursor: Option<Timestamp>) -> StoreResult<Vec<ResourceRecord>> {
        let mut records: Vec<ResourceRecord> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .values()
                    .filter(|r| cursor.map_or(true, |c| r.last_timestamp > c))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        records.sort_by(|a, b| {
            a.last_timestamp
                .cmp(&b.last_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.shards.iter().map(|s| s.read().len()).sum())
    }
}
