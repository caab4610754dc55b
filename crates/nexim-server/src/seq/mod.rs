//! Per-conversation sequence allocation.
//!
//! Counters live in a [`SeqCache`] (an INCRBY-style contract); the durable
//! floor is flushed to the `conversation_seq` table on a bounded interval
//! and on shutdown. Cold counters seed from the larger of the floor and
//! the highest persisted seq, so seq never regresses across a cache loss
//! or restart.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use nexim_shared::errcode::{AppError, AppResult};

use crate::store::{self, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheError {
    pub detail: String,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq cache error: {}", self.detail)
    }
}

impl std::error::Error for CacheError {}

/// INCRBY-style counter cache. The in-process implementation below is the
/// single-node build; a networked cache plugs in here.
pub trait SeqCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<i64>, CacheError>;

    /// Set the counter only if the key is absent. Returns true when this
    /// call created the key.
    fn set_nx(&self, key: &str, value: i64) -> Result<bool, CacheError>;

    /// Atomically add `by` and return the new value. The key must exist.
    fn incr_by(&self, key: &str, by: i64) -> Result<i64, CacheError>;
}

#[derive(Default)]
pub struct MemorySeqCache {
    counters: Mutex<HashMap<String, i64>>,
}

impl MemorySeqCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeqCache for MemorySeqCache {
    fn get(&self, key: &str) -> Result<Option<i64>, CacheError> {
        Ok(self.counters.lock().unwrap().get(key).copied())
    }

    fn set_nx(&self, key: &str, value: i64) -> Result<bool, CacheError> {
        let mut counters = self.counters.lock().unwrap();
        if counters.contains_key(key) {
            return Ok(false);
        }
        counters.insert(key.to_string(), value);
        Ok(true)
    }

    fn incr_by(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters.get_mut(key).ok_or_else(|| CacheError {
            detail: format!("counter {key} not seeded"),
        })?;
        *entry += by;
        Ok(*entry)
    }
}

pub struct SeqAllocator {
    cache: Arc<dyn SeqCache>,
    store: Arc<Store>,
    dirty: Mutex<HashSet<String>>,
}

impl SeqAllocator {
    pub fn new(cache: Arc<dyn SeqCache>, store: Arc<Store>) -> Self {
        Self {
            cache,
            store,
            dirty: Mutex::new(HashSet::new()),
        }
    }

    /// Allocate a contiguous range of `n` sequence numbers, returning
    /// (first, last). Callers must never fabricate a seq on failure.
    pub fn allocate(&self, conversation_id: &str, n: u64) -> AppResult<(i64, i64)> {
        if n == 0 {
            return Err(AppError::invalid_param().with_message("allocation size must be positive"));
        }

        self.ensure_seeded(conversation_id)?;

        let last = self
            .cache
            .incr_by(conversation_id, n as i64)
            .map_err(|e| transient(conversation_id, &e))?;

        self.dirty
            .lock()
            .unwrap()
            .insert(conversation_id.to_string());

        Ok((last - n as i64 + 1, last))
    }

    /// Current max seq for the conversation (0 when no message exists).
    pub fn max(&self, conversation_id: &str) -> AppResult<i64> {
        if let Some(v) = self
            .cache
            .get(conversation_id)
            .map_err(|e| transient(conversation_id, &e))?
        {
            return Ok(v);
        }
        Ok(self.storage_floor(conversation_id))
    }

    fn ensure_seeded(&self, conversation_id: &str) -> AppResult<()> {
        let seeded = self
            .cache
            .get(conversation_id)
            .map_err(|e| transient(conversation_id, &e))?
            .is_some();
        if seeded {
            return Ok(());
        }

        let floor = self.storage_floor(conversation_id);
        // A concurrent seeder winning the set_nx race is fine; incr_by is
        // atomic on whichever value landed.
        self.cache
            .set_nx(conversation_id, floor)
            .map_err(|e| transient(conversation_id, &e))?;
        Ok(())
    }

    fn storage_floor(&self, conversation_id: &str) -> i64 {
        let conn = self.store.conn();
        let floor = store::seq::get_floor(&conn, conversation_id);
        let persisted_max = store::messages::max_seq(&conn, conversation_id);
        floor.max(persisted_max)
    }

    /// Persist in-cache counters for every conversation touched since the
    /// last flush. Returns the number of floors written.
    pub fn flush_floors(&self) -> usize {
        let touched: Vec<String> = {
            let mut dirty = self.dirty.lock().unwrap();
            dirty.drain().collect()
        };

        let mut written = 0;
        for conversation_id in touched {
            let value = match self.cache.get(&conversation_id) {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(e) => {
                    error!(conversation_id = %conversation_id, error = %e, "seq cache read failed during flush");
                    // Keep it dirty so the next flush retries.
                    self.dirty.lock().unwrap().insert(conversation_id);
                    continue;
                }
            };
            if let Err(e) = store::seq::put_floor(&self.store.conn(), &conversation_id, value) {
                error!(conversation_id = %conversation_id, error = %e, "seq floor flush failed");
                self.dirty.lock().unwrap().insert(conversation_id);
                continue;
            }
            written += 1;
        }
        if written > 0 {
            debug!(written, "flushed seq floors");
        }
        written
    }
}

fn transient(conversation_id: &str, err: &CacheError) -> AppError {
    error!(conversation_id = %conversation_id, error = %err, "seq cache unavailable");
    AppError::transient()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn allocator() -> (SeqAllocator, Arc<Store>) {
        let store = Arc::new(Store::new_in_memory().unwrap());
        let alloc = SeqAllocator::new(Arc::new(MemorySeqCache::new()), store.clone());
        (alloc, store)
    }

    #[test]
    fn allocations_are_contiguous_and_monotonic() {
        let (alloc, _store) = allocator();

        let (a, b) = alloc.allocate("c1", 1).unwrap();
        assert_eq!((a, b), (1, 1));

        let (a, b) = alloc.allocate("c1", 3).unwrap();
        assert_eq!((a, b), (2, 4));

        assert_eq!(alloc.max("c1").unwrap(), 4);
        // Another conversation is independent.
        assert_eq!(alloc.allocate("c2", 1).unwrap(), (1, 1));
    }

    #[test]
    fn zero_sized_allocation_is_rejected() {
        let (alloc, _store) = allocator();
        assert!(alloc.allocate("c1", 0).is_err());
    }

    #[test]
    fn concurrent_allocations_never_collide() {
        let (alloc, _store) = allocator();
        let alloc = Arc::new(alloc);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let alloc = alloc.clone();
            handles.push(std::thread::spawn(move || {
                let mut got = Vec::new();
                for _ in 0..50 {
                    let (first, last) = alloc.allocate("c1", 1).unwrap();
                    assert_eq!(first, last);
                    got.push(first);
                }
                got
            }));
        }

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let expect: Vec<i64> = (1..=400).collect();
        assert_eq!(all, expect);
    }

    #[test]
    fn reseeds_from_storage_after_cache_loss() {
        let store = Arc::new(Store::new_in_memory().unwrap());
        {
            let alloc = SeqAllocator::new(Arc::new(MemorySeqCache::new()), store.clone());
            let (_, last) = alloc.allocate("c1", 5).unwrap();
            assert_eq!(last, 5);
            assert_eq!(alloc.flush_floors(), 1);
        }

        // Fresh cache: floor comes back from conversation_seq.
        let alloc = SeqAllocator::new(Arc::new(MemorySeqCache::new()), store.clone());
        assert_eq!(alloc.allocate("c1", 1).unwrap(), (6, 6));
    }

    #[test]
    fn reseeds_from_persisted_messages_when_floor_is_stale() {
        let store = Arc::new(Store::new_in_memory().unwrap());
        {
            let conn = store.conn();
            let content = json!({"text": "x"});
            // Messages exist beyond any flushed floor (crash before flush).
            for seq in 1..=7 {
                store::messages::put(
                    &conn,
                    &store::messages::NewMessage {
                        conversation_id: "c1",
                        seq,
                        client_msg_id: &format!("m{seq}"),
                        send_id: "u___1",
                        session_type: 1,
                        msg_type: 101,
                        content: &content,
                        send_at: seq,
                    },
                )
                .unwrap();
            }
            store::seq::put_floor(&conn, "c1", 3).unwrap();
        }

        let alloc = SeqAllocator::new(Arc::new(MemorySeqCache::new()), store);
        assert_eq!(alloc.allocate("c1", 1).unwrap(), (8, 8));
    }
}
