//! TTL-cached group membership for send authorization. Join/quit paths
//! invalidate eagerly; everything else tolerates the staleness window.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nexim_shared::errcode::{AppError, AppResult};

use crate::store::{self, Store};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

struct CacheEntry {
    fetched_at: Instant,
    members: Arc<HashSet<String>>,
}

pub struct MembershipCache {
    store: Arc<Store>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MembershipCache {
    pub fn new(store: Arc<Store>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn members(&self, group_id: &str) -> AppResult<Arc<HashSet<String>>> {
        {
            let entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get(group_id) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.members.clone());
                }
            }
        }

        let members = {
            let conn = self.store.conn();
            if store::groups::get(&conn, group_id).is_none() {
                return Err(AppError::not_found().with_message("group not found"));
            }
            Arc::new(
                store::groups::members(&conn, group_id)
                    .into_iter()
                    .collect::<HashSet<_>>(),
            )
        };

        self.entries.lock().unwrap().insert(
            group_id.to_string(),
            CacheEntry {
                fetched_at: Instant::now(),
                members: members.clone(),
            },
        );
        Ok(members)
    }

    pub fn is_member(&self, group_id: &str, user_id: &str) -> AppResult<bool> {
        Ok(self.members(group_id)?.contains(user_id))
    }

    pub fn invalidate(&self, group_id: &str) {
        self.entries.lock().unwrap().remove(group_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> MembershipCache {
        let store = Arc::new(Store::new_in_memory().unwrap());
        {
            let conn = store.conn();
            store::groups::create(&conn, "g1", "team", "u___1").unwrap();
            store::groups::add_member(&conn, "g1", "u___1").unwrap();
            store::groups::add_member(&conn, "g1", "u___2").unwrap();
        }
        MembershipCache::new(store, DEFAULT_TTL)
    }

    #[test]
    fn resolves_members_and_caches() {
        let cache = cache();
        assert!(cache.is_member("g1", "u___1").unwrap());
        assert!(!cache.is_member("g1", "u___9").unwrap());

        // Membership change is invisible until invalidated.
        store::groups::add_member(&cache.store.conn(), "g1", "u___3").unwrap();
        assert!(!cache.is_member("g1", "u___3").unwrap());
        cache.invalidate("g1");
        assert!(cache.is_member("g1", "u___3").unwrap());
    }

    #[test]
    fn unknown_group_is_not_found() {
        let cache = cache();
        assert_eq!(
            cache.members("missing").unwrap_err().code,
            AppError::not_found().code
        );
    }
}
