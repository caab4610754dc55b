//! Conversation engine: owner-scoped rows, read positions, unread counts,
//! and cursor pagination over the conversation list.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::error;

use nexim_shared::conv::{self, CONV_TYPE_GROUP, CONV_TYPE_SINGLE};
use nexim_shared::errcode::{AppError, AppResult};
use nexim_shared::proto::MessageItem;

use crate::seq::SeqAllocator;
use crate::store::{self, Store};

pub const DEFAULT_LIST_LIMIT: i64 = 20;
pub const MAX_LIST_LIMIT: i64 = 100;

/// The other side of a conversation, from one owner's point of view.
#[derive(Debug, Clone, Copy)]
pub enum Counterpart<'a> {
    Single { peer: &'a str },
    Group { group_id: &'a str },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationInfo {
    pub conversation_id: String,
    pub conversation_type: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub recv_msg_opt: i32,
    pub is_pinned: bool,
    pub max_seq: i64,
    pub read_seq: i64,
    pub unread_count: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListCursor {
    pub updated_at: i64,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListPage {
    pub list: Vec<ConversationInfo>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<ListCursor>,
}

pub struct ConversationEngine {
    store: Arc<Store>,
    allocator: Arc<SeqAllocator>,
}

impl ConversationEngine {
    pub fn new(store: Arc<Store>, allocator: Arc<SeqAllocator>) -> Self {
        Self { store, allocator }
    }

    /// Idempotent upsert of the owner's row; returns the conversation id.
    pub fn ensure(&self, owner: &str, counterpart: Counterpart) -> AppResult<String> {
        let (conversation_id, conversation_type, peer, group) = match counterpart {
            Counterpart::Single { peer } => (
                conv::single_chat_id(owner, peer),
                CONV_TYPE_SINGLE,
                Some(peer),
                None,
            ),
            Counterpart::Group { group_id } => (
                conv::group_chat_id(group_id),
                CONV_TYPE_GROUP,
                None,
                Some(group_id),
            ),
        };

        store::conversations::ensure(
            &self.store.conn(),
            owner,
            &conversation_id,
            conversation_type,
            peer,
            group,
            store::now_millis(),
        )
        .map_err(|e| internal("ensure conversation", owner, &conversation_id, &e))?;

        Ok(conversation_id)
    }

    /// Bump the owner's updated_at; never decreases it.
    pub fn touch(&self, owner: &str, conversation_id: &str, at: i64) -> AppResult<()> {
        store::conversations::touch(&self.store.conn(), owner, conversation_id, at)
            .map_err(|e| internal("touch conversation", owner, conversation_id, &e))?;
        Ok(())
    }

    pub fn is_participant(&self, owner: &str, conversation_id: &str) -> bool {
        store::conversations::exists(&self.store.conn(), owner, conversation_id)
    }

    pub fn get(&self, owner: &str, conversation_id: &str) -> AppResult<ConversationInfo> {
        let row = store::conversations::get(&self.store.conn(), owner, conversation_id)
            .ok_or_else(AppError::conv_not_found)?;
        self.build_info(&row)
    }

    /// Cursor-paginated list, `(updated_at DESC, conversation_id DESC)`.
    pub fn list_page(
        &self,
        owner: &str,
        with_last_message: bool,
        limit: i64,
        cursor: Option<&ListCursor>,
    ) -> AppResult<ListPage> {
        let limit = if limit <= 0 {
            DEFAULT_LIST_LIMIT
        } else {
            limit.min(MAX_LIST_LIMIT)
        };

        // Fetch one extra row to learn whether another page exists.
        let mut rows = {
            let conn = self.store.conn();
            store::conversations::page(
                &conn,
                owner,
                limit + 1,
                cursor.map(|c| (c.updated_at, c.conversation_id.as_str())),
            )
        };

        let has_more = rows.len() as i64 > limit;
        if has_more {
            rows.truncate(limit as usize);
        }

        let next_cursor = if has_more {
            rows.last().map(|r| ListCursor {
                updated_at: r.updated_at,
                conversation_id: r.conversation_id.clone(),
            })
        } else {
            None
        };

        let list = self.build_infos(&rows, with_last_message)?;

        Ok(ListPage {
            list,
            has_more,
            next_cursor,
        })
    }

    pub fn all(&self, owner: &str, with_last_message: bool) -> AppResult<Vec<ConversationInfo>> {
        let rows = store::conversations::all_for_owner(&self.store.conn(), owner);
        self.build_infos(&rows, with_last_message)
    }

    /// Advance the read position, clamped to the conversation max; lowering
    /// is a no-op. Returns the stored read_seq.
    pub fn mark_read(&self, owner: &str, conversation_id: &str, seq: i64) -> AppResult<i64> {
        let max_seq = self.allocator.max(conversation_id)?;
        let target = seq.min(max_seq);
        store::seq::advance_read_seq(&self.store.conn(), owner, conversation_id, target)
            .map_err(|e| internal("advance read seq", owner, conversation_id, &e))
    }

    /// (max_seq, read_seq, unread_count) for the owner's view.
    pub fn unread(&self, owner: &str, conversation_id: &str) -> AppResult<(i64, i64, i64)> {
        let max_seq = self.allocator.max(conversation_id)?;
        let read_seq = store::seq::get_read_seq(&self.store.conn(), owner, conversation_id);
        Ok((max_seq, read_seq, (max_seq - read_seq).max(0)))
    }

    /// Partial settings update; an empty patch is a no-op.
    pub fn update(
        &self,
        owner: &str,
        conversation_id: &str,
        recv_msg_opt: Option<i32>,
        is_pinned: Option<bool>,
    ) -> AppResult<()> {
        if recv_msg_opt.is_none() && is_pinned.is_none() {
            return Ok(());
        }
        if !self.is_participant(owner, conversation_id) {
            return Err(AppError::conv_not_found());
        }
        store::conversations::update_opts(
            &self.store.conn(),
            owner,
            conversation_id,
            recv_msg_opt,
            is_pinned,
        )
        .map_err(|e| internal("update conversation", owner, conversation_id, &e))?;
        Ok(())
    }

    fn build_info(
        &self,
        row: &store::conversations::ConversationRow,
    ) -> AppResult<ConversationInfo> {
        let (max_seq, read_seq, unread_count) = self.unread(&row.owner_id, &row.conversation_id)?;
        Ok(ConversationInfo {
            conversation_id: row.conversation_id.clone(),
            conversation_type: row.conversation_type,
            peer_user_id: row.peer_user_id.clone(),
            group_id: row.group_id.clone(),
            recv_msg_opt: row.recv_msg_opt,
            is_pinned: row.is_pinned,
            max_seq,
            read_seq,
            unread_count,
            updated_at: row.updated_at,
            last_message: None,
        })
    }

    fn build_infos(
        &self,
        rows: &[store::conversations::ConversationRow],
        with_last_message: bool,
    ) -> AppResult<Vec<ConversationInfo>> {
        let mut infos = Vec::with_capacity(rows.len());
        for row in rows {
            infos.push(self.build_info(row)?);
        }

        if with_last_message {
            // One batched read instead of a lookup per conversation.
            let seqs: HashMap<String, i64> = infos
                .iter()
                .filter(|i| i.max_seq > 0)
                .map(|i| (i.conversation_id.clone(), i.max_seq))
                .collect();
            let last = store::messages::batch_get_by_max_seq(&self.store.conn(), &seqs);
            for info in &mut infos {
                info.last_message = last
                    .get(&info.conversation_id)
                    .map(crate::delivery::message_item);
            }
        }

        Ok(infos)
    }
}

fn internal(
    action: &str,
    owner: &str,
    conversation_id: &str,
    err: &dyn std::fmt::Display,
) -> AppError {
    error!(owner = %owner, conversation_id = %conversation_id, error = %err, "{action} failed");
    AppError::internal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::MemorySeqCache;

    fn engine() -> ConversationEngine {
        let store = Arc::new(Store::new_in_memory().unwrap());
        let allocator = Arc::new(SeqAllocator::new(
            Arc::new(MemorySeqCache::new()),
            store.clone(),
        ));
        ConversationEngine::new(store, allocator)
    }

    fn seed_conversation(engine: &ConversationEngine, owner: &str, conv: &str, updated_at: i64) {
        store::conversations::ensure(
            &engine.store.conn(),
            owner,
            conv,
            CONV_TYPE_GROUP,
            None,
            Some(conv),
            updated_at,
        )
        .unwrap();
    }

    #[test]
    fn ensure_is_idempotent_and_deterministic() {
        let engine = engine();
        let a = engine
            .ensure("u___1", Counterpart::Single { peer: "u___2" })
            .unwrap();
        let b = engine
            .ensure("u___2", Counterpart::Single { peer: "u___1" })
            .unwrap();
        assert_eq!(a, b);

        let again = engine
            .ensure("u___1", Counterpart::Single { peer: "u___2" })
            .unwrap();
        assert_eq!(a, again);
    }

    #[test]
    fn mark_read_is_monotonic_and_clamped() {
        let engine = engine();
        let conv = engine
            .ensure("u___1", Counterpart::Single { peer: "u___2" })
            .unwrap();
        engine.allocator.allocate(&conv, 5).unwrap();

        assert_eq!(engine.mark_read("u___1", &conv, 5).unwrap(), 5);
        // Lowering is a no-op.
        assert_eq!(engine.mark_read("u___1", &conv, 3).unwrap(), 5);
        // Beyond max_seq clamps.
        assert_eq!(engine.mark_read("u___1", &conv, 99).unwrap(), 5);

        let (max_seq, read_seq, unread) = engine.unread("u___1", &conv).unwrap();
        assert_eq!((max_seq, read_seq, unread), (5, 5, 0));
    }

    #[test]
    fn unread_counts_from_read_seq() {
        let engine = engine();
        let conv = engine
            .ensure("u___1", Counterpart::Single { peer: "u___2" })
            .unwrap();
        engine.allocator.allocate(&conv, 7).unwrap();
        engine.mark_read("u___1", &conv, 4).unwrap();

        let (max_seq, read_seq, unread) = engine.unread("u___1", &conv).unwrap();
        assert_eq!((max_seq, read_seq, unread), (7, 4, 3));
    }

    #[test]
    fn pagination_tie_break_and_termination() {
        let engine = engine();
        // Same updated_at; ids order c_b < c_a.
        seed_conversation(&engine, "u___1", "c_a", 100);
        seed_conversation(&engine, "u___1", "c_b", 100);

        let p1 = engine.list_page("u___1", false, 1, None).unwrap();
        assert_eq!(p1.list[0].conversation_id, "c_b");
        assert!(p1.has_more);
        let c1 = p1.next_cursor.unwrap();
        assert_eq!(c1.conversation_id, "c_b");
        assert_eq!(c1.updated_at, 100);

        let p2 = engine.list_page("u___1", false, 1, Some(&c1)).unwrap();
        assert_eq!(p2.list[0].conversation_id, "c_a");
        assert!(!p2.has_more);
        assert!(p2.next_cursor.is_none());
    }

    #[test]
    fn pagination_covers_every_row_exactly_once() {
        let engine = engine();
        for i in 0..7 {
            seed_conversation(&engine, "u___1", &format!("c{i}"), 100 + (i % 3));
        }

        let mut seen = Vec::new();
        let mut cursor: Option<ListCursor> = None;
        loop {
            let page = engine
                .list_page("u___1", false, 2, cursor.as_ref())
                .unwrap();
            seen.extend(page.list.iter().map(|c| c.conversation_id.clone()));
            match page.next_cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        let full: Vec<String> = engine
            .all("u___1", false)
            .unwrap()
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();
        assert_eq!(seen, full);
        let mut dedup = seen.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 7);
    }

    #[test]
    fn limit_is_clamped() {
        let engine = engine();
        for i in 0..3 {
            seed_conversation(&engine, "u___1", &format!("c{i}"), 100 + i);
        }
        // Zero limit falls back to the default.
        let page = engine.list_page("u___1", false, 0, None).unwrap();
        assert_eq!(page.list.len(), 3);
        // Oversized limit clamps rather than erroring.
        let page = engine.list_page("u___1", false, 10_000, None).unwrap();
        assert_eq!(page.list.len(), 3);
    }

    #[test]
    fn update_requires_existing_row_unless_patch_is_empty() {
        let engine = engine();
        assert!(engine.update("u___1", "missing", None, None).is_ok());
        assert_eq!(
            engine.update("u___1", "missing", Some(1), None),
            Err(AppError::conv_not_found())
        );

        let conv = engine
            .ensure("u___1", Counterpart::Single { peer: "u___2" })
            .unwrap();
        engine.update("u___1", &conv, Some(2), Some(true)).unwrap();
        let info = engine.get("u___1", &conv).unwrap();
        assert_eq!(info.recv_msg_opt, 2);
        assert!(info.is_pinned);
    }
}
