//! Owner-scoped conversation rows. Every participant has their own row for
//! the same conversation_id; `updated_at` drives the list ordering.

use rusqlite::Connection;

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub owner_id: String,
    pub conversation_id: String,
    pub conversation_type: i32,
    pub peer_user_id: Option<String>,
    pub group_id: Option<String>,
    pub recv_msg_opt: i32,
    pub is_pinned: bool,
    pub updated_at: i64,
}

fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        owner_id: row.get("owner_id")?,
        conversation_id: row.get("conversation_id")?,
        conversation_type: row.get("conversation_type")?,
        peer_user_id: row.get("peer_user_id")?,
        group_id: row.get("group_id")?,
        recv_msg_opt: row.get("recv_msg_opt")?,
        is_pinned: row.get::<_, i64>("is_pinned")? != 0,
        updated_at: row.get("updated_at")?,
    })
}

/// Create the owner's row if absent. Existing rows are left untouched.
pub fn ensure(
    conn: &Connection,
    owner_id: &str,
    conversation_id: &str,
    conversation_type: i32,
    peer_user_id: Option<&str>,
    group_id: Option<&str>,
    now: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO conversations
            (owner_id, conversation_id, conversation_type, peer_user_id, group_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(owner_id, conversation_id) DO NOTHING",
        rusqlite::params![
            owner_id,
            conversation_id,
            conversation_type,
            peer_user_id,
            group_id,
            now
        ],
    )?;
    Ok(())
}

/// Bump updated_at; never moves it backwards.
pub fn touch(
    conn: &Connection,
    owner_id: &str,
    conversation_id: &str,
    at: i64,
) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "UPDATE conversations SET updated_at = MAX(updated_at, ?3)
         WHERE owner_id = ?1 AND conversation_id = ?2",
        rusqlite::params![owner_id, conversation_id, at],
    )?;
    Ok(n > 0)
}

pub fn get(conn: &Connection, owner_id: &str, conversation_id: &str) -> Option<ConversationRow> {
    conn.prepare(
        "SELECT * FROM conversations WHERE owner_id = ?1 AND conversation_id = ?2 LIMIT 1",
    )
    .ok()?
    .query_row(rusqlite::params![owner_id, conversation_id], row_to_conversation)
    .ok()
}

pub fn exists(conn: &Connection, owner_id: &str, conversation_id: &str) -> bool {
    conn.prepare("SELECT 1 FROM conversations WHERE owner_id = ?1 AND conversation_id = ?2")
        .and_then(|mut s| s.exists(rusqlite::params![owner_id, conversation_id]))
        .unwrap_or(false)
}

/// Cursor page ordered by (updated_at DESC, conversation_id DESC).
/// The cursor predicate matches rows strictly after the cursor row:
/// `updated_at < c.updated_at OR (updated_at = c.updated_at AND
/// conversation_id < c.conversation_id)`.
pub fn page(
    conn: &Connection,
    owner_id: &str,
    limit: i64,
    cursor: Option<(i64, &str)>,
) -> Vec<ConversationRow> {
    let result = match cursor {
        Some((cursor_updated_at, cursor_conversation_id)) => conn
            .prepare(
                "SELECT * FROM conversations
                 WHERE owner_id = ?1
                   AND (updated_at < ?2
                        OR (updated_at = ?2 AND conversation_id < ?3))
                 ORDER BY updated_at DESC, conversation_id DESC
                 LIMIT ?4",
            )
            .and_then(|mut s| {
                s.query_map(
                    rusqlite::params![owner_id, cursor_updated_at, cursor_conversation_id, limit],
                    row_to_conversation,
                )
                .map(|rows| rows.filter_map(|r| r.ok()).collect::<Vec<_>>())
            }),
        None => conn
            .prepare(
                "SELECT * FROM conversations
                 WHERE owner_id = ?1
                 ORDER BY updated_at DESC, conversation_id DESC
                 LIMIT ?2",
            )
            .and_then(|mut s| {
                s.query_map(rusqlite::params![owner_id, limit], row_to_conversation)
                    .map(|rows| rows.filter_map(|r| r.ok()).collect::<Vec<_>>())
            }),
    };
    result.unwrap_or_default()
}

pub fn all_for_owner(conn: &Connection, owner_id: &str) -> Vec<ConversationRow> {
    conn.prepare(
        "SELECT * FROM conversations
         WHERE owner_id = ?1
         ORDER BY updated_at DESC, conversation_id DESC",
    )
    .and_then(|mut s| {
        s.query_map(rusqlite::params![owner_id], row_to_conversation)
            .map(|rows| rows.filter_map(|r| r.ok()).collect::<Vec<_>>())
    })
    .unwrap_or_default()
}

/// Partial settings update. Returns the number of changed rows; both fields
/// absent is a no-op.
pub fn update_opts(
    conn: &Connection,
    owner_id: &str,
    conversation_id: &str,
    recv_msg_opt: Option<i32>,
    is_pinned: Option<bool>,
) -> rusqlite::Result<usize> {
    match (recv_msg_opt, is_pinned) {
        (None, None) => Ok(0),
        (Some(opt), None) => conn.execute(
            "UPDATE conversations SET recv_msg_opt = ?3
             WHERE owner_id = ?1 AND conversation_id = ?2",
            rusqlite::params![owner_id, conversation_id, opt],
        ),
        (None, Some(pinned)) => conn.execute(
            "UPDATE conversations SET is_pinned = ?3
             WHERE owner_id = ?1 AND conversation_id = ?2",
            rusqlite::params![owner_id, conversation_id, pinned as i64],
        ),
        (Some(opt), Some(pinned)) => conn.execute(
            "UPDATE conversations SET recv_msg_opt = ?3, is_pinned = ?4
             WHERE owner_id = ?1 AND conversation_id = ?2",
            rusqlite::params![owner_id, conversation_id, opt, pinned as i64],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn seed(conn: &Connection, owner: &str, conv: &str, updated_at: i64) {
        ensure(conn, owner, conv, 1, Some("u___2"), None, updated_at).unwrap();
        touch(conn, owner, conv, updated_at).unwrap();
    }

    #[test]
    fn ensure_is_idempotent() {
        let store = Store::new_in_memory().unwrap();
        let conn = &store.conn();
        ensure(conn, "u___1", "c1", 1, Some("u___2"), None, 100).unwrap();
        ensure(conn, "u___1", "c1", 1, Some("u___2"), None, 200).unwrap();

        let row = get(conn, "u___1", "c1").unwrap();
        assert_eq!(row.updated_at, 100);
    }

    #[test]
    fn touch_never_decreases_updated_at() {
        let store = Store::new_in_memory().unwrap();
        let conn = &store.conn();
        seed(conn, "u___1", "c1", 100);

        touch(conn, "u___1", "c1", 500).unwrap();
        assert_eq!(get(conn, "u___1", "c1").unwrap().updated_at, 500);

        touch(conn, "u___1", "c1", 300).unwrap();
        assert_eq!(get(conn, "u___1", "c1").unwrap().updated_at, 500);
    }

    #[test]
    fn page_breaks_ties_by_conversation_id_desc() {
        let store = Store::new_in_memory().unwrap();
        let conn = &store.conn();
        seed(conn, "u___1", "c_a", 100);
        seed(conn, "u___1", "c_b", 100);

        let p1 = page(conn, "u___1", 1, None);
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0].conversation_id, "c_b");

        let p2 = page(conn, "u___1", 1, Some((100, "c_b")));
        assert_eq!(p2.len(), 1);
        assert_eq!(p2[0].conversation_id, "c_a");

        let p3 = page(conn, "u___1", 1, Some((100, "c_a")));
        assert!(p3.is_empty());
    }

    #[test]
    fn update_opts_empty_patch_is_noop() {
        let store = Store::new_in_memory().unwrap();
        let conn = &store.conn();
        seed(conn, "u___1", "c1", 100);

        assert_eq!(update_opts(conn, "u___1", "c1", None, None).unwrap(), 0);
        assert_eq!(
            update_opts(conn, "u___1", "c1", Some(2), Some(true)).unwrap(),
            1
        );
        let row = get(conn, "u___1", "c1").unwrap();
        assert_eq!(row.recv_msg_opt, 2);
        assert!(row.is_pinned);
    }
}
