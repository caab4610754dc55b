//! Append-only message rows keyed by (conversation_id, seq).
//!
//! `(conversation_id, client_msg_id)` is unique so retried sends land on
//! the original row. Recall is a status flag, never a delete.

use std::collections::HashMap;

use rusqlite::Connection;
use serde_json::Value;

pub const MAX_RANGE_LIMIT: i64 = 200;

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub rowid: i64,
    pub conversation_id: String,
    pub seq: i64,
    pub client_msg_id: String,
    pub send_id: String,
    pub session_type: i32,
    pub msg_type: i32,
    pub content: Value,
    pub send_at: i64,
    pub status: i32,
}

#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub conversation_id: &'a str,
    pub seq: i64,
    pub client_msg_id: &'a str,
    pub send_id: &'a str,
    pub session_type: i32,
    pub msg_type: i32,
    pub content: &'a Value,
    pub send_at: i64,
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<StoredMessage> {
    let content: String = row.get("content")?;
    Ok(StoredMessage {
        rowid: row.get("rowid")?,
        conversation_id: row.get("conversation_id")?,
        seq: row.get("seq")?,
        client_msg_id: row.get("client_msg_id")?,
        send_id: row.get("send_id")?,
        session_type: row.get("session_type")?,
        msg_type: row.get("msg_type")?,
        content: serde_json::from_str(&content).unwrap_or(Value::Null),
        send_at: row.get("send_at")?,
        status: row.get("status")?,
    })
}

/// Insert a message. Idempotent on (conversation_id, client_msg_id): a
/// duplicate returns the original row with its original seq.
pub fn put(conn: &Connection, msg: &NewMessage) -> anyhow::Result<StoredMessage> {
    if let Some(existing) = get_by_client_msg_id(conn, msg.conversation_id, msg.client_msg_id) {
        return Ok(existing);
    }

    let content = serde_json::to_string(msg.content)?;
    let inserted = conn.execute(
        "INSERT INTO messages
            (conversation_id, seq, client_msg_id, send_id, session_type, msg_type, content, send_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(conversation_id, client_msg_id) DO NOTHING",
        rusqlite::params![
            msg.conversation_id,
            msg.seq,
            msg.client_msg_id,
            msg.send_id,
            msg.session_type,
            msg.msg_type,
            content,
            msg.send_at,
        ],
    )?;

    if inserted == 0 {
        // Lost the race to a concurrent retry; the winner's row is canonical.
        return get_by_client_msg_id(conn, msg.conversation_id, msg.client_msg_id)
            .ok_or_else(|| anyhow::anyhow!("duplicate message row vanished"));
    }

    conn.prepare(
        "SELECT rowid, * FROM messages WHERE conversation_id = ?1 AND seq = ?2",
    )?
    .query_row(rusqlite::params![msg.conversation_id, msg.seq], row_to_message)
    .map_err(|e| anyhow::anyhow!("failed to read created message: {e}"))
}

pub fn get_by_client_msg_id(
    conn: &Connection,
    conversation_id: &str,
    client_msg_id: &str,
) -> Option<StoredMessage> {
    conn.prepare(
        "SELECT rowid, * FROM messages WHERE conversation_id = ?1 AND client_msg_id = ?2 LIMIT 1",
    )
    .ok()?
    .query_row(rusqlite::params![conversation_id, client_msg_id], row_to_message)
    .ok()
}

/// Messages with begin_seq <= seq <= end_seq, ascending, truncated to limit.
pub fn get_range(
    conn: &Connection,
    conversation_id: &str,
    begin_seq: i64,
    end_seq: i64,
    limit: i64,
) -> Vec<StoredMessage> {
    let safe_limit = limit.clamp(1, MAX_RANGE_LIMIT);

    let mut stmt = match conn.prepare(
        "SELECT rowid, * FROM messages
         WHERE conversation_id = ?1 AND seq >= ?2 AND seq <= ?3
         ORDER BY seq ASC LIMIT ?4",
    ) {
        Ok(s) => s,
        Err(_) => return vec![],
    };
    stmt.query_map(
        rusqlite::params![conversation_id, begin_seq, end_seq, safe_limit],
        row_to_message,
    )
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default()
}

pub fn max_seq(conn: &Connection, conversation_id: &str) -> i64 {
    conn.prepare("SELECT COALESCE(MAX(seq), 0) FROM messages WHERE conversation_id = ?1")
        .and_then(|mut s| s.query_row(rusqlite::params![conversation_id], |row| row.get(0)))
        .unwrap_or(0)
}

/// One row per conversation at its given seq, for last-message enrichment.
pub fn batch_get_by_max_seq(
    conn: &Connection,
    seqs: &HashMap<String, i64>,
) -> HashMap<String, StoredMessage> {
    let mut out = HashMap::with_capacity(seqs.len());
    let mut stmt = match conn
        .prepare("SELECT rowid, * FROM messages WHERE conversation_id = ?1 AND seq = ?2")
    {
        Ok(s) => s,
        Err(_) => return out,
    };
    for (conversation_id, seq) in seqs {
        if let Ok(msg) = stmt.query_row(rusqlite::params![conversation_id, seq], row_to_message) {
            out.insert(conversation_id.clone(), msg);
        }
    }
    out
}

pub fn set_status(conn: &Connection, conversation_id: &str, seq: i64, status: i32) -> bool {
    conn.execute(
        "UPDATE messages SET status = ?3 WHERE conversation_id = ?1 AND seq = ?2",
        rusqlite::params![conversation_id, seq, status],
    )
    .map(|n| n > 0)
    .unwrap_or(false)
}
