//! Durable sequence state: the per-conversation floor written by the
//! allocator, and per-user read positions.

use rusqlite::Connection;

pub fn get_floor(conn: &Connection, conversation_id: &str) -> i64 {
    conn.prepare("SELECT max_seq FROM conversation_seq WHERE conversation_id = ?1")
        .and_then(|mut s| s.query_row(rusqlite::params![conversation_id], |row| row.get(0)))
        .unwrap_or(0)
}

/// Persist the floor; never moves it backwards.
pub fn put_floor(conn: &Connection, conversation_id: &str, max_seq: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO conversation_seq (conversation_id, max_seq) VALUES (?1, ?2)
         ON CONFLICT(conversation_id) DO UPDATE SET max_seq = MAX(max_seq, excluded.max_seq)",
        rusqlite::params![conversation_id, max_seq],
    )?;
    Ok(())
}

pub fn get_read_seq(conn: &Connection, user_id: &str, conversation_id: &str) -> i64 {
    conn.prepare("SELECT read_seq FROM user_seq WHERE user_id = ?1 AND conversation_id = ?2")
        .and_then(|mut s| s.query_row(rusqlite::params![user_id, conversation_id], |row| row.get(0)))
        .unwrap_or(0)
}

/// Advance the read position; lowering is a no-op. Returns the stored value.
pub fn advance_read_seq(
    conn: &Connection,
    user_id: &str,
    conversation_id: &str,
    read_seq: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO user_seq (user_id, conversation_id, read_seq) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id, conversation_id) DO UPDATE SET read_seq = MAX(read_seq, excluded.read_seq)",
        rusqlite::params![user_id, conversation_id, read_seq.max(0)],
    )?;
    Ok(get_read_seq(conn, user_id, conversation_id))
}
