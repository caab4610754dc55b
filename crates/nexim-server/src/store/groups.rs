use rusqlite::Connection;

use super::now_millis;

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub group_id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: i64,
}

fn row_to_group(row: &rusqlite::Row) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        group_id: row.get("group_id")?,
        name: row.get("name")?,
        owner_id: row.get("owner_id")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create(
    conn: &Connection,
    group_id: &str,
    name: &str,
    owner_id: &str,
) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "INSERT INTO groups (group_id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(group_id) DO NOTHING",
        rusqlite::params![group_id, name, owner_id, now_millis()],
    )?;
    Ok(n > 0)
}

pub fn get(conn: &Connection, group_id: &str) -> Option<GroupRow> {
    conn.prepare("SELECT * FROM groups WHERE group_id = ?1 LIMIT 1")
        .ok()?
        .query_row(rusqlite::params![group_id], row_to_group)
        .ok()
}

pub fn add_member(conn: &Connection, group_id: &str, user_id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(group_id, user_id) DO NOTHING",
        rusqlite::params![group_id, user_id, now_millis()],
    )?;
    Ok(n > 0)
}

pub fn remove_member(conn: &Connection, group_id: &str, user_id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        rusqlite::params![group_id, user_id],
    )?;
    Ok(n > 0)
}

pub fn members(conn: &Connection, group_id: &str) -> Vec<String> {
    conn.prepare("SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY joined_at ASC")
        .and_then(|mut s| {
            s.query_map(rusqlite::params![group_id], |row| row.get(0))
                .map(|rows| rows.filter_map(|r| r.ok()).collect::<Vec<_>>())
        })
        .unwrap_or_default()
}

pub fn is_member(conn: &Connection, group_id: &str, user_id: &str) -> bool {
    conn.prepare("SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2")
        .and_then(|mut s| s.exists(rusqlite::params![group_id, user_id]))
        .unwrap_or(false)
}
