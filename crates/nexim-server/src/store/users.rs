use rusqlite::Connection;

use super::now_millis;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub user_id: String,
    pub nickname: String,
    pub avatar_url: String,
    pub salt: String,
    pub password_digest: String,
    pub created_at: i64,
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        user_id: row.get("user_id")?,
        nickname: row.get("nickname")?,
        avatar_url: row.get("avatar_url")?,
        salt: row.get("salt")?,
        password_digest: row.get("password_digest")?,
        created_at: row.get("created_at")?,
    })
}

/// Returns false when the user id is already taken.
pub fn create(
    conn: &Connection,
    user_id: &str,
    nickname: &str,
    avatar_url: &str,
    salt: &str,
    password_digest: &str,
) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "INSERT INTO users (user_id, nickname, avatar_url, salt, password_digest, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id) DO NOTHING",
        rusqlite::params![user_id, nickname, avatar_url, salt, password_digest, now_millis()],
    )?;
    Ok(n > 0)
}

pub fn get(conn: &Connection, user_id: &str) -> Option<UserRow> {
    conn.prepare("SELECT * FROM users WHERE user_id = ?1 LIMIT 1")
        .ok()?
        .query_row(rusqlite::params![user_id], row_to_user)
        .ok()
}

pub fn exists(conn: &Connection, user_id: &str) -> bool {
    conn.prepare("SELECT 1 FROM users WHERE user_id = ?1")
        .and_then(|mut s| s.exists(rusqlite::params![user_id]))
        .unwrap_or(false)
}

pub fn update_profile(
    conn: &Connection,
    user_id: &str,
    nickname: Option<&str>,
    avatar_url: Option<&str>,
) -> rusqlite::Result<usize> {
    match (nickname, avatar_url) {
        (None, None) => Ok(0),
        (Some(n), None) => conn.execute(
            "UPDATE users SET nickname = ?2 WHERE user_id = ?1",
            rusqlite::params![user_id, n],
        ),
        (None, Some(a)) => conn.execute(
            "UPDATE users SET avatar_url = ?2 WHERE user_id = ?1",
            rusqlite::params![user_id, a],
        ),
        (Some(n), Some(a)) => conn.execute(
            "UPDATE users SET nickname = ?2, avatar_url = ?3 WHERE user_id = ?1",
            rusqlite::params![user_id, n, a],
        ),
    }
}

pub fn batch_get(conn: &Connection, user_ids: &[String]) -> Vec<UserRow> {
    let mut out = Vec::with_capacity(user_ids.len());
    let mut stmt = match conn.prepare("SELECT * FROM users WHERE user_id = ?1 LIMIT 1") {
        Ok(s) => s,
        Err(_) => return out,
    };
    for id in user_ids {
        if let Ok(u) = stmt.query_row(rusqlite::params![id], row_to_user) {
            out.push(u);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn create_rejects_duplicate_id() {
        let store = Store::new_in_memory().unwrap();
        let conn = &store.conn();

        assert!(create(conn, "u___1", "Ann", "", "s", "d").unwrap());
        assert!(!create(conn, "u___1", "Bob", "", "s", "d").unwrap());

        let u = get(conn, "u___1").unwrap();
        assert_eq!(u.nickname, "Ann");
    }

    #[test]
    fn profile_update_and_batch_get() {
        let store = Store::new_in_memory().unwrap();
        let conn = &store.conn();
        create(conn, "u___1", "Ann", "", "s", "d").unwrap();
        create(conn, "u___2", "Bob", "", "s", "d").unwrap();

        update_profile(conn, "u___1", Some("Anna"), None).unwrap();
        assert_eq!(get(conn, "u___1").unwrap().nickname, "Anna");

        let users = batch_get(conn, &["u___2".into(), "u___9".into(), "u___1".into()]);
        assert_eq!(users.len(), 2);
    }
}
