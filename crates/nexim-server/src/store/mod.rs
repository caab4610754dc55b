pub mod conversations;
pub mod groups;
pub mod messages;
pub mod seq;
pub mod users;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{debug, info};

const SCHEMA_VERSION: i64 = 1;

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn new(path: &str) -> Result<Self> {
        let db_path = Path::new(path);
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create database directory {}", dir.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
            }
        }

        let conn =
            Connection::open(path).with_context(|| format!("failed to open database at {path}"))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for suffix in &["", "-wal", "-shm"] {
                let file_path = format!("{path}{suffix}");
                let _ =
                    std::fs::set_permissions(&file_path, std::fs::Permissions::from_mode(0o600));
            }
        }

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_pragmas()?;
        store.initialize_schema()?;

        Ok(store)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_pragmas()?;
        store.initialize_schema()?;

        Ok(store)
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
            )
            .context("failed to configure database pragmas")?;

        debug!("database pragmas configured");
        Ok(())
    }

    fn get_schema_version(&self) -> Result<i64> {
        let version: i64 = self
            .conn
            .lock()
            .unwrap()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .context("failed to read schema version")?;
        Ok(version)
    }

    fn set_schema_version(&self, version: i64) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .pragma_update(None, "user_version", version)
            .context("failed to set schema version")?;
        Ok(())
    }

    fn initialize_schema(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;

        if current_version == 0 {
            self.create_tables()?;
            self.set_schema_version(SCHEMA_VERSION)?;
            info!("created database schema v{SCHEMA_VERSION}");
            return Ok(());
        }

        if current_version != SCHEMA_VERSION {
            anyhow::bail!(
                "unsupported schema version {current_version} (expected {SCHEMA_VERSION})"
            );
        }

        Ok(())
    }

    fn create_tables(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                nickname TEXT NOT NULL DEFAULT '',
                avatar_url TEXT NOT NULL DEFAULT '',
                salt TEXT NOT NULL,
                password_digest TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS groups (
                group_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                joined_at INTEGER NOT NULL,
                PRIMARY KEY (group_id, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

            CREATE TABLE IF NOT EXISTS messages (
                conversation_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                client_msg_id TEXT NOT NULL,
                send_id TEXT NOT NULL,
                session_type INTEGER NOT NULL,
                msg_type INTEGER NOT NULL,
                content TEXT NOT NULL,
                send_at INTEGER NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (conversation_id, seq)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_client_msg
                ON messages(conversation_id, client_msg_id);",
            )
            .context("failed to create tables (part 1)")?;

        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS conversations (
                owner_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                conversation_type INTEGER NOT NULL,
                peer_user_id TEXT,
                group_id TEXT,
                recv_msg_opt INTEGER NOT NULL DEFAULT 0,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (owner_id, conversation_id)
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_owner_updated
                ON conversations(owner_id, updated_at, conversation_id);

            CREATE TABLE IF NOT EXISTS conversation_seq (
                conversation_id TEXT PRIMARY KEY,
                max_seq INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_seq (
                user_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                read_seq INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, conversation_id)
            );",
            )
            .context("failed to create tables (part 2)")?;

        Ok(())
    }
}
