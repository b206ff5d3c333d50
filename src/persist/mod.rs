use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::config::DbConfig;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

use crate::config::{ConfigPaths, PersistOptions};

mod schema;
pub mod debounce;

pub use debounce::{DebouncedWriter, WriteOutcome};

/// The three logical keys the store persists under. Everything the
/// application owns serializes to JSON beneath one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistKey {
    History,
    Projects,
    GlobalTags,
}

impl PersistKey {
    pub fn as_str(self) -> &'static str {
        match self {
            PersistKey::History => "history",
            PersistKey::Projects => "projects",
            PersistKey::GlobalTags => "globalTags",
        }
    }
}

impl std::fmt::Display for PersistKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key-to-JSON-value store backed by SQLite. Connections are opened
/// per call; WAL mode keeps concurrent readers cheap and the schema is
/// created on first use.
#[derive(Clone)]
pub struct PersistenceEngine {
    db_path: Arc<PathBuf>,
    options: Arc<PersistOptions>,
}

impl PersistenceEngine {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    /// Fetch the stored value for a key, `None` when the key has never
    /// been written.
    pub fn get(&self, key: PersistKey) -> Result<Option<serde_json::Value>> {
        let conn = self.connect()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("reading key '{key}'"))?;
        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing stored JSON for key '{key}'"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Upsert the value for a key.
    pub fn put(&self, key: PersistKey, value: &serde_json::Value) -> Result<()> {
        let raw = serde_json::to_string(value)
            .with_context(|| format!("serialising value for key '{key}'"))?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            updated_at = excluded.updated_at",
            params![key.as_str(), raw, now],
        )
        .with_context(|| format!("writing key '{key}'"))?;
        Ok(())
    }
}

pub fn init(paths: &ConfigPaths, options: &PersistOptions) -> Result<PersistenceEngine> {
    let db_path = &paths.database_path;
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, options)?;
    schema::apply(&conn)?;
    Ok(PersistenceEngine {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(options.clone()),
    })
}

fn prepare_connection(conn: &Connection, options: &PersistOptions) -> Result<()> {
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)
        .context("enabling foreign keys")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        options.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::ConfigPaths;
    use tempfile::TempDir;

    pub fn temp_engine(temp: &TempDir) -> anyhow::Result<PersistenceEngine> {
        let paths = ConfigPaths::for_base_dir(temp.path());
        paths.ensure_directories()?;
        let mut options = PersistOptions::default();
        options.database_path = paths.database_path.clone();
        init(&paths, &options)
    }
}
