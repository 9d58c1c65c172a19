// SQLite-backed token vault
// One row, one JSON value; a single-statement write keeps the pair atomic

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::{TokenPair, TokenVault};

/// Key under which the token record is stored
const RECORD_KEY: &str = "session:tokens";

/// Durable vault over a local SQLite database.
///
/// The whole pair is serialized into one `auth_kv` row, so SQLite's
/// per-statement atomicity gives the all-or-neither guarantee without any
/// extra transaction bookkeeping. The connection itself is not thread-safe,
/// hence the mutex.
pub struct SqliteVault {
    conn: Mutex<Connection>,
}

impl SqliteVault {
    /// Open (and if necessary create) the vault database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create vault directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open token vault: {}", path.display()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to initialize token vault schema")?;

        tracing::info!("token vault opened: {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl TokenVault for SqliteVault {
    fn write(&self, record: &TokenPair) -> Result<()> {
        let json = serde_json::to_string(record).context("Failed to serialize token record")?;

        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("token vault lock poisoned"))?;

        conn.execute(
            "INSERT OR REPLACE INTO auth_kv (key, value) VALUES (?1, ?2)",
            params![RECORD_KEY, json],
        )
        .context("Failed to persist token record")?;

        Ok(())
    }

    fn read(&self) -> Result<Option<TokenPair>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("token vault lock poisoned"))?;

        let json: Option<String> = conn
            .query_row(
                "SELECT value FROM auth_kv WHERE key = ?1",
                [RECORD_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load token record")?;

        match json {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Failed to parse stored token record")?,
            )),
            None => Ok(None),
        }
    }

    fn erase(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("token vault lock poisoned"))?;

        conn.execute("DELETE FROM auth_kv WHERE key = ?1", [RECORD_KEY])
            .context("Failed to erase token record")?;

        Ok(())
    }
}
