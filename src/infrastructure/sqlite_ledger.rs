use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use crate::domain::{
    entities::{Admission, IdempotencyKey, LedgerState},
    ports::DedupLedger,
};

const SCHEMA_VERSION: i32 = 1;

/// Ledger backed by a SQLite file so admissions survive restarts.
///
/// rusqlite's `Connection` is not `Sync`, so it sits behind a mutex and every
/// call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create ledger dir: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open ledger at {}", path.display()))?;
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("failed to set ledger journal mode")?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(journal_mode = %journal_mode, "ledger is not running in WAL mode");
        }
        conn.execute_batch("PRAGMA synchronous = FULL; PRAGMA busy_timeout = 5000;")
            .context("failed to configure ledger pragmas")?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory ledger")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        let current: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current > SCHEMA_VERSION {
            anyhow::bail!(
                "ledger schema version {current} is newer than supported version {SCHEMA_VERSION}"
            );
        }
        if current < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS admitted_keys (
                    key TEXT PRIMARY KEY,
                    state TEXT NOT NULL,
                    admitted_at TEXT NOT NULL,
                    committed_at TEXT
                );
                "#,
            )
            .context("failed to create ledger schema")?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| anyhow!("ledger connection mutex poisoned"))?;
            op(&guard)
        })
        .await
        .context("ledger task panicked")?
    }
}

fn read_state(conn: &Connection, key: &str) -> Result<Option<LedgerState>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT state FROM admitted_keys WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(None),
        Some(raw) => LedgerState::parse(&raw)
            .map(Some)
            .ok_or_else(|| anyhow!("unknown ledger state {raw:?} for key {key}")),
    }
}

#[async_trait]
impl DedupLedger for SqliteLedger {
    async fn admit(&self, key: &IdempotencyKey) -> Result<Admission> {
        let key = key.as_str().to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO admitted_keys (key, state, admitted_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO NOTHING",
                params![
                    key,
                    LedgerState::Admitted.as_str(),
                    chrono::Utc::now().to_rfc3339()
                ],
            )?;
            if inserted == 1 {
                return Ok(Admission::Admitted);
            }
            let state = read_state(conn, &key)?.unwrap_or(LedgerState::Admitted);
            Ok(Admission::AlreadySeen(state))
        })
        .await
    }

    async fn commit(&self, key: &IdempotencyKey) -> Result<()> {
        let key = key.as_str().to_string();
        self.with_conn(move |conn| {
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO admitted_keys (key, state, admitted_at, committed_at) VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(key) DO UPDATE SET state = excluded.state, committed_at = excluded.committed_at",
                params![key, LedgerState::Committed.as_str(), now],
            )?;
            Ok(())
        })
        .await
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<bool> {
        let key = key.as_str().to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM admitted_keys WHERE key = ?1 AND state = ?2",
                params![key, LedgerState::Admitted.as_str()],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn state(&self, key: &IdempotencyKey) -> Result<Option<LedgerState>> {
        let key = key.as_str().to_string();
        self.with_conn(move |conn| read_state(conn, &key)).await
    }
}
