//! SQLite persistence for symbol records.
//!
//! # Storage layout
//!
//! A single table `symbols` is created (if it does not already exist):
//!
//! | column     | type | description                                  |
//! |------------|------|----------------------------------------------|
//! | id         | TEXT | Symbol id, primary key                       |
//! | record     | TEXT | JSON-encoded [`Symbol`] (extra fields kept)  |
//! | updated_at | TEXT | RFC-3339 time of the last write (UTC)        |
//!
//! Every mutation upserts exactly one row; nothing is ever rewritten in
//! bulk.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use flicknest_types::Symbol;
use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::warn;

/// Errors raised by the SQLite backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// SQLite-backed table of symbol records.
pub struct SymbolBackend {
    pub(crate) conn: Connection,
}

impl SymbolBackend {
    /// Open (or create) a persistent database at `path`.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let conn = Connection::open(path)?;
        let backend = Self { conn };
        backend.init_schema()?;
        Ok(backend)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        let backend = Self { conn };
        backend.init_schema()?;
        Ok(backend)
    }

    fn init_schema(&self) -> Result<(), BackendError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS symbols (
                id         TEXT NOT NULL PRIMARY KEY,
                record     TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Read every stored record.
    ///
    /// Rows whose JSON no longer decodes are skipped with a warning so one
    /// damaged record cannot hide the rest of the table.
    pub fn load_all(&self) -> Result<BTreeMap<String, Symbol>, BackendError> {
        let mut stmt = self.conn.prepare("SELECT id, record FROM symbols")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut symbols = BTreeMap::new();
        for row in rows {
            let (id, record) = row?;
            match serde_json::from_str::<Symbol>(&record) {
                Ok(symbol) => {
                    symbols.insert(id, symbol);
                }
                Err(e) => warn!(id = %id, error = %e, "skipping unreadable symbol record"),
            }
        }
        Ok(symbols)
    }

    /// Insert or replace the record for `id`.
    pub fn upsert(&self, id: &str, symbol: &Symbol) -> Result<(), BackendError> {
        let record = serde_json::to_string(symbol)?;
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO symbols (id, record, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
            params![id, record, now],
        )?;
        Ok(())
    }

    /// Write many records in one transaction.
    pub fn upsert_all(&mut self, symbols: &BTreeMap<String, Symbol>) -> Result<(), BackendError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        for (id, symbol) in symbols {
            let record = serde_json::to_string(symbol)?;
            tx.execute(
                "INSERT INTO symbols (id, record, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
                params![id, record, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Number of stored rows.
    pub fn count(&self) -> Result<usize, BackendError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
