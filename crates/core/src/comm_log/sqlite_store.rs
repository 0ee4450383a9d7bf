//! SQLite-backed communication log.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection};

use crate::db::{fmt_time, parse_time};

use super::{CommLogError, CommLogStore, LogEntry, LogStatus};

/// SQLite caps bound parameters per statement; updates are chunked below it.
const MAX_IDS_PER_STATEMENT: usize = 500;

/// SQLite-backed communication log store.
pub struct SqliteCommLogStore {
    conn: Mutex<Connection>,
}

impl SqliteCommLogStore {
    /// Create a new SQLite log store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, CommLogError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite log store (useful for testing).
    pub fn in_memory() -> Result<Self, CommLogError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CommLogError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS communication_log (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (campaign_id, customer_id, attempt)
            );

            CREATE INDEX IF NOT EXISTS idx_comm_log_campaign ON communication_log(campaign_id);
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<LogEntry> {
        let status_str: String = row.get(5)?;
        let status = status_str.parse::<LogStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(LogEntry {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            customer_id: row.get(2)?,
            recipient: row.get(3)?,
            attempt: row.get(4)?,
            status,
            error: row.get(6)?,
            created_at: parse_time(&row.get::<_, String>(7)?),
            updated_at: parse_time(&row.get::<_, String>(8)?),
        })
    }
}

impl CommLogStore for SqliteCommLogStore {
    fn insert_many(&self, entries: &[LogEntry]) -> Result<(), CommLogError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO communication_log (id, campaign_id, customer_id, recipient, attempt, status, error, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(db_err)?;

            for entry in entries {
                stmt.execute(params![
                    entry.id,
                    entry.campaign_id,
                    entry.customer_id,
                    entry.recipient,
                    entry.attempt,
                    entry.status.as_str(),
                    entry.error,
                    fmt_time(entry.created_at),
                    fmt_time(entry.updated_at),
                ])
                .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)
    }

    fn bulk_update_status(
        &self,
        campaign_id: &str,
        ids: &[String],
        status: LogStatus,
        error: Option<&str>,
    ) -> Result<usize, CommLogError> {
        if !status.is_terminal() {
            return Err(CommLogError::InvalidStatus(status));
        }
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        let now = fmt_time(Utc::now());
        let mut changed = 0;

        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "UPDATE communication_log SET status = ?, error = ?, updated_at = ? WHERE status = 'pending' AND campaign_id = ? AND id IN ({})",
                placeholders
            );

            let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
                Box::new(status.as_str()),
                Box::new(error.map(str::to_string)),
                Box::new(now.clone()),
                Box::new(campaign_id.to_string()),
            ];
            values.extend(chunk.iter().map(|id| Box::new(id.clone()) as Box<dyn rusqlite::ToSql>));

            changed += tx
                .execute(&sql, params_from_iter(values.iter().map(|v| v.as_ref())))
                .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        Ok(changed)
    }

    fn list_for_campaign(&self, campaign_id: &str) -> Result<Vec<LogEntry>, CommLogError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT id, campaign_id, customer_id, recipient, attempt, status, error, created_at, updated_at FROM communication_log WHERE campaign_id = ? ORDER BY created_at ASC, id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![campaign_id], Self::row_to_entry)
            .map_err(db_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> CommLogError {
    CommLogError::Database(e.to_string())
}
