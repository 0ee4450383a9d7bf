//! SQLite-backed campaign store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{fmt_time, parse_optional_time, parse_time};

use super::{
    Campaign, CampaignError, CampaignStatus, CampaignStore, CounterDelta, CreateCampaignRequest,
    DeliveryCounters,
};

const SELECT_COLUMNS: &str = "id, name, message_template, owner_id, segment_id, status, scheduled_at, failed_count, sent_count, delivered_count, failed_delivery_count, last_run_at, created_at, updated_at";

/// SQLite-backed campaign store.
pub struct SqliteCampaignStore {
    conn: Mutex<Connection>,
}

impl SqliteCampaignStore {
    /// Create a new SQLite campaign store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, CampaignError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite campaign store (useful for testing).
    pub fn in_memory() -> Result<Self, CampaignError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CampaignError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                message_template TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                segment_id TEXT,
                status TEXT NOT NULL,
                scheduled_at TEXT,
                failed_count INTEGER NOT NULL DEFAULT 0,
                sent_count INTEGER NOT NULL DEFAULT 0,
                delivered_count INTEGER NOT NULL DEFAULT 0,
                failed_delivery_count INTEGER NOT NULL DEFAULT 0,
                last_run_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_campaigns_status_scheduled
                ON campaigns(status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_campaigns_owner ON campaigns(owner_id);
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn row_to_campaign(row: &rusqlite::Row) -> rusqlite::Result<Campaign> {
        let status_str: String = row.get(5)?;
        let status = status_str.parse::<CampaignStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;

        Ok(Campaign {
            id: row.get(0)?,
            name: row.get(1)?,
            message_template: row.get(2)?,
            owner_id: row.get(3)?,
            segment_id: row.get(4)?,
            status,
            scheduled_at: parse_optional_time(row.get(6)?),
            failed_count: row.get(7)?,
            counters: DeliveryCounters {
                sent: row.get::<_, i64>(8)? as u64,
                delivered: row.get::<_, i64>(9)? as u64,
                failed: row.get::<_, i64>(10)? as u64,
            },
            last_run_at: parse_optional_time(row.get(11)?),
            created_at: parse_time(&row.get::<_, String>(12)?),
            updated_at: parse_time(&row.get::<_, String>(13)?),
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Campaign>, CampaignError> {
        conn.query_row(
            &format!("SELECT {} FROM campaigns WHERE id = ?", SELECT_COLUMNS),
            params![id],
            Self::row_to_campaign,
        )
        .optional()
        .map_err(db_err)
    }

    fn ensure_exists(conn: &Connection, id: &str) -> Result<Campaign, CampaignError> {
        Self::fetch(conn, id)?.ok_or_else(|| CampaignError::NotFound(id.to_string()))
    }
}

impl CampaignStore for SqliteCampaignStore {
    fn create(&self, request: CreateCampaignRequest) -> Result<Campaign, CampaignError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO campaigns (id, name, message_template, owner_id, segment_id, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                request.name,
                request.message_template,
                request.owner_id,
                request.segment_id,
                CampaignStatus::Draft.as_str(),
                fmt_time(now),
                fmt_time(now),
            ],
        )
        .map_err(db_err)?;

        Ok(Campaign {
            id,
            name: request.name,
            message_template: request.message_template,
            owner_id: request.owner_id,
            segment_id: request.segment_id,
            status: CampaignStatus::Draft,
            scheduled_at: None,
            failed_count: 0,
            counters: DeliveryCounters::default(),
            last_run_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Campaign>, CampaignError> {
        let conn = self.conn.lock().unwrap();
        Self::fetch(&conn, id)
    }

    fn find_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, CampaignError> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "SELECT {} FROM campaigns WHERE status = ? AND scheduled_at IS NOT NULL AND scheduled_at <= ? ORDER BY scheduled_at ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![CampaignStatus::Scheduled.as_str(), fmt_time(now)],
                Self::row_to_campaign,
            )
            .map_err(db_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn transition(
        &self,
        id: &str,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool, CampaignError> {
        let conn = self.conn.lock().unwrap();

        if !from.can_transition_to(to) {
            let current = Self::ensure_exists(&conn, id)?.status;
            return Err(CampaignError::InvalidTransition {
                campaign_id: id.to_string(),
                from,
                to,
                current,
            });
        }

        let changed = conn
            .execute(
                "UPDATE campaigns SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
                params![to.as_str(), fmt_time(Utc::now()), id, from.as_str()],
            )
            .map_err(db_err)?;

        if changed == 0 {
            Self::ensure_exists(&conn, id)?;
            return Ok(false);
        }

        Ok(true)
    }

    fn schedule(&self, id: &str, at: DateTime<Utc>) -> Result<Campaign, CampaignError> {
        let conn = self.conn.lock().unwrap();

        // Rescheduling a not-yet-claimed campaign is allowed.
        let changed = conn
            .execute(
                "UPDATE campaigns SET status = ?, scheduled_at = ?, updated_at = ? WHERE id = ? AND status IN (?, ?)",
                params![
                    CampaignStatus::Scheduled.as_str(),
                    fmt_time(at),
                    fmt_time(Utc::now()),
                    id,
                    CampaignStatus::Draft.as_str(),
                    CampaignStatus::Scheduled.as_str(),
                ],
            )
            .map_err(db_err)?;

        let campaign = Self::ensure_exists(&conn, id)?;
        if changed == 0 {
            return Err(CampaignError::InvalidTransition {
                campaign_id: id.to_string(),
                from: CampaignStatus::Draft,
                to: CampaignStatus::Scheduled,
                current: campaign.status,
            });
        }

        Ok(campaign)
    }

    fn increment_counters(&self, id: &str, delta: CounterDelta) -> Result<(), CampaignError> {
        if delta.is_zero() {
            return Ok(());
        }

        let conn = self.conn.lock().unwrap();

        let changed = conn
            .execute(
                "UPDATE campaigns SET sent_count = sent_count + ?, delivered_count = delivered_count + ?, failed_delivery_count = failed_delivery_count + ?, updated_at = ? WHERE id = ?",
                params![
                    delta.sent as i64,
                    delta.delivered as i64,
                    delta.failed as i64,
                    fmt_time(Utc::now()),
                    id,
                ],
            )
            .map_err(db_err)?;

        if changed == 0 {
            return Err(CampaignError::NotFound(id.to_string()));
        }

        Ok(())
    }

    fn increment_failed_count(&self, id: &str) -> Result<u32, CampaignError> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            "UPDATE campaigns SET failed_count = failed_count + 1, updated_at = ? WHERE id = ? RETURNING failed_count",
            params![fmt_time(Utc::now()), id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| CampaignError::NotFound(id.to_string()))
    }

    fn set_last_run(&self, id: &str, at: DateTime<Utc>) -> Result<(), CampaignError> {
        let conn = self.conn.lock().unwrap();

        let changed = conn
            .execute(
                "UPDATE campaigns SET last_run_at = ?, updated_at = ? WHERE id = ?",
                params![fmt_time(at), fmt_time(Utc::now()), id],
            )
            .map_err(db_err)?;

        if changed == 0 {
            return Err(CampaignError::NotFound(id.to_string()));
        }

        Ok(())
    }
}

fn db_err(e: rusqlite::Error) -> CampaignError {
    CampaignError::Database(e.to_string())
}
