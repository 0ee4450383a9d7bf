//! SQLite-backed customer and segment store.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{fmt_time, parse_optional_time, parse_time};

use super::{
    CreateCustomerRequest, CreateSegmentRequest, Customer, CustomerError, CustomerField,
    CustomerStore, RuleCombinator, Segment, SegmentRules,
};

/// SQLite-backed customer store.
pub struct SqliteCustomerStore {
    conn: Mutex<Connection>,
}

impl SqliteCustomerStore {
    /// Create a new SQLite customer store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, CustomerError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite customer store (useful for testing).
    pub fn in_memory() -> Result<Self, CustomerError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CustomerError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS customers (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                phone TEXT,
                total_spend REAL NOT NULL DEFAULT 0,
                visit_count INTEGER NOT NULL DEFAULT 0,
                last_active_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_customers_owner ON customers(owner_id, id);

            CREATE TABLE IF NOT EXISTS segments (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                rules TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn field_expr(field: CustomerField) -> &'static str {
        match field {
            CustomerField::TotalSpend => "total_spend",
            CustomerField::VisitCount => "visit_count",
            CustomerField::DaysInactive => {
                "(julianday('now') - julianday(COALESCE(last_active_at, created_at)))"
            }
        }
    }

    fn build_where_clause(
        owner_id: &str,
        rules: Option<&SegmentRules>,
        after: Option<&str>,
    ) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = vec!["owner_id = ?".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(owner_id.to_string())];

        if let Some(after) = after {
            conditions.push("id > ?".to_string());
            params.push(Box::new(after.to_string()));
        }

        if let Some(rules) = rules.filter(|r| !r.conditions.is_empty()) {
            let predicates: Vec<String> = rules
                .conditions
                .iter()
                .map(|c| format!("{} {} ?", Self::field_expr(c.field), c.op.sql_operator()))
                .collect();
            params.extend(
                rules
                    .conditions
                    .iter()
                    .map(|c| Box::new(c.value) as Box<dyn rusqlite::ToSql>),
            );

            let joiner = match rules.combinator {
                RuleCombinator::All => " AND ",
                RuleCombinator::Any => " OR ",
            };
            conditions.push(format!("({})", predicates.join(joiner)));
        }

        (format!("WHERE {}", conditions.join(" AND ")), params)
    }

    fn row_to_customer(row: &rusqlite::Row) -> rusqlite::Result<Customer> {
        Ok(Customer {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            phone: row.get(4)?,
            total_spend: row.get(5)?,
            visit_count: row.get(6)?,
            last_active_at: parse_optional_time(row.get(7)?),
            created_at: parse_time(&row.get::<_, String>(8)?),
        })
    }
}

impl CustomerStore for SqliteCustomerStore {
    fn create_customer(&self, request: CreateCustomerRequest) -> Result<Customer, CustomerError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO customers (id, owner_id, name, email, phone, total_spend, visit_count, last_active_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                request.owner_id,
                request.name,
                request.email,
                request.phone,
                request.total_spend,
                request.visit_count,
                request.last_active_at.map(fmt_time),
                fmt_time(now),
            ],
        )
        .map_err(db_err)?;

        Ok(Customer {
            id,
            owner_id: request.owner_id,
            name: request.name,
            email: request.email,
            phone: request.phone,
            total_spend: request.total_spend,
            visit_count: request.visit_count,
            last_active_at: request.last_active_at,
            created_at: now,
        })
    }

    fn create_segment(&self, request: CreateSegmentRequest) -> Result<Segment, CustomerError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let rules_json =
            serde_json::to_string(&request.rules).map_err(|e| CustomerError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO segments (id, owner_id, name, rules, created_at) VALUES (?, ?, ?, ?, ?)",
            params![id, request.owner_id, request.name, rules_json, fmt_time(now)],
        )
        .map_err(db_err)?;

        Ok(Segment {
            id,
            owner_id: request.owner_id,
            name: request.name,
            rules: request.rules,
            created_at: now,
        })
    }

    fn get_segment(&self, id: &str) -> Result<Option<Segment>, CustomerError> {
        let conn = self.conn.lock().unwrap();

        let row = conn
            .query_row(
                "SELECT id, owner_id, name, rules, created_at FROM segments WHERE id = ?",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some((id, owner_id, name, rules_json, created_at)) = row else {
            return Ok(None);
        };

        let rules: SegmentRules = serde_json::from_str(&rules_json)
            .map_err(|e| CustomerError::Database(format!("corrupt segment rules: {}", e)))?;

        Ok(Some(Segment {
            id,
            owner_id,
            name,
            rules,
            created_at: parse_time(&created_at),
        }))
    }

    fn find_by_owner_and_segment(
        &self,
        owner_id: &str,
        rules: Option<&SegmentRules>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Customer>, CustomerError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, mut params) = Self::build_where_clause(owner_id, rules, after);
        let sql = format!(
            "SELECT id, owner_id, name, email, phone, total_spend, visit_count, last_active_at, created_at FROM customers {} ORDER BY id ASC LIMIT ?",
            where_clause
        );
        params.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_customer)
            .map_err(db_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> CustomerError {
    CustomerError::Database(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customer::{Comparison, SegmentCondition};
    use chrono::Duration;

    fn create_test_store() -> SqliteCustomerStore {
        SqliteCustomerStore::in_memory().unwrap()
    }

    fn customer(owner: &str, name: &str, spend: f64, visits: u32) -> CreateCustomerRequest {
        CreateCustomerRequest {
            owner_id: owner.to_string(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: None,
            total_spend: spend,
            visit_count: visits,
            last_active_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_find_all_for_owner() {
        let store = create_test_store();
        store.create_customer(customer("alice", "Ann", 10.0, 1)).unwrap();
        store.create_customer(customer("alice", "Ben", 20.0, 2)).unwrap();
        store.create_customer(customer("bob", "Cal", 30.0, 3)).unwrap();

        let found = store
            .find_by_owner_and_segment("alice", None, None, 100)
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|c| c.owner_id == "alice"));
    }

    #[test]
    fn test_cursor_pagination_visits_everyone_once() {
        let store = create_test_store();
        for i in 0..7 {
            store
                .create_customer(customer("alice", &format!("C{}", i), 0.0, 0))
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = store
                .find_by_owner_and_segment("alice", None, cursor.as_deref(), 3)
                .unwrap();
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|c| c.id.clone());
            seen.extend(page.into_iter().map(|c| c.id));
        }

        assert_eq!(seen.len(), 7);
        let mut deduped = seen.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), 7);
    }

    #[test]
    fn test_segment_rules_all() {
        let store = create_test_store();
        store.create_customer(customer("alice", "Big", 500.0, 10)).unwrap();
        store.create_customer(customer("alice", "Rich", 500.0, 1)).unwrap();
        store.create_customer(customer("alice", "Small", 5.0, 10)).unwrap();

        let rules = SegmentRules {
            combinator: RuleCombinator::All,
            conditions: vec![
                SegmentCondition {
                    field: CustomerField::TotalSpend,
                    op: Comparison::Gte,
                    value: 100.0,
                },
                SegmentCondition {
                    field: CustomerField::VisitCount,
                    op: Comparison::Gt,
                    value: 5.0,
                },
            ],
        };

        let found = store
            .find_by_owner_and_segment("alice", Some(&rules), None, 100)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Big");
    }

    #[test]
    fn test_segment_rules_any() {
        let store = create_test_store();
        store.create_customer(customer("alice", "Big", 500.0, 0)).unwrap();
        store.create_customer(customer("alice", "Loyal", 0.0, 50)).unwrap();
        store.create_customer(customer("alice", "Neither", 1.0, 1)).unwrap();

        let rules = SegmentRules {
            combinator: RuleCombinator::Any,
            conditions: vec![
                SegmentCondition {
                    field: CustomerField::TotalSpend,
                    op: Comparison::Gt,
                    value: 100.0,
                },
                SegmentCondition {
                    field: CustomerField::VisitCount,
                    op: Comparison::Gte,
                    value: 50.0,
                },
            ],
        };

        let found = store
            .find_by_owner_and_segment("alice", Some(&rules), None, 100)
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_days_inactive_condition() {
        let store = create_test_store();
        let mut stale = customer("alice", "Stale", 0.0, 0);
        stale.last_active_at = Some(Utc::now() - Duration::days(90));
        store.create_customer(stale).unwrap();
        store.create_customer(customer("alice", "Fresh", 0.0, 0)).unwrap();

        let rules = SegmentRules {
            combinator: RuleCombinator::All,
            conditions: vec![SegmentCondition {
                field: CustomerField::DaysInactive,
                op: Comparison::Gt,
                value: 30.0,
            }],
        };

        let found = store
            .find_by_owner_and_segment("alice", Some(&rules), None, 100)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Stale");
    }

    #[test]
    fn test_segment_roundtrip() {
        let store = create_test_store();
        let rules = SegmentRules {
            combinator: RuleCombinator::Any,
            conditions: vec![SegmentCondition {
                field: CustomerField::VisitCount,
                op: Comparison::Eq,
                value: 0.0,
            }],
        };
        let segment = store
            .create_segment(CreateSegmentRequest {
                owner_id: "alice".to_string(),
                name: "Never visited".to_string(),
                rules: rules.clone(),
            })
            .unwrap();

        let fetched = store.get_segment(&segment.id).unwrap().unwrap();
        assert_eq!(fetched.rules, rules);
        assert!(store.get_segment("missing").unwrap().is_none());
    }
}
