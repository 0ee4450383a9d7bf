//! Communication log wrapper with injectable failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::comm_log::{CommLogError, CommLogStore, LogEntry, LogStatus};

/// Delegates to an inner store, failing a configurable number of
/// `insert_many` or `bulk_update_status` calls first.
pub struct FlakyCommLogStore {
    inner: Arc<dyn CommLogStore>,
    fail_inserts: AtomicUsize,
    fail_updates: AtomicUsize,
    update_calls: AtomicUsize,
}

impl FlakyCommLogStore {
    pub fn new(inner: Arc<dyn CommLogStore>) -> Self {
        Self {
            inner,
            fail_inserts: AtomicUsize::new(0),
            fail_updates: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` inserts fail with a database error.
    pub fn fail_next_inserts(&self, n: usize) {
        self.fail_inserts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` bulk updates fail with a database error.
    pub fn fail_next_updates(&self, n: usize) {
        self.fail_updates.store(n, Ordering::SeqCst);
    }

    /// Bulk updates attempted so far, including failed ones.
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl CommLogStore for FlakyCommLogStore {
    fn insert_many(&self, entries: &[LogEntry]) -> Result<(), CommLogError> {
        if take_failure(&self.fail_inserts) {
            return Err(CommLogError::Database("injected failure".to_string()));
        }
        self.inner.insert_many(entries)
    }

    fn bulk_update_status(
        &self,
        campaign_id: &str,
        ids: &[String],
        status: LogStatus,
        error: Option<&str>,
    ) -> Result<usize, CommLogError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);

        if take_failure(&self.fail_updates) {
            return Err(CommLogError::Database("injected failure".to_string()));
        }

        self.inner.bulk_update_status(campaign_id, ids, status, error)
    }

    fn list_for_campaign(&self, campaign_id: &str) -> Result<Vec<LogEntry>, CommLogError> {
        self.inner.list_for_campaign(campaign_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm_log::SqliteCommLogStore;

    fn flaky() -> FlakyCommLogStore {
        FlakyCommLogStore::new(Arc::new(SqliteCommLogStore::in_memory().unwrap()))
    }

    #[test]
    fn test_fails_requested_number_of_updates() {
        let store = flaky();
        store
            .insert_many(&[LogEntry::pending("m1", "c1", "cust1", "a@example.com", 1)])
            .unwrap();

        store.fail_next_updates(1);
        let ids = vec!["m1".to_string()];
        assert!(store
            .bulk_update_status("c1", &ids, LogStatus::Delivered, None)
            .is_err());
        assert_eq!(
            store
                .bulk_update_status("c1", &ids, LogStatus::Delivered, None)
                .unwrap(),
            1
        );
        assert_eq!(store.update_calls(), 2);
    }

    #[test]
    fn test_fails_requested_number_of_inserts() {
        let store = flaky();
        let entry = LogEntry::pending("m1", "c1", "cust1", "a@example.com", 1);

        store.fail_next_inserts(1);
        assert!(store.insert_many(std::slice::from_ref(&entry)).is_err());
        assert!(store.list_for_campaign("c1").unwrap().is_empty());

        store.insert_many(&[entry]).unwrap();
        assert_eq!(store.list_for_campaign("c1").unwrap().len(), 1);
    }
}
