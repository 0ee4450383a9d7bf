//! In-memory state of a single delivery batch.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::campaign::CounterDelta;
use crate::comm_log::LogStatus;

use super::types::{BatchStats, FlushTrigger};

/// A buffered terminal outcome for one message.
#[derive(Debug, Clone)]
pub(crate) struct Outcome {
    pub message_id: String,
    pub status: LogStatus,
    pub error: Option<String>,
}

/// Messages sharing a status and error, persisted with one bulk update.
#[derive(Debug)]
pub(crate) struct OutcomeGroup {
    pub status: LogStatus,
    pub error: Option<String>,
    pub message_ids: Vec<String>,
    /// Rows changed by the log update, once it has succeeded.
    pub log_rows: Option<usize>,
    /// Whether the counter increment for `log_rows` has been applied.
    pub counted: bool,
}

impl OutcomeGroup {
    pub fn is_done(&self) -> bool {
        self.log_rows.is_some() && self.counted
    }

    pub fn delta(&self) -> CounterDelta {
        let rows = self.log_rows.unwrap_or(0) as u64;
        match self.status {
            LogStatus::Delivered => CounterDelta::delivered(rows),
            _ => CounterDelta::failed(rows),
        }
    }
}

/// A set of outcomes swapped out of the pending buffer, applied as a unit.
///
/// Progress is tracked per group so a retry after a partial failure only
/// repeats the steps that did not succeed.
#[derive(Debug)]
pub(crate) struct FlushChunk {
    pub trigger: FlushTrigger,
    pub groups: Vec<OutcomeGroup>,
}

impl FlushChunk {
    pub fn new(trigger: FlushTrigger, outcomes: Vec<Outcome>) -> Self {
        let mut groups: Vec<OutcomeGroup> = Vec::new();
        for outcome in outcomes {
            match groups
                .iter_mut()
                .find(|g| g.status == outcome.status && g.error == outcome.error)
            {
                Some(group) => group.message_ids.push(outcome.message_id),
                None => groups.push(OutcomeGroup {
                    status: outcome.status,
                    error: outcome.error,
                    message_ids: vec![outcome.message_id],
                    log_rows: None,
                    counted: false,
                }),
            }
        }
        Self { trigger, groups }
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.message_ids.len()).sum()
    }
}

/// Mutable batch state, guarded by a `std::sync::Mutex`.
///
/// Never held across an await point.
#[derive(Debug)]
pub(crate) struct BatchState {
    /// Every message ever registered, used to clean the message index.
    pub registered: HashSet<String>,
    /// Registered messages still waiting for a receipt.
    pub outstanding: HashSet<String>,
    /// Messages with a recorded outcome (or discarded).
    pub seen: HashSet<String>,
    pub pending: Vec<Outcome>,
    pub queued: VecDeque<FlushChunk>,
    pub sealed: bool,
    pub evicted: bool,
    pub last_flush_at: Instant,
    pub last_activity: Instant,
    pub threshold_flushes: u64,
    pub staleness_flushes: u64,
    pub timer_flushes: u64,
    pub manual_flushes: u64,
    pub final_flushes: u64,
    pub failed_flushes: u64,
    pub outcomes_applied: u64,
    pub duplicates: u64,
}

impl BatchState {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            registered: HashSet::new(),
            outstanding: HashSet::new(),
            seen: HashSet::new(),
            pending: Vec::new(),
            queued: VecDeque::new(),
            sealed: false,
            evicted: false,
            last_flush_at: now,
            last_activity: now,
            threshold_flushes: 0,
            staleness_flushes: 0,
            timer_flushes: 0,
            manual_flushes: 0,
            final_flushes: 0,
            failed_flushes: 0,
            outcomes_applied: 0,
            duplicates: 0,
        }
    }

    /// Move pending outcomes into a queued chunk. Returns false if there
    /// was nothing to move.
    pub fn swap_pending(&mut self, trigger: FlushTrigger) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let outcomes = std::mem::take(&mut self.pending);
        self.queued.push_back(FlushChunk::new(trigger, outcomes));
        self.last_flush_at = Instant::now();
        true
    }

    /// Sealed, every message accounted for, and nothing left to persist.
    pub fn is_settled(&self) -> bool {
        self.sealed && self.outstanding.is_empty() && self.pending.is_empty() && self.queued.is_empty()
    }

    /// Sealed with no receipts outstanding; only buffered writes remain.
    pub fn awaiting_final_flush(&self) -> bool {
        self.sealed && self.outstanding.is_empty()
    }

    pub fn record_flush(&mut self, trigger: FlushTrigger, outcomes: usize) {
        match trigger {
            FlushTrigger::Threshold => self.threshold_flushes += 1,
            FlushTrigger::Staleness => self.staleness_flushes += 1,
            FlushTrigger::Timer => self.timer_flushes += 1,
            FlushTrigger::Manual => self.manual_flushes += 1,
            FlushTrigger::Final => self.final_flushes += 1,
        }
        self.outcomes_applied += outcomes as u64;
    }
}

/// A tracked batch: identity, state, and the primitives its task waits on.
pub(crate) struct Batch {
    pub batch_id: String,
    pub campaign_id: String,
    pub created_at: DateTime<Utc>,
    pub state: std::sync::Mutex<BatchState>,
    /// Single-flight guard for flushes.
    pub flush_lock: tokio::sync::Mutex<()>,
    /// Wakes the batch task for an out-of-cycle flush or settlement check.
    pub wake: Notify,
}

impl Batch {
    pub fn new(batch_id: String, campaign_id: String) -> Self {
        Self {
            batch_id,
            campaign_id,
            created_at: Utc::now(),
            state: std::sync::Mutex::new(BatchState::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
        }
    }

    pub fn stats(&self) -> BatchStats {
        let state = self.state.lock().unwrap();
        BatchStats {
            batch_id: self.batch_id.clone(),
            campaign_id: self.campaign_id.clone(),
            sealed: state.sealed,
            outstanding: state.outstanding.len(),
            pending: state.pending.len(),
            queued_chunks: state.queued.len(),
            threshold_flushes: state.threshold_flushes,
            staleness_flushes: state.staleness_flushes,
            timer_flushes: state.timer_flushes,
            manual_flushes: state.manual_flushes,
            final_flushes: state.final_flushes,
            failed_flushes: state.failed_flushes,
            outcomes_applied: state.outcomes_applied,
            duplicates: state.duplicates,
            created_at: self.created_at,
        }
    }
}
