//! Batch aggregator implementation.
//!
//! Each delivery run gets a batch. Outcomes from receipts are buffered per
//! batch and persisted in chunks: one bulk log update and one counter
//! increment per status group. A per-batch task drives timer flushes,
//! out-of-cycle flushes, retries after storage errors, settlement and idle
//! eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::campaign::{CampaignStatus, CampaignStore};
use crate::comm_log::{CommLogStore, LogStatus};
use crate::metrics;
use crate::vendor::DeliveryOutcome;

use super::batch::{Batch, FlushChunk, Outcome};
use super::config::AggregatorConfig;
use super::types::{AddOutcomeResult, AggregatorError, BatchStats, FlushReport, FlushTrigger};

/// Error recorded for messages whose receipt never arrived.
pub const RECEIPT_TIMEOUT_ERROR: &str = "delivery receipt timed out";

struct Inner {
    config: AggregatorConfig,
    comm_log: Arc<dyn CommLogStore>,
    campaigns: Arc<dyn CampaignStore>,
    batches: Mutex<HashMap<String, Arc<Batch>>>,
    /// message id -> batch id, for receipts that omit the batch.
    message_index: Mutex<HashMap<String, String>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    closed: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

/// Buffers delivery outcomes per batch and persists them in bulk.
pub struct BatchAggregator {
    inner: Arc<Inner>,
}

impl BatchAggregator {
    pub fn new(
        config: AggregatorConfig,
        comm_log: Arc<dyn CommLogStore>,
        campaigns: Arc<dyn CampaignStore>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Inner {
                config,
                comm_log,
                campaigns,
                batches: Mutex::new(HashMap::new()),
                message_index: Mutex::new(HashMap::new()),
                tasks: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                shutdown_tx,
            }),
        }
    }

    /// Start tracking a new batch for `campaign_id` and spawn its timer task.
    pub fn create_batch(&self, campaign_id: &str) -> Result<String, AggregatorError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(AggregatorError::Closed);
        }

        let batch_id = uuid::Uuid::new_v4().to_string();
        let batch = Arc::new(Batch::new(batch_id.clone(), campaign_id.to_string()));

        self.inner
            .batches
            .lock()
            .unwrap()
            .insert(batch_id.clone(), Arc::clone(&batch));
        metrics::ACTIVE_BATCHES.inc();

        let inner = Arc::clone(&self.inner);
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let task = tokio::spawn(run_batch(inner, batch, shutdown_rx));
        self.inner
            .tasks
            .lock()
            .unwrap()
            .insert(batch_id.clone(), task);

        debug!("Created batch {} for campaign {}", batch_id, campaign_id);
        Ok(batch_id)
    }

    /// Record that `message_id` was handed to the vendor and a receipt is expected.
    pub fn register_message(&self, batch_id: &str, message_id: &str) -> Result<(), AggregatorError> {
        let batch = self.inner.get(batch_id)?;
        {
            let mut state = batch.state.lock().unwrap();
            if state.evicted {
                return Err(AggregatorError::NotFound(batch_id.to_string()));
            }
            state.registered.insert(message_id.to_string());
            state.outstanding.insert(message_id.to_string());
            state.last_activity = Instant::now();
        }
        self.inner
            .message_index
            .lock()
            .unwrap()
            .insert(message_id.to_string(), batch_id.to_string());
        Ok(())
    }

    /// Stop expecting a receipt for `message_id` (the send was not accepted).
    ///
    /// A receipt that still arrives for it is treated as a duplicate.
    pub fn discard_message(&self, batch_id: &str, message_id: &str) -> Result<(), AggregatorError> {
        let batch = self.inner.get(batch_id)?;
        let wake = {
            let mut state = batch.state.lock().unwrap();
            state.outstanding.remove(message_id);
            state.seen.insert(message_id.to_string());
            state.last_activity = Instant::now();
            state.awaiting_final_flush()
        };
        if wake {
            batch.wake.notify_one();
        }
        Ok(())
    }

    /// Mark that no more messages will be registered. The batch settles once
    /// every outstanding message has an outcome persisted.
    pub fn seal_batch(&self, batch_id: &str) -> Result<(), AggregatorError> {
        let batch = self.inner.get(batch_id)?;
        {
            let mut state = batch.state.lock().unwrap();
            state.sealed = true;
            state.last_activity = Instant::now();
        }
        batch.wake.notify_one();
        Ok(())
    }

    /// Buffer a delivery outcome.
    ///
    /// Only messages registered in this batch are accepted; anything else is
    /// `UnknownMessage` and leaves the batch untouched. Never touches storage. When the buffer reaches the flush threshold or
    /// the last flush is stale, the buffer is swapped into a chunk and the
    /// batch task is woken to persist it.
    pub fn add_outcome(
        &self,
        batch_id: &str,
        message_id: &str,
        status: DeliveryOutcome,
        error: Option<String>,
    ) -> Result<AddOutcomeResult, AggregatorError> {
        let batch = self.inner.get(batch_id)?;
        let config = &self.inner.config;

        let wake = {
            let mut state = batch.state.lock().unwrap();
            if state.evicted {
                return Err(AggregatorError::NotFound(batch_id.to_string()));
            }
            if !state.registered.contains(message_id) {
                return Err(AggregatorError::UnknownMessage {
                    batch_id: batch_id.to_string(),
                    message_id: message_id.to_string(),
                });
            }
            if !state.seen.insert(message_id.to_string()) {
                state.duplicates += 1;
                return Ok(AddOutcomeResult::Duplicate);
            }

            state.outstanding.remove(message_id);
            state.pending.push(Outcome {
                message_id: message_id.to_string(),
                status: match status {
                    DeliveryOutcome::Delivered => LogStatus::Delivered,
                    DeliveryOutcome::Failed => LogStatus::Failed,
                },
                error,
            });
            state.last_activity = Instant::now();

            if state.pending.len() >= config.flush_threshold {
                state.swap_pending(FlushTrigger::Threshold)
            } else if state.last_flush_at.elapsed() > Duration::from_millis(config.max_staleness_ms)
            {
                state.swap_pending(FlushTrigger::Staleness)
            } else {
                state.awaiting_final_flush()
            }
        };

        if wake {
            batch.wake.notify_one();
        }
        Ok(AddOutcomeResult::Queued)
    }

    /// Persist everything buffered for the batch now.
    ///
    /// Single-flight: a concurrent call waits for the running flush and then
    /// persists whatever is left. Flushing an empty batch is a no-op.
    pub async fn flush(&self, batch_id: &str) -> Result<FlushReport, AggregatorError> {
        let batch = self.inner.get(batch_id)?;
        flush_batch(&self.inner, &batch, Some(FlushTrigger::Manual)).await
    }

    /// Batch a message was registered in, if it is still tracked.
    pub fn batch_for_message(&self, message_id: &str) -> Option<String> {
        self.inner
            .message_index
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
    }

    /// Whether the batch is still tracked (not settled or evicted).
    pub fn contains(&self, batch_id: &str) -> bool {
        self.inner.batches.lock().unwrap().contains_key(batch_id)
    }

    pub fn stats(&self, batch_id: &str) -> Option<BatchStats> {
        let batch = self.inner.batches.lock().unwrap().get(batch_id).cloned()?;
        Some(batch.stats())
    }

    pub fn all_stats(&self) -> Vec<BatchStats> {
        let batches: Vec<Arc<Batch>> = self.inner.batches.lock().unwrap().values().cloned().collect();
        let mut stats: Vec<BatchStats> = batches.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stats
    }

    /// Stop all batch tasks after a final flush attempt.
    ///
    /// Batches that could not be persisted are lost, as is anything still
    /// outstanding.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down batch aggregator");
        let _ = self.inner.shutdown_tx.send(());

        let tasks: Vec<(String, JoinHandle<()>)> =
            self.inner.tasks.lock().unwrap().drain().collect();
        for (batch_id, task) in tasks {
            if let Err(e) = task.await {
                warn!("Batch task {} ended abnormally: {}", batch_id, e);
            }
        }
        info!("Batch aggregator stopped");
    }
}

impl Inner {
    fn get(&self, batch_id: &str) -> Result<Arc<Batch>, AggregatorError> {
        self.batches
            .lock()
            .unwrap()
            .get(batch_id)
            .cloned()
            .ok_or_else(|| AggregatorError::NotFound(batch_id.to_string()))
    }

    fn evict(&self, batch: &Batch) {
        let registered = {
            let mut state = batch.state.lock().unwrap();
            state.evicted = true;
            std::mem::take(&mut state.registered)
        };

        if self.batches.lock().unwrap().remove(&batch.batch_id).is_some() {
            metrics::ACTIVE_BATCHES.dec();
        }

        let mut index = self.message_index.lock().unwrap();
        for message_id in registered {
            index.remove(&message_id);
        }
        drop(index);

        // The task is the caller; dropping the handle detaches it.
        self.tasks.lock().unwrap().remove(&batch.batch_id);
    }

    /// Mark the campaign completed once its batch has settled.
    ///
    /// A campaign that already left `active` (failed, cancelled) is left as is.
    fn complete_campaign(&self, campaign_id: &str) -> Result<(), AggregatorError> {
        let completed =
            self.campaigns
                .transition(campaign_id, CampaignStatus::Active, CampaignStatus::Completed)?;

        if completed {
            self.campaigns.set_last_run(campaign_id, Utc::now())?;
            metrics::CAMPAIGNS_FINISHED
                .with_label_values(&["completed"])
                .inc();
            info!("Campaign {} completed", campaign_id);
        } else {
            debug!(
                "Campaign {} no longer active at settlement; status left unchanged",
                campaign_id
            );
        }
        Ok(())
    }

    /// Apply one chunk, skipping steps that already succeeded.
    fn apply_chunk(&self, campaign_id: &str, chunk: &mut FlushChunk) -> Result<(), AggregatorError> {
        for group in chunk.groups.iter_mut().filter(|g| !g.is_done()) {
            if group.log_rows.is_none() {
                let rows = self.comm_log.bulk_update_status(
                    campaign_id,
                    &group.message_ids,
                    group.status,
                    group.error.as_deref(),
                )?;
                if rows < group.message_ids.len() {
                    debug!(
                        "{} of {} {} updates for campaign {} were already terminal",
                        group.message_ids.len() - rows,
                        group.message_ids.len(),
                        group.status,
                        campaign_id
                    );
                }
                group.log_rows = Some(rows);
            }

            if !group.counted {
                let delta = group.delta();
                if !delta.is_zero() {
                    self.campaigns.increment_counters(campaign_id, delta)?;
                }
                group.counted = true;
            }
        }
        Ok(())
    }
}

/// Persist queued chunks in order, optionally swapping the pending buffer
/// into a chunk first.
async fn flush_batch(
    inner: &Inner,
    batch: &Batch,
    take_pending: Option<FlushTrigger>,
) -> Result<FlushReport, AggregatorError> {
    let _guard = batch.flush_lock.lock().await;

    if let Some(trigger) = take_pending {
        batch.state.lock().unwrap().swap_pending(trigger);
    }

    let mut report = FlushReport::default();
    loop {
        let next = batch.state.lock().unwrap().queued.pop_front();
        let Some(mut chunk) = next else {
            break;
        };

        match inner.apply_chunk(&batch.campaign_id, &mut chunk) {
            Ok(()) => {
                let outcomes = chunk.len();
                let mut delivered = 0u64;
                let mut failed = 0u64;
                for group in &chunk.groups {
                    let rows = group.log_rows.unwrap_or(0) as u64;
                    match group.status {
                        LogStatus::Delivered => delivered += rows,
                        _ => failed += rows,
                    }
                }

                batch
                    .state
                    .lock()
                    .unwrap()
                    .record_flush(chunk.trigger, outcomes);
                metrics::FLUSHES
                    .with_label_values(&[chunk.trigger.as_str()])
                    .inc();
                metrics::OUTCOMES_PERSISTED
                    .with_label_values(&["delivered"])
                    .inc_by(delivered);
                metrics::OUTCOMES_PERSISTED
                    .with_label_values(&["failed"])
                    .inc_by(failed);

                debug!(
                    "Flushed {} outcomes for batch {} ({} flush)",
                    outcomes,
                    batch.batch_id,
                    chunk.trigger.as_str()
                );

                report.chunks += 1;
                report.outcomes += outcomes;
                report.delivered += delivered;
                report.failed += failed;
            }
            Err(e) => {
                {
                    let mut state = batch.state.lock().unwrap();
                    state.queued.push_front(chunk);
                    state.failed_flushes += 1;
                }
                metrics::FLUSH_FAILURES.inc();
                warn!("Flush failed for batch {}: {}", batch.batch_id, e);
                return Err(e);
            }
        }
    }

    Ok(report)
}

/// Per-batch task: timer flushes, woken flushes, retries, settlement and
/// idle eviction.
async fn run_batch(inner: Arc<Inner>, batch: Arc<Batch>, mut shutdown_rx: broadcast::Receiver<()>) {
    let interval = Duration::from_millis(inner.config.flush_interval_ms);
    let backoff = Duration::from_millis(inner.config.retry_backoff_ms);
    let idle_timeout = Duration::from_millis(inner.config.idle_timeout_ms);

    let mut next_tick = Instant::now() + interval;
    let mut retry_at: Option<Instant> = None;

    loop {
        let wake_at = retry_at.unwrap_or(next_tick);
        let mut timer_fired = false;

        tokio::select! {
            _ = shutdown_rx.recv() => {
                if let Err(e) = flush_batch(&inner, &batch, Some(FlushTrigger::Final)).await {
                    warn!("Final flush for batch {} failed at shutdown: {}", batch.batch_id, e);
                }
                break;
            }
            _ = batch.wake.notified() => {
                if retry_at.is_some() {
                    // Still backing off; the retry deadline will pick it up.
                    continue;
                }
            }
            _ = tokio::time::sleep_until(wake_at) => {
                if retry_at.take().is_none() {
                    timer_fired = true;
                    next_tick = Instant::now() + interval;
                }
            }
        }

        let (settle_ready, idle, sealed) = {
            let state = batch.state.lock().unwrap();
            (
                state.awaiting_final_flush(),
                state.last_activity.elapsed() >= idle_timeout,
                state.sealed,
            )
        };

        if timer_fired && idle && sealed && !settle_ready {
            expire_outstanding(&batch);
        }

        let take_pending = if settle_ready || (timer_fired && idle) {
            Some(FlushTrigger::Final)
        } else if timer_fired {
            Some(FlushTrigger::Timer)
        } else {
            None
        };

        if flush_batch(&inner, &batch, take_pending).await.is_err() {
            retry_at = Some(Instant::now() + backoff);
            continue;
        }

        let settled = batch.state.lock().unwrap().is_settled();

        if settled {
            match inner.complete_campaign(&batch.campaign_id) {
                Ok(()) => {
                    inner.evict(&batch);
                    debug!("Batch {} settled", batch.batch_id);
                    break;
                }
                Err(e) => {
                    warn!(
                        "Failed to complete campaign {}: {}",
                        batch.campaign_id, e
                    );
                    retry_at = Some(Instant::now() + backoff);
                }
            }
        } else if timer_fired && idle && !sealed {
            warn!(
                "Evicting idle unsealed batch {} for campaign {}",
                batch.batch_id, batch.campaign_id
            );
            inner.evict(&batch);
            break;
        }
    }
}

/// Record every outstanding message of an idle batch as failed.
fn expire_outstanding(batch: &Batch) {
    let mut state = batch.state.lock().unwrap();
    if state.outstanding.is_empty() {
        return;
    }

    let expired: Vec<String> = state.outstanding.drain().collect();
    warn!(
        "Batch {} idle with {} receipts outstanding; recording them as failed",
        batch.batch_id,
        expired.len()
    );
    for message_id in expired {
        state.seen.insert(message_id.clone());
        state.pending.push(Outcome {
            message_id,
            status: LogStatus::Failed,
            error: Some(RECEIPT_TIMEOUT_ERROR.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{CreateCampaignRequest, SqliteCampaignStore};
    use crate::comm_log::{LogEntry, SqliteCommLogStore};
    use crate::testing::FlakyCommLogStore;

    struct Fixture {
        aggregator: BatchAggregator,
        campaigns: Arc<SqliteCampaignStore>,
        comm_log: Arc<FlakyCommLogStore>,
        campaign_id: String,
    }

    fn fixture(config: AggregatorConfig) -> Fixture {
        let campaigns = Arc::new(SqliteCampaignStore::in_memory().unwrap());
        let comm_log = Arc::new(FlakyCommLogStore::new(Arc::new(
            SqliteCommLogStore::in_memory().unwrap(),
        )));

        let campaign = campaigns
            .create(CreateCampaignRequest {
                name: "Spring sale".to_string(),
                message_template: "Hi {{name}}".to_string(),
                owner_id: "owner-1".to_string(),
                segment_id: None,
            })
            .unwrap();
        campaigns
            .transition(&campaign.id, CampaignStatus::Draft, CampaignStatus::Active)
            .unwrap();

        let aggregator = BatchAggregator::new(
            config,
            Arc::clone(&comm_log) as Arc<dyn CommLogStore>,
            Arc::clone(&campaigns) as Arc<dyn CampaignStore>,
        );

        Fixture {
            aggregator,
            campaigns,
            comm_log,
            campaign_id: campaign.id,
        }
    }

    /// Timer and backoff long enough that only explicit triggers flush.
    fn quiet_config() -> AggregatorConfig {
        AggregatorConfig {
            flush_interval_ms: 60_000,
            retry_backoff_ms: 60_000,
            ..Default::default()
        }
    }

    fn register(f: &Fixture, batch_id: &str, count: usize) -> Vec<String> {
        let ids: Vec<String> = (0..count).map(|i| format!("{}-msg-{}", batch_id, i)).collect();
        let entries: Vec<LogEntry> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                LogEntry::pending(id, &f.campaign_id, format!("cust-{}", i), "a@example.com", 1)
            })
            .collect();
        f.comm_log.insert_many(&entries).unwrap();
        for id in &ids {
            f.aggregator.register_message(batch_id, id).unwrap();
        }
        ids
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_threshold_flushes_count_each_outcome_once() {
        let f = fixture(AggregatorConfig {
            flush_interval_ms: 200,
            ..quiet_config()
        });
        let batch_id = f.aggregator.create_batch(&f.campaign_id).unwrap();
        let ids = register(&f, &batch_id, 25);

        for id in &ids {
            let result = f
                .aggregator
                .add_outcome(&batch_id, id, DeliveryOutcome::Delivered, None)
                .unwrap();
            assert_eq!(result, AddOutcomeResult::Queued);
        }

        let settled = wait_for(|| {
            f.aggregator
                .stats(&batch_id)
                .map(|s| s.outcomes_applied == 25)
                .unwrap_or(false)
        })
        .await;
        assert!(settled);

        let stats = f.aggregator.stats(&batch_id).unwrap();
        assert_eq!(stats.threshold_flushes, 2);
        assert!(stats.timer_flushes <= 1);
        assert_eq!(stats.staleness_flushes, 0);

        let campaign = f.campaigns.get(&f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.counters.delivered, 25);
        assert_eq!(campaign.counters.failed, 0);
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found_without_side_effects() {
        let f = fixture(quiet_config());

        let result = f
            .aggregator
            .add_outcome("nope", "m1", DeliveryOutcome::Delivered, None);
        assert!(matches!(result, Err(AggregatorError::NotFound(_))));
        assert!(f.aggregator.batch_for_message("m1").is_none());
        assert!(matches!(
            f.aggregator.flush("nope").await,
            Err(AggregatorError::NotFound(_))
        ));

        assert_eq!(f.comm_log.update_calls(), 0);
        let campaign = f.campaigns.get(&f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.counters.delivered, 0);
    }

    #[tokio::test]
    async fn test_outcome_for_foreign_batch_is_rejected() {
        let f = fixture(quiet_config());
        let own_batch = f.aggregator.create_batch(&f.campaign_id).unwrap();
        let ids = register(&f, &own_batch, 1);

        let other = f
            .campaigns
            .create(CreateCampaignRequest {
                name: "Other".to_string(),
                message_template: "Hello".to_string(),
                owner_id: "owner-1".to_string(),
                segment_id: None,
            })
            .unwrap();
        f.campaigns
            .transition(&other.id, CampaignStatus::Draft, CampaignStatus::Active)
            .unwrap();
        let foreign_batch = f.aggregator.create_batch(&other.id).unwrap();

        let result =
            f.aggregator
                .add_outcome(&foreign_batch, &ids[0], DeliveryOutcome::Delivered, None);
        assert!(matches!(result, Err(AggregatorError::UnknownMessage { .. })));
        let report = f.aggregator.flush(&foreign_batch).await.unwrap();
        assert!(report.is_empty());

        // The real receipt still lands on the owning campaign.
        let result = f
            .aggregator
            .add_outcome(&own_batch, &ids[0], DeliveryOutcome::Delivered, None)
            .unwrap();
        assert_eq!(result, AddOutcomeResult::Queued);
        f.aggregator.flush(&own_batch).await.unwrap();

        let campaign = f.campaigns.get(&f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.counters.delivered, 1);
        let other = f.campaigns.get(&other.id).unwrap().unwrap();
        assert_eq!(other.counters.delivered, 0);
        assert_eq!(f.aggregator.stats(&own_batch).unwrap().outstanding, 0);
    }

    #[tokio::test]
    async fn test_unregistered_message_is_not_remembered() {
        let f = fixture(quiet_config());
        let batch_id = f.aggregator.create_batch(&f.campaign_id).unwrap();

        for _ in 0..2 {
            let result =
                f.aggregator
                    .add_outcome(&batch_id, "never-sent", DeliveryOutcome::Failed, None);
            assert!(matches!(result, Err(AggregatorError::UnknownMessage { .. })));
        }

        let stats = f.aggregator.stats(&batch_id).unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.duplicates, 0);
    }

    #[tokio::test]
    async fn test_empty_flush_is_noop() {
        let f = fixture(quiet_config());
        let batch_id = f.aggregator.create_batch(&f.campaign_id).unwrap();

        let report = f.aggregator.flush(&batch_id).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(f.comm_log.update_calls(), 0);
        assert_eq!(f.aggregator.stats(&batch_id).unwrap().total_flushes(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_outcome_counted_once() {
        let f = fixture(quiet_config());
        let batch_id = f.aggregator.create_batch(&f.campaign_id).unwrap();
        let ids = register(&f, &batch_id, 2);

        let first = f
            .aggregator
            .add_outcome(&batch_id, &ids[0], DeliveryOutcome::Delivered, None)
            .unwrap();
        let second = f
            .aggregator
            .add_outcome(&batch_id, &ids[0], DeliveryOutcome::Failed, None)
            .unwrap();
        assert_eq!(first, AddOutcomeResult::Queued);
        assert_eq!(second, AddOutcomeResult::Duplicate);

        let report = f.aggregator.flush(&batch_id).await.unwrap();
        assert_eq!(report.outcomes, 1);
        assert_eq!(report.delivered, 1);

        let campaign = f.campaigns.get(&f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.counters.delivered, 1);
        assert_eq!(campaign.counters.failed, 0);
        assert_eq!(f.aggregator.stats(&batch_id).unwrap().duplicates, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_outcomes_for_retry() {
        let f = fixture(quiet_config());
        let batch_id = f.aggregator.create_batch(&f.campaign_id).unwrap();
        let ids = register(&f, &batch_id, 3);

        for id in &ids {
            f.aggregator
                .add_outcome(&batch_id, id, DeliveryOutcome::Failed, Some("bounced".into()))
                .unwrap();
        }

        f.comm_log.fail_next_updates(1);
        let result = f.aggregator.flush(&batch_id).await;
        assert!(matches!(result, Err(AggregatorError::Storage(_))));

        let stats = f.aggregator.stats(&batch_id).unwrap();
        assert_eq!(stats.queued_chunks, 1);
        assert_eq!(stats.failed_flushes, 1);

        let report = f.aggregator.flush(&batch_id).await.unwrap();
        assert_eq!(report.outcomes, 3);
        assert_eq!(report.failed, 3);

        let campaign = f.campaigns.get(&f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.counters.failed, 3);

        let entries = f.comm_log.list_for_campaign(&f.campaign_id).unwrap();
        assert!(entries
            .iter()
            .all(|e| e.status == LogStatus::Failed && e.error.as_deref() == Some("bounced")));
    }

    #[tokio::test]
    async fn test_batch_task_retries_after_backoff() {
        let f = fixture(AggregatorConfig {
            flush_threshold: 2,
            retry_backoff_ms: 50,
            ..quiet_config()
        });
        let batch_id = f.aggregator.create_batch(&f.campaign_id).unwrap();
        let ids = register(&f, &batch_id, 2);

        f.comm_log.fail_next_updates(1);
        for id in &ids {
            f.aggregator
                .add_outcome(&batch_id, id, DeliveryOutcome::Delivered, None)
                .unwrap();
        }

        let persisted = wait_for(|| {
            f.campaigns
                .get(&f.campaign_id)
                .unwrap()
                .map(|c| c.counters.delivered == 2)
                .unwrap_or(false)
        })
        .await;
        assert!(persisted);

        let stats = f.aggregator.stats(&batch_id).unwrap();
        assert_eq!(stats.failed_flushes, 1);
        assert_eq!(stats.threshold_flushes, 1);
    }

    #[tokio::test]
    async fn test_sealed_batch_settles_and_completes_campaign() {
        let f = fixture(quiet_config());
        let batch_id = f.aggregator.create_batch(&f.campaign_id).unwrap();
        let ids = register(&f, &batch_id, 3);

        f.aggregator.seal_batch(&batch_id).unwrap();
        f.aggregator.discard_message(&batch_id, &ids[2]).unwrap();
        f.aggregator
            .add_outcome(&batch_id, &ids[0], DeliveryOutcome::Delivered, None)
            .unwrap();
        f.aggregator
            .add_outcome(&batch_id, &ids[1], DeliveryOutcome::Failed, None)
            .unwrap();

        let evicted = wait_for(|| !f.aggregator.contains(&batch_id)).await;
        assert!(evicted);
        assert!(f.aggregator.batch_for_message(&ids[0]).is_none());

        let campaign = f.campaigns.get(&f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.counters.delivered, 1);
        assert_eq!(campaign.counters.failed, 1);
        assert!(campaign.last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_settlement_leaves_failed_campaign_alone() {
        let f = fixture(quiet_config());
        let batch_id = f.aggregator.create_batch(&f.campaign_id).unwrap();
        f.campaigns
            .transition(&f.campaign_id, CampaignStatus::Active, CampaignStatus::Failed)
            .unwrap();

        f.aggregator.seal_batch(&batch_id).unwrap();

        assert!(wait_for(|| !f.aggregator.contains(&batch_id)).await);
        let campaign = f.campaigns.get(&f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Failed);
        assert!(campaign.last_run_at.is_none());
    }

    #[tokio::test]
    async fn test_idle_sealed_batch_fails_outstanding() {
        let f = fixture(AggregatorConfig {
            flush_interval_ms: 20,
            idle_timeout_ms: 50,
            ..quiet_config()
        });
        let batch_id = f.aggregator.create_batch(&f.campaign_id).unwrap();
        let ids = register(&f, &batch_id, 2);
        f.campaigns
            .increment_counters(&f.campaign_id, crate::campaign::CounterDelta::sent(2))
            .unwrap();

        f.aggregator
            .add_outcome(&batch_id, &ids[0], DeliveryOutcome::Delivered, None)
            .unwrap();
        f.aggregator.seal_batch(&batch_id).unwrap();

        assert!(wait_for(|| !f.aggregator.contains(&batch_id)).await);

        let campaign = f.campaigns.get(&f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.counters.delivered, 1);
        assert_eq!(campaign.counters.failed, 1);
        assert!(campaign.counters.is_settled());
        assert_eq!(campaign.status, CampaignStatus::Completed);

        let entries = f.comm_log.list_for_campaign(&f.campaign_id).unwrap();
        let expired = entries.iter().find(|e| e.id == ids[1]).unwrap();
        assert_eq!(expired.error.as_deref(), Some(RECEIPT_TIMEOUT_ERROR));
    }

    #[tokio::test]
    async fn test_message_index_resolves_batch() {
        let f = fixture(quiet_config());
        let batch_id = f.aggregator.create_batch(&f.campaign_id).unwrap();
        let ids = register(&f, &batch_id, 1);

        assert_eq!(f.aggregator.batch_for_message(&ids[0]), Some(batch_id.clone()));
        assert!(f.aggregator.batch_for_message("unknown").is_none());
    }

    #[tokio::test]
    async fn test_late_receipt_for_discarded_message_is_duplicate() {
        let f = fixture(quiet_config());
        let batch_id = f.aggregator.create_batch(&f.campaign_id).unwrap();
        let ids = register(&f, &batch_id, 1);

        f.aggregator.discard_message(&batch_id, &ids[0]).unwrap();
        let result = f
            .aggregator
            .add_outcome(&batch_id, &ids[0], DeliveryOutcome::Delivered, None)
            .unwrap();
        assert_eq!(result, AddOutcomeResult::Duplicate);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_and_rejects_new_batches() {
        let f = fixture(quiet_config());
        let batch_id = f.aggregator.create_batch(&f.campaign_id).unwrap();
        let ids = register(&f, &batch_id, 3);
        for id in &ids {
            f.aggregator
                .add_outcome(&batch_id, id, DeliveryOutcome::Delivered, None)
                .unwrap();
        }

        f.aggregator.shutdown().await;

        let campaign = f.campaigns.get(&f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.counters.delivered, 3);
        assert!(matches!(
            f.aggregator.create_batch(&f.campaign_id),
            Err(AggregatorError::Closed)
        ));
    }
}
