//! Delivery orchestrator implementation.
//!
//! A run resolves the campaign audience page by page, sends each page as a
//! batch with bounded concurrency, and re-sends rejected recipients in later
//! passes until the retry budget runs out. Outcomes of accepted messages
//! arrive later through receipts and are persisted by the aggregator, which
//! also completes the campaign once everything has settled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregator::BatchAggregator;
use crate::campaign::{Campaign, CampaignStatus, CampaignStore, CounterDelta};
use crate::comm_log::{CommLogStore, LogEntry, LogStatus};
use crate::customer::{Customer, CustomerError, CustomerStore, SegmentRules};
use crate::metrics;
use crate::vendor::{SendRequest, VendorClient, VendorError};

use super::config::DeliveryConfig;
use super::render::render_message;
use super::types::{DeliveryReport, OrchestratorError, PassReport};

/// Drives delivery runs for active campaigns.
pub struct DeliveryOrchestrator {
    config: DeliveryConfig,
    callback_url: String,
    campaigns: Arc<dyn CampaignStore>,
    customers: Arc<dyn CustomerStore>,
    comm_log: Arc<dyn CommLogStore>,
    vendor: Arc<dyn VendorClient>,
    aggregator: Arc<BatchAggregator>,

    // Runtime state
    /// Cancellation flags of in-flight runs, by campaign ID.
    runs: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
    /// Runs spawned by `start_delivery`.
    spawned: Mutex<Vec<JoinHandle<()>>>,
}

/// Removes the run's cancellation flag when the run ends.
struct RunGuard {
    runs: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
    campaign_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs.lock().unwrap().remove(&self.campaign_id);
    }
}

/// Sends of one batch.
struct BatchResult {
    accepted: usize,
    rejected: Vec<Customer>,
}

impl DeliveryOrchestrator {
    /// Create a new orchestrator.
    ///
    /// `callback_url` is passed to the vendor with every send.
    pub fn new(
        config: DeliveryConfig,
        callback_url: impl Into<String>,
        campaigns: Arc<dyn CampaignStore>,
        customers: Arc<dyn CustomerStore>,
        comm_log: Arc<dyn CommLogStore>,
        vendor: Arc<dyn VendorClient>,
        aggregator: Arc<BatchAggregator>,
    ) -> Self {
        Self {
            config,
            callback_url: callback_url.into(),
            campaigns,
            customers,
            comm_log,
            vendor,
            aggregator,
            runs: Arc::new(Mutex::new(HashMap::new())),
            spawned: Mutex::new(Vec::new()),
        }
    }

    /// "Deliver now": claim a draft or scheduled campaign and spawn its run.
    pub fn start_delivery(self: &Arc<Self>, campaign_id: &str) -> Result<(), OrchestratorError> {
        let campaign = self.get_campaign(campaign_id)?;

        if !matches!(
            campaign.status,
            CampaignStatus::Draft | CampaignStatus::Scheduled
        ) {
            return Err(OrchestratorError::InvalidState {
                expected: "draft or scheduled".to_string(),
                actual: campaign.status.to_string(),
            });
        }

        if !self
            .campaigns
            .transition(campaign_id, campaign.status, CampaignStatus::Active)?
        {
            // Someone else claimed it between the read and the update.
            let current = self.get_campaign(campaign_id)?;
            return Err(OrchestratorError::InvalidState {
                expected: campaign.status.to_string(),
                actual: current.status.to_string(),
            });
        }

        info!("Campaign {} claimed for immediate delivery", campaign_id);
        let handle = self.spawn_run(campaign_id);
        let mut spawned = self.spawned.lock().unwrap();
        spawned.retain(|h| !h.is_finished());
        spawned.push(handle);
        Ok(())
    }

    /// Spawn `run` for an already claimed campaign.
    pub fn spawn_run(self: &Arc<Self>, campaign_id: &str) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let campaign_id = campaign_id.to_string();
        tokio::spawn(async move { orchestrator.run(&campaign_id).await })
    }

    /// Deliver a claimed campaign, marking it failed if the run errors.
    ///
    /// Errors are logged, never propagated.
    pub async fn run(&self, campaign_id: &str) {
        match self.deliver(campaign_id).await {
            Ok(report) => {
                info!(
                    "Delivery run for campaign {} finished: {} recipients, {} accepted, {} failed sends",
                    campaign_id,
                    report.audience,
                    report.accepted(),
                    report.failed_sends
                );
            }
            Err(e) => {
                error!("Delivery run for campaign {} failed: {}", campaign_id, e);
                self.mark_failed(campaign_id);
            }
        }
    }

    /// Run delivery for an active campaign.
    ///
    /// Returns once every pass has been sent; receipts keep settling the
    /// campaign afterwards.
    pub async fn deliver(&self, campaign_id: &str) -> Result<DeliveryReport, OrchestratorError> {
        let campaign = self.get_campaign(campaign_id)?;
        if campaign.status != CampaignStatus::Active {
            return Err(OrchestratorError::InvalidState {
                expected: CampaignStatus::Active.to_string(),
                actual: campaign.status.to_string(),
            });
        }

        let cancelled = {
            let mut runs = self.runs.lock().unwrap();
            if runs.contains_key(campaign_id) {
                return Err(OrchestratorError::AlreadyRunning(campaign_id.to_string()));
            }
            let flag = Arc::new(AtomicBool::new(false));
            runs.insert(campaign_id.to_string(), Arc::clone(&flag));
            flag
        };
        let _guard = RunGuard {
            runs: Arc::clone(&self.runs),
            campaign_id: campaign_id.to_string(),
        };

        let started = Instant::now();
        let batch_id = self.aggregator.create_batch(campaign_id)?;
        info!(
            "Starting delivery for campaign {} (batch {})",
            campaign_id, batch_id
        );

        let mut report = DeliveryReport {
            campaign_id: campaign_id.to_string(),
            batch_id: batch_id.clone(),
            ..Default::default()
        };

        let result = self
            .run_passes(&campaign, &batch_id, &cancelled, &mut report)
            .await;

        // Fail before sealing so settlement cannot complete the campaign first.
        if result.is_err() {
            self.mark_failed(campaign_id);
        }

        // Always seal so the batch can settle or be evicted.
        if let Err(e) = self.aggregator.seal_batch(&batch_id) {
            warn!("Failed to seal batch {}: {}", batch_id, e);
        }

        let outcome = match (&result, report.cancelled) {
            (Err(_), _) => "failed",
            (Ok(()), true) => "cancelled",
            (Ok(()), false) => "ok",
        };
        metrics::DELIVERY_DURATION
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());

        result.map(|()| report)
    }

    /// Flag an in-flight run to stop and mark the campaign failed.
    ///
    /// Sends already in progress finish and accepted messages still settle.
    /// Returns whether a run was in flight.
    pub fn cancel(&self, campaign_id: &str) -> Result<bool, OrchestratorError> {
        let campaign = self.get_campaign(campaign_id)?;
        if campaign.status != CampaignStatus::Active {
            return Err(OrchestratorError::InvalidState {
                expected: CampaignStatus::Active.to_string(),
                actual: campaign.status.to_string(),
            });
        }

        let was_running = match self.runs.lock().unwrap().get(campaign_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        };

        if self
            .campaigns
            .transition(campaign_id, CampaignStatus::Active, CampaignStatus::Failed)?
        {
            metrics::CAMPAIGNS_FINISHED.with_label_values(&["failed"]).inc();
            info!("Campaign {} cancelled", campaign_id);
        }
        Ok(was_running)
    }

    /// Whether a run for the campaign is in flight.
    pub fn is_running(&self, campaign_id: &str) -> bool {
        self.runs.lock().unwrap().contains_key(campaign_id)
    }

    /// Wait for runs spawned by `start_delivery` to finish.
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = self.spawned.lock().unwrap().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Delivery task ended abnormally: {}", e);
            }
        }
    }

    fn get_campaign(&self, campaign_id: &str) -> Result<Campaign, OrchestratorError> {
        self.campaigns
            .get(campaign_id)?
            .ok_or_else(|| OrchestratorError::NotFound(campaign_id.to_string()))
    }

    fn mark_failed(&self, campaign_id: &str) {
        match self
            .campaigns
            .transition(campaign_id, CampaignStatus::Active, CampaignStatus::Failed)
        {
            Ok(true) => {
                metrics::CAMPAIGNS_FINISHED.with_label_values(&["failed"]).inc();
                warn!("Campaign {} marked failed", campaign_id);
            }
            Ok(false) => {}
            Err(e) => error!("Failed to mark campaign {} failed: {}", campaign_id, e),
        }
    }

    fn segment_rules(&self, campaign: &Campaign) -> Result<Option<SegmentRules>, OrchestratorError> {
        match &campaign.segment_id {
            None => Ok(None),
            Some(segment_id) => {
                let segment = self
                    .customers
                    .get_segment(segment_id)?
                    .ok_or_else(|| CustomerError::SegmentNotFound(segment_id.clone()))?;
                Ok(Some(segment.rules))
            }
        }
    }

    async fn run_passes(
        &self,
        campaign: &Campaign,
        batch_id: &str,
        cancelled: &AtomicBool,
        report: &mut DeliveryReport,
    ) -> Result<(), OrchestratorError> {
        let rules = self.segment_rules(campaign)?;
        let batch_size = self.config.batch_size.max(1);

        // First pass: page through the audience, one page per batch.
        let mut first = PassReport {
            attempt: 1,
            ..Default::default()
        };
        let mut rejected: Vec<Customer> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            if cancelled.load(Ordering::SeqCst) {
                report.cancelled = true;
                break;
            }

            let limit = match self.config.max_audience {
                0 => batch_size,
                cap => batch_size.min(cap.saturating_sub(report.audience)),
            };
            if limit == 0 {
                debug!(
                    "Campaign {} reached the audience cap of {}",
                    campaign.id, self.config.max_audience
                );
                break;
            }

            let page = self.customers.find_by_owner_and_segment(
                &campaign.owner_id,
                rules.as_ref(),
                cursor.as_deref(),
                limit,
            )?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|c| c.id.clone());
            let page_len = page.len();

            report.audience += page_len;
            first.batch_sizes.push(page_len);

            let result = self.send_batch(campaign, batch_id, page, 1).await?;
            first.accepted += result.accepted;
            first.rejected += result.rejected.len();
            rejected.extend(result.rejected);

            if page_len < limit {
                break;
            }
        }
        report.passes.push(first);

        // Retry passes: only recipients whose send was rejected.
        let mut attempt = 1;
        while !rejected.is_empty() {
            let failed_count = self.campaigns.increment_failed_count(&campaign.id)?;

            if failed_count >= self.config.max_attempts {
                warn!(
                    "Campaign {} exhausted its retry budget ({} attempts); {} recipients failed",
                    campaign.id,
                    failed_count,
                    rejected.len()
                );
                report.exhausted = true;
                break;
            }
            if cancelled.load(Ordering::SeqCst) {
                report.cancelled = true;
                break;
            }

            if self.config.retry_backoff_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
            }

            attempt += 1;
            info!(
                "Retrying {} rejected sends for campaign {} (attempt {})",
                rejected.len(),
                campaign.id,
                attempt
            );

            let mut pass = PassReport {
                attempt,
                ..Default::default()
            };
            let mut still_rejected = Vec::new();
            let mut remaining = std::mem::take(&mut rejected).into_iter().peekable();
            while remaining.peek().is_some() {
                if cancelled.load(Ordering::SeqCst) {
                    report.cancelled = true;
                    still_rejected.extend(remaining.by_ref());
                    break;
                }
                let chunk: Vec<Customer> = remaining.by_ref().take(batch_size).collect();
                pass.batch_sizes.push(chunk.len());

                let result = self.send_batch(campaign, batch_id, chunk, attempt).await?;
                pass.accepted += result.accepted;
                pass.rejected += result.rejected.len();
                still_rejected.extend(result.rejected);
            }
            report.passes.push(pass);
            rejected = still_rejected;

            if report.cancelled {
                break;
            }
        }

        // Recipients that never got through are final failures.
        if !rejected.is_empty() {
            report.failed_sends = rejected.len();
            self.campaigns
                .increment_counters(&campaign.id, CounterDelta::failed(rejected.len() as u64))?;
        }

        if report.exhausted || report.cancelled {
            self.mark_failed(&campaign.id);
        }

        Ok(())
    }

    /// Send one batch. Rejected and timed-out sends have their log entry
    /// failed and are returned for retry.
    ///
    /// Nothing is counted or registered until the provisional entries are
    /// written, so a failed insert leaves no outstanding messages behind. The
    /// first attempt counts the batch towards `sent`.
    async fn send_batch(
        &self,
        campaign: &Campaign,
        batch_id: &str,
        recipients: Vec<Customer>,
        attempt: u32,
    ) -> Result<BatchResult, OrchestratorError> {
        let messages: Vec<(String, Customer)> = recipients
            .into_iter()
            .map(|c| (uuid::Uuid::new_v4().to_string(), c))
            .collect();

        let entries: Vec<LogEntry> = messages
            .iter()
            .map(|(message_id, customer)| {
                LogEntry::pending(
                    message_id,
                    &campaign.id,
                    &customer.id,
                    customer.recipient(),
                    attempt,
                )
            })
            .collect();
        // Provisional entries must exist before any receipt can arrive.
        self.comm_log.insert_many(&entries)?;

        if attempt == 1 {
            self.campaigns
                .increment_counters(&campaign.id, CounterDelta::sent(messages.len() as u64))?;
        }
        for (message_id, _) in &messages {
            self.aggregator.register_message(batch_id, message_id)?;
        }

        let timeout = Duration::from_millis(self.config.send_timeout_ms);
        let results: Vec<(String, Customer, Result<(), VendorError>)> = stream::iter(messages)
            .map(|(message_id, customer)| {
                let request = SendRequest {
                    message_id: message_id.clone(),
                    message: render_message(&campaign.message_template, &customer),
                    recipient: customer.recipient().to_string(),
                    callback_url: self.callback_url.clone(),
                    batch_id: batch_id.to_string(),
                };
                async move {
                    let outcome = match tokio::time::timeout(timeout, self.vendor.send(request)).await
                    {
                        Ok(Ok(ack)) if ack.success => Ok(()),
                        Ok(Ok(_)) => Err(VendorError::Rejected("vendor declined".to_string())),
                        Ok(Err(e)) => Err(e),
                        Err(_) => {
                            metrics::VENDOR_SENDS.with_label_values(&["timeout"]).inc();
                            Err(VendorError::Timeout(timeout.as_millis() as u64))
                        }
                    };
                    (message_id, customer, outcome)
                }
            })
            .buffer_unordered(self.config.send_concurrency.max(1))
            .collect()
            .await;

        let mut accepted = 0;
        let mut rejected = Vec::new();
        let mut failures: HashMap<String, Vec<String>> = HashMap::new();

        for (message_id, customer, outcome) in results {
            match outcome {
                Ok(()) => accepted += 1,
                Err(e) => {
                    debug!(
                        "Send {} to customer {} failed: {}",
                        message_id, customer.id, e
                    );
                    if let Err(e) = self.aggregator.discard_message(batch_id, &message_id) {
                        warn!("Failed to discard message {}: {}", message_id, e);
                    }
                    failures.entry(e.to_string()).or_default().push(message_id);
                    rejected.push(customer);
                }
            }
        }

        for (reason, ids) in failures {
            if let Err(e) = self
                .comm_log
                .bulk_update_status(&campaign.id, &ids, LogStatus::Failed, Some(&reason))
            {
                warn!(
                    "Failed to record {} rejected sends for campaign {}: {}",
                    ids.len(),
                    campaign.id,
                    e
                );
            }
        }

        if !rejected.is_empty() {
            warn!(
                "Campaign {} attempt {}: {} of {} sends rejected",
                campaign.id,
                attempt,
                rejected.len(),
                accepted + rejected.len()
            );
        }

        Ok(BatchResult { accepted, rejected })
    }
}
