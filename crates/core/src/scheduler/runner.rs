//! Campaign scheduler implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::campaign::{CampaignStatus, CampaignStore};
use crate::metrics;
use crate::orchestrator::DeliveryOrchestrator;

use super::config::SchedulerConfig;

/// Outcome of a single tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Campaigns found due.
    pub due: usize,
    /// Campaigns this tick claimed and dispatched.
    pub claimed: usize,
    /// Campaigns claimed by someone else first.
    pub skipped: usize,
    /// Campaigns whose claim failed with a storage error.
    pub errors: usize,
}

/// Recurring timer that dispatches due campaigns.
pub struct CampaignScheduler {
    config: SchedulerConfig,
    campaigns: Arc<dyn CampaignStore>,
    orchestrator: Arc<DeliveryOrchestrator>,

    // Runtime state
    running: Arc<AtomicBool>,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl CampaignScheduler {
    /// Create a new scheduler.
    pub fn new(
        config: SchedulerConfig,
        campaigns: Arc<dyn CampaignStore>,
        orchestrator: Arc<DeliveryOrchestrator>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            campaigns,
            orchestrator,
            running: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx,
        }
    }

    /// Start the recurring tick (spawns a background task).
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        info!(
            "Starting campaign scheduler (tick every {} ms)",
            self.config.tick_interval_ms
        );
        self.spawn_tick_loop();
    }

    /// Stop the recurring tick. In-flight runs continue; see `drain`.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Scheduler not running");
            return;
        }

        info!("Stopping campaign scheduler");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Delivery runs started by this scheduler that have not finished.
    pub fn in_flight(&self) -> usize {
        let mut in_flight = self.in_flight.lock().unwrap();
        in_flight.retain(|h| !h.is_finished());
        in_flight.len()
    }

    /// Wait for every delivery run started by this scheduler to finish.
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = self.in_flight.lock().unwrap().drain(..).collect();
        if handles.is_empty() {
            return;
        }

        debug!("Draining {} delivery runs", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Delivery task ended abnormally: {}", e);
            }
        }
    }

    /// Claim and dispatch every due campaign once.
    ///
    /// Never fails: query and claim errors are logged and counted, and the
    /// affected campaigns are picked up again on the next tick.
    pub fn tick(&self) -> TickReport {
        Self::run_tick(&self.campaigns, &self.orchestrator, &self.in_flight)
    }

    fn spawn_tick_loop(&self) {
        let running = Arc::clone(&self.running);
        let campaigns = Arc::clone(&self.campaigns);
        let orchestrator = Arc::clone(&self.orchestrator);
        let in_flight = Arc::clone(&self.in_flight);
        let interval = Duration::from_millis(self.config.tick_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Scheduler loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Scheduler loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        let report = Self::run_tick(&campaigns, &orchestrator, &in_flight);
                        if report.due > 0 {
                            info!(
                                "Scheduler tick: {} due, {} claimed, {} skipped, {} errors",
                                report.due, report.claimed, report.skipped, report.errors
                            );
                        }
                    }
                }
            }
            info!("Scheduler loop stopped");
        });
    }

    fn run_tick(
        campaigns: &Arc<dyn CampaignStore>,
        orchestrator: &Arc<DeliveryOrchestrator>,
        in_flight: &Mutex<Vec<JoinHandle<()>>>,
    ) -> TickReport {
        metrics::SCHEDULER_TICKS.inc();
        let mut report = TickReport::default();

        let due = match campaigns.find_due_scheduled(Utc::now()) {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to query due campaigns: {}", e);
                report.errors += 1;
                return report;
            }
        };
        report.due = due.len();

        for campaign in due {
            match campaigns.transition(&campaign.id, CampaignStatus::Scheduled, CampaignStatus::Active)
            {
                Ok(true) => {
                    info!("Claimed scheduled campaign {} ({})", campaign.id, campaign.name);
                    metrics::CAMPAIGNS_CLAIMED.inc();
                    report.claimed += 1;

                    let handle = orchestrator.spawn_run(&campaign.id);
                    let mut in_flight = in_flight.lock().unwrap();
                    in_flight.retain(|h| !h.is_finished());
                    in_flight.push(handle);
                }
                Ok(false) => {
                    debug!("Campaign {} already claimed", campaign.id);
                    report.skipped += 1;
                }
                Err(e) => {
                    error!("Failed to claim campaign {}: {}", campaign.id, e);
                    report.errors += 1;
                }
            }
        }

        report
    }
}
