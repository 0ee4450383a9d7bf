use std::sync::Arc;

use courier_core::{
    BatchAggregator, CampaignScheduler, CampaignStore, CommLogStore, Config, CustomerStore,
    DeliveryOrchestrator, ReceiptIngestor, SanitizedConfig, VendorClient,
};

/// Shared application state
pub struct AppState {
    config: Config,
    campaigns: Arc<dyn CampaignStore>,
    customers: Arc<dyn CustomerStore>,
    comm_log: Arc<dyn CommLogStore>,
    aggregator: Arc<BatchAggregator>,
    orchestrator: Arc<DeliveryOrchestrator>,
    /// None when the scheduler is disabled in config.
    scheduler: Option<Arc<CampaignScheduler>>,
    ingestor: ReceiptIngestor,
    /// Backs the `/vendor/send` endpoint.
    vendor_endpoint: Arc<dyn VendorClient>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        campaigns: Arc<dyn CampaignStore>,
        customers: Arc<dyn CustomerStore>,
        comm_log: Arc<dyn CommLogStore>,
        aggregator: Arc<BatchAggregator>,
        orchestrator: Arc<DeliveryOrchestrator>,
        scheduler: Option<Arc<CampaignScheduler>>,
        ingestor: ReceiptIngestor,
        vendor_endpoint: Arc<dyn VendorClient>,
    ) -> Self {
        Self {
            config,
            campaigns,
            customers,
            comm_log,
            aggregator,
            orchestrator,
            scheduler,
            ingestor,
            vendor_endpoint,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn campaigns(&self) -> &dyn CampaignStore {
        self.campaigns.as_ref()
    }

    pub fn customers(&self) -> &dyn CustomerStore {
        self.customers.as_ref()
    }

    pub fn comm_log(&self) -> &dyn CommLogStore {
        self.comm_log.as_ref()
    }

    pub fn aggregator(&self) -> &BatchAggregator {
        &self.aggregator
    }

    pub fn orchestrator(&self) -> &Arc<DeliveryOrchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> Option<&Arc<CampaignScheduler>> {
        self.scheduler.as_ref()
    }

    pub fn ingestor(&self) -> &ReceiptIngestor {
        &self.ingestor
    }

    pub fn vendor_endpoint(&self) -> &dyn VendorClient {
        self.vendor_endpoint.as_ref()
    }
}
