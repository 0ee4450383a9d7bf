//! Campaign message delivery: stores, vendor boundary, receipt ingestion,
//! batch aggregation, delivery orchestration and scheduling.

pub mod aggregator;
pub mod campaign;
pub mod comm_log;
pub mod config;
pub mod customer;
mod db;
pub mod metrics;
pub mod orchestrator;
pub mod receipt;
pub mod scheduler;
pub mod testing;
pub mod vendor;

pub use aggregator::{
    AddOutcomeResult, AggregatorConfig, AggregatorError, BatchAggregator, BatchStats, FlushReport,
    FlushTrigger,
};
pub use campaign::{
    Campaign, CampaignError, CampaignStatus, CampaignStore, CounterDelta, CreateCampaignRequest,
    DeliveryCounters, SqliteCampaignStore,
};
pub use comm_log::{CommLogError, CommLogStore, LogEntry, LogStatus, SqliteCommLogStore};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    ReceiptConfig, SanitizedConfig, ServerConfig,
};
pub use customer::{
    CreateCustomerRequest, CreateSegmentRequest, Customer, CustomerError, CustomerStore, Segment,
    SegmentRules, SqliteCustomerStore,
};
pub use orchestrator::{DeliveryConfig, DeliveryOrchestrator, DeliveryReport, OrchestratorError};
pub use receipt::{
    create_receipt_pipeline, IngestCallback, ReceiptAck, ReceiptError, ReceiptIngestor,
    ReceiptPayload, ReceiptRouter,
};
pub use scheduler::{CampaignScheduler, SchedulerConfig, TickReport};
pub use vendor::{
    CallbackDispatcher, DeliveryOutcome, DeliveryReceipt, HttpCallbackDispatcher, HttpVendorClient,
    SendAck, SendRequest, VendorClient, VendorConfig, VendorError, VendorMode, VendorSimulator,
};
