//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with a scripted vendor injected, so whole delivery runs can be driven
//! through the HTTP API without a real vendor.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tower::ServiceExt;

use courier_core::{
    create_receipt_pipeline, testing::MockVendor, AggregatorConfig, BatchAggregator,
    CallbackDispatcher, CampaignScheduler, CampaignStore, CommLogStore, Config, CustomerStore,
    DatabaseConfig, DeliveryConfig, DeliveryOrchestrator, IngestCallback, ReceiptRouter, SchedulerConfig,
    SqliteCampaignStore, SqliteCommLogStore, SqliteCustomerStore, VendorClient,
};

/// Re-export fixtures for test convenience
pub use courier_core::testing::fixtures;

/// Test fixture for API testing with mock dependencies.
///
/// Provides an in-process server with:
/// - A delivery vendor (MockVendor) that posts receipts into the ingestion queue
/// - A separate mock behind `/vendor/send`
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_campaign_creation() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/campaigns", json!({
///         "name": "Launch",
///         "message_template": "Hi {{name}}",
///         "owner_id": "owner-1"
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Vendor used by delivery runs
    pub vendor: Arc<MockVendor>,
    /// Vendor behind the `/vendor/send` endpoint
    pub vendor_endpoint: Arc<MockVendor>,
    pub campaigns: Arc<SqliteCampaignStore>,
    pub customers: Arc<SqliteCustomerStore>,
    pub orchestrator: Arc<DeliveryOrchestrator>,
    pub scheduler: Option<Arc<CampaignScheduler>>,
    shutdown_tx: broadcast::Sender<()>,
    /// Holds the receiving end open when the router is not started
    _stalled_router: Option<ReceiptRouter>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with default mocks.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = Config {
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            delivery: DeliveryConfig {
                retry_backoff_ms: 10,
                ..Default::default()
            },
            aggregator: AggregatorConfig {
                flush_interval_ms: 50,
                max_staleness_ms: 200,
                retry_backoff_ms: 50,
                ..Default::default()
            },
            scheduler: SchedulerConfig {
                enabled: test_config.enable_scheduler,
                tick_interval_ms: 50,
            },
            ..Default::default()
        };
        config.receipts.buffer_size = test_config.receipt_buffer;

        // Create stores
        let campaigns = Arc::new(
            SqliteCampaignStore::new(&db_path).expect("Failed to create campaign store"),
        );
        let customers = Arc::new(
            SqliteCustomerStore::new(&db_path).expect("Failed to create customer store"),
        );
        let comm_log = Arc::new(
            SqliteCommLogStore::new(&db_path).expect("Failed to create comm log store"),
        );

        let aggregator = Arc::new(BatchAggregator::new(
            config.aggregator.clone(),
            Arc::clone(&comm_log) as Arc<dyn CommLogStore>,
            Arc::clone(&campaigns) as Arc<dyn CampaignStore>,
        ));

        // Receipt pipeline; the router is only started when requested so
        // tests can fill the queue
        let (ingestor, receipt_router) =
            create_receipt_pipeline(Arc::clone(&aggregator), config.receipts.buffer_size);
        let (shutdown_tx, _) = broadcast::channel(1);
        let stalled_router = if test_config.start_receipt_router {
            tokio::spawn(receipt_router.run_until_shutdown(shutdown_tx.subscribe()));
            None
        } else {
            Some(receipt_router)
        };

        let callback = Arc::new(IngestCallback::new(ingestor.clone())) as Arc<dyn CallbackDispatcher>;
        let vendor = Arc::new(MockVendor::with_receipts(callback));
        let vendor_endpoint = Arc::new(MockVendor::new());

        let orchestrator = Arc::new(DeliveryOrchestrator::new(
            config.delivery.clone(),
            config.vendor.callback_url.clone(),
            Arc::clone(&campaigns) as Arc<dyn CampaignStore>,
            Arc::clone(&customers) as Arc<dyn CustomerStore>,
            Arc::clone(&comm_log) as Arc<dyn CommLogStore>,
            Arc::clone(&vendor) as Arc<dyn VendorClient>,
            Arc::clone(&aggregator),
        ));

        let scheduler = if test_config.enable_scheduler {
            let scheduler = Arc::new(CampaignScheduler::new(
                config.scheduler.clone(),
                Arc::clone(&campaigns) as Arc<dyn CampaignStore>,
                Arc::clone(&orchestrator),
            ));
            scheduler.start();
            Some(scheduler)
        } else {
            None
        };

        // Create app state with mocks
        let state = Arc::new(courier_server::state::AppState::new(
            config,
            Arc::clone(&campaigns) as Arc<dyn CampaignStore>,
            Arc::clone(&customers) as Arc<dyn CustomerStore>,
            comm_log as Arc<dyn CommLogStore>,
            aggregator,
            Arc::clone(&orchestrator),
            scheduler.clone(),
            ingestor,
            Arc::clone(&vendor_endpoint) as Arc<dyn VendorClient>,
        ));

        // Create router
        let router = courier_server::api::create_router(state);

        Self {
            router,
            vendor,
            vendor_endpoint,
            campaigns,
            customers,
            orchestrator,
            scheduler,
            shutdown_tx,
            _stalled_router: stalled_router,
            temp_dir,
        }
    }

    /// Seed `count` customers for `owner_id` directly in the store.
    pub fn seed_customers(&self, owner_id: &str, count: usize) {
        for i in 0..count {
            self.customers
                .create_customer(fixtures::customer_request(owner_id, i))
                .expect("Failed to create customer");
        }
    }

    /// Poll a campaign over the API until its status is terminal.
    pub async fn wait_for_terminal(&self, campaign_id: &str, timeout: Duration) -> TestResponse {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let response = self.get(&format!("/api/v1/campaigns/{}", campaign_id)).await;
            let status = response.body["status"].as_str().unwrap_or_default();
            if matches!(status, "completed" | "failed") || tokio::time::Instant::now() >= deadline {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Fetch a non-JSON body as text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    /// Stop the receipt router and any scheduler.
    pub async fn shutdown(&self) {
        if let Some(ref scheduler) = self.scheduler {
            scheduler.stop();
            scheduler.drain().await;
        }
        self.orchestrator.drain().await;
        let _ = self.shutdown_tx.send(());
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Start the scheduler loop
    pub enable_scheduler: bool,
    /// Drain the receipt queue into the aggregator
    pub start_receipt_router: bool,
    /// Receipt queue capacity
    pub receipt_buffer: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            enable_scheduler: false,
            start_receipt_router: true,
            receipt_buffer: 1_000,
        }
    }
}

impl TestConfig {
    /// Create config with the scheduler running.
    pub fn with_scheduler() -> Self {
        Self {
            enable_scheduler: true,
            ..Default::default()
        }
    }

    /// Create config with a tiny receipt queue that nothing drains.
    pub fn with_stalled_receipts(receipt_buffer: usize) -> Self {
        Self {
            start_receipt_router: false,
            receipt_buffer,
            ..Default::default()
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
