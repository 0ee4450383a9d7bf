use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier_core::{
    create_receipt_pipeline, load_config, validate_config, BatchAggregator, CallbackDispatcher,
    CampaignScheduler, CampaignStore, CommLogStore, CustomerStore, DeliveryOrchestrator,
    HttpCallbackDispatcher, HttpVendorClient, IngestCallback, SqliteCampaignStore,
    SqliteCommLogStore, SqliteCustomerStore, VendorClient, VendorMode, VendorSimulator,
};
use courier_server::api::create_router;
use courier_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("COURIER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Vendor mode: {:?}", config.vendor.mode);

    // Create SQLite stores
    let campaigns: Arc<dyn CampaignStore> = Arc::new(
        SqliteCampaignStore::new(&config.database.path)
            .context("Failed to create campaign store")?,
    );
    let customers: Arc<dyn CustomerStore> = Arc::new(
        SqliteCustomerStore::new(&config.database.path)
            .context("Failed to create customer store")?,
    );
    let comm_log: Arc<dyn CommLogStore> = Arc::new(
        SqliteCommLogStore::new(&config.database.path)
            .context("Failed to create communication log store")?,
    );
    info!("Stores initialized");

    // Batch aggregator and receipt pipeline
    let aggregator = Arc::new(BatchAggregator::new(
        config.aggregator.clone(),
        Arc::clone(&comm_log),
        Arc::clone(&campaigns),
    ));

    let (ingestor, receipt_router) =
        create_receipt_pipeline(Arc::clone(&aggregator), config.receipts.buffer_size);
    let (shutdown_tx, _) = broadcast::channel(1);
    let router_handle = tokio::spawn(receipt_router.run_until_shutdown(shutdown_tx.subscribe()));
    info!(
        "Receipt pipeline started (buffer {})",
        config.receipts.buffer_size
    );

    // Receipts from the `/vendor/send` endpoint go back over HTTP
    let http_dispatcher: Arc<dyn CallbackDispatcher> = Arc::new(
        HttpCallbackDispatcher::new(Duration::from_millis(config.vendor.request_timeout_ms))
            .context("Failed to create callback dispatcher")?,
    );
    let vendor_endpoint: Arc<dyn VendorClient> = Arc::new(VendorSimulator::new(
        config.vendor.clone(),
        http_dispatcher,
    ));

    // Vendor used for campaign delivery
    let vendor: Arc<dyn VendorClient> = match config.vendor.mode {
        VendorMode::Simulated => {
            info!("Using in-process vendor simulator");
            let callback: Arc<dyn CallbackDispatcher> =
                Arc::new(IngestCallback::new(ingestor.clone()));
            Arc::new(VendorSimulator::new(config.vendor.clone(), callback))
        }
        VendorMode::Http => {
            info!(
                "Using HTTP vendor at {}",
                config.vendor.send_url.as_deref().unwrap_or_default()
            );
            Arc::new(HttpVendorClient::new(&config.vendor).context("Failed to create vendor client")?)
        }
    };

    // Delivery orchestrator
    let orchestrator = Arc::new(DeliveryOrchestrator::new(
        config.delivery.clone(),
        config.vendor.callback_url.clone(),
        Arc::clone(&campaigns),
        Arc::clone(&customers),
        Arc::clone(&comm_log),
        vendor,
        Arc::clone(&aggregator),
    ));

    // Campaign scheduler
    let scheduler = if config.scheduler.enabled {
        let scheduler = Arc::new(CampaignScheduler::new(
            config.scheduler.clone(),
            Arc::clone(&campaigns),
            Arc::clone(&orchestrator),
        ));
        scheduler.start();
        Some(scheduler)
    } else {
        info!("Scheduler disabled in config");
        None
    };

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        campaigns,
        customers,
        comm_log,
        Arc::clone(&aggregator),
        Arc::clone(&orchestrator),
        scheduler.clone(),
        ingestor,
        vendor_endpoint,
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    // Stop dispatching new runs, then let in-flight runs finish sending
    if let Some(ref scheduler) = scheduler {
        scheduler.stop();
        scheduler.drain().await;
        info!("Scheduler stopped");
    }
    orchestrator.drain().await;
    info!("Delivery runs finished");

    // Route queued receipts before the final flush
    let _ = shutdown_tx.send(());
    if let Err(e) = router_handle.await {
        error!("Receipt router ended abnormally: {}", e);
    }

    aggregator.shutdown().await;
    info!("Aggregator flushed and stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
