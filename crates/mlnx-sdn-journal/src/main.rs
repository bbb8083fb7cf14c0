//! mlnx-sdn journal daemon.
//!
//! Opens the journal store and runs the sync and maintenance workers until
//! interrupted.

use std::sync::Arc;

use mlnx_sdn_journal::{
    HttpSdnClient, JournalDependencyValidator, JournalSyncer, MaintenanceWorker, NoopSdnClient,
    SdnClient, SdnConfig,
};
use mlnx_sdn_store::RocksStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mlnx_sdn=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting mlnx-sdn journal daemon");

    let config = SdnConfig::from_env();
    let data_dir =
        std::env::var("DATA_DIR").unwrap_or_else(|_| "/var/lib/mlnx-sdn/journal".to_string());

    tracing::info!(
        url = %config.url,
        domain = %config.domain,
        sync_enabled = config.sync_enabled,
        "Loaded controller configuration"
    );

    let store = Arc::new(RocksStore::open(&data_dir)?);
    tracing::info!(data_dir = %data_dir, "Initialized RocksDB store");

    let client: Arc<dyn SdnClient> = if config.sync_enabled {
        Arc::new(HttpSdnClient::new(&config)?)
    } else {
        tracing::warn!("Controller sync disabled, journal rows will complete locally");
        Arc::new(NoopSdnClient::new())
    };

    let validator = Arc::new(JournalDependencyValidator::new(Arc::clone(&store)));
    let syncer = Arc::new(JournalSyncer::new(
        Arc::clone(&store),
        client,
        validator,
        &config,
    ));
    let maintenance = Arc::new(MaintenanceWorker::with_default_operations(
        Arc::clone(&store),
        &config,
    ));

    // Start the workers as background tasks
    tokio::spawn(Arc::clone(&maintenance).run());
    tokio::spawn(Arc::clone(&syncer).run());
    syncer.set_sync_event();
    tracing::info!("Started journal sync and maintenance loops");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
