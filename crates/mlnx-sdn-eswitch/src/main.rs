//! mlnx-sdn eswitch daemon.
//!
//! Discovers the configured fabrics, then polls assigned VFs until
//! interrupted. A PF that fails discovery checks stops the daemon.

use std::sync::Arc;

use mlnx_sdn_eswitch::{DeviceOps, EswitchConfig, EswitchHandler, EswitchManager};
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

    tracing::info!("Starting mlnx-sdn eswitch daemon");

    let config = EswitchConfig::from_env()?;
    config.validate()?;
    tracing::info!(
        fabrics = ?config.fabrics,
        sysfs_root = %config.sysfs_root.display(),
        "Loaded eswitch configuration"
    );

    let ops = DeviceOps::system(&config.sysfs_root, &config.ip_binary);
    let handler = EswitchHandler::new(Arc::new(EswitchManager::new(ops)));

    if let Err(e) = handler.add_fabrics(&config.fabrics) {
        if e.is_fatal() {
            tracing::error!(error = %e, "Fabric discovery failed, terminating");
            std::process::exit(1);
        }
        return Err(e.into());
    }

    let physnets = config.physnets();
    let sync_every = config.max_polling_count.max(1);
    let mut ticker = tokio::time::interval(config.poll_interval());
    let mut polls: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                polls = polls.wrapping_add(1);
                let full_sync = polls % sync_every == 0;
                let handler = handler.clone();
                let physnets = physnets.clone();
                let result = tokio::task::spawn_blocking(move || poll(&handler, &physnets, full_sync)).await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "VF poll task failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                return Ok(());
            }
        }
    }
}

fn poll(handler: &EswitchHandler, physnets: &[String], full_sync: bool) {
    match handler.get_vnics(None) {
        Ok(vnics) => tracing::debug!(vnics = ?vnics.keys().collect::<Vec<_>>(), "Polled assigned VFs"),
        Err(e) => tracing::error!(error = %e, "Failed to poll assigned VFs"),
    }
    if !full_sync {
        return;
    }
    match handler.get_eswitch_tables(physnets) {
        Ok(tables) => {
            for (physnet, table) in tables {
                tracing::info!(physnet = %physnet, entries = table.len() - 1, "Eswitch table synced");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to sync eswitch tables"),
    }
}
