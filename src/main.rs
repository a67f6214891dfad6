#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result};
use keyceremony::{settings::KeyCeremonySettings, CeremonyServices, VERSION};
use log::info;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = KeyCeremonySettings::load().context("Failed to load settings")?;
    print_startup_info(&settings);

    // Registration, authentication and the sweeper share one set of stores
    let services = CeremonyServices::in_memory(&settings);
    let sweeper = services.sweeper();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_task = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    // receiver may already be gone if the sweeper exited
    let _ = shutdown_tx.send(true);
    sweeper_task.await.context("Expiry sweeper task failed")?;
    info!(
        "Stopped with {} device registrations on record",
        services
            .authentication
            .get_device_count(&settings.relying_party.rp_id)
            .unwrap_or(0)
    );
    Ok(())
}

fn print_startup_info(settings: &KeyCeremonySettings) {
    info!("Starting keyceremony {VERSION}");
    info!("Relying party: {}", settings.relying_party.rp_id);
    info!("Allowed facets: {:?}", settings.effective_facets());
    info!(
        "Request TTL {}s, pending registration TTL {}s",
        settings.challenges.request_ttl_seconds,
        settings.challenges.pending_registration_ttl_seconds
    );
}
