use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;

mod api;
mod config;
mod datum;
mod errors;
mod ledger;
mod models;
mod selector;
mod signer;
mod state_machine;
mod submitter;
mod transaction;
mod transaction_builder;
mod validator;
mod vault_manager;
mod vault_state;
mod wallet_bridge;
mod websocket;

#[cfg(test)]
mod testing;

use api::handlers::AppState;
use config::Config;
use ledger::HttpLedgerClient;
use vault_manager::VaultManager;
use wallet_bridge::{HttpSignerBridge, HttpWitnessCombiner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting Vault Transaction Engine");

    // Load configuration
    let config = Arc::new(Config::from_env().context("failed to load configuration")?);
    log::info!("Configuration loaded");
    log::info!("Ledger API: {}", config.ledger.api_url);
    log::info!("Vault script address: {}", config.vault.script_address);

    // Initialize collaborators
    let ledger = Arc::new(HttpLedgerClient::new(&config.ledger)?);
    let signer = Arc::new(HttpSignerBridge::new(
        &config.signer,
        config.ledger.timeout_secs,
    )?);
    let combiner = Arc::new(HttpWitnessCombiner::new(
        &config.signer,
        config.ledger.timeout_secs,
    )?);
    log::info!("Signer bridge: {}", config.signer.bridge_url);

    let events = websocket::channel();

    let vault_manager = Arc::new(VaultManager::new(
        Arc::clone(&config),
        ledger,
        signer,
        combiner,
        events.clone(),
    ));
    log::info!("Vault manager initialized");

    let app_state = Arc::new(AppState {
        vault_manager,
        events,
    });
    let app = api::create_router(app_state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    log::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
