//! Pairway - pairing-code gateway for messaging account linking

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use pairway::{
    archive::{ArchiveConfig, Archivist},
    config::Args,
    fault, logging,
    provider::EngineProvider,
    server::{self, AppState},
    session::{SessionController, SessionRegistry},
    store::EphemeralStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    logging::init(&args.log_level);

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    fault::install();

    // Print startup banner
    info!("======================================");
    info!("  Pairway - Pairing Code Gateway");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Engine: {}", args.engine_url);
    info!("Session root: {}", args.session_root.display());
    info!("Grace interval: {}s", args.grace_secs);
    info!(
        "Credential store: {} ({}, {}/)",
        args.store_repo.as_deref().unwrap_or("-"),
        args.store_branch,
        args.store_namespace
    );
    info!("======================================");

    let archive_config = ArchiveConfig {
        repo: args.store_repo.clone().unwrap_or_default(),
        branch: args.store_branch.clone(),
        namespace: args.store_namespace.clone(),
        token: args.store_token.clone().unwrap_or_default(),
        api_base: args.store_api_base.clone(),
    };
    let archivist = Arc::new(Archivist::new(archive_config)?);

    let provider = Arc::new(EngineProvider::new(
        args.engine_url.clone(),
        Duration::from_millis(args.engine_timeout_ms),
    ));

    let registry = Arc::new(SessionRegistry::new());
    let controller = Arc::new(SessionController::new(
        provider,
        archivist,
        EphemeralStore::new(args.session_root.clone()),
        Arc::clone(&registry),
        Duration::from_secs(args.grace_secs),
    ));

    let state = Arc::new(AppState::new(args, controller));

    // Run the server until Ctrl+C, then drain in-flight sessions so no
    // ephemeral scope outlives the process.
    tokio::select! {
        result = server::run(Arc::clone(&state)) => {
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    registry.drain().await;
    info!("All session scopes released");

    Ok(())
}
