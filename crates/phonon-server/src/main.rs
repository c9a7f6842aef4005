//! # phonon-server
//!
//! Local HTTP front end for the Phonon card manager.
//!
//! This binary provides:
//! - a **session** over the simulated card device, with cards, settings and
//!   activity persisted to SQLite in the data directory
//! - a **REST API** (axum) for card management, transfer proposals,
//!   settings, history and denomination checks

mod api;
mod config;
mod error;

use std::sync::Arc;

use phonon_client::Session;
use tracing::info;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    phonon_client::init_tracing();

    info!("Starting Phonon server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the session (database, rehydrated cards, persistence task)
    // -----------------------------------------------------------------------
    let session = Arc::new(Session::open(config.client.clone())?);
    info!(cards = session.cards().len(), "Session ready");

    let app_state = AppState {
        session: session.clone(),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server until it fails or Ctrl+C arrives
    // -----------------------------------------------------------------------
    let outcome = tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = &result {
                tracing::error!(error = %e, "HTTP server failed");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    session.shutdown()?;
    outcome
}
