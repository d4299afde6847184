//! Roomcast relay server -- room-scoped relay for encrypted chat.
//!
//! An axum WebSocket server that lets clients join named rooms and forwards
//! opaque ciphertext between room members. The relay never sees plaintext
//! and keeps nothing once a connection closes.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5000
//! cargo run --bin roomcast-relay
//!
//! # Run on custom address
//! cargo run --bin roomcast-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! ROOMCAST_ADDR=127.0.0.1:8080 cargo run --bin roomcast-relay
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use roomcast_relay::config::{RelayCliArgs, RelayConfig};
use roomcast_relay::server::{self, RelayState};

/// How long shutdown waits for connections to finish their cleanup.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting roomcast relay server");

    let state = Arc::new(RelayState::with_limits(
        config.max_frame_size,
        config.outbox_capacity,
    ));

    let (bound_addr, mut handle) =
        match server::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(error = %e, "failed to start relay server");
                std::process::exit(1);
            }
        };
    tracing::info!(addr = %bound_addr, "relay server listening");

    tokio::select! {
        result = &mut handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down relay server");
            state.shutdown(SHUTDOWN_GRACE).await;
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                tracing::warn!("listener did not stop in time");
                handle.abort();
            }
        }
    }
}
