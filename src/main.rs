//! Power Station - Main Entry Point
//!
//! Connects to the hub on localhost, binds the LCD and the voltage/current
//! sensor as they are discovered and logs a sample every two seconds until the
//! process is terminated or the log file can no longer be written.

use anyhow::Context;
use powerstation_rs::{IpConnection, Session, StationConfig, SystemClock};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Power Station is starting...");

    let config = StationConfig::default();
    let transport = Arc::new(IpConnection::with_timeout(config.request_timeout));
    let session = Session::new(config, transport, Arc::new(SystemClock));

    let result = session
        .start()
        .and_then(|()| session.run())
        .context("Power station stopped");

    if result.is_err() {
        if let Err(e) = session.shutdown() {
            tracing::warn!("Disconnect on exit failed: {}", e);
        }
    }

    tracing::info!("Power Station: End");
    result
}
