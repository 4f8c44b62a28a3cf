//! Entry point: wires CLI flags, logging, the in-memory adapter, the
//! coordinator, and the control server together, then waits for either a
//! signal or a fatal startup error (§6.3).

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use ble_adapter::BleAdapter;
use ble_proxyd::cli::Cli;
use ble_proxyd::error::DaemonError;
use ble_proxyd::{coordinator, logging, server::Server};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_level = cli.log_level.clone();
    let log_file = cli.log_file.clone();
    let config = cli.into_config();
    let _logging_guard = logging::init(&log_level, log_file.as_deref());

    match run(config).await {
        Ok(signaled) if signaled => ExitCode::from(130),
        Ok(_) => ExitCode::from(0),
        Err(err) => {
            error!(%err, "fatal error");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

/// Returns `Ok(true)` if shutdown was triggered by a signal.
async fn run(config: ble_proxyd::config::Config) -> Result<bool, DaemonError> {
    let config = Arc::new(config);

    // The real BLE radio backend is out of scope (SPEC_FULL.md §9); the
    // in-memory adapter is what this daemon actually drives.
    let adapter: Arc<dyn BleAdapter> = Arc::new(ble_adapter::mock::MockAdapter::new());

    let coordinator = coordinator::spawn(adapter, (*config).clone());
    let server = Server::bind(config.clone(), coordinator).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signaled = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let ctrlc_tx = shutdown_tx.clone();
    let ctrlc_signaled = signaled.clone();
    ctrlc::set_handler(move || {
        ctrlc_signaled.store(true, std::sync::atomic::Ordering::SeqCst);
        let _ = ctrlc_tx.send(true);
    })
    .expect("failed to install signal handler");

    info!("ble-proxyd running");
    server.run(shutdown_rx).await;
    info!("shutdown complete");
    Ok(signaled.load(std::sync::atomic::Ordering::SeqCst))
}
