//! BLE scanner policy layer (C5, §4.5) plus the batcher it drives (C4).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use ble_adapter::{BleAdapter, ScanMode, ScannerState};
use ble_proto::messages::RawAdvertisement;

use crate::batcher::Batcher;
use crate::coordinator::CoordinatorMsg;

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub enum ScannerCommand {
    /// `None` stops the scan; `Some(mode)` starts or retargets it.
    SetMode(Option<ScanMode>),
}

pub fn spawn(
    adapter: Arc<dyn BleAdapter>,
    batch_size: usize,
    flush_interval: Duration,
    coordinator_tx: mpsc::UnboundedSender<CoordinatorMsg>,
) -> mpsc::UnboundedSender<ScannerCommand> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(run(adapter, batch_size, flush_interval, cmd_rx, coordinator_tx));
    cmd_tx
}

async fn run(
    adapter: Arc<dyn BleAdapter>,
    batch_size: usize,
    flush_interval: Duration,
    mut cmd_rx: mpsc::UnboundedReceiver<ScannerCommand>,
    coordinator_tx: mpsc::UnboundedSender<CoordinatorMsg>,
) {
    let mut ads = adapter.advertisements();
    let mut batcher = Batcher::new(batch_size);
    let mut desired_mode: Option<ScanMode> = None;
    let mut ticker = tokio::time::interval(flush_interval);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ScannerCommand::SetMode(mode)) => {
                        desired_mode = mode;
                        apply_mode(&adapter, mode, &coordinator_tx).await;
                    }
                    None => break,
                }
            }
            Some(ad) = ads.recv() => {
                let raw = RawAdvertisement {
                    address: ad.address.to_wire_u64(),
                    address_type: ad.address.address_type.to_wire(),
                    rssi: ad.rssi as i32,
                    data: ad.data,
                };
                if let Some(batch) = batcher.add(raw) {
                    let _ = coordinator_tx.send(CoordinatorMsg::AdvertisementBatch(batch));
                }
            }
            _ = ticker.tick() => {
                if let Some(batch) = batcher.tick(flush_interval) {
                    let _ = coordinator_tx.send(CoordinatorMsg::AdvertisementBatch(batch));
                }
                // A scan that should be running but isn't (adapter came back
                // from a transient failure) gets nudged back on each tick;
                // `start_scan` is idempotent so this costs nothing when
                // already active.
                if desired_mode.is_some() && adapter.scanner_state() == ScannerState::Idle {
                    apply_mode(&adapter, desired_mode, &coordinator_tx).await;
                }
            }
        }
    }
}

async fn apply_mode(
    adapter: &Arc<dyn BleAdapter>,
    mode: Option<ScanMode>,
    coordinator_tx: &mpsc::UnboundedSender<CoordinatorMsg>,
) {
    let mut backoff = BACKOFF_INITIAL;
    loop {
        let result = match mode {
            Some(m) => adapter.start_scan(m).await,
            None => adapter.stop_scan().await,
        };
        match result {
            Ok(()) => {
                info!(?mode, "scanner mode applied");
                let _ = coordinator_tx.send(CoordinatorMsg::ScannerStateChanged(adapter.scanner_state()));
                return;
            }
            Err(err) => {
                warn!(%err, ?backoff, "scanner restart failed, backing off");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }
}
