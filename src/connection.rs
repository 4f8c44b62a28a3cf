//! The per-connection FIFO worker (C6, §4.6).
//!
//! One task per live BLE connection, draining a single `mpsc` queue so at
//! most one GATT op is ever in flight against a given peripheral. A
//! `watch` flip from the coordinator (disconnect requested) interrupts
//! whatever op is in flight, resolves it and every still-queued op with
//! `Disconnected`, and ends the task — this is what lets a pending read
//! resolve before the disconnect response goes out (§8 scenario 6).

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use ble_adapter::{AdapterError, BleAdapter, ConnId};

use crate::job::{GattJob, JobSuccess, OpKind};

pub fn spawn_connection_worker(
    adapter: Arc<dyn BleAdapter>,
    conn: ConnId,
    job_rx: mpsc::UnboundedReceiver<GattJob>,
    disconnecting: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(adapter, conn, job_rx, disconnecting))
}

async fn run(
    adapter: Arc<dyn BleAdapter>,
    conn: ConnId,
    mut job_rx: mpsc::UnboundedReceiver<GattJob>,
    mut disconnecting: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = disconnecting.changed() => {
                drain_with_disconnected(&mut job_rx, conn);
                return;
            }
            job = job_rx.recv() => {
                let Some(job) = job else { return };
                tokio::select! {
                    biased;
                    _ = disconnecting.changed() => {
                        resolve(job, Err(AdapterError::Disconnected(conn)));
                        drain_with_disconnected(&mut job_rx, conn);
                        return;
                    }
                    outcome = run_op(&adapter, conn, &job.kind) => {
                        resolve(job, outcome);
                    }
                }
            }
        }
    }
}

fn drain_with_disconnected(job_rx: &mut mpsc::UnboundedReceiver<GattJob>, conn: ConnId) {
    while let Ok(job) = job_rx.try_recv() {
        resolve(job, Err(AdapterError::Disconnected(conn)));
    }
}

fn resolve(job: GattJob, outcome: Result<JobSuccess, AdapterError>) {
    if job.done.send(outcome).is_err() {
        warn!(op_id = job.op_id, "GATT op completed after its deadline");
    }
}

async fn run_op(
    adapter: &Arc<dyn BleAdapter>,
    conn: ConnId,
    kind: &OpKind,
) -> Result<JobSuccess, AdapterError> {
    match kind {
        OpKind::ReadChr { handle } => adapter
            .read_characteristic(conn, *handle)
            .await
            .map(JobSuccess::Read),
        OpKind::WriteChr { handle, data, with_response } => adapter
            .write_characteristic(conn, *handle, data, *with_response)
            .await
            .map(|_| JobSuccess::Write),
        OpKind::ReadDesc { handle } => adapter
            .read_descriptor(conn, *handle)
            .await
            .map(JobSuccess::Read),
        OpKind::WriteDesc { handle, data } => adapter
            .write_descriptor(conn, *handle, data)
            .await
            .map(|_| JobSuccess::Write),
        OpKind::NotifySet { handle, enable } => {
            let result = if *enable {
                adapter.subscribe_notify(conn, *handle).await
            } else {
                adapter.unsubscribe_notify(conn, *handle).await
            };
            result.map(|_| JobSuccess::Write)
        }
    }
}
