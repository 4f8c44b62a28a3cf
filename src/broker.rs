//! Correlates control requests to BLE responses and enforces the timeout
//! half of I5 (C8, §4.8): a pending op is resolved exactly once, racing the
//! connection worker's reply against a deadline. A deadline firing first
//! does not cancel the underlying adapter call; its eventual result is
//! dropped when the `oneshot` it would complete has no receiver left.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use ble_proto::messages::{
    BluetoothGATTErrorResponse, BluetoothGATTNotifyResponse, BluetoothGATTReadResponse,
    BluetoothGATTWriteResponse,
};
use ble_proto::PeripheralAddress;

use crate::ids::OpId;
use crate::job::{JobOutcome, JobSuccess};
use crate::outbound::OutMsg;
use crate::wire_errors;

#[derive(Default)]
pub struct OpIdAllocator(AtomicU64);

impl OpIdAllocator {
    pub fn next(&self) -> OpId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ResponseShape {
    Read,
    Write,
    Notify,
}

/// Spawns the task that waits for `rx` up to `deadline`, then sends exactly
/// one response to `outbox`.
pub fn spawn_job_watcher(
    outbox: mpsc::Sender<OutMsg>,
    address: PeripheralAddress,
    handle: u16,
    shape: ResponseShape,
    rx: oneshot::Receiver<JobOutcome>,
    deadline: Duration,
) {
    tokio::spawn(async move {
        let outcome = tokio::time::timeout(deadline, rx).await;
        let out = match outcome {
            Ok(Ok(Ok(success))) => success_to_outmsg(address, handle, shape, success),
            Ok(Ok(Err(adapter_err))) => {
                warn!(%adapter_err, "GATT op failed at the adapter");
                error_outmsg(address, handle, wire_errors::PERIPHERAL_ERROR)
            }
            Ok(Err(_recv_dropped)) => {
                // The connection worker's slot was torn down (disconnect
                // drained this op) before it could reply.
                error_outmsg(address, handle, wire_errors::DISCONNECTED)
            }
            Err(_elapsed) => error_outmsg(address, handle, wire_errors::TIMEOUT),
        };
        let _ = outbox.send(out).await;
    });
}

fn success_to_outmsg(
    address: PeripheralAddress,
    handle: u16,
    shape: ResponseShape,
    success: JobSuccess,
) -> OutMsg {
    match (shape, success) {
        (ResponseShape::Read, JobSuccess::Read(data)) => OutMsg::GattRead(BluetoothGATTReadResponse {
            address: address.to_wire_u64(),
            handle: handle as u32,
            data,
        }),
        (ResponseShape::Write, _) => OutMsg::GattWrite(BluetoothGATTWriteResponse {
            address: address.to_wire_u64(),
            handle: handle as u32,
        }),
        (ResponseShape::Notify, _) => OutMsg::GattNotify(BluetoothGATTNotifyResponse {
            address: address.to_wire_u64(),
            handle: handle as u32,
        }),
        (ResponseShape::Read, JobSuccess::Write) => {
            // A write-shaped success returned where a read was expected
            // never happens through `connection::run_op`'s pairing, but
            // resolve to an empty read rather than panic.
            OutMsg::GattRead(BluetoothGATTReadResponse {
                address: address.to_wire_u64(),
                handle: handle as u32,
                data: Vec::new(),
            })
        }
    }
}

fn error_outmsg(address: PeripheralAddress, handle: u16, error: u32) -> OutMsg {
    OutMsg::GattError(BluetoothGATTErrorResponse {
        address: address.to_wire_u64(),
        handle: handle as u32,
        error,
    })
}
