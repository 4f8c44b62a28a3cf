use thiserror::Error;

use crate::types::ConnId;
use ble_proto::PeripheralAddress;

/// Failure modes a [`crate::BleAdapter`] implementation can report (§7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("no peripheral at {0:?} is known to the adapter")]
    UnknownPeripheral(PeripheralAddress),

    #[error("connection {0:?} is not established")]
    NotConnected(ConnId),

    #[error("GATT handle {0} does not exist on the connected peripheral")]
    UnknownHandle(u16),

    #[error("connect to {0:?} timed out")]
    ConnectTimeout(PeripheralAddress),

    #[error("GATT operation on {0:?} timed out")]
    OperationTimeout(ConnId),

    #[error("the adapter radio is unavailable: {0}")]
    RadioUnavailable(String),

    #[error("pairing with {0:?} was rejected")]
    PairingRejected(PeripheralAddress),

    #[error("peripheral {0:?} disconnected during the operation")]
    Disconnected(ConnId),
}
