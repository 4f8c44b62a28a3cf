//! A single GATT request queued on a connection's FIFO (§4.6, §4.8).

use tokio::sync::oneshot;

use ble_adapter::AdapterError;

use crate::ids::{OpId, SessionId};

#[derive(Debug, Clone)]
pub enum OpKind {
    ReadChr { handle: u16 },
    WriteChr { handle: u16, data: Vec<u8>, with_response: bool },
    ReadDesc { handle: u16 },
    WriteDesc { handle: u16, data: Vec<u8> },
    NotifySet { handle: u16, enable: bool },
}

impl OpKind {
    pub fn handle(&self) -> u16 {
        match self {
            OpKind::ReadChr { handle }
            | OpKind::WriteChr { handle, .. }
            | OpKind::ReadDesc { handle }
            | OpKind::WriteDesc { handle, .. }
            | OpKind::NotifySet { handle, .. } => *handle,
        }
    }
}

#[derive(Debug, Clone)]
pub enum JobSuccess {
    Read(Vec<u8>),
    Write,
}

pub type JobOutcome = Result<JobSuccess, AdapterError>;

/// One entry in a connection's FIFO. `done` is fired exactly once by the
/// connection worker; the broker races it against a deadline (§4.8, I5).
pub struct GattJob {
    pub op_id: OpId,
    pub session: SessionId,
    pub kind: OpKind,
    pub done: oneshot::Sender<JobOutcome>,
}
