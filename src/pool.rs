//! Bounded connection pool keyed by 48-bit peripheral address (§4.7).

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use ble_adapter::ConnId;
use ble_proto::PeripheralAddress;

use crate::job::GattJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

#[derive(Debug)]
pub struct ConnectionSlot {
    pub address: PeripheralAddress,
    pub state: ConnState,
    pub conn_id: Option<ConnId>,
    pub mtu: u16,
    pub last_error: u32,
    pub job_tx: Option<mpsc::UnboundedSender<GattJob>>,
    pub disconnecting: Option<watch::Sender<bool>>,
    pub worker: Option<JoinHandle<()>>,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("connection pool is at capacity")]
    Exhausted,
}

/// At most one record per address (I2); occupancy capped at `max_connections` (I1).
pub struct Pool {
    slots: HashMap<u64, ConnectionSlot>,
    max_connections: usize,
}

impl Pool {
    pub fn new(max_connections: usize) -> Self {
        Self {
            slots: HashMap::new(),
            max_connections,
        }
    }

    pub fn get(&self, key: u64) -> Option<&ConnectionSlot> {
        self.slots.get(&key)
    }

    pub fn get_mut(&mut self, key: u64) -> Option<&mut ConnectionSlot> {
        self.slots.get_mut(&key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the existing slot for `address`, or allocates a new one in
    /// `Connecting` state if occupancy allows (§4.7).
    pub fn acquire(&mut self, address: PeripheralAddress) -> Result<&mut ConnectionSlot, PoolError> {
        let key = address.pool_key();
        if !self.slots.contains_key(&key) {
            if self.slots.len() >= self.max_connections {
                return Err(PoolError::Exhausted);
            }
            self.slots.insert(
                key,
                ConnectionSlot {
                    address,
                    state: ConnState::Connecting,
                    conn_id: None,
                    mtu: 0,
                    last_error: 0,
                    job_tx: None,
                    disconnecting: None,
                    worker: None,
                },
            );
        }
        Ok(self.slots.get_mut(&key).expect("just inserted or present"))
    }

    /// Frees a slot. Called only on explicit disconnect, connect failure, or
    /// adapter-initiated loss — never implicitly (§4.7).
    pub fn release(&mut self, key: u64) -> Option<ConnectionSlot> {
        self.slots.remove(&key)
    }

    pub fn find_by_conn_id(&self, conn: ConnId) -> Option<u64> {
        self.slots
            .iter()
            .find(|(_, slot)| slot.conn_id == Some(conn))
            .map(|(key, _)| *key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ble_proto::AddressType;

    fn addr(v: u64) -> PeripheralAddress {
        PeripheralAddress::from_wire_u64(v, AddressType::Public)
    }

    #[test]
    fn acquire_reuses_existing_slot() {
        let mut pool = Pool::new(3);
        pool.acquire(addr(1)).unwrap();
        pool.acquire(addr(1)).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn acquire_beyond_capacity_is_exhausted() {
        let mut pool = Pool::new(1);
        pool.acquire(addr(1)).unwrap();
        assert_eq!(pool.acquire(addr(2)).unwrap_err(), PoolError::Exhausted);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn release_frees_capacity() {
        let mut pool = Pool::new(1);
        pool.acquire(addr(1)).unwrap();
        pool.release(addr(1).pool_key());
        assert!(pool.acquire(addr(2)).is_ok());
    }
}
