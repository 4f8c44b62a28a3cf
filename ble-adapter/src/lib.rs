//! Capability trait for the host BLE radio (§4.5, §9).
//!
//! Shaped after `monsgeek-transport`'s `Transport` trait: an
//! `async_trait`, `Send + Sync` interface that hides one concrete backend
//! behind a handful of request/response methods plus an event stream, so
//! the rest of the daemon can be driven against [`mock::MockAdapter`] in
//! tests without touching a real radio. A production BlueZ/D-Bus backend
//! is an external collaborator this crate doesn't implement.

pub mod error;
pub mod mock;
pub mod types;

pub use error::AdapterError;
pub use types::{
    Advertisement, CharacteristicProperties, Characteristic, ConnId, Descriptor,
    DisconnectEvent, NotifyEvent, ScannerState, Service, Uuid128,
};

use async_trait::async_trait;
use ble_proto::PeripheralAddress;
use tokio::sync::mpsc;

/// Scan filter/mode requested by `start_scan` (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Passive,
    Active,
}

#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Begin delivering [`Advertisement`]s on `advertisements()`. Idempotent:
    /// calling it again while a scan is active just changes the mode.
    async fn start_scan(&self, mode: ScanMode) -> Result<(), AdapterError>;

    async fn stop_scan(&self) -> Result<(), AdapterError>;

    fn scanner_state(&self) -> ScannerState;

    /// Receiver side of the advertisement stream. Implementations hand back
    /// a fresh receiver on a broadcast-like internal channel; callers that
    /// need fan-out should wrap this, not call it twice expecting the same
    /// backlog.
    fn advertisements(&self) -> mpsc::Receiver<Advertisement>;

    async fn connect(&self, address: PeripheralAddress) -> Result<ConnId, AdapterError>;

    async fn disconnect(&self, conn: ConnId) -> Result<(), AdapterError>;

    /// Receiver for disconnects the adapter initiated rather than a caller.
    fn disconnect_events(&self) -> mpsc::Receiver<DisconnectEvent>;

    async fn discover_services(&self, conn: ConnId) -> Result<Vec<Service>, AdapterError>;

    async fn read_characteristic(&self, conn: ConnId, handle: u16) -> Result<Vec<u8>, AdapterError>;

    async fn write_characteristic(
        &self,
        conn: ConnId,
        handle: u16,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), AdapterError>;

    async fn read_descriptor(&self, conn: ConnId, handle: u16) -> Result<Vec<u8>, AdapterError>;

    async fn write_descriptor(
        &self,
        conn: ConnId,
        handle: u16,
        data: &[u8],
    ) -> Result<(), AdapterError>;

    async fn subscribe_notify(&self, conn: ConnId, handle: u16) -> Result<(), AdapterError>;

    async fn unsubscribe_notify(&self, conn: ConnId, handle: u16) -> Result<(), AdapterError>;

    /// Receiver for GATT notifications across all subscriptions. Per-handle
    /// demultiplexing is the caller's job (§4.8, the broker).
    fn notifications(&self) -> mpsc::Receiver<NotifyEvent>;

    async fn pair(&self, conn: ConnId) -> Result<(), AdapterError>;

    async fn unpair(&self, address: PeripheralAddress) -> Result<(), AdapterError>;

    async fn clear_gatt_cache(&self, address: PeripheralAddress) -> Result<(), AdapterError>;
}
