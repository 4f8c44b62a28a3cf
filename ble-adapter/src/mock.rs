//! An entirely in-memory [`BleAdapter`], scriptable from tests the way
//! `monsgeek-transport`'s fake transports are driven by channels instead
//! of real hardware (SPEC_FULL.md §4.13).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use ble_proto::PeripheralAddress;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{
    AdapterError, Advertisement, BleAdapter, ConnId, DisconnectEvent, NotifyEvent, ScanMode,
    ScannerState, Service,
};

struct PeripheralFixture {
    services: Vec<Service>,
    characteristics: HashMap<u16, Vec<u8>>,
    descriptors: HashMap<u16, Vec<u8>>,
    connect_fails: bool,
}

/// A scripted peripheral population plus channel-fed connection state.
pub struct MockAdapter {
    next_conn: AtomicU32,
    scanner_state: Mutex<ScannerState>,
    peripherals: Mutex<HashMap<u64, PeripheralFixture>>,
    live: Mutex<HashMap<u32, u64>>,
    ad_tx: mpsc::Sender<Advertisement>,
    ad_rx: Mutex<Option<mpsc::Receiver<Advertisement>>>,
    disconnect_tx: mpsc::Sender<DisconnectEvent>,
    disconnect_rx: Mutex<Option<mpsc::Receiver<DisconnectEvent>>>,
    notify_tx: mpsc::Sender<NotifyEvent>,
    notify_rx: Mutex<Option<mpsc::Receiver<NotifyEvent>>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        let (ad_tx, ad_rx) = mpsc::channel(256);
        let (disconnect_tx, disconnect_rx) = mpsc::channel(16);
        let (notify_tx, notify_rx) = mpsc::channel(256);
        Self {
            next_conn: AtomicU32::new(1),
            scanner_state: Mutex::new(ScannerState::Idle),
            peripherals: Mutex::new(HashMap::new()),
            live: Mutex::new(HashMap::new()),
            ad_tx,
            ad_rx: Mutex::new(Some(ad_rx)),
            disconnect_tx,
            disconnect_rx: Mutex::new(Some(disconnect_rx)),
            notify_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
        }
    }

    /// Register a peripheral so `connect`/`discover_services` have something
    /// to return.
    pub fn register_peripheral(&self, address: PeripheralAddress, services: Vec<Service>) {
        let mut characteristics = HashMap::new();
        let mut descriptors = HashMap::new();
        for svc in &services {
            for chr in &svc.characteristics {
                characteristics.insert(chr.handle, Vec::new());
                for desc in &chr.descriptors {
                    descriptors.insert(desc.handle, Vec::new());
                }
            }
        }
        self.peripherals.lock().insert(
            address.pool_key(),
            PeripheralFixture {
                services,
                characteristics,
                descriptors,
                connect_fails: false,
            },
        );
    }

    /// Make the next `connect` to this address fail with `ConnectTimeout`.
    pub fn fail_next_connect(&self, address: PeripheralAddress) {
        if let Some(fixture) = self.peripherals.lock().get_mut(&address.pool_key()) {
            fixture.connect_fails = true;
        }
    }

    /// Push a scripted advertisement into the stream, as if the radio saw it.
    pub async fn push_advertisement(&self, ad: Advertisement) {
        let _ = self.ad_tx.send(ad).await;
    }

    /// Push a scripted notification as if a subscribed characteristic fired.
    pub async fn push_notification(&self, event: NotifyEvent) {
        let _ = self.notify_tx.send(event).await;
    }

    /// Simulate the peripheral hanging up rather than the caller.
    pub async fn simulate_disconnect(&self, conn: ConnId) {
        let address = self.live.lock().remove(&conn.0);
        if let Some(address) = address {
            let _ = self
                .disconnect_tx
                .send(DisconnectEvent {
                    conn,
                    address: PeripheralAddress::from_wire_u64(
                        address,
                        ble_proto::AddressType::Public,
                    ),
                })
                .await;
        }
    }

    fn require_live(&self, conn: ConnId) -> Result<u64, AdapterError> {
        self.live
            .lock()
            .get(&conn.0)
            .copied()
            .ok_or(AdapterError::NotConnected(conn))
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    async fn start_scan(&self, mode: ScanMode) -> Result<(), AdapterError> {
        *self.scanner_state.lock() = match mode {
            ScanMode::Passive => ScannerState::Passive,
            ScanMode::Active => ScannerState::Active,
        };
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        *self.scanner_state.lock() = ScannerState::Idle;
        Ok(())
    }

    fn scanner_state(&self) -> ScannerState {
        *self.scanner_state.lock()
    }

    fn advertisements(&self) -> mpsc::Receiver<Advertisement> {
        self.ad_rx
            .lock()
            .take()
            .expect("advertisements() receiver already taken")
    }

    async fn connect(&self, address: PeripheralAddress) -> Result<ConnId, AdapterError> {
        let key = address.pool_key();
        let fails = self
            .peripherals
            .lock()
            .get(&key)
            .map(|f| f.connect_fails)
            .unwrap_or(false);
        if fails {
            return Err(AdapterError::ConnectTimeout(address));
        }
        if !self.peripherals.lock().contains_key(&key) {
            return Err(AdapterError::UnknownPeripheral(address));
        }
        let id = self.next_conn.fetch_add(1, Ordering::SeqCst);
        self.live.lock().insert(id, key);
        Ok(ConnId(id))
    }

    async fn disconnect(&self, conn: ConnId) -> Result<(), AdapterError> {
        self.live.lock().remove(&conn.0);
        Ok(())
    }

    fn disconnect_events(&self) -> mpsc::Receiver<DisconnectEvent> {
        self.disconnect_rx
            .lock()
            .take()
            .expect("disconnect_events() receiver already taken")
    }

    async fn discover_services(&self, conn: ConnId) -> Result<Vec<Service>, AdapterError> {
        let key = self.require_live(conn)?;
        self.peripherals
            .lock()
            .get(&key)
            .map(|f| f.services.clone())
            .ok_or(AdapterError::NotConnected(conn))
    }

    async fn read_characteristic(&self, conn: ConnId, handle: u16) -> Result<Vec<u8>, AdapterError> {
        let key = self.require_live(conn)?;
        self.peripherals
            .lock()
            .get(&key)
            .and_then(|f| f.characteristics.get(&handle).cloned())
            .ok_or(AdapterError::UnknownHandle(handle))
    }

    async fn write_characteristic(
        &self,
        conn: ConnId,
        handle: u16,
        data: &[u8],
        _with_response: bool,
    ) -> Result<(), AdapterError> {
        let key = self.require_live(conn)?;
        let mut peripherals = self.peripherals.lock();
        let fixture = peripherals
            .get_mut(&key)
            .ok_or(AdapterError::NotConnected(conn))?;
        let slot = fixture
            .characteristics
            .get_mut(&handle)
            .ok_or(AdapterError::UnknownHandle(handle))?;
        *slot = data.to_vec();
        Ok(())
    }

    async fn read_descriptor(&self, conn: ConnId, handle: u16) -> Result<Vec<u8>, AdapterError> {
        let key = self.require_live(conn)?;
        self.peripherals
            .lock()
            .get(&key)
            .and_then(|f| f.descriptors.get(&handle).cloned())
            .ok_or(AdapterError::UnknownHandle(handle))
    }

    async fn write_descriptor(
        &self,
        conn: ConnId,
        handle: u16,
        data: &[u8],
    ) -> Result<(), AdapterError> {
        let key = self.require_live(conn)?;
        let mut peripherals = self.peripherals.lock();
        let fixture = peripherals
            .get_mut(&key)
            .ok_or(AdapterError::NotConnected(conn))?;
        let slot = fixture
            .descriptors
            .get_mut(&handle)
            .ok_or(AdapterError::UnknownHandle(handle))?;
        *slot = data.to_vec();
        Ok(())
    }

    async fn subscribe_notify(&self, conn: ConnId, handle: u16) -> Result<(), AdapterError> {
        self.require_live(conn)?;
        let _ = handle;
        Ok(())
    }

    async fn unsubscribe_notify(&self, conn: ConnId, handle: u16) -> Result<(), AdapterError> {
        self.require_live(conn)?;
        let _ = handle;
        Ok(())
    }

    fn notifications(&self) -> mpsc::Receiver<NotifyEvent> {
        self.notify_rx
            .lock()
            .take()
            .expect("notifications() receiver already taken")
    }

    async fn pair(&self, conn: ConnId) -> Result<(), AdapterError> {
        self.require_live(conn)?;
        Ok(())
    }

    async fn unpair(&self, _address: PeripheralAddress) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn clear_gatt_cache(&self, _address: PeripheralAddress) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ble_proto::AddressType;

    fn addr(v: u64) -> PeripheralAddress {
        PeripheralAddress::from_wire_u64(v, AddressType::Public)
    }

    #[tokio::test]
    async fn connect_to_unknown_peripheral_fails() {
        let adapter = MockAdapter::new();
        assert!(matches!(
            adapter.connect(addr(1)).await,
            Err(AdapterError::UnknownPeripheral(_))
        ));
    }

    #[tokio::test]
    async fn connect_then_discover_then_disconnect() {
        let adapter = MockAdapter::new();
        adapter.register_peripheral(addr(1), vec![]);
        let conn = adapter.connect(addr(1)).await.unwrap();
        assert!(adapter.discover_services(conn).await.unwrap().is_empty());
        adapter.disconnect(conn).await.unwrap();
        assert!(matches!(
            adapter.discover_services(conn).await,
            Err(AdapterError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn scripted_connect_failure_is_reported() {
        let adapter = MockAdapter::new();
        adapter.register_peripheral(addr(1), vec![]);
        adapter.fail_next_connect(addr(1));
        assert!(matches!(
            adapter.connect(addr(1)).await,
            Err(AdapterError::ConnectTimeout(_))
        ));
    }

    #[tokio::test]
    async fn pushed_advertisement_is_observable() {
        let adapter = MockAdapter::new();
        let mut rx = adapter.advertisements();
        adapter
            .push_advertisement(Advertisement {
                address: addr(1),
                rssi: -50,
                data: vec![1, 2, 3],
            })
            .await;
        let ad = rx.recv().await.unwrap();
        assert_eq!(ad.rssi, -50);
    }

    #[tokio::test]
    async fn simulated_disconnect_is_observable() {
        let adapter = MockAdapter::new();
        adapter.register_peripheral(addr(1), vec![]);
        let conn = adapter.connect(addr(1)).await.unwrap();
        let mut rx = adapter.disconnect_events();
        adapter.simulate_disconnect(conn).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.conn, conn);
    }
}
