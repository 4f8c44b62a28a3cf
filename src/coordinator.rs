//! Proxy coordinator (C10, §4.10): owns the pool, subscriptions, and the
//! scanner's control channel; the single task (T6) that serializes every
//! pool mutation and subscription write, reached only by message passing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use ble_adapter::{BleAdapter, ConnId, DisconnectEvent, NotifyEvent, ScanMode, ScannerState as AdapterScannerState};
use ble_proto::messages::{
    BluetoothDeviceConnectionResponse, BluetoothGATTGetServicesDoneResponse,
    BluetoothGATTGetServicesRequest, BluetoothGATTGetServicesResponse,
    BluetoothGATTNotifyDataResponse, BluetoothGATTNotifyRequest,
    BluetoothGATTReadDescriptorRequest, BluetoothGATTReadRequest,
    BluetoothGATTWriteDescriptorRequest, BluetoothGATTWriteRequest, BluetoothLeRawAdvertisementsResponse,
    BluetoothLeScannerStateResponse, DeviceRequestKind, GattCharacteristic, GattDescriptor, GattService,
    GattUuid, RawAdvertisement, ScannerMode,
};
use ble_proto::PeripheralAddress;

use crate::broker::{spawn_job_watcher, OpIdAllocator, ResponseShape};
use crate::cache::{Cache, CachedCharacteristic, CachedDescriptor, CachedService};
use crate::config::Config;
use crate::ids::SessionId;
use crate::job::{GattJob, OpKind};
use crate::outbound::OutMsg;
use crate::pool::{ConnState, Pool, PoolError};
use crate::scanner::{self, ScannerCommand};
use crate::subscriptions::SubscriptionRegistry;
use crate::wire_errors;

pub enum CoordinatorMsg {
    RegisterSession { id: SessionId, outbox: mpsc::Sender<OutMsg> },
    UnregisterSession { id: SessionId },

    SubscribeAds { id: SessionId, active: bool },
    UnsubscribeAds { id: SessionId },
    SubscribeScannerState { id: SessionId },

    DeviceRequest { id: SessionId, address: PeripheralAddress, kind: DeviceRequestKind },

    GattGetServices { id: SessionId, req: BluetoothGATTGetServicesRequest },
    GattRead { id: SessionId, req: BluetoothGATTReadRequest },
    GattWrite { id: SessionId, req: BluetoothGATTWriteRequest },
    GattReadDesc { id: SessionId, req: BluetoothGATTReadDescriptorRequest },
    GattWriteDesc { id: SessionId, req: BluetoothGATTWriteDescriptorRequest },
    GattNotify { id: SessionId, req: BluetoothGATTNotifyRequest },

    AdvertisementBatch(Vec<RawAdvertisement>),
    ScannerStateChanged(AdapterScannerState),
    Notification(NotifyEvent),
    AdapterDisconnect(DisconnectEvent),

    ConnectCompleted {
        id: SessionId,
        key: u64,
        result: Result<(ConnId, u16), String>,
    },
    DisconnectCompleted {
        id: SessionId,
        key: u64,
    },
}

#[derive(Clone)]
pub struct CoordinatorHandle(mpsc::UnboundedSender<CoordinatorMsg>);

impl CoordinatorHandle {
    pub fn send(&self, msg: CoordinatorMsg) {
        let _ = self.0.send(msg);
    }
}

pub fn spawn(adapter: Arc<dyn BleAdapter>, config: Config) -> CoordinatorHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = CoordinatorHandle(tx.clone());

    let scanner_tx = scanner::spawn(
        adapter.clone(),
        config.advertisement_batch_size,
        config.flush_interval,
        tx.clone(),
    );

    let cache = config.cache_dir.clone().map(Cache::new);

    let coordinator = Coordinator {
        adapter,
        pool: Pool::new(config.max_connections),
        subs: SubscriptionRegistry::new(),
        sessions: HashMap::new(),
        ad_prefs: HashMap::new(),
        scanner_tx,
        op_ids: OpIdAllocator::default(),
        connect_timeout: config.connect_timeout,
        disconnect_timeout: config.disconnect_timeout,
        gatt_op_timeout: config.gatt_op_timeout,
        cache,
        self_tx: tx,
    };
    tokio::spawn(coordinator.run(rx));
    handle
}

struct Coordinator {
    adapter: Arc<dyn BleAdapter>,
    pool: Pool,
    subs: SubscriptionRegistry,
    sessions: HashMap<SessionId, mpsc::Sender<OutMsg>>,
    ad_prefs: HashMap<SessionId, bool>,
    scanner_tx: mpsc::UnboundedSender<ScannerCommand>,
    op_ids: OpIdAllocator,
    connect_timeout: Duration,
    disconnect_timeout: Duration,
    gatt_op_timeout: Duration,
    cache: Option<Cache>,
    self_tx: mpsc::UnboundedSender<CoordinatorMsg>,
}

impl Coordinator {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CoordinatorMsg>) {
        self.spawn_adapter_event_forwarders();
        while let Some(msg) = rx.recv().await {
            self.handle(msg).await;
        }
    }

    fn spawn_adapter_event_forwarders(&self) {
        let mut notifications = self.adapter.notifications();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = notifications.recv().await {
                let _ = tx.send(CoordinatorMsg::Notification(event));
            }
        });

        let mut disconnects = self.adapter.disconnect_events();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = disconnects.recv().await {
                let _ = tx.send(CoordinatorMsg::AdapterDisconnect(event));
            }
        });
    }

    async fn handle(&mut self, msg: CoordinatorMsg) {
        match msg {
            CoordinatorMsg::RegisterSession { id, outbox } => {
                self.sessions.insert(id, outbox);
            }
            CoordinatorMsg::UnregisterSession { id } => {
                self.sessions.remove(&id);
                self.ad_prefs.remove(&id);
                self.subs.remove_session(id);
                self.recompute_scan_mode();
            }
            CoordinatorMsg::SubscribeAds { id, active } => {
                self.subs.subscribe_ads(id);
                self.ad_prefs.insert(id, active);
                self.recompute_scan_mode();
            }
            CoordinatorMsg::UnsubscribeAds { id } => {
                self.subs.unsubscribe_ads(id);
                self.ad_prefs.remove(&id);
                self.recompute_scan_mode();
            }
            CoordinatorMsg::SubscribeScannerState { id } => {
                self.subs.subscribe_scanner_state(id);
                let mode = adapter_mode_to_wire(self.adapter.scanner_state());
                self.send_to(id, OutMsg::ScannerState(BluetoothLeScannerStateResponse { mode }));
            }
            CoordinatorMsg::DeviceRequest { id, address, kind } => {
                self.handle_device_request(id, address, kind).await;
            }
            CoordinatorMsg::GattGetServices { id, req } => {
                self.handle_get_services(id, req).await;
            }
            CoordinatorMsg::GattRead { id, req } => {
                self.enqueue_op(id, req.address, OpKind::ReadChr { handle: req.handle as u16 }, ResponseShape::Read);
            }
            CoordinatorMsg::GattWrite { id, req } => {
                self.enqueue_op(
                    id,
                    req.address,
                    OpKind::WriteChr {
                        handle: req.handle as u16,
                        data: req.data,
                        with_response: req.response,
                    },
                    ResponseShape::Write,
                );
            }
            CoordinatorMsg::GattReadDesc { id, req } => {
                self.enqueue_op(id, req.address, OpKind::ReadDesc { handle: req.handle as u16 }, ResponseShape::Read);
            }
            CoordinatorMsg::GattWriteDesc { id, req } => {
                self.enqueue_op(
                    id,
                    req.address,
                    OpKind::WriteDesc { handle: req.handle as u16, data: req.data },
                    ResponseShape::Write,
                );
            }
            CoordinatorMsg::GattNotify { id, req } => {
                self.enqueue_op(
                    id,
                    req.address,
                    OpKind::NotifySet { handle: req.handle as u16, enable: req.enable },
                    ResponseShape::Notify,
                );
                self.subs.subscribe_peripheral(id, req.address);
            }
            CoordinatorMsg::AdvertisementBatch(batch) => {
                for id in self.subs.ads_subscribers().copied().collect::<Vec<_>>() {
                    if let Some(outbox) = self.sessions.get(&id) {
                        let _ = outbox.try_send(OutMsg::Advertisements(
                            BluetoothLeRawAdvertisementsResponse { advertisements: batch.clone() },
                        ));
                    }
                }
            }
            CoordinatorMsg::ScannerStateChanged(state) => {
                let mode = adapter_mode_to_wire(state);
                for id in self.subs.scanner_state_subscribers().copied().collect::<Vec<_>>() {
                    if let Some(outbox) = self.sessions.get(&id) {
                        let _ = outbox.try_send(OutMsg::ScannerState(BluetoothLeScannerStateResponse { mode }));
                    }
                }
            }
            CoordinatorMsg::Notification(event) => {
                self.dispatch_notification(event);
            }
            CoordinatorMsg::AdapterDisconnect(event) => {
                self.handle_adapter_disconnect(event);
            }
            CoordinatorMsg::ConnectCompleted { id, key, result } => {
                self.handle_connect_completed(id, key, result);
            }
            CoordinatorMsg::DisconnectCompleted { id, key } => {
                self.pool.release(key);
                self.send_to(
                    id,
                    OutMsg::DeviceConnection(BluetoothDeviceConnectionResponse {
                        address: key,
                        connected: false,
                        mtu: 0,
                        error: wire_errors::NONE,
                    }),
                );
            }
        }
    }

    fn send_to(&self, id: SessionId, msg: OutMsg) {
        if let Some(outbox) = self.sessions.get(&id) {
            let _ = outbox.try_send(msg);
        }
    }

    fn recompute_scan_mode(&self) {
        if self.ad_prefs.is_empty() {
            let _ = self.scanner_tx.send(ScannerCommand::SetMode(None));
            return;
        }
        let mode = if self.ad_prefs.values().any(|&active| active) {
            ScanMode::Active
        } else {
            ScanMode::Passive
        };
        let _ = self.scanner_tx.send(ScannerCommand::SetMode(Some(mode)));
    }

    async fn handle_device_request(&mut self, id: SessionId, address: PeripheralAddress, kind: DeviceRequestKind) {
        match kind {
            DeviceRequestKind::Connect => self.handle_connect_request(id, address).await,
            DeviceRequestKind::Disconnect => self.handle_disconnect_request(id, address),
            DeviceRequestKind::Pair => self.handle_pair(id, address).await,
            DeviceRequestKind::Unpair => self.handle_unpair(id, address).await,
            DeviceRequestKind::ClearCache => self.handle_clear_cache(id, address).await,
        }
    }

    async fn handle_connect_request(&mut self, id: SessionId, address: PeripheralAddress) {
        match self.pool.acquire(address) {
            Ok(_slot) => {}
            Err(PoolError::Exhausted) => {
                self.send_to(
                    id,
                    OutMsg::DeviceConnection(BluetoothDeviceConnectionResponse {
                        address: address.to_wire_u64(),
                        connected: false,
                        mtu: 0,
                        error: wire_errors::POOL_FULL,
                    }),
                );
                return;
            }
        }
        let adapter = self.adapter.clone();
        let tx = self.self_tx.clone();
        let timeout = self.connect_timeout;
        let key = address.pool_key();
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, adapter.connect(address)).await;
            let result = match outcome {
                Ok(Ok(conn)) => Ok((conn, 247u16)),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("connect timed out".to_string()),
            };
            let _ = tx.send(CoordinatorMsg::ConnectCompleted { id, key, result });
        });
    }

    fn handle_connect_completed(&mut self, id: SessionId, key: u64, result: Result<(ConnId, u16), String>) {
        match result {
            Ok((conn, mtu)) => {
                let (job_tx, job_rx) = mpsc::unbounded_channel();
                let (disconnect_tx, disconnect_rx) = watch::channel(false);
                let worker = crate::connection::spawn_connection_worker(
                    self.adapter.clone(),
                    conn,
                    job_rx,
                    disconnect_rx,
                );
                if let Some(slot) = self.pool.get_mut(key) {
                    slot.state = ConnState::Connected;
                    slot.conn_id = Some(conn);
                    slot.mtu = mtu;
                    slot.job_tx = Some(job_tx);
                    slot.disconnecting = Some(disconnect_tx);
                    slot.worker = Some(worker);
                }
                self.send_to(
                    id,
                    OutMsg::DeviceConnection(BluetoothDeviceConnectionResponse {
                        address: key,
                        connected: true,
                        mtu: mtu as u32,
                        error: wire_errors::NONE,
                    }),
                );
            }
            Err(err) => {
                warn!(%err, "connect failed");
                self.pool.release(key);
                self.send_to(
                    id,
                    OutMsg::DeviceConnection(BluetoothDeviceConnectionResponse {
                        address: key,
                        connected: false,
                        mtu: 0,
                        error: wire_errors::PERIPHERAL_ERROR,
                    }),
                );
            }
        }
    }

    fn handle_disconnect_request(&mut self, id: SessionId, address: PeripheralAddress) {
        let key = address.pool_key();
        let Some(slot) = self.pool.get_mut(key) else {
            self.send_to(
                id,
                OutMsg::DeviceConnection(BluetoothDeviceConnectionResponse {
                    address: key,
                    connected: false,
                    mtu: 0,
                    error: wire_errors::NONE,
                }),
            );
            return;
        };
        slot.state = ConnState::Disconnecting;
        let conn = slot.conn_id;
        let worker = slot.worker.take();
        if let Some(tx) = slot.disconnecting.take() {
            let _ = tx.send(true);
        }
        let adapter = self.adapter.clone();
        let tx = self.self_tx.clone();
        let timeout = self.disconnect_timeout;
        tokio::spawn(async move {
            if let Some(worker) = worker {
                let _ = worker.await;
            }
            if let Some(conn) = conn {
                let _ = tokio::time::timeout(timeout, adapter.disconnect(conn)).await;
            }
            let _ = tx.send(CoordinatorMsg::DisconnectCompleted { id, key });
        });
    }

    async fn handle_pair(&mut self, id: SessionId, address: PeripheralAddress) {
        let key = address.pool_key();
        let conn = self.pool.get(key).and_then(|s| s.conn_id);
        let Some(conn) = conn else {
            self.send_to(id, OutMsg::DeviceConnection(disconnected_response(key)));
            return;
        };
        match self.adapter.pair(conn).await {
            Ok(()) => {
                if let Some(cache) = &self.cache {
                    let _ = cache.save_bonding(address);
                }
                self.send_to(
                    id,
                    OutMsg::DeviceConnection(BluetoothDeviceConnectionResponse {
                        address: key,
                        connected: true,
                        mtu: self.pool.get(key).map(|s| s.mtu as u32).unwrap_or(0),
                        error: wire_errors::NONE,
                    }),
                );
            }
            Err(_) => {
                self.send_to(
                    id,
                    OutMsg::DeviceConnection(BluetoothDeviceConnectionResponse {
                        address: key,
                        connected: true,
                        mtu: 0,
                        error: wire_errors::PAIRING_REJECTED,
                    }),
                );
            }
        }
    }

    async fn handle_unpair(&mut self, id: SessionId, address: PeripheralAddress) {
        let _ = self.adapter.unpair(address).await;
        if let Some(cache) = &self.cache {
            let _ = cache.clear(address);
        }
        self.send_to(id, OutMsg::DeviceConnection(disconnected_response(address.pool_key())));
    }

    async fn handle_clear_cache(&mut self, id: SessionId, address: PeripheralAddress) {
        let _ = self.adapter.clear_gatt_cache(address).await;
        if let Some(cache) = &self.cache {
            let _ = cache.clear(address);
        }
        let key = address.pool_key();
        let connected = self.pool.get(key).map(|s| s.state == ConnState::Connected).unwrap_or(false);
        self.send_to(
            id,
            OutMsg::DeviceConnection(BluetoothDeviceConnectionResponse {
                address: key,
                connected,
                mtu: 0,
                error: wire_errors::NONE,
            }),
        );
    }

    async fn handle_get_services(&mut self, id: SessionId, req: BluetoothGATTGetServicesRequest) {
        let address = PeripheralAddress::from_wire_u64(req.address, ble_proto::AddressType::Public);
        let key = address.pool_key();
        let conn = self.pool.get(key).and_then(|s| s.conn_id);
        let Some(conn) = conn else {
            self.send_to(
                id,
                OutMsg::GattError(ble_proto::messages::BluetoothGATTErrorResponse {
                    address: req.address,
                    handle: 0,
                    error: wire_errors::DISCONNECTED,
                }),
            );
            return;
        };
        if let Some(cache) = &self.cache {
            if let Ok(Some(cached)) = cache.load_services(address) {
                let wire_services: Vec<GattService> = cached.iter().map(to_wire_service_from_cache).collect();
                self.send_to(
                    id,
                    OutMsg::GattServices(BluetoothGATTGetServicesResponse {
                        address: req.address,
                        services: wire_services,
                    }),
                );
                self.send_to(
                    id,
                    OutMsg::GattServicesDone(BluetoothGATTGetServicesDoneResponse { address: req.address }),
                );
                return;
            }
        }
        match self.adapter.discover_services(conn).await {
            Ok(services) => {
                if let Some(cache) = &self.cache {
                    let _ = cache.save_services(address, crate::cache::from_adapter_services(&services));
                }
                let wire_services: Vec<GattService> = services.into_iter().map(to_wire_service).collect();
                self.send_to(
                    id,
                    OutMsg::GattServices(BluetoothGATTGetServicesResponse {
                        address: req.address,
                        services: wire_services,
                    }),
                );
                self.send_to(
                    id,
                    OutMsg::GattServicesDone(BluetoothGATTGetServicesDoneResponse { address: req.address }),
                );
            }
            Err(_) => {
                self.send_to(
                    id,
                    OutMsg::GattError(ble_proto::messages::BluetoothGATTErrorResponse {
                        address: req.address,
                        handle: 0,
                        error: wire_errors::PERIPHERAL_ERROR,
                    }),
                );
            }
        }
    }

    fn enqueue_op(&mut self, id: SessionId, address_wire: u64, kind: OpKind, shape: ResponseShape) {
        let address = PeripheralAddress::from_wire_u64(address_wire, ble_proto::AddressType::Public);
        let key = address.pool_key();
        let handle = kind.handle();
        let Some(slot) = self.pool.get(key) else {
            self.send_to(
                id,
                OutMsg::GattError(ble_proto::messages::BluetoothGATTErrorResponse {
                    address: address_wire,
                    handle: handle as u32,
                    error: wire_errors::DISCONNECTED,
                }),
            );
            return;
        };
        let Some(job_tx) = &slot.job_tx else {
            self.send_to(
                id,
                OutMsg::GattError(ble_proto::messages::BluetoothGATTErrorResponse {
                    address: address_wire,
                    handle: handle as u32,
                    error: wire_errors::DISCONNECTED,
                }),
            );
            return;
        };
        let Some(outbox) = self.sessions.get(&id).cloned() else { return };
        let op_id = self.op_ids.next();
        let (done_tx, done_rx) = oneshot::channel();
        let job = GattJob { op_id, session: id, kind, done: done_tx };
        if job_tx.send(job).is_err() {
            self.send_to(
                id,
                OutMsg::GattError(ble_proto::messages::BluetoothGATTErrorResponse {
                    address: address_wire,
                    handle: handle as u32,
                    error: wire_errors::DISCONNECTED,
                }),
            );
            return;
        }
        spawn_job_watcher(outbox, address, handle, shape, done_rx, self.gatt_op_timeout);
    }

    fn dispatch_notification(&mut self, event: NotifyEvent) {
        let Some(key) = self.pool.find_by_conn_id(event.conn) else { return };
        for id in self.subs.peripheral_subscribers(key).copied().collect::<Vec<_>>() {
            self.send_to(
                id,
                OutMsg::GattNotifyData(BluetoothGATTNotifyDataResponse {
                    address: key,
                    handle: event.handle as u32,
                    data: event.data.clone(),
                }),
            );
        }
    }

    fn handle_adapter_disconnect(&mut self, event: DisconnectEvent) {
        let key = event.address.pool_key();
        if let Some(slot) = self.pool.get_mut(key) {
            if let Some(tx) = slot.disconnecting.take() {
                let _ = tx.send(true);
            }
            slot.state = ConnState::Failed;
        }
        self.pool.release(key);
        info!(address = %event.address.to_hex(), "peripheral disconnected");
        for id in self.subs.peripheral_subscribers(key).copied().collect::<Vec<_>>() {
            self.send_to(
                id,
                OutMsg::DeviceConnection(BluetoothDeviceConnectionResponse {
                    address: key,
                    connected: false,
                    mtu: 0,
                    error: wire_errors::NONE,
                }),
            );
        }
    }
}

fn disconnected_response(key: u64) -> BluetoothDeviceConnectionResponse {
    BluetoothDeviceConnectionResponse { address: key, connected: false, mtu: 0, error: wire_errors::NONE }
}

fn adapter_mode_to_wire(state: AdapterScannerState) -> ScannerMode {
    match state {
        AdapterScannerState::Idle => ScannerMode::Idle,
        AdapterScannerState::Passive => ScannerMode::Passive,
        AdapterScannerState::Active => ScannerMode::Active,
    }
}

fn to_wire_service(svc: ble_adapter::Service) -> GattService {
    GattService {
        uuid: GattUuid((svc.uuid.0 >> 64) as u64, svc.uuid.0 as u64),
        handle: svc.handle as u32,
        characteristics: svc.characteristics.into_iter().map(to_wire_characteristic).collect(),
    }
}

fn to_wire_characteristic(chr: ble_adapter::Characteristic) -> GattCharacteristic {
    let mut properties = 0u32;
    if chr.properties.read {
        properties |= 0x01;
    }
    if chr.properties.write_without_response {
        properties |= 0x02;
    }
    if chr.properties.write {
        properties |= 0x04;
    }
    if chr.properties.notify {
        properties |= 0x08;
    }
    if chr.properties.indicate {
        properties |= 0x10;
    }
    GattCharacteristic {
        uuid: GattUuid((chr.uuid.0 >> 64) as u64, chr.uuid.0 as u64),
        handle: chr.handle as u32,
        properties,
        descriptors: chr.descriptors.into_iter().map(to_wire_descriptor).collect(),
    }
}

fn to_wire_descriptor(desc: ble_adapter::Descriptor) -> GattDescriptor {
    GattDescriptor {
        uuid: GattUuid((desc.uuid.0 >> 64) as u64, desc.uuid.0 as u64),
        handle: desc.handle as u32,
    }
}

fn to_wire_service_from_cache(svc: &CachedService) -> GattService {
    GattService {
        uuid: GattUuid(svc.uuid_hi, svc.uuid_lo),
        handle: svc.handle as u32,
        characteristics: svc.characteristics.iter().map(to_wire_characteristic_from_cache).collect(),
    }
}

fn to_wire_characteristic_from_cache(chr: &CachedCharacteristic) -> GattCharacteristic {
    GattCharacteristic {
        uuid: GattUuid(chr.uuid_hi, chr.uuid_lo),
        handle: chr.handle as u32,
        properties: chr.properties,
        descriptors: chr.descriptors.iter().map(to_wire_descriptor_from_cache).collect(),
    }
}

fn to_wire_descriptor_from_cache(desc: &CachedDescriptor) -> GattDescriptor {
    GattDescriptor {
        uuid: GattUuid(desc.uuid_hi, desc.uuid_lo),
        handle: desc.handle as u32,
    }
}

