//! Control session (C2, §4.2): the per-client state machine, reader loop,
//! and outbox-draining writer loop. Mirrors the teacher's split between a
//! device's read loop and a `FlowControlTransport` that owns outbound
//! ordering, but here the "device" is a TCP control client.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use ble_proto::messages::{
    ApiMessage, BluetoothDeviceRequest, BluetoothGATTGetServicesRequest, BluetoothGATTNotifyRequest,
    BluetoothGATTReadDescriptorRequest, BluetoothGATTReadRequest, BluetoothGATTWriteDescriptorRequest,
    BluetoothGATTWriteRequest, ConnectRequest, ConnectResponse, DeviceInfoResponse, DisconnectResponse,
    HelloRequest, HelloResponse, ListEntitiesDoneResponse, PingRequest, PingResponse,
    SubscribeBleAdvertisementsRequest, UnsubscribeBleAdvertisementsRequest, feature_flags, msg_type,
};
use ble_proto::{encode_frame, read_frame};
use ble_proto::PeripheralAddress;

use crate::config::Config;
use crate::coordinator::{CoordinatorHandle, CoordinatorMsg};
use crate::ids::SessionId;
use crate::outbound::OutMsg;

const OUTBOX_CAPACITY: usize = 128;
const MISSED_PING_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    HelloSent,
    Connected,
    Authenticated,
    Closing,
}

pub async fn run(
    id: SessionId,
    socket: TcpStream,
    config: Arc<Config>,
    coordinator: CoordinatorHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
    coordinator.send(CoordinatorMsg::RegisterSession { id, outbox: outbox_tx.clone() });

    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    let writer_task = tokio::spawn(run_writer(write_half, outbox_rx));

    let mut session = Session {
        id,
        phase: Phase::HelloSent,
        config,
        coordinator: coordinator.clone(),
        outbox: outbox_tx,
        missed_pings: 0,
    };

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                info!(id, "shutdown signal received, closing session");
                session.send(OutMsg::Disconnect(DisconnectResponse)).await;
                session.phase = Phase::Closing;
                break;
            }
            frame = tokio::time::timeout(session.ping_timeout(), read_frame(&mut reader)) => frame,
        };
        let frame = match frame {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                debug!(id, "client closed the connection");
                break;
            }
            Ok(Err(err)) => {
                warn!(id, %err, "frame error, closing session");
                break;
            }
            Err(_elapsed) => {
                session.missed_pings += 1;
                if session.missed_pings >= MISSED_PING_LIMIT {
                    warn!(id, "three consecutive missed pongs, closing session");
                    break;
                }
                let _ = session.outbox.try_send(OutMsg::PingRequest(PingRequest));
                continue;
            }
        };

        if frame.message_type == msg_type::PING_RESPONSE {
            session.missed_pings = 0;
            continue;
        }

        if matches!(session.phase, Phase::Closing) {
            break;
        }

        if let Err(err) = session.dispatch(frame.message_type, &frame.payload).await {
            warn!(id, %err, "protocol error, closing session");
            break;
        }
        if matches!(session.phase, Phase::Closing) {
            break;
        }
    }

    coordinator.send(CoordinatorMsg::UnregisterSession { id });
    drop(session);
    let _ = writer_task.await;
}

struct Session {
    id: SessionId,
    phase: Phase,
    config: Arc<Config>,
    coordinator: CoordinatorHandle,
    outbox: mpsc::Sender<OutMsg>,
    missed_pings: u32,
}

#[derive(thiserror::Error, Debug)]
enum DispatchError {
    #[error("message type {0} is not valid in the current state")]
    WrongState(u32),
    #[error(transparent)]
    Decode(#[from] ble_proto::DecodeError),
}

impl Session {
    fn ping_timeout(&self) -> Duration {
        self.config.ping_timeout / MISSED_PING_LIMIT
    }

    async fn send(&self, msg: OutMsg) {
        if msg.is_droppable() {
            let _ = self.outbox.try_send(msg);
        } else if self.outbox.send(msg).await.is_err() {
            warn!(id = self.id, "outbox closed while sending a reply");
        }
    }

    async fn dispatch(&mut self, message_type: u32, payload: &[u8]) -> Result<(), DispatchError> {
        match self.phase {
            Phase::HelloSent => self.dispatch_hello_sent(message_type, payload).await,
            Phase::Connected => self.dispatch_connected(message_type, payload).await,
            Phase::Authenticated => self.dispatch_authenticated(message_type, payload).await,
            Phase::Closing => Ok(()),
        }
    }

    async fn dispatch_hello_sent(&mut self, message_type: u32, payload: &[u8]) -> Result<(), DispatchError> {
        if message_type != msg_type::HELLO_REQUEST {
            return Err(DispatchError::WrongState(message_type));
        }
        let req = HelloRequest::decode(payload)?;
        info!(id = self.id, client_info = %req.client_info, "hello");
        self.send(OutMsg::Hello(HelloResponse {
            api_version_major: 1,
            api_version_minor: 10,
            server_info: "ble-proxyd".to_string(),
            name: self.config.name.clone(),
        }))
        .await;
        self.phase = Phase::Connected;
        Ok(())
    }

    async fn dispatch_connected(&mut self, message_type: u32, payload: &[u8]) -> Result<(), DispatchError> {
        match message_type {
            msg_type::CONNECT_REQUEST => {
                let req = ConnectRequest::decode(payload)?;
                let expected = self.config.password.as_deref().unwrap_or("");
                if req.password == expected {
                    self.phase = Phase::Authenticated;
                    self.send(OutMsg::Connect(ConnectResponse { invalid_password: false })).await;
                } else {
                    self.send(OutMsg::Connect(ConnectResponse { invalid_password: true })).await;
                    self.phase = Phase::Closing;
                }
                Ok(())
            }
            msg_type::DEVICE_INFO_REQUEST if !self.config.requires_password() => {
                self.send_device_info().await;
                Ok(())
            }
            msg_type::DISCONNECT_REQUEST => {
                self.send(OutMsg::Disconnect(DisconnectResponse)).await;
                self.phase = Phase::Closing;
                Ok(())
            }
            msg_type::PING_REQUEST => {
                PingRequest::decode(payload)?;
                self.send(OutMsg::Ping(PingResponse)).await;
                Ok(())
            }
            other => Err(DispatchError::WrongState(other)),
        }
    }

    async fn dispatch_authenticated(&mut self, message_type: u32, payload: &[u8]) -> Result<(), DispatchError> {
        match message_type {
            msg_type::DEVICE_INFO_REQUEST => self.send_device_info().await,
            msg_type::LIST_ENTITIES_REQUEST => {
                self.send(OutMsg::ListEntitiesDone(ListEntitiesDoneResponse)).await;
            }
            msg_type::DISCONNECT_REQUEST => {
                self.send(OutMsg::Disconnect(DisconnectResponse)).await;
                self.phase = Phase::Closing;
            }
            msg_type::PING_REQUEST => {
                PingRequest::decode(payload)?;
                self.send(OutMsg::Ping(PingResponse)).await;
            }
            msg_type::SUBSCRIBE_BLE_ADVERTISEMENTS_REQUEST => {
                let req = SubscribeBleAdvertisementsRequest::decode(payload)?;
                self.coordinator.send(CoordinatorMsg::SubscribeAds { id: self.id, active: req.flags != 0 });
            }
            msg_type::UNSUBSCRIBE_BLE_ADVERTISEMENTS_REQUEST => {
                UnsubscribeBleAdvertisementsRequest::decode(payload)?;
                self.coordinator.send(CoordinatorMsg::UnsubscribeAds { id: self.id });
            }
            msg_type::SUBSCRIBE_BLE_SCANNER_STATE_REQUEST => {
                self.coordinator.send(CoordinatorMsg::SubscribeScannerState { id: self.id });
            }
            msg_type::BLE_DEVICE_REQUEST => {
                let req = BluetoothDeviceRequest::decode(payload)?;
                let address = PeripheralAddress::from_wire_u64(
                    req.address,
                    ble_proto::AddressType::from_wire(req.address_type),
                );
                self.coordinator.send(CoordinatorMsg::DeviceRequest {
                    id: self.id,
                    address,
                    kind: req.request_type,
                });
            }
            msg_type::BLE_GATT_GET_SERVICES_REQUEST => {
                let req = BluetoothGATTGetServicesRequest::decode(payload)?;
                self.coordinator.send(CoordinatorMsg::GattGetServices { id: self.id, req });
            }
            msg_type::BLE_GATT_READ_REQUEST => {
                let req = BluetoothGATTReadRequest::decode(payload)?;
                self.coordinator.send(CoordinatorMsg::GattRead { id: self.id, req });
            }
            msg_type::BLE_GATT_WRITE_REQUEST => {
                let req = BluetoothGATTWriteRequest::decode(payload)?;
                self.coordinator.send(CoordinatorMsg::GattWrite { id: self.id, req });
            }
            msg_type::BLE_GATT_READ_DESCRIPTOR_REQUEST => {
                let req = BluetoothGATTReadDescriptorRequest::decode(payload)?;
                self.coordinator.send(CoordinatorMsg::GattReadDesc { id: self.id, req });
            }
            msg_type::BLE_GATT_WRITE_DESCRIPTOR_REQUEST => {
                let req = BluetoothGATTWriteDescriptorRequest::decode(payload)?;
                self.coordinator.send(CoordinatorMsg::GattWriteDesc { id: self.id, req });
            }
            msg_type::BLE_GATT_NOTIFY_REQUEST => {
                let req = BluetoothGATTNotifyRequest::decode(payload)?;
                self.coordinator.send(CoordinatorMsg::GattNotify { id: self.id, req });
            }
            other => return Err(DispatchError::WrongState(other)),
        }
        Ok(())
    }

    async fn send_device_info(&self) {
        let mut flags = feature_flags::PASSIVE_SCAN | feature_flags::REMOTE_CACHING | feature_flags::STATE_AND_MODE | feature_flags::RAW_ADS | feature_flags::PAIRING | feature_flags::CACHE_CLEARING;
        if self.config.active_connections {
            flags |= feature_flags::ACTIVE_CONNECTIONS;
        }
        self.send(OutMsg::DeviceInfo(DeviceInfoResponse {
            name: self.config.name.clone(),
            friendly_name: self.config.friendly_name.clone(),
            bluetooth_proxy_feature_flags: flags,
            bluetooth_mac_address: "AA:BB:CC:DD:EE:FF".to_string(),
        }))
        .await;
    }
}

async fn run_writer(mut write_half: tokio::net::tcp::OwnedWriteHalf, mut outbox_rx: mpsc::Receiver<OutMsg>) {
    while let Some(msg) = outbox_rx.recv().await {
        let (message_type, payload) = msg.encode();
        let frame = match encode_frame(message_type, &payload) {
            Ok(f) => f,
            Err(err) => {
                warn!(%err, "failed to encode outbound frame");
                continue;
            }
        };
        if let Err(err) = write_half.write_all(&frame).await {
            warn!(%err, "write error, ending writer loop");
            break;
        }
    }
}
