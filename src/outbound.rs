//! Everything a session's writer loop can be asked to send, wrapped so the
//! rest of the daemon never has to know a frame's numeric `msg_type`.

use ble_proto::messages::{
    ApiMessage, BluetoothDeviceConnectionResponse, BluetoothGATTErrorResponse,
    BluetoothGATTGetServicesDoneResponse, BluetoothGATTGetServicesResponse,
    BluetoothGATTNotifyDataResponse, BluetoothGATTNotifyResponse, BluetoothGATTReadResponse,
    BluetoothGATTWriteResponse, BluetoothLeRawAdvertisementsResponse,
    BluetoothLeScannerStateResponse, ConnectResponse, DeviceInfoResponse, DisconnectResponse,
    HelloResponse, ListEntitiesDoneResponse, PingRequest, PingResponse,
};

#[derive(Debug, Clone)]
pub enum OutMsg {
    Hello(HelloResponse),
    Connect(ConnectResponse),
    Disconnect(DisconnectResponse),
    Ping(PingResponse),
    PingRequest(PingRequest),
    DeviceInfo(DeviceInfoResponse),
    ListEntitiesDone(ListEntitiesDoneResponse),
    Advertisements(BluetoothLeRawAdvertisementsResponse),
    ScannerState(BluetoothLeScannerStateResponse),
    DeviceConnection(BluetoothDeviceConnectionResponse),
    GattServices(BluetoothGATTGetServicesResponse),
    GattServicesDone(BluetoothGATTGetServicesDoneResponse),
    GattRead(BluetoothGATTReadResponse),
    GattWrite(BluetoothGATTWriteResponse),
    GattNotify(BluetoothGATTNotifyResponse),
    GattNotifyData(BluetoothGATTNotifyDataResponse),
    GattError(BluetoothGATTErrorResponse),
}

impl OutMsg {
    /// `(message_type, encoded payload)`, ready for `ble_proto::encode_frame`.
    pub fn encode(&self) -> (u32, Vec<u8>) {
        match self {
            OutMsg::Hello(m) => (HelloResponse::MSG_TYPE, m.encode()),
            OutMsg::Connect(m) => (ConnectResponse::MSG_TYPE, m.encode()),
            OutMsg::Disconnect(m) => (DisconnectResponse::MSG_TYPE, m.encode()),
            OutMsg::Ping(m) => (PingResponse::MSG_TYPE, m.encode()),
            OutMsg::PingRequest(m) => (PingRequest::MSG_TYPE, m.encode()),
            OutMsg::DeviceInfo(m) => (DeviceInfoResponse::MSG_TYPE, m.encode()),
            OutMsg::ListEntitiesDone(m) => (ListEntitiesDoneResponse::MSG_TYPE, m.encode()),
            OutMsg::Advertisements(m) => {
                (BluetoothLeRawAdvertisementsResponse::MSG_TYPE, m.encode())
            }
            OutMsg::ScannerState(m) => (BluetoothLeScannerStateResponse::MSG_TYPE, m.encode()),
            OutMsg::DeviceConnection(m) => {
                (BluetoothDeviceConnectionResponse::MSG_TYPE, m.encode())
            }
            OutMsg::GattServices(m) => (BluetoothGATTGetServicesResponse::MSG_TYPE, m.encode()),
            OutMsg::GattServicesDone(m) => {
                (BluetoothGATTGetServicesDoneResponse::MSG_TYPE, m.encode())
            }
            OutMsg::GattRead(m) => (BluetoothGATTReadResponse::MSG_TYPE, m.encode()),
            OutMsg::GattWrite(m) => (BluetoothGATTWriteResponse::MSG_TYPE, m.encode()),
            OutMsg::GattNotify(m) => (BluetoothGATTNotifyResponse::MSG_TYPE, m.encode()),
            OutMsg::GattNotifyData(m) => (BluetoothGATTNotifyDataResponse::MSG_TYPE, m.encode()),
            OutMsg::GattError(m) => (BluetoothGATTErrorResponse::MSG_TYPE, m.encode()),
        }
    }

    /// Whether the outbox may silently drop this message under backpressure
    /// (§4.2): only subscription-stream traffic, never a request reply.
    pub fn is_droppable(&self) -> bool {
        matches!(
            self,
            OutMsg::Advertisements(_) | OutMsg::ScannerState(_) | OutMsg::GattNotifyData(_)
        )
    }
}
