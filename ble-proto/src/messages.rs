//! Control-protocol message catalogue (§6.2).
//!
//! Each message is a thin struct with an `ApiMessage` impl, the same shape
//! as `monsgeek-transport`'s `HidCommand`/`HidResponse` pair: a constant
//! wire tag, and an `encode`/`decode` method pinned to that tag.

use crate::pbuf::{
    as_string, sint32_from_varint, write_bool_field, write_bytes_field, write_message_field,
    write_sint32_field, write_string_field, write_u32_field, write_u64_field, DecodeError, Field,
    FieldReader,
};

/// Wire message-type tags. Values are internal to this daemon — the real
/// ESPHome numbering is the concern of the protobuf compiler this daemon
/// deliberately doesn't embed (see SPEC_FULL.md §1).
pub mod msg_type {
    pub const HELLO_REQUEST: u32 = 1;
    pub const HELLO_RESPONSE: u32 = 2;
    pub const CONNECT_REQUEST: u32 = 3;
    pub const CONNECT_RESPONSE: u32 = 4;
    pub const DISCONNECT_REQUEST: u32 = 5;
    pub const DISCONNECT_RESPONSE: u32 = 6;
    pub const PING_REQUEST: u32 = 7;
    pub const PING_RESPONSE: u32 = 8;
    pub const DEVICE_INFO_REQUEST: u32 = 9;
    pub const DEVICE_INFO_RESPONSE: u32 = 10;
    pub const LIST_ENTITIES_REQUEST: u32 = 11;
    pub const LIST_ENTITIES_DONE_RESPONSE: u32 = 12;

    pub const SUBSCRIBE_BLE_ADVERTISEMENTS_REQUEST: u32 = 66;
    pub const UNSUBSCRIBE_BLE_ADVERTISEMENTS_REQUEST: u32 = 67;
    pub const BLE_RAW_ADVERTISEMENTS_RESPONSE: u32 = 68;

    pub const SUBSCRIBE_BLE_SCANNER_STATE_REQUEST: u32 = 80;
    pub const BLE_SCANNER_STATE_RESPONSE: u32 = 81;

    pub const BLE_DEVICE_REQUEST: u32 = 86;
    pub const BLE_DEVICE_CONNECTION_RESPONSE: u32 = 87;

    pub const BLE_GATT_GET_SERVICES_REQUEST: u32 = 88;
    pub const BLE_GATT_GET_SERVICES_RESPONSE: u32 = 89;
    pub const BLE_GATT_GET_SERVICES_DONE_RESPONSE: u32 = 90;

    pub const BLE_GATT_READ_REQUEST: u32 = 91;
    pub const BLE_GATT_READ_RESPONSE: u32 = 92;
    pub const BLE_GATT_WRITE_REQUEST: u32 = 93;
    pub const BLE_GATT_WRITE_RESPONSE: u32 = 94;
    pub const BLE_GATT_READ_DESCRIPTOR_REQUEST: u32 = 95;
    pub const BLE_GATT_WRITE_DESCRIPTOR_REQUEST: u32 = 96;
    pub const BLE_GATT_NOTIFY_REQUEST: u32 = 97;
    pub const BLE_GATT_NOTIFY_RESPONSE: u32 = 98;
    pub const BLE_GATT_NOTIFY_DATA_RESPONSE: u32 = 99;
    pub const BLE_GATT_ERROR_RESPONSE: u32 = 100;

    pub fn name(t: u32) -> &'static str {
        match t {
            HELLO_REQUEST => "HelloRequest",
            HELLO_RESPONSE => "HelloResponse",
            CONNECT_REQUEST => "ConnectRequest",
            CONNECT_RESPONSE => "ConnectResponse",
            DISCONNECT_REQUEST => "DisconnectRequest",
            DISCONNECT_RESPONSE => "DisconnectResponse",
            PING_REQUEST => "PingRequest",
            PING_RESPONSE => "PingResponse",
            DEVICE_INFO_REQUEST => "DeviceInfoRequest",
            DEVICE_INFO_RESPONSE => "DeviceInfoResponse",
            LIST_ENTITIES_REQUEST => "ListEntitiesRequest",
            LIST_ENTITIES_DONE_RESPONSE => "ListEntitiesDoneResponse",
            SUBSCRIBE_BLE_ADVERTISEMENTS_REQUEST => "SubscribeBleAdvertisementsRequest",
            UNSUBSCRIBE_BLE_ADVERTISEMENTS_REQUEST => "UnsubscribeBleAdvertisementsRequest",
            BLE_RAW_ADVERTISEMENTS_RESPONSE => "BluetoothLeRawAdvertisementsResponse",
            SUBSCRIBE_BLE_SCANNER_STATE_REQUEST => "SubscribeBluetoothLeScannerStateRequest",
            BLE_SCANNER_STATE_RESPONSE => "BluetoothLeScannerStateResponse",
            BLE_DEVICE_REQUEST => "BluetoothDeviceRequest",
            BLE_DEVICE_CONNECTION_RESPONSE => "BluetoothDeviceConnectionResponse",
            BLE_GATT_GET_SERVICES_REQUEST => "BluetoothGATTGetServicesRequest",
            BLE_GATT_GET_SERVICES_RESPONSE => "BluetoothGATTGetServicesResponse",
            BLE_GATT_GET_SERVICES_DONE_RESPONSE => "BluetoothGATTGetServicesDoneResponse",
            BLE_GATT_READ_REQUEST => "BluetoothGATTReadRequest",
            BLE_GATT_READ_RESPONSE => "BluetoothGATTReadResponse",
            BLE_GATT_WRITE_REQUEST => "BluetoothGATTWriteRequest",
            BLE_GATT_WRITE_RESPONSE => "BluetoothGATTWriteResponse",
            BLE_GATT_READ_DESCRIPTOR_REQUEST => "BluetoothGATTReadDescriptorRequest",
            BLE_GATT_WRITE_DESCRIPTOR_REQUEST => "BluetoothGATTWriteDescriptorRequest",
            BLE_GATT_NOTIFY_REQUEST => "BluetoothGATTNotifyRequest",
            BLE_GATT_NOTIFY_RESPONSE => "BluetoothGATTNotifyResponse",
            BLE_GATT_NOTIFY_DATA_RESPONSE => "BluetoothGATTNotifyDataResponse",
            BLE_GATT_ERROR_RESPONSE => "BluetoothGATTErrorResponse",
            _ => "Unknown",
        }
    }
}

/// A message that can be framed: a fixed wire tag plus encode/decode.
pub trait ApiMessage: Sized {
    const MSG_TYPE: u32;

    fn encode(&self) -> Vec<u8>;
    fn decode(data: &[u8]) -> Result<Self, DecodeError>;
}

macro_rules! empty_message {
    ($name:ident, $tag:path) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl ApiMessage for $name {
            const MSG_TYPE: u32 = $tag;

            fn encode(&self) -> Vec<u8> {
                Vec::new()
            }

            fn decode(_data: &[u8]) -> Result<Self, DecodeError> {
                Ok($name)
            }
        }
    };
}

empty_message!(DisconnectRequest, msg_type::DISCONNECT_REQUEST);
empty_message!(DisconnectResponse, msg_type::DISCONNECT_RESPONSE);
empty_message!(PingRequest, msg_type::PING_REQUEST);
empty_message!(PingResponse, msg_type::PING_RESPONSE);
empty_message!(DeviceInfoRequest, msg_type::DEVICE_INFO_REQUEST);
empty_message!(ListEntitiesRequest, msg_type::LIST_ENTITIES_REQUEST);
empty_message!(
    ListEntitiesDoneResponse,
    msg_type::LIST_ENTITIES_DONE_RESPONSE
);
empty_message!(
    UnsubscribeBleAdvertisementsRequest,
    msg_type::UNSUBSCRIBE_BLE_ADVERTISEMENTS_REQUEST
);
empty_message!(
    SubscribeBluetoothLeScannerStateRequest,
    msg_type::SUBSCRIBE_BLE_SCANNER_STATE_REQUEST
);

// ===========================================================================
// Handshake
// ===========================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelloRequest {
    pub client_info: String,
    pub api_version_major: u32,
    pub api_version_minor: u32,
}

impl ApiMessage for HelloRequest {
    const MSG_TYPE: u32 = msg_type::HELLO_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_string_field(&mut out, 1, &self.client_info);
        write_u32_field(&mut out, 2, self.api_version_major);
        write_u32_field(&mut out, 3, self.api_version_minor);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Bytes(b)) => msg.client_info = as_string(b, "client_info")?,
                (2, Field::Varint(v)) => msg.api_version_major = v as u32,
                (3, Field::Varint(v)) => msg.api_version_minor = v as u32,
                _ => {}
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelloResponse {
    pub api_version_major: u32,
    pub api_version_minor: u32,
    pub server_info: String,
    pub name: String,
}

impl ApiMessage for HelloResponse {
    const MSG_TYPE: u32 = msg_type::HELLO_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u32_field(&mut out, 1, self.api_version_major);
        write_u32_field(&mut out, 2, self.api_version_minor);
        write_string_field(&mut out, 3, &self.server_info);
        write_string_field(&mut out, 4, &self.name);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Varint(v)) => msg.api_version_major = v as u32,
                (2, Field::Varint(v)) => msg.api_version_minor = v as u32,
                (3, Field::Bytes(b)) => msg.server_info = as_string(b, "server_info")?,
                (4, Field::Bytes(b)) => msg.name = as_string(b, "name")?,
                _ => {}
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub password: String,
}

impl ApiMessage for ConnectRequest {
    const MSG_TYPE: u32 = msg_type::CONNECT_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_string_field(&mut out, 1, &self.password);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            if let (1, Field::Bytes(b)) = field? {
                msg.password = as_string(b, "password")?;
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectResponse {
    pub invalid_password: bool,
}

impl ApiMessage for ConnectResponse {
    const MSG_TYPE: u32 = msg_type::CONNECT_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_bool_field(&mut out, 1, self.invalid_password);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            if let (1, Field::Varint(v)) = field? {
                msg.invalid_password = v != 0;
            }
        }
        Ok(msg)
    }
}

// ===========================================================================
// Device discovery
// ===========================================================================

/// Bits of `DeviceInfoResponse::bluetooth_proxy_feature_flags` (§6.2).
pub mod feature_flags {
    pub const PASSIVE_SCAN: u32 = 1;
    pub const ACTIVE_CONNECTIONS: u32 = 2;
    pub const REMOTE_CACHING: u32 = 4;
    pub const PAIRING: u32 = 8;
    pub const CACHE_CLEARING: u32 = 16;
    pub const RAW_ADS: u32 = 32;
    pub const STATE_AND_MODE: u32 = 64;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfoResponse {
    pub name: String,
    pub friendly_name: String,
    pub bluetooth_proxy_feature_flags: u32,
    pub bluetooth_mac_address: String,
}

impl ApiMessage for DeviceInfoResponse {
    const MSG_TYPE: u32 = msg_type::DEVICE_INFO_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_string_field(&mut out, 1, &self.name);
        write_string_field(&mut out, 2, &self.friendly_name);
        write_u32_field(&mut out, 3, self.bluetooth_proxy_feature_flags);
        write_string_field(&mut out, 4, &self.bluetooth_mac_address);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Bytes(b)) => msg.name = as_string(b, "name")?,
                (2, Field::Bytes(b)) => msg.friendly_name = as_string(b, "friendly_name")?,
                (3, Field::Varint(v)) => msg.bluetooth_proxy_feature_flags = v as u32,
                (4, Field::Bytes(b)) => {
                    msg.bluetooth_mac_address = as_string(b, "bluetooth_mac_address")?
                }
                _ => {}
            }
        }
        Ok(msg)
    }
}

// ===========================================================================
// Advertisements
// ===========================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeBleAdvertisementsRequest {
    pub flags: u32,
}

impl ApiMessage for SubscribeBleAdvertisementsRequest {
    const MSG_TYPE: u32 = msg_type::SUBSCRIBE_BLE_ADVERTISEMENTS_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u32_field(&mut out, 1, self.flags);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            if let (1, Field::Varint(v)) = field? {
                msg.flags = v as u32;
            }
        }
        Ok(msg)
    }
}

/// One advertisement (§3): address, RSSI, and up to 62 bytes of data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAdvertisement {
    pub address: u64,
    pub address_type: u32,
    pub rssi: i32,
    pub data: Vec<u8>,
}

impl RawAdvertisement {
    fn encode_into(&self, out: &mut Vec<u8>) {
        write_u64_field(out, 1, self.address);
        write_u32_field(out, 2, self.address_type);
        write_sint32_field(out, 3, self.rssi);
        write_bytes_field(out, 4, &self.data);
    }

    fn decode_from(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Varint(v)) => msg.address = v,
                (2, Field::Varint(v)) => msg.address_type = v as u32,
                (3, Field::Varint(v)) => msg.rssi = sint32_from_varint(v),
                (4, Field::Bytes(b)) => msg.data = b.to_vec(),
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// A single outbound batch (§3, §4.4): an ordered, non-empty run of ads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BluetoothLeRawAdvertisementsResponse {
    pub advertisements: Vec<RawAdvertisement>,
}

impl ApiMessage for BluetoothLeRawAdvertisementsResponse {
    const MSG_TYPE: u32 = msg_type::BLE_RAW_ADVERTISEMENTS_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for ad in &self.advertisements {
            let mut sub = Vec::new();
            ad.encode_into(&mut sub);
            write_message_field(&mut out, 1, &sub);
        }
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            if let (1, Field::Bytes(b)) = field? {
                msg.advertisements.push(RawAdvertisement::decode_from(b)?);
            }
        }
        Ok(msg)
    }
}

// ===========================================================================
// Scanner state
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerMode {
    Idle = 0,
    Passive = 1,
    Active = 2,
}

impl Default for ScannerMode {
    fn default() -> Self {
        ScannerMode::Idle
    }
}

impl ScannerMode {
    fn from_wire(v: u64) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(ScannerMode::Idle),
            1 => Ok(ScannerMode::Passive),
            2 => Ok(ScannerMode::Active),
            other => Err(DecodeError::InvalidEnum {
                field: "mode",
                value: other,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BluetoothLeScannerStateResponse {
    pub mode: ScannerMode,
}

impl ApiMessage for BluetoothLeScannerStateResponse {
    const MSG_TYPE: u32 = msg_type::BLE_SCANNER_STATE_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u32_field(&mut out, 1, self.mode as u32);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            if let (1, Field::Varint(v)) = field? {
                msg.mode = ScannerMode::from_wire(v)?;
            }
        }
        Ok(msg)
    }
}

// ===========================================================================
// Connection lifecycle
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRequestKind {
    Connect = 0,
    Disconnect = 1,
    Pair = 2,
    Unpair = 3,
    ClearCache = 4,
}

impl DeviceRequestKind {
    fn from_wire(v: u64) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(Self::Connect),
            1 => Ok(Self::Disconnect),
            2 => Ok(Self::Pair),
            3 => Ok(Self::Unpair),
            4 => Ok(Self::ClearCache),
            other => Err(DecodeError::InvalidEnum {
                field: "request_type",
                value: other,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BluetoothDeviceRequest {
    pub address: u64,
    pub address_type: u32,
    pub request_type: DeviceRequestKind,
}

impl ApiMessage for BluetoothDeviceRequest {
    const MSG_TYPE: u32 = msg_type::BLE_DEVICE_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64_field(&mut out, 1, self.address);
        write_u32_field(&mut out, 2, self.address_type);
        write_u32_field(&mut out, 3, self.request_type as u32);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut address = 0u64;
        let mut address_type = 0u32;
        let mut request_type = DeviceRequestKind::Connect;
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Varint(v)) => address = v,
                (2, Field::Varint(v)) => address_type = v as u32,
                (3, Field::Varint(v)) => request_type = DeviceRequestKind::from_wire(v)?,
                _ => {}
            }
        }
        Ok(Self {
            address,
            address_type,
            request_type,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BluetoothDeviceConnectionResponse {
    pub address: u64,
    pub connected: bool,
    pub mtu: u32,
    pub error: u32,
}

impl ApiMessage for BluetoothDeviceConnectionResponse {
    const MSG_TYPE: u32 = msg_type::BLE_DEVICE_CONNECTION_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64_field(&mut out, 1, self.address);
        write_bool_field(&mut out, 2, self.connected);
        write_u32_field(&mut out, 3, self.mtu);
        write_u32_field(&mut out, 4, self.error);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Varint(v)) => msg.address = v,
                (2, Field::Varint(v)) => msg.connected = v != 0,
                (3, Field::Varint(v)) => msg.mtu = v as u32,
                (4, Field::Varint(v)) => msg.error = v as u32,
                _ => {}
            }
        }
        Ok(msg)
    }
}

// ===========================================================================
// GATT tree (§3)
// ===========================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GattUuid(pub u64, pub u64);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GattDescriptor {
    pub uuid: GattUuid,
    pub handle: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: GattUuid,
    pub handle: u32,
    pub properties: u32,
    pub descriptors: Vec<GattDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GattService {
    pub uuid: GattUuid,
    pub handle: u32,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattDescriptor {
    fn encode_into(&self, out: &mut Vec<u8>) {
        write_u64_field(out, 1, self.uuid.0);
        write_u64_field(out, 2, self.uuid.1);
        write_u32_field(out, 3, self.handle);
    }

    fn decode_from(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Varint(v)) => msg.uuid.0 = v,
                (2, Field::Varint(v)) => msg.uuid.1 = v,
                (3, Field::Varint(v)) => msg.handle = v as u32,
                _ => {}
            }
        }
        Ok(msg)
    }
}

impl GattCharacteristic {
    fn encode_into(&self, out: &mut Vec<u8>) {
        write_u64_field(out, 1, self.uuid.0);
        write_u64_field(out, 2, self.uuid.1);
        write_u32_field(out, 3, self.handle);
        write_u32_field(out, 4, self.properties);
        for desc in &self.descriptors {
            let mut sub = Vec::new();
            desc.encode_into(&mut sub);
            write_message_field(out, 5, &sub);
        }
    }

    fn decode_from(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Varint(v)) => msg.uuid.0 = v,
                (2, Field::Varint(v)) => msg.uuid.1 = v,
                (3, Field::Varint(v)) => msg.handle = v as u32,
                (4, Field::Varint(v)) => msg.properties = v as u32,
                (5, Field::Bytes(b)) => msg.descriptors.push(GattDescriptor::decode_from(b)?),
                _ => {}
            }
        }
        Ok(msg)
    }
}

impl GattService {
    fn encode_into(&self, out: &mut Vec<u8>) {
        write_u64_field(out, 1, self.uuid.0);
        write_u64_field(out, 2, self.uuid.1);
        write_u32_field(out, 3, self.handle);
        for chr in &self.characteristics {
            let mut sub = Vec::new();
            chr.encode_into(&mut sub);
            write_message_field(out, 4, &sub);
        }
    }

    fn decode_from(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Varint(v)) => msg.uuid.0 = v,
                (2, Field::Varint(v)) => msg.uuid.1 = v,
                (3, Field::Varint(v)) => msg.handle = v as u32,
                (4, Field::Bytes(b)) => {
                    msg.characteristics.push(GattCharacteristic::decode_from(b)?)
                }
                _ => {}
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BluetoothGATTGetServicesRequest {
    pub address: u64,
}

impl ApiMessage for BluetoothGATTGetServicesRequest {
    const MSG_TYPE: u32 = msg_type::BLE_GATT_GET_SERVICES_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64_field(&mut out, 1, self.address);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            if let (1, Field::Varint(v)) = field? {
                msg.address = v;
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BluetoothGATTGetServicesResponse {
    pub address: u64,
    pub services: Vec<GattService>,
}

impl ApiMessage for BluetoothGATTGetServicesResponse {
    const MSG_TYPE: u32 = msg_type::BLE_GATT_GET_SERVICES_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64_field(&mut out, 1, self.address);
        for svc in &self.services {
            let mut sub = Vec::new();
            svc.encode_into(&mut sub);
            write_message_field(&mut out, 2, &sub);
        }
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Varint(v)) => msg.address = v,
                (2, Field::Bytes(b)) => msg.services.push(GattService::decode_from(b)?),
                _ => {}
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BluetoothGATTGetServicesDoneResponse {
    pub address: u64,
}

impl ApiMessage for BluetoothGATTGetServicesDoneResponse {
    const MSG_TYPE: u32 = msg_type::BLE_GATT_GET_SERVICES_DONE_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64_field(&mut out, 1, self.address);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            if let (1, Field::Varint(v)) = field? {
                msg.address = v;
            }
        }
        Ok(msg)
    }
}

// ===========================================================================
// GATT read/write/notify
// ===========================================================================

macro_rules! address_handle_message {
    ($name:ident, $tag:path) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name {
            pub address: u64,
            pub handle: u32,
        }

        impl ApiMessage for $name {
            const MSG_TYPE: u32 = $tag;

            fn encode(&self) -> Vec<u8> {
                let mut out = Vec::new();
                write_u64_field(&mut out, 1, self.address);
                write_u32_field(&mut out, 2, self.handle);
                out
            }

            fn decode(data: &[u8]) -> Result<Self, DecodeError> {
                let mut msg = Self::default();
                for field in FieldReader::new(data) {
                    match field? {
                        (1, Field::Varint(v)) => msg.address = v,
                        (2, Field::Varint(v)) => msg.handle = v as u32,
                        _ => {}
                    }
                }
                Ok(msg)
            }
        }
    };
}

address_handle_message!(BluetoothGATTReadRequest, msg_type::BLE_GATT_READ_REQUEST);
address_handle_message!(
    BluetoothGATTReadDescriptorRequest,
    msg_type::BLE_GATT_READ_DESCRIPTOR_REQUEST
);
address_handle_message!(
    BluetoothGATTWriteResponse,
    msg_type::BLE_GATT_WRITE_RESPONSE
);
address_handle_message!(
    BluetoothGATTNotifyResponse,
    msg_type::BLE_GATT_NOTIFY_RESPONSE
);

macro_rules! address_handle_data_message {
    ($name:ident, $tag:path) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $name {
            pub address: u64,
            pub handle: u32,
            pub data: Vec<u8>,
        }

        impl ApiMessage for $name {
            const MSG_TYPE: u32 = $tag;

            fn encode(&self) -> Vec<u8> {
                let mut out = Vec::new();
                write_u64_field(&mut out, 1, self.address);
                write_u32_field(&mut out, 2, self.handle);
                write_bytes_field(&mut out, 3, &self.data);
                out
            }

            fn decode(data: &[u8]) -> Result<Self, DecodeError> {
                let mut msg = Self::default();
                for field in FieldReader::new(data) {
                    match field? {
                        (1, Field::Varint(v)) => msg.address = v,
                        (2, Field::Varint(v)) => msg.handle = v as u32,
                        (3, Field::Bytes(b)) => msg.data = b.to_vec(),
                        _ => {}
                    }
                }
                Ok(msg)
            }
        }
    };
}

address_handle_data_message!(BluetoothGATTReadResponse, msg_type::BLE_GATT_READ_RESPONSE);
address_handle_data_message!(
    BluetoothGATTNotifyDataResponse,
    msg_type::BLE_GATT_NOTIFY_DATA_RESPONSE
);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BluetoothGATTWriteRequest {
    pub address: u64,
    pub handle: u32,
    pub response: bool,
    pub data: Vec<u8>,
}

impl ApiMessage for BluetoothGATTWriteRequest {
    const MSG_TYPE: u32 = msg_type::BLE_GATT_WRITE_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64_field(&mut out, 1, self.address);
        write_u32_field(&mut out, 2, self.handle);
        write_bool_field(&mut out, 3, self.response);
        write_bytes_field(&mut out, 4, &self.data);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Varint(v)) => msg.address = v,
                (2, Field::Varint(v)) => msg.handle = v as u32,
                (3, Field::Varint(v)) => msg.response = v != 0,
                (4, Field::Bytes(b)) => msg.data = b.to_vec(),
                _ => {}
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BluetoothGATTWriteDescriptorRequest {
    pub address: u64,
    pub handle: u32,
    pub data: Vec<u8>,
}

impl ApiMessage for BluetoothGATTWriteDescriptorRequest {
    const MSG_TYPE: u32 = msg_type::BLE_GATT_WRITE_DESCRIPTOR_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64_field(&mut out, 1, self.address);
        write_u32_field(&mut out, 2, self.handle);
        write_bytes_field(&mut out, 3, &self.data);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Varint(v)) => msg.address = v,
                (2, Field::Varint(v)) => msg.handle = v as u32,
                (3, Field::Bytes(b)) => msg.data = b.to_vec(),
                _ => {}
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BluetoothGATTNotifyRequest {
    pub address: u64,
    pub handle: u32,
    pub enable: bool,
}

impl ApiMessage for BluetoothGATTNotifyRequest {
    const MSG_TYPE: u32 = msg_type::BLE_GATT_NOTIFY_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64_field(&mut out, 1, self.address);
        write_u32_field(&mut out, 2, self.handle);
        write_bool_field(&mut out, 3, self.enable);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Varint(v)) => msg.address = v,
                (2, Field::Varint(v)) => msg.handle = v as u32,
                (3, Field::Varint(v)) => msg.enable = v != 0,
                _ => {}
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BluetoothGATTErrorResponse {
    pub address: u64,
    pub handle: u32,
    pub error: u32,
}

impl ApiMessage for BluetoothGATTErrorResponse {
    const MSG_TYPE: u32 = msg_type::BLE_GATT_ERROR_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64_field(&mut out, 1, self.address);
        write_u32_field(&mut out, 2, self.handle);
        write_u32_field(&mut out, 3, self.error);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        for field in FieldReader::new(data) {
            match field? {
                (1, Field::Varint(v)) => msg.address = v,
                (2, Field::Varint(v)) => msg.handle = v as u32,
                (3, Field::Varint(v)) => msg.error = v as u32,
                _ => {}
            }
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<M: ApiMessage + PartialEq + std::fmt::Debug>(msg: M) {
        let encoded = msg.encode();
        let decoded = M::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn hello_round_trips() {
        round_trip(HelloRequest {
            client_info: "probe".into(),
            api_version_major: 1,
            api_version_minor: 10,
        });
        round_trip(HelloResponse {
            api_version_major: 1,
            api_version_minor: 10,
            server_info: "ble-proxyd".into(),
            name: "proxy".into(),
        });
    }

    #[test]
    fn connect_round_trips() {
        round_trip(ConnectRequest {
            password: "good".into(),
        });
        round_trip(ConnectResponse {
            invalid_password: true,
        });
    }

    #[test]
    fn device_info_round_trips() {
        round_trip(DeviceInfoResponse {
            name: "ble-proxyd".into(),
            friendly_name: "Proxy".into(),
            bluetooth_proxy_feature_flags: 0x7F,
            bluetooth_mac_address: "AA:BB:CC:DD:EE:FF".into(),
        });
    }

    #[test]
    fn advertisement_batch_round_trips() {
        let batch = BluetoothLeRawAdvertisementsResponse {
            advertisements: vec![
                RawAdvertisement {
                    address: 0xAABBCCDDEEFF,
                    address_type: 0,
                    rssi: -42,
                    data: vec![1, 2, 3],
                },
                RawAdvertisement {
                    address: 0x112233445566,
                    address_type: 1,
                    rssi: -90,
                    data: vec![],
                },
            ],
        };
        round_trip(batch);
    }

    #[test]
    fn gatt_tree_round_trips() {
        let resp = BluetoothGATTGetServicesResponse {
            address: 1,
            services: vec![GattService {
                uuid: GattUuid(1, 2),
                handle: 10,
                characteristics: vec![GattCharacteristic {
                    uuid: GattUuid(3, 4),
                    handle: 11,
                    properties: 0x02,
                    descriptors: vec![GattDescriptor {
                        uuid: GattUuid(5, 6),
                        handle: 12,
                    }],
                }],
            }],
        };
        round_trip(resp);
    }

    #[test]
    fn device_request_enum_round_trips() {
        round_trip(BluetoothDeviceRequest {
            address: 1,
            address_type: 0,
            request_type: DeviceRequestKind::Pair,
        });
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let mut buf = Vec::new();
        write_u32_field(&mut buf, 3, 99);
        assert!(matches!(
            BluetoothDeviceRequest::decode(&buf),
            Err(DecodeError::InvalidEnum { .. })
        ));
    }

    #[test]
    fn negative_rssi_round_trips() {
        let ad = RawAdvertisement {
            address: 1,
            address_type: 0,
            rssi: -128,
            data: vec![],
        };
        let mut out = Vec::new();
        ad.encode_into(&mut out);
        let decoded = RawAdvertisement::decode_from(&out).unwrap();
        assert_eq!(decoded.rssi, -128);
    }
}
