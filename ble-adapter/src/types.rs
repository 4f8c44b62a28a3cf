//! Adapter-native data model (§3). Wire-shaped conversion lives in the
//! daemon's broker/coordinator layer, not here — this crate knows nothing
//! about frames or message tags.

use ble_proto::PeripheralAddress;

/// Handle identifying one live connection, stable for the connection's
/// lifetime and never reused while it's open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: PeripheralAddress,
    pub rssi: i8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uuid128(pub u128);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: Uuid128,
    pub handle: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid128,
    pub handle: u16,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid128,
    pub handle: u16,
    pub characteristics: Vec<Characteristic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Idle,
    Passive,
    Active,
}

/// A GATT notification delivered asynchronously after `subscribe_notify`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyEvent {
    pub conn: ConnId,
    pub handle: u16,
    pub data: Vec<u8>,
}

/// A connection dropping for a reason the adapter initiated (radio loss,
/// the peer hanging up) rather than a caller-requested `disconnect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectEvent {
    pub conn: ConnId,
    pub address: PeripheralAddress,
}
