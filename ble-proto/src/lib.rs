//! Wire framing and message catalogue for the BLE proxy control protocol.

pub mod address;
pub mod frame;
pub mod messages;
pub mod pbuf;
pub mod varint;

pub use address::{AddressType, PeripheralAddress};
pub use frame::{decode_frame, encode_frame, read_frame, Frame, FrameError, MAX_PAYLOAD_LEN};
pub use messages::{msg_type, ApiMessage};
pub use pbuf::DecodeError;
