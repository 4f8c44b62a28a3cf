//! Small newtypes shared across the daemon's actors.

/// Identifies one control-client session for the lifetime of its socket.
pub type SessionId = u64;

/// Identifies one GATT request, assigned by the broker when it forwards a
/// request to a connection's FIFO (§4.8).
pub type OpId = u64;
