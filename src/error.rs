//! Protocol error kinds shared by the codec, the type map and the endpoints.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors surfaced by the wire protocol layer.
///
/// `PodDecode`, `TypeMapGap` and `Io` are fatal for the connection they occur
/// on; `UnknownOpcode` and `UnknownObject` are policy decisions for the
/// dispatch loop (the server tears down on unknown opcodes, both sides drop
/// messages for unknown objects).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed pod payload: truncated record, tag mismatch, bad padding,
    /// missing field or an unannounced embedded type id.
    #[error("pod decode error: {0}")]
    PodDecode(&'static str),

    /// Incoming `update_types` does not start at the wire high-water mark.
    #[error("type map gap: expected first_id {expected}, got {got}")]
    TypeMapGap {
        /// The wire high-water mark this side expected the update to start at.
        expected: u32,
        /// The `first_id` the peer actually announced.
        got: u32,
    },

    /// Opcode beyond the interface's method or event table.
    #[error("unknown opcode {opcode} for {interface}")]
    UnknownOpcode {
        /// Type URI of the interface the message targeted.
        interface: &'static str,
        /// The offending opcode.
        opcode: u16,
    },

    /// Message targeted an id that is not in the object table. The peer may
    /// have raced a `remove_id`, so this is normally dropped, not fatal.
    #[error("unknown object id {0}")]
    UnknownObject(u32),

    /// Outbound payload exceeds what the frame header can carry.
    #[error("payload of {0} bytes exceeds the frame size limit")]
    Oversize(usize),

    /// Transport error from the underlying stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
