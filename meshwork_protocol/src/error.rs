use thiserror::Error;

/// Wire-level failures shared by the codec and the packet container.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Writing would exceed the fixed frame/packet capacity. Raised before
    /// anything reaches a transport; oversized data is never truncated.
    #[error("payload of {len} bytes exceeds capacity {max}")]
    Overflow { len: usize, max: usize },

    /// A received frame is shorter than the 2-byte header.
    #[error("frame of {len} bytes is shorter than the header")]
    Truncated { len: usize },

    /// Byte 0 of a received frame is not a known frame kind.
    #[error("unknown frame kind {0:#04x}")]
    UnknownKind(u8),
}
