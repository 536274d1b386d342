use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("payload too short: expected at least {expected} bytes, got {got}")]
    PayloadTooShort { expected: usize, got: usize },

    #[error("unrecognized frame magic: 0x{0:02x}")]
    UnknownFrameKind(u8),

    #[error("message too large: {0} bytes (max 16 MiB)")]
    MessageTooLarge(usize),

    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
