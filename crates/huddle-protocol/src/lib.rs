pub mod codec;
pub mod error;
pub mod frame;
pub mod messages;
pub mod types;

pub use error::ProtocolError;
pub use frame::FrameKind;
