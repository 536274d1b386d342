use bytes::Bytes;
use huddle_protocol::FrameKind;
use huddle_video::PixelBuffer;

/// A captured bitmap heading into the encode stage, already at the share
/// target resolution. Dropped (and thereby freed) as soon as it is encoded
/// or evicted from the raw queue.
pub struct RawFrame {
    pub pixels: PixelBuffer,
    /// Capture timestamp in milliseconds since the session started.
    pub capture_ts_ms: u64,
}

/// An encoded frame ready for transmission.
///
/// `seq` is strictly monotone and gap-free per share session. The payload
/// is reference-counted so the local preview can observe frames without
/// copying them.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub width: u16,
    pub height: u16,
    pub seq: u64,
    pub capture_ts_ms: u64,
    pub kind: FrameKind,
}
