pub mod capture;
pub mod decoder;
pub mod denoise;
pub mod device;
pub mod encoder;
pub mod gain;
pub mod playback;
pub mod vad;

/// Opus audio parameters. Invariant across capture, encode, decode and
/// playback: 48 kHz, 16-bit, mono, 20 ms frames.
pub const OPUS_SAMPLE_RATE: u32 = 48_000;
pub const OPUS_CHANNELS: u32 = 1; // mono
pub const OPUS_FRAME_SIZE: usize = 960; // 20ms at 48kHz
pub const OPUS_BITRATE: i32 = 24_000; // 24 kbps
pub const OPUS_COMPLEXITY: u8 = 5;

/// Size in bytes of one decoded Opus frame (960 × i16). The orchestrator
/// byte pool hands out buffers of exactly this size.
pub const DECODED_FRAME_BYTES: usize = OPUS_FRAME_SIZE * 2;
