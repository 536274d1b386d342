use anyhow::Result;
use ffmpeg_next as ffmpeg;
use ffmpeg::codec::{self, decoder, encoder};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::h264::{init_ffmpeg, H264Encoder};
use crate::jpeg::JpegCodec;
use crate::pixel::PixelBuffer;

static H264_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Probe H.264 availability once per process.
///
/// Verifies the native codec library loads and that an H.264 decoder is
/// resolvable. Idempotent and safe to call from any thread; all callers
/// after the first read the cached result. When unavailable, send paths
/// fall back to JPEG and receive paths skip H.264 frames.
pub fn h264_available() -> bool {
    *H264_AVAILABLE.get_or_init(|| {
        if init_ffmpeg().is_err() {
            warn!("video codec library failed to load — H.264 disabled");
            return false;
        }
        let dec = decoder::find(codec::Id::H264).is_some();
        let enc = encoder::find(codec::Id::H264).is_some();
        if !dec {
            warn!("no H.264 decoder resolvable — H.264 disabled");
        } else {
            info!(encoder = enc, "H.264 probe complete");
        }
        dec
    })
}

/// Per-session codec facade for the sender pipeline (C1).
///
/// Owns one JPEG codec and, when requested and available, one lazily
/// created H.264 encoder. Encode failures are surfaced (via `warn!`) only
/// the first time a frame is offered; subsequent frames silently skip.
pub struct CodecFacade {
    jpeg: JpegCodec,
    h264: Option<H264Encoder>,
    /// Set permanently for this session once the H.264 encoder failed to
    /// open or repeatedly failed to encode.
    h264_failed: bool,
    warned_h264: bool,
    warned_jpeg: bool,
    last_checksum: Option<u64>,
}

impl CodecFacade {
    pub fn new() -> Result<Self> {
        Ok(Self {
            jpeg: JpegCodec::new()?,
            h264: None,
            h264_failed: false,
            warned_h264: false,
            warned_jpeg: false,
            last_checksum: None,
        })
    }

    /// Encode a bitmap as JPEG at the given quality. Returns `None` after a
    /// failure (logged once); the frame is discarded by the caller.
    pub fn encode_jpeg(&mut self, frame: &PixelBuffer, quality: u8) -> Option<Vec<u8>> {
        match self.jpeg.encode(frame, quality) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                if !self.warned_jpeg {
                    warn!("JPEG encode failed: {e:#}");
                    self.warned_jpeg = true;
                }
                None
            }
        }
    }

    /// Decode a JPEG payload.
    pub fn decode_jpeg(&mut self, jpeg: &[u8]) -> Result<PixelBuffer> {
        self.jpeg.decode(jpeg)
    }

    /// Encode a bitmap as H.264, creating the encoder on first use.
    ///
    /// Returns `None` when H.264 is unavailable or permanently failed for
    /// this session; the caller falls through to JPEG. An empty `Vec` is a
    /// valid result — the encoder accepted the frame but has not produced
    /// a keyframe yet.
    pub fn encode_h264(
        &mut self,
        frame: &PixelBuffer,
        bitrate_kbps: u32,
        fps: u32,
    ) -> Option<Vec<u8>> {
        if self.h264_failed || !h264_available() {
            return None;
        }

        if self
            .h264
            .as_ref()
            .map(|e| !frame.is_size(e.width(), e.height()))
            .unwrap_or(false)
        {
            // Resolution changed (adaptive step-down) — rebuild the encoder
            self.h264 = None;
        }

        if self.h264.is_none() {
            match H264Encoder::new(frame.width(), frame.height(), bitrate_kbps, fps) {
                Ok(enc) => self.h264 = Some(enc),
                Err(e) => {
                    if !self.warned_h264 {
                        warn!("H.264 encoder unavailable, falling back to JPEG: {e:#}");
                        self.warned_h264 = true;
                    }
                    self.h264_failed = true;
                    return None;
                }
            }
        }

        let enc = self.h264.as_mut()?;
        match enc.encode(frame, false) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                if !self.warned_h264 {
                    warn!("H.264 encode failed, falling back to JPEG: {e:#}");
                    self.warned_h264 = true;
                }
                self.h264_failed = true;
                None
            }
        }
    }

    /// Static-screen check for the adaptive streaming path.
    ///
    /// Computes a sampled checksum of the bitmap and compares it with the
    /// previous frame's. Returns `true` when the content is unchanged, in
    /// which case the encode stage skips the frame entirely.
    pub fn frame_unchanged(&mut self, frame: &PixelBuffer) -> bool {
        let checksum = sampled_checksum(frame.as_bytes());
        let unchanged = self.last_checksum == Some(checksum);
        self.last_checksum = Some(checksum);
        unchanged
    }
}

/// FNV-1a over every 64th byte plus the length. Cheap enough to run per
/// frame at 60 fps on 4K bitmaps while still catching cursor-sized changes
/// in most positions.
fn sampled_checksum(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in data.iter().step_by(64) {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash ^= data.len() as u64;
    hash.wrapping_mul(0x0000_0100_0000_01b3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_is_idempotent() {
        let first = h264_available();
        let second = h264_available();
        assert_eq!(first, second);
    }

    #[test]
    fn checksum_detects_change() {
        let a = vec![0u8; 4096];
        let mut b = vec![0u8; 4096];
        b[0] = 1; // position 0 is sampled
        assert_ne!(sampled_checksum(&a), sampled_checksum(&b));
    }

    #[test]
    fn checksum_includes_length() {
        let a = vec![7u8; 64];
        let b = vec![7u8; 65];
        assert_ne!(sampled_checksum(&a), sampled_checksum(&b));
    }

    #[test]
    fn static_frame_is_skipped_on_second_offer() {
        let mut facade = CodecFacade::new().unwrap();
        let frame = PixelBuffer::new(32, 32);
        assert!(!facade.frame_unchanged(&frame)); // first frame always fresh
        assert!(facade.frame_unchanged(&frame));

        let mut changed = PixelBuffer::new(32, 32);
        changed.as_bytes_mut()[0] = 200;
        assert!(!facade.frame_unchanged(&changed));
    }

    #[test]
    fn jpeg_roundtrip_through_facade() {
        let mut facade = CodecFacade::new().unwrap();
        let frame = PixelBuffer::new(48, 32);
        let jpeg = facade.encode_jpeg(&frame, 70).expect("encode failed");
        let decoded = facade.decode_jpeg(&jpeg).unwrap();
        assert_eq!(decoded.width(), 48);
        assert_eq!(decoded.height(), 32);
    }
}
