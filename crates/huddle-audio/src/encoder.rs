use anyhow::Result;
use audiopus::coder::Encoder as InnerEncoder;
use audiopus::{Application, Bitrate, Channels, SampleRate, Signal};

use crate::{OPUS_BITRATE, OPUS_COMPLEXITY, OPUS_FRAME_SIZE, OPUS_SAMPLE_RATE};

/// Wraps the Opus encoder with our voice settings: VOIP application,
/// 24 kbps VBR, complexity 5, voice signal hint.
pub struct OpusEncoder {
    inner: InnerEncoder,
}

impl OpusEncoder {
    pub fn new() -> Result<Self> {
        let mut encoder =
            InnerEncoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)?;

        encoder.set_bitrate(Bitrate::BitsPerSecond(OPUS_BITRATE))?;
        encoder.set_vbr(true)?;
        encoder.set_complexity(OPUS_COMPLEXITY)?;
        encoder.set_signal(Signal::Voice)?;

        Ok(Self { inner: encoder })
    }

    /// Encode a frame of PCM i16 samples into Opus.
    ///
    /// `pcm` must contain exactly `OPUS_FRAME_SIZE` (960) samples.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        assert_eq!(
            pcm.len(),
            OPUS_FRAME_SIZE,
            "PCM frame must be exactly {} samples",
            OPUS_FRAME_SIZE
        );

        // 24 kbps × 20 ms ≈ 60 bytes; 256 leaves headroom for VBR peaks
        let mut output = vec![0u8; 256];
        let len = self.inner.encode(pcm, &mut output)?;
        output.truncate(len);
        Ok(output)
    }

    /// Returns the expected number of input samples per frame.
    pub fn frame_size(&self) -> usize {
        OPUS_FRAME_SIZE
    }

    /// Returns the expected sample rate.
    pub fn sample_rate(&self) -> u32 {
        OPUS_SAMPLE_RATE
    }
}
