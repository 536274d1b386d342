use anyhow::Result;
use audiopus::coder::Decoder as InnerDecoder;
use audiopus::packet::Packet;
use audiopus::{Channels, MutSignals, SampleRate};

use crate::OPUS_FRAME_SIZE;

/// Wraps the Opus decoder. One decoder instance per remote sender.
pub struct OpusDecoder {
    inner: InnerDecoder,
}

impl OpusDecoder {
    pub fn new() -> Result<Self> {
        let decoder = InnerDecoder::new(SampleRate::Hz48000, Channels::Mono)?;
        Ok(Self { inner: decoder })
    }

    /// Decode an Opus packet into PCM i16 samples.
    ///
    /// Returns exactly `OPUS_FRAME_SIZE` (960) samples for a 20 ms packet.
    pub fn decode(&mut self, opus_data: &[u8]) -> Result<Vec<i16>> {
        let mut output = vec![0i16; OPUS_FRAME_SIZE];
        let samples = self.decode_into(opus_data, &mut output)?;
        output.truncate(samples);
        Ok(output)
    }

    /// Decode an Opus packet into a caller-provided buffer, returning the
    /// number of samples written. Used with pooled buffers on the receive
    /// hot path to avoid per-packet allocation.
    pub fn decode_into(&mut self, opus_data: &[u8], buf: &mut Vec<i16>) -> Result<usize> {
        buf.resize(OPUS_FRAME_SIZE, 0);
        let packet = Packet::try_from(opus_data)?;
        let signals = MutSignals::try_from(&mut *buf)?;
        let samples = self.inner.decode(Some(packet), signals, false)?;
        buf.truncate(samples);
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::OpusEncoder;

    #[test]
    fn decode_into_reuses_buffer() {
        let mut enc = OpusEncoder::new().unwrap();
        let mut dec = OpusDecoder::new().unwrap();

        let tone: Vec<i16> = (0..OPUS_FRAME_SIZE)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();
        let opus = enc.encode(&tone).unwrap();

        let mut buf = Vec::with_capacity(OPUS_FRAME_SIZE);
        let n = dec.decode_into(&opus, &mut buf).unwrap();
        assert_eq!(n, OPUS_FRAME_SIZE);
        assert_eq!(buf.len(), OPUS_FRAME_SIZE);
    }

    #[test]
    fn decode_garbage_fails() {
        let mut dec = OpusDecoder::new().unwrap();
        // Empty packets are invalid
        assert!(dec.decode(&[]).is_err());
    }
}
