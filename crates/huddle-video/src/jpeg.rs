use anyhow::{Context, Result};

use crate::pixel::PixelBuffer;

/// Reusable JPEG compressor/decompressor pair for BGRA bitmaps.
///
/// TurboJPEG contexts are cheap to keep but not free to create, so each
/// pipeline owns one codec and reuses it frame to frame.
pub struct JpegCodec {
    compressor: turbojpeg::Compressor,
    decompressor: turbojpeg::Decompressor,
}

impl JpegCodec {
    pub fn new() -> Result<Self> {
        let mut compressor =
            turbojpeg::Compressor::new().context("failed to create TurboJPEG compressor")?;
        compressor
            .set_subsamp(turbojpeg::Subsamp::Sub2x2)
            .context("failed to set JPEG subsampling")?;
        let decompressor =
            turbojpeg::Decompressor::new().context("failed to create TurboJPEG decompressor")?;
        Ok(Self {
            compressor,
            decompressor,
        })
    }

    /// Encode a BGRA bitmap at the given quality (1–100).
    pub fn encode(&mut self, frame: &PixelBuffer, quality: u8) -> Result<Vec<u8>> {
        self.compressor
            .set_quality(quality.clamp(1, 100) as i32)
            .context("failed to set JPEG quality")?;

        let image = turbojpeg::Image {
            pixels: frame.as_bytes(),
            width: frame.width() as usize,
            pitch: frame.stride(),
            height: frame.height() as usize,
            format: turbojpeg::PixelFormat::BGRA,
        };

        let jpeg = self
            .compressor
            .compress_to_vec(image)
            .context("JPEG compression failed")?;
        Ok(jpeg.to_vec())
    }

    /// Decode a JPEG payload into a tightly packed BGRA bitmap.
    pub fn decode(&mut self, jpeg: &[u8]) -> Result<PixelBuffer> {
        let header = self
            .decompressor
            .read_header(jpeg)
            .context("failed to read JPEG header")?;

        let mut frame = PixelBuffer::new(header.width as u32, header.height as u32);
        let pitch = frame.stride();
        let image = turbojpeg::Image {
            pixels: frame.as_bytes_mut(),
            width: header.width,
            pitch,
            height: header.height,
            format: turbojpeg::PixelFormat::BGRA,
        };

        self.decompressor
            .decompress(jpeg, image)
            .context("JPEG decompression failed")?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_same_dimensions() {
        let mut codec = JpegCodec::new().unwrap();
        let mut frame = PixelBuffer::new(64, 48);
        // Horizontal gradient so compression has real content to chew on
        for y in 0..48 {
            let row = frame.row_mut(y);
            for x in 0..64usize {
                let v = (x * 4) as u8;
                row[x * 4..x * 4 + 4].copy_from_slice(&[v, v, v, 255]);
            }
        }

        let jpeg = codec.encode(&frame, 80).unwrap();
        assert!(!jpeg.is_empty());
        // JPEG magic
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = codec.decode(&jpeg).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
    }

    #[test]
    fn lower_quality_smaller_output() {
        let mut codec = JpegCodec::new().unwrap();
        let mut frame = PixelBuffer::new(128, 128);
        for (i, b) in frame.as_bytes_mut().iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }

        let high = codec.encode(&frame, 95).unwrap();
        let low = codec.encode(&frame, 20).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn decode_garbage_fails() {
        let mut codec = JpegCodec::new().unwrap();
        assert!(codec.decode(&[0xFF, 0xD8, 0x00, 0x01, 0x02]).is_err());
    }
}
