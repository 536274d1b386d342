use anyhow::{bail, Result};

/// Bytes per pixel for the BGRA8 layout used throughout the pipeline.
pub const BYTES_PER_PIXEL: usize = 4;

/// An owned BGRA8 bitmap with explicit stride.
///
/// The capture stage reuses one of these as its grab target; everything
/// downstream gets freshly allocated, tightly packed copies. Ownership is
/// the access scope: whoever holds the buffer may read or write it, and it
/// is freed on every exit path when dropped.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    /// Row length in bytes. Equal to `width * 4` for tightly packed buffers.
    stride: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a zeroed, tightly packed buffer.
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width as usize * BYTES_PER_PIXEL;
        Self {
            width,
            height,
            stride,
            data: vec![0; stride * height as usize],
        }
    }

    /// Wrap existing BGRA bytes. `data` must hold `stride * height` bytes
    /// and `stride` must cover a full row.
    pub fn from_bgra(width: u32, height: u32, stride: usize, data: Vec<u8>) -> Result<Self> {
        if stride < width as usize * BYTES_PER_PIXEL {
            bail!("stride {} too small for width {}", stride, width);
        }
        if data.len() < stride * height as usize {
            bail!(
                "buffer too short: got {} bytes, need {}",
                data.len(),
                stride * height as usize
            );
        }
        Ok(Self {
            width,
            height,
            stride,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Approximate heap cost of this bitmap in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// One row of pixels, without any stride padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * BYTES_PER_PIXEL]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        &mut self.data[start..start + self.width as usize * BYTES_PER_PIXEL]
    }

    /// Whether this buffer already has the given dimensions.
    pub fn is_size(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    /// Bilinear resize into a freshly allocated, tightly packed buffer.
    ///
    /// Used by the capture stage when the share target resolution differs
    /// from the source display.
    pub fn resize_bilinear(&self, dst_w: u32, dst_h: u32) -> PixelBuffer {
        let mut dst = PixelBuffer::new(dst_w, dst_h);
        if dst_w == 0 || dst_h == 0 || self.width == 0 || self.height == 0 {
            return dst;
        }

        let x_ratio = self.width as f32 / dst_w as f32;
        let y_ratio = self.height as f32 / dst_h as f32;
        let src_max_x = self.width as usize - 1;
        let src_max_y = self.height as usize - 1;

        for dy in 0..dst_h {
            // Sample at pixel centers so edges are not over-weighted
            let sy = ((dy as f32 + 0.5) * y_ratio - 0.5).max(0.0);
            let y0 = (sy as usize).min(src_max_y);
            let y1 = (y0 + 1).min(src_max_y);
            let fy = sy - y0 as f32;

            let row0 = &self.data[y0 * self.stride..];
            let row1 = &self.data[y1 * self.stride..];
            let dst_row = dy as usize * dst.stride;

            for dx in 0..dst_w {
                let sx = ((dx as f32 + 0.5) * x_ratio - 0.5).max(0.0);
                let x0 = (sx as usize).min(src_max_x);
                let x1 = (x0 + 1).min(src_max_x);
                let fx = sx - x0 as f32;

                let p00 = x0 * BYTES_PER_PIXEL;
                let p01 = x1 * BYTES_PER_PIXEL;
                let out = dst_row + dx as usize * BYTES_PER_PIXEL;

                for c in 0..BYTES_PER_PIXEL {
                    let top = row0[p00 + c] as f32 * (1.0 - fx) + row0[p01 + c] as f32 * fx;
                    let bot = row1[p00 + c] as f32 * (1.0 - fx) + row1[p01 + c] as f32 * fx;
                    dst.data[out + c] = (top * (1.0 - fy) + bot * fy + 0.5) as u8;
                }
            }
        }

        dst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, bgra: [u8; 4]) -> PixelBuffer {
        let mut buf = PixelBuffer::new(width, height);
        for px in buf.as_bytes_mut().chunks_mut(4) {
            px.copy_from_slice(&bgra);
        }
        buf
    }

    #[test]
    fn new_is_tightly_packed() {
        let buf = PixelBuffer::new(16, 8);
        assert_eq!(buf.stride(), 64);
        assert_eq!(buf.byte_len(), 64 * 8);
    }

    #[test]
    fn from_bgra_rejects_short_buffer() {
        assert!(PixelBuffer::from_bgra(4, 4, 16, vec![0; 10]).is_err());
    }

    #[test]
    fn from_bgra_rejects_narrow_stride() {
        assert!(PixelBuffer::from_bgra(4, 4, 8, vec![0; 64]).is_err());
    }

    #[test]
    fn row_skips_stride_padding() {
        // 2x2 image with 4 bytes of padding per row
        let data = vec![
            1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0, // row 0 + pad
            9, 10, 11, 12, 13, 14, 15, 16, 0, 0, 0, 0, // row 1 + pad
        ];
        let buf = PixelBuffer::from_bgra(2, 2, 12, data).unwrap();
        assert_eq!(buf.row(0), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buf.row(1), &[9, 10, 11, 12, 13, 14, 15, 16]);
    }

    #[test]
    fn resize_preserves_solid_color() {
        let src = solid(64, 64, [10, 200, 30, 255]);
        let dst = src.resize_bilinear(32, 32);
        assert!(dst.is_size(32, 32));
        for px in dst.as_bytes().chunks(4) {
            assert_eq!(px, &[10, 200, 30, 255]);
        }
    }

    #[test]
    fn resize_upscale_dimensions() {
        let src = solid(8, 8, [0, 0, 0, 255]);
        let dst = src.resize_bilinear(21, 13);
        assert_eq!(dst.width(), 21);
        assert_eq!(dst.height(), 13);
        assert_eq!(dst.stride(), 21 * 4);
    }

    #[test]
    fn resize_interpolates_between_halves() {
        // Left half black, right half white; the downscaled middle column
        // should land between the two.
        let mut src = PixelBuffer::new(64, 4);
        for y in 0..4 {
            let row = src.row_mut(y);
            for x in 32..64 {
                row[x * 4..x * 4 + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        let dst = src.resize_bilinear(4, 4);
        let left = dst.row(0)[0];
        let right = dst.row(0)[3 * 4];
        assert!(left < 64, "left sample should stay dark, got {left}");
        assert!(right > 192, "right sample should stay bright, got {right}");
    }
}
