use crate::error::ProtocolError;

/// Encoding of a screen-share frame, identified by its leading magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// JPEG image (starts with `FF D8`).
    Jpeg,
    /// H.264 Annex-B bitstream (starts with a NAL start code).
    H264,
}

impl FrameKind {
    /// Identify a frame from its first bytes.
    ///
    /// `FF D8` → JPEG; `00 00 00 01` or `00 00 01` → H.264. Anything else
    /// is an error — the caller drops the payload and counts it.
    pub fn detect(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 3 {
            return Err(ProtocolError::PayloadTooShort {
                expected: 3,
                got: data.len(),
            });
        }

        if data[0] == 0xFF && data[1] == 0xD8 {
            return Ok(Self::Jpeg);
        }

        if data[0] == 0x00 && data[1] == 0x00 {
            if data[2] == 0x01 {
                return Ok(Self::H264);
            }
            if data.len() >= 4 && data[2] == 0x00 && data[3] == 0x01 {
                return Ok(Self::H264);
            }
        }

        Err(ProtocolError::UnknownFrameKind(data[0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_jpeg() {
        let data = [0xFF, 0xD8, 0xFF, 0xE0, 0x00];
        assert_eq!(FrameKind::detect(&data).unwrap(), FrameKind::Jpeg);
    }

    #[test]
    fn detects_h264_long_start_code() {
        let data = [0x00, 0x00, 0x00, 0x01, 0x67];
        assert_eq!(FrameKind::detect(&data).unwrap(), FrameKind::H264);
    }

    #[test]
    fn detects_h264_short_start_code() {
        let data = [0x00, 0x00, 0x01, 0x67];
        assert_eq!(FrameKind::detect(&data).unwrap(), FrameKind::H264);
    }

    #[test]
    fn rejects_unknown_magic() {
        let data = [0x89, 0x50, 0x4E, 0x47]; // PNG
        assert!(matches!(
            FrameKind::detect(&data),
            Err(ProtocolError::UnknownFrameKind(0x89))
        ));
    }

    #[test]
    fn rejects_three_zero_bytes() {
        // Three zeros without the 0x01 terminator is not a start code.
        let data = [0x00, 0x00, 0x00, 0x00, 0x01];
        assert!(FrameKind::detect(&data).is_err());
    }

    #[test]
    fn rejects_truncated_payload() {
        assert!(matches!(
            FrameKind::detect(&[0xFF]),
            Err(ProtocolError::PayloadTooShort { .. })
        ));
        assert!(FrameKind::detect(&[]).is_err());
    }
}
