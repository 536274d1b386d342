use anyhow::{bail, Result};
use std::time::Duration;

/// Tunable parameters of a screen-share session.
///
/// Quality is the adaptive knob; `target_fps` is sticky for the lifetime
/// of the session. A `(0, 0)` target resolution means "match source".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareSettings {
    pub target_fps: u16,
    pub target_w: u16,
    pub target_h: u16,
    /// JPEG quality, 1–100.
    pub quality: u8,
    /// Soft budget for a single encoded frame.
    pub max_frame_bytes: u32,
    pub bitrate_kbps: u32,
    /// Enables the adaptive path: static-screen skip, H.264 preference and
    /// congestion-driven quality control.
    pub adaptive: bool,
}

impl ShareSettings {
    pub fn validate(&self) -> Result<()> {
        if self.target_fps == 0 {
            bail!("target_fps must be at least 1");
        }
        if self.quality == 0 || self.quality > 100 {
            bail!("quality must be within 1-100, got {}", self.quality);
        }
        Ok(())
    }

    /// `(0, 0)` resolution means "capture at the source display size".
    pub fn matches_source(&self) -> bool {
        self.target_w == 0 && self.target_h == 0
    }

    /// Time between successive captures: `1000 / target_fps` ms.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }
}

/// Screen-share quality presets. Values are part of the product contract
/// and must not drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPreset {
    Low,
    Medium,
    High,
    Hd,
    FullHd,
    Qhd,
    Qhd60,
    Uhd,
    /// Capture at the source display resolution.
    Source,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 9] = [
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Hd,
        Self::FullHd,
        Self::Qhd,
        Self::Qhd60,
        Self::Uhd,
        Self::Source,
    ];

    /// Expand the preset into concrete settings.
    pub fn settings(self) -> ShareSettings {
        // (w, h, fps, quality, max KB, kbps)
        let (w, h, fps, quality, max_kb, kbps) = match self {
            Self::Low => (854, 480, 30, 60, 80, 2000),
            Self::Medium => (1280, 720, 30, 70, 160, 4000),
            Self::High => (1280, 720, 60, 80, 125, 6000),
            Self::Hd => (1920, 1080, 30, 80, 330, 8000),
            Self::FullHd => (1920, 1080, 60, 85, 330, 16000),
            Self::Qhd => (2560, 1440, 30, 85, 830, 20000),
            Self::Qhd60 => (2560, 1440, 60, 90, 625, 30000),
            Self::Uhd => (3840, 2160, 30, 90, 1250, 30000),
            Self::Source => (0, 0, 30, 70, 1000, 0),
        };
        ShareSettings {
            target_fps: fps,
            target_w: w,
            target_h: h,
            quality,
            max_frame_bytes: max_kb * 1024,
            bitrate_kbps: kbps,
            adaptive: true,
        }
    }
}
