use std::collections::VecDeque;

use crate::settings::ShareSettings;

/// Send latency above this fraction of the frame interval is "slow".
const SLOW_FACTOR: f32 = 0.8;
/// Send latency below this fraction of the frame interval is "fast".
const FAST_FACTOR: f32 = 0.3;
/// Consecutive slow frames before stepping quality down.
const SLOW_STREAK: u32 = 10;
/// Consecutive fast frames before stepping quality back up.
const FAST_STREAK: u32 = 20;
const QUALITY_STEP: u8 = 5;
const QUALITY_FLOOR: u8 = 20;
/// Resolution the controller falls back to once quality is exhausted.
const REDUCED_WIDTH: u16 = 854;
const REDUCED_HEIGHT: u16 = 480;
/// Number of recent samples retained for inspection.
const SAMPLE_WINDOW: usize = 30;

/// Parameter change requested by the controller. The send stage applies it
/// to the shared settings, which the encode stage reads next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveAction {
    ReduceQuality(u8),
    /// Quality floor reached: drop resolution once and restart quality from
    /// a workable level. Resolution never restores automatically.
    ReduceResolution {
        width: u16,
        height: u16,
        quality: u8,
    },
    IncreaseQuality(u8),
}

/// Congestion controller for a share session.
///
/// Watches per-frame send latency and trades JPEG quality (then, once, the
/// resolution) against sustained congestion. The frame rate is never
/// touched — viewers notice a frozen cadence far more than a softer image.
pub struct AdaptiveController {
    frame_interval_ms: f32,
    initial_quality: u8,
    quality: u8,
    samples: VecDeque<f32>,
    slow_streak: u32,
    fast_streak: u32,
    resolution_reduced: bool,
    enabled: bool,
}

impl AdaptiveController {
    pub fn new(settings: &ShareSettings) -> Self {
        Self {
            frame_interval_ms: settings.frame_interval().as_secs_f32() * 1000.0,
            initial_quality: settings.quality,
            quality: settings.quality,
            samples: VecDeque::with_capacity(SAMPLE_WINDOW),
            slow_streak: 0,
            fast_streak: 0,
            resolution_reduced: false,
            enabled: settings.adaptive,
        }
    }

    /// Record one observed send latency. Returns the parameter change to
    /// apply, if the streak thresholds were crossed.
    pub fn record(&mut self, send_ms: f32) -> Option<AdaptiveAction> {
        if !self.enabled {
            return None;
        }

        if self.samples.len() >= SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(send_ms);

        if send_ms > self.frame_interval_ms * SLOW_FACTOR {
            self.slow_streak += 1;
            self.fast_streak = 0;
        } else if send_ms < self.frame_interval_ms * FAST_FACTOR {
            self.fast_streak += 1;
            self.slow_streak = 0;
        } else {
            self.slow_streak = 0;
            self.fast_streak = 0;
        }

        if self.slow_streak >= SLOW_STREAK {
            self.slow_streak = 0;
            return self.reduce_quality();
        }
        if self.fast_streak >= FAST_STREAK {
            self.fast_streak = 0;
            return self.increase_quality();
        }
        None
    }

    fn reduce_quality(&mut self) -> Option<AdaptiveAction> {
        if self.quality > QUALITY_FLOOR {
            self.quality = self.quality.saturating_sub(QUALITY_STEP).max(QUALITY_FLOOR);
            Some(AdaptiveAction::ReduceQuality(self.quality))
        } else if !self.resolution_reduced {
            self.resolution_reduced = true;
            self.quality = self.initial_quality.saturating_sub(10).max(40);
            Some(AdaptiveAction::ReduceResolution {
                width: REDUCED_WIDTH,
                height: REDUCED_HEIGHT,
                quality: self.quality,
            })
        } else {
            // Quality and resolution both exhausted; nothing left to shed.
            None
        }
    }

    fn increase_quality(&mut self) -> Option<AdaptiveAction> {
        if self.quality < self.initial_quality {
            self.quality = (self.quality + QUALITY_STEP).min(self.initial_quality);
            Some(AdaptiveAction::IncreaseQuality(self.quality))
        } else {
            None
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn resolution_reduced(&self) -> bool {
        self.resolution_reduced
    }
}
