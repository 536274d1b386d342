/// Voice activity detector based on subsampled RMS level.
///
/// Measures every 8th sample of each 20 ms i16 frame — plenty of
/// resolution for speech energy at a fraction of the cost — and compares
/// the normalized level (0.0–1.0) against a threshold. A hold period keeps
/// the gate open between words to avoid choppy cutoffs.
pub struct VoiceActivityDetector {
    /// Normalized level threshold (0.0–1.0). Frames above it are voice.
    threshold: f32,
    /// How many silent frames before releasing. At 20ms per frame,
    /// 15 frames = 300ms hold.
    hold_frames: u32,
    /// Counter of consecutive silent frames.
    silent_count: u32,
    /// Whether voice is currently detected (includes hold period).
    active: bool,
    /// Most recent normalized RMS level.
    current_level: f32,
}

/// Measure only every Nth sample when computing frame energy.
const LEVEL_SUBSAMPLE: usize = 8;

impl VoiceActivityDetector {
    /// Create a new VAD.
    ///
    /// `threshold`: normalized gate level, typically 0.01–0.1.
    /// `hold_ms`: how long to keep transmitting after voice stops.
    /// `frame_duration_ms`: duration of each audio frame (typically 20).
    pub fn new(threshold: f32, hold_ms: u32, frame_duration_ms: u32) -> Self {
        let hold_frames = if frame_duration_ms > 0 {
            hold_ms / frame_duration_ms
        } else {
            15
        };
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            hold_frames,
            silent_count: hold_frames + 1, // Start in silent state
            active: false,
            current_level: 0.0,
        }
    }

    /// Process a frame of i16 PCM samples and return whether voice is
    /// detected (above threshold, or within the hold period).
    pub fn process(&mut self, samples: &[i16]) -> bool {
        self.current_level = subsampled_level(samples);

        if self.current_level >= self.threshold {
            self.silent_count = 0;
            self.active = true;
        } else {
            self.silent_count = self.silent_count.saturating_add(1);
            if self.silent_count > self.hold_frames {
                self.active = false;
            }
            // During hold period, active stays true
        }

        self.active
    }

    /// The most recent normalized level (updated each `process` call).
    pub fn current_level(&self) -> f32 {
        self.current_level
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// RMS of every 8th sample, normalized to 0.0–1.0.
pub fn subsampled_level(samples: &[i16]) -> f32 {
    let mut sum_sq = 0.0f64;
    let mut count = 0usize;
    for &s in samples.iter().step_by(LEVEL_SUBSAMPLE) {
        let v = s as f64 / i16::MAX as f64;
        sum_sq += v * v;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (sum_sq / count as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_not_detected() {
        let mut vad = VoiceActivityDetector::new(0.02, 300, 20);
        let silence = vec![0i16; 960];
        assert!(!vad.process(&silence));
        assert_eq!(vad.current_level(), 0.0);
    }

    #[test]
    fn loud_signal_is_detected() {
        let mut vad = VoiceActivityDetector::new(0.02, 300, 20);
        // ~30% amplitude, well above the 2% threshold
        let loud = vec![(i16::MAX as f32 * 0.3) as i16; 960];
        assert!(vad.process(&loud));
        assert!(vad.current_level() > 0.25);
    }

    #[test]
    fn hold_time_works() {
        let mut vad = VoiceActivityDetector::new(0.02, 60, 20);
        // hold_frames = 60/20 = 3

        let loud = vec![8000i16; 960];
        let silence = vec![0i16; 960];

        assert!(vad.process(&loud));

        // 3 silent frames should still be active (hold period)
        assert!(vad.process(&silence)); // silent_count=1
        assert!(vad.process(&silence)); // silent_count=2
        assert!(vad.process(&silence)); // silent_count=3

        // 4th silent frame should deactivate
        assert!(!vad.process(&silence)); // silent_count=4 > hold_frames=3
    }

    #[test]
    fn threshold_change() {
        let mut vad = VoiceActivityDetector::new(0.1, 300, 20);
        let quiet = vec![700i16; 960]; // ~2% amplitude
        assert!(!vad.process(&quiet));

        vad.set_threshold(0.01);
        assert!(vad.process(&quiet));
    }

    #[test]
    fn full_scale_level_is_one() {
        let full = vec![i16::MAX; 960];
        let level = subsampled_level(&full);
        assert!((level - 1.0).abs() < 1e-3);
    }

    #[test]
    fn empty_frame_level_is_zero() {
        assert_eq!(subsampled_level(&[]), 0.0);
    }
}
