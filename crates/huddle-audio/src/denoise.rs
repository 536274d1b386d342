use nnnoiseless::DenoiseState;

/// RNNoise operates on fixed 480-sample windows of f32 values already in
/// the i16 range, which lines up with this pipeline without rescaling:
/// exactly two windows per 20 ms Opus frame.
const DENOISE_WINDOW: usize = 480;

/// RNNoise-based suppressor for mic audio, applied in place before the
/// speaking gate so the VAD sees the cleaned signal.
pub struct Denoiser {
    state: Box<DenoiseState>,
    enabled: bool,
    scratch_in: [f32; DENOISE_WINDOW],
    scratch_out: [f32; DENOISE_WINDOW],
}

impl Denoiser {
    pub fn new() -> Self {
        Self {
            state: DenoiseState::new(),
            enabled: true,
            scratch_in: [0.0; DENOISE_WINDOW],
            scratch_out: [0.0; DENOISE_WINDOW],
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Suppress noise across `samples`, window by window. A trailing
    /// partial window is zero-padded for RNNoise and written back at its
    /// original length.
    pub fn process(&mut self, samples: &mut [i16]) {
        if !self.enabled {
            return;
        }

        for window in samples.chunks_mut(DENOISE_WINDOW) {
            for (dst, &src) in self.scratch_in.iter_mut().zip(window.iter()) {
                *dst = src as f32;
            }
            self.scratch_in[window.len()..].fill(0.0);

            self.state
                .process_frame(&mut self.scratch_out, &self.scratch_in);

            for (dst, &src) in window.iter_mut().zip(self.scratch_out.iter()) {
                *dst = src.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            }
        }
    }
}

impl Default for Denoiser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_stays_quiet() {
        let mut denoiser = Denoiser::new();
        let mut samples = vec![0i16; 960];
        denoiser.process(&mut samples);
        for &s in &samples {
            assert!(s.abs() < 330, "expected near-silence, got {}", s);
        }
    }

    #[test]
    fn disabled_is_a_passthrough() {
        let mut denoiser = Denoiser::new();
        denoiser.set_enabled(false);
        let original = vec![5000i16; 960];
        let mut samples = original.clone();
        denoiser.process(&mut samples);
        assert_eq!(samples, original);
    }

    #[test]
    fn partial_trailing_window_is_handled() {
        // 500 samples: one full window plus a 20-sample tail
        let mut denoiser = Denoiser::new();
        let mut samples = vec![0i16; 500];
        denoiser.process(&mut samples);
        assert_eq!(samples.len(), 500);
    }
}
