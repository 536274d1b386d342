use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Both audio directions count as "voice active" for this long after the
/// last packet.
const VOICE_ACTIVE_WINDOW_MS: u64 = 200;

/// How long the video send stage yields per iteration while voice is active.
const VIDEO_YIELD_DELAY_MS: u64 = 10;

/// Drop every Nth video frame while voice is active or latency is high.
const VIDEO_SKIP_STRIDE: u64 = 3;

/// Number of recent send-latency samples kept for the rolling median.
const LATENCY_WINDOW: usize = 30;

/// Median send latency above this is treated as congestion.
const HIGH_LATENCY_MS: u32 = 25;

/// FPS ceiling recommended while the link is congested.
const CONGESTED_FPS_CAP: u16 = 30;

/// Pool buffers hold one decoded Opus frame (960 samples of mono i16).
const POOL_FRAME_SAMPLES: usize = 960;
const POOL_CAPACITY: usize = 16;

/// Pacing snapshot taken once per send-stage iteration so every decision in
/// that iteration sees consistent values.
#[derive(Debug, Clone, Copy)]
pub struct PacingHints {
    pub voice_active: bool,
    pub yield_delay_ms: u64,
    pub effective_fps: u16,
}

/// Process-wide coordinator between voice and video (one per client).
///
/// Created before any session and handed by `Arc` to the audio engines and
/// every share pipeline stage. Audio paths stamp activity timestamps; the
/// video send stage reads them to yield, skip and cap its pacing so voice
/// stays glitch-free while both compete for the transport.
pub struct StreamOrchestrator {
    epoch: Instant,
    /// Milliseconds since `epoch` of the last audio send; 0 = never.
    last_audio_send_ms: AtomicU64,
    last_audio_receive_ms: AtomicU64,
    latency_window: Mutex<VecDeque<u32>>,
    /// Recycled PCM buffers for the audio hot paths.
    pool_tx: crossbeam_channel::Sender<Vec<i16>>,
    pool_rx: crossbeam_channel::Receiver<Vec<i16>>,
}

impl StreamOrchestrator {
    pub fn new() -> Arc<Self> {
        let (pool_tx, pool_rx) = crossbeam_channel::bounded(POOL_CAPACITY);
        Arc::new(Self {
            epoch: Instant::now(),
            last_audio_send_ms: AtomicU64::new(0),
            last_audio_receive_ms: AtomicU64::new(0),
            latency_window: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            pool_tx,
            pool_rx,
        })
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Called by the audio send thread after each packet goes out.
    pub fn signal_audio_send(&self) {
        self.last_audio_send_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    /// Called by the audio receive path for each packet played.
    pub fn signal_audio_receive(&self) {
        self.last_audio_receive_ms
            .store(self.now_ms(), Ordering::Relaxed);
    }

    /// Voice is active when audio was sent or received within the window.
    pub fn is_voice_active(&self) -> bool {
        let now = self.now_ms();
        let send = self.last_audio_send_ms.load(Ordering::Relaxed);
        let recv = self.last_audio_receive_ms.load(Ordering::Relaxed);
        (send != 0 && now.saturating_sub(send) <= VOICE_ACTIVE_WINDOW_MS)
            || (recv != 0 && now.saturating_sub(recv) <= VOICE_ACTIVE_WINDOW_MS)
    }

    /// Extra delay the video send stage should sleep this iteration.
    pub fn video_yield_delay_ms(&self) -> u64 {
        if self.is_voice_active() {
            VIDEO_YIELD_DELAY_MS
        } else {
            0
        }
    }

    /// Whether the send stage should drop the frame at this position.
    /// Sheds every third frame while voice is active or the link is slow.
    pub fn should_skip_video_frame(&self, counter: u64) -> bool {
        if !self.is_voice_active() && !self.is_latency_high() {
            return false;
        }
        counter % VIDEO_SKIP_STRIDE == 0
    }

    /// FPS the send stage should pace at. Returns a lower ceiling while the
    /// rolling send-latency median indicates congestion; never raises the
    /// requested rate.
    pub fn recommend_fps(&self, requested: u16) -> u16 {
        if self.is_latency_high() {
            requested.min(CONGESTED_FPS_CAP)
        } else {
            requested
        }
    }

    /// One consistent snapshot per send-stage iteration.
    pub fn pacing_hints(&self, requested_fps: u16) -> PacingHints {
        let voice_active = self.is_voice_active();
        PacingHints {
            voice_active,
            yield_delay_ms: if voice_active { VIDEO_YIELD_DELAY_MS } else { 0 },
            effective_fps: self.recommend_fps(requested_fps).max(1),
        }
    }

    /// Record one observed video send latency.
    pub fn record_send_latency(&self, ms: u32) {
        let mut window = self
            .latency_window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if window.len() >= LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(ms);
    }

    /// Median of the rolling send-latency window (0 when empty).
    pub fn median_send_latency_ms(&self) -> u32 {
        let window = self
            .latency_window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if window.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u32> = window.iter().copied().collect();
        sorted.sort_unstable();
        sorted[sorted.len() / 2]
    }

    fn is_latency_high(&self) -> bool {
        self.median_send_latency_ms() > HIGH_LATENCY_MS
    }

    /// Take a PCM buffer from the pool, or allocate when the pool is dry.
    /// The buffer arrives empty with capacity for one decoded Opus frame.
    pub fn acquire_pcm(&self) -> Vec<i16> {
        match self.pool_rx.try_recv() {
            Ok(mut buf) => {
                buf.clear();
                buf
            }
            Err(_) => Vec::with_capacity(POOL_FRAME_SAMPLES),
        }
    }

    /// Return a buffer to the pool. Full pool drops the buffer.
    pub fn release_pcm(&self, buf: Vec<i16>) {
        let _ = self.pool_tx.try_send(buf);
    }
}
