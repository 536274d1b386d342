use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Smoothing factor for the stage timing averages.
const EWMA_ALPHA: f64 = 0.1;

/// Live counters and timings for one share session.
///
/// Counters are monotone; timing fields hold an exponentially weighted
/// moving average in microseconds. Each timing field has a single writer
/// (its own pipeline stage), so plain relaxed load/store is enough.
pub struct ShareStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    frames_skipped: AtomicU64,
    bytes_sent: AtomicU64,

    capture_us: AtomicU64,
    encode_us: AtomicU64,
    send_us: AtomicU64,

    current_fps: AtomicU32,
    current_quality: AtomicU32,
    /// Packed as `(width << 16) | height`.
    resolution: AtomicU32,
    viewer_count: AtomicU32,

    started_at: Instant,
}

impl ShareStats {
    pub fn new(fps: u16, quality: u8, width: u16, height: u16) -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            capture_us: AtomicU64::new(0),
            encode_us: AtomicU64::new(0),
            send_us: AtomicU64::new(0),
            current_fps: AtomicU32::new(fps as u32),
            current_quality: AtomicU32::new(quality as u32),
            resolution: AtomicU32::new(pack_resolution(width, height)),
            viewer_count: AtomicU32::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn add_frame_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn add_frames_dropped(&self, n: u64) {
        self.frames_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_frames_skipped(&self, n: u64) {
        self.frames_skipped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_capture_time(&self, elapsed: Duration) {
        ewma_update(&self.capture_us, elapsed);
    }

    pub fn record_encode_time(&self, elapsed: Duration) {
        ewma_update(&self.encode_us, elapsed);
    }

    pub fn record_send_time(&self, elapsed: Duration) {
        ewma_update(&self.send_us, elapsed);
    }

    pub fn set_current_fps(&self, fps: u16) {
        self.current_fps.store(fps as u32, Ordering::Relaxed);
    }

    pub fn set_quality(&self, quality: u8) {
        self.current_quality.store(quality as u32, Ordering::Relaxed);
    }

    pub fn set_resolution(&self, width: u16, height: u16) {
        self.resolution
            .store(pack_resolution(width, height), Ordering::Relaxed);
    }

    pub fn set_viewer_count(&self, count: u32) {
        self.viewer_count.store(count, Ordering::Relaxed);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn resolution(&self) -> (u16, u16) {
        let packed = self.resolution.load(Ordering::Relaxed);
        ((packed >> 16) as u16, (packed & 0xFFFF) as u16)
    }

    pub fn quality(&self) -> u8 {
        self.current_quality.load(Ordering::Relaxed) as u8
    }

    pub fn current_fps(&self) -> u16 {
        self.current_fps.load(Ordering::Relaxed) as u16
    }

    pub fn viewer_count(&self) -> u32 {
        self.viewer_count.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Point-in-time copy for display.
    pub fn snapshot(&self) -> StatsSnapshot {
        let (width, height) = self.resolution();
        StatsSnapshot {
            frames_sent: self.frames_sent(),
            frames_dropped: self.frames_dropped(),
            frames_skipped: self.frames_skipped(),
            bytes_sent: self.bytes_sent(),
            capture_ms: self.capture_us.load(Ordering::Relaxed) as f64 / 1000.0,
            encode_ms: self.encode_us.load(Ordering::Relaxed) as f64 / 1000.0,
            send_ms: self.send_us.load(Ordering::Relaxed) as f64 / 1000.0,
            current_fps: self.current_fps(),
            quality: self.quality(),
            width,
            height,
            viewer_count: self.viewer_count(),
            duration: self.duration(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_skipped: u64,
    pub bytes_sent: u64,
    pub capture_ms: f64,
    pub encode_ms: f64,
    pub send_ms: f64,
    pub current_fps: u16,
    pub quality: u8,
    pub width: u16,
    pub height: u16,
    pub viewer_count: u32,
    pub duration: Duration,
}

fn pack_resolution(width: u16, height: u16) -> u32 {
    ((width as u32) << 16) | height as u32
}

fn ewma_update(cell: &AtomicU64, elapsed: Duration) {
    let sample = elapsed.as_micros() as f64;
    let prev = cell.load(Ordering::Relaxed) as f64;
    let next = if prev == 0.0 {
        sample
    } else {
        prev * (1.0 - EWMA_ALPHA) + sample * EWMA_ALPHA
    };
    cell.store(next as u64, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotone() {
        let stats = ShareStats::new(30, 70, 1280, 720);
        stats.add_frame_sent(1000);
        stats.add_frame_sent(500);
        stats.add_frames_dropped(3);
        assert_eq!(stats.frames_sent(), 2);
        assert_eq!(stats.bytes_sent(), 1500);
        assert_eq!(stats.frames_dropped(), 3);
    }

    #[test]
    fn resolution_packs_and_unpacks() {
        let stats = ShareStats::new(30, 70, 2560, 1440);
        assert_eq!(stats.resolution(), (2560, 1440));
        stats.set_resolution(854, 480);
        assert_eq!(stats.resolution(), (854, 480));
    }

    #[test]
    fn ewma_converges_toward_samples() {
        let stats = ShareStats::new(30, 70, 0, 0);
        // First sample seeds the average directly
        stats.record_send_time(Duration::from_millis(10));
        assert!((stats.snapshot().send_ms - 10.0).abs() < 0.1);

        // Repeated 20ms samples pull the average upward, but not past 20
        for _ in 0..50 {
            stats.record_send_time(Duration::from_millis(20));
        }
        let send_ms = stats.snapshot().send_ms;
        assert!(send_ms > 15.0 && send_ms <= 20.1, "send_ms = {send_ms}");
    }

    #[test]
    fn snapshot_carries_current_values() {
        let stats = ShareStats::new(60, 80, 1920, 1080);
        stats.set_quality(75);
        stats.set_current_fps(30);
        stats.set_viewer_count(4);
        let snap = stats.snapshot();
        assert_eq!(snap.quality, 75);
        assert_eq!(snap.current_fps, 30);
        assert_eq!(snap.viewer_count, 4);
        assert_eq!((snap.width, snap.height), (1920, 1080));
    }
}
