use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use huddle_video::PixelBuffer;
use tracing::{info, warn};

use crate::frame::RawFrame;
use crate::priority;
use crate::queue::FrameQueue;
use crate::settings::ShareSettings;
use crate::stats::ShareStats;

/// Platform seam for screen capture. Implementations copy the configured
/// display region into `dst`, resizing `dst` to the source dimensions when
/// they differ. The buffer is owned exclusively by the capture thread and
/// reused across grabs.
pub trait DisplayGrabber: Send {
    fn grab(&mut self, dst: &mut PixelBuffer) -> Result<()>;
}

/// Sleep precision: leave this much of the interval for a spin-wait so the
/// capture cadence holds sub-millisecond accuracy.
const SPIN_WINDOW: Duration = Duration::from_millis(1);

/// Back-off after a failed grab.
const FAILURE_BACKOFF: Duration = Duration::from_millis(16);

/// The timed capture loop. Grabs the display at the target frame rate,
/// resizes to the share resolution when needed, and feeds the raw queue.
pub struct CaptureStage;

impl CaptureStage {
    pub fn spawn(
        mut grabber: Box<dyn DisplayGrabber>,
        settings: Arc<Mutex<ShareSettings>>,
        raw_queue: Arc<FrameQueue<RawFrame>>,
        stats: Arc<ShareStats>,
        active: Arc<AtomicBool>,
        epoch: Instant,
    ) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("screen-capture".into())
            .spawn(move || {
                priority::raise_thread_priority(priority::CAPTURE_PRIORITY, "screen-capture");
                info!("screen capture started");

                let mut source = PixelBuffer::new(0, 0);
                let mut next_deadline = Instant::now();

                while active.load(Ordering::Relaxed) {
                    let (interval, tw, th) = {
                        let s = settings
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        (s.frame_interval(), s.target_w as u32, s.target_h as u32)
                    };

                    let started = Instant::now();
                    match grabber.grab(&mut source) {
                        Ok(()) => {
                            let match_source = tw == 0 && th == 0;
                            let target = if match_source || source.is_size(tw, th) {
                                source.clone()
                            } else {
                                source.resize_bilinear(tw, th)
                            };
                            stats.record_capture_time(started.elapsed());

                            let raw = RawFrame {
                                pixels: target,
                                capture_ts_ms: epoch.elapsed().as_millis() as u64,
                            };
                            if raw_queue.push(raw).is_some() {
                                // Encode is behind; the evicted frame counts
                                // as dropped and its bitmap is freed here.
                                stats.add_frames_dropped(1);
                            }
                        }
                        Err(e) => {
                            warn!("screen capture failed: {e:#}");
                            std::thread::sleep(FAILURE_BACKOFF);
                            next_deadline = Instant::now();
                            continue;
                        }
                    }

                    next_deadline += interval;
                    let now = Instant::now();
                    if next_deadline < now {
                        // Fell more than a full interval behind — realign
                        // instead of bursting to catch up.
                        next_deadline = now;
                    } else {
                        sleep_until_spin(next_deadline);
                    }
                }

                info!("screen capture stopped");
            })
            .context("failed to spawn capture thread")
    }
}

/// Deterministic capture source producing a moving gradient. Stands in for
/// a platform grabber in tests and headless runs.
pub struct TestPatternGrabber {
    width: u32,
    height: u32,
    tick: u8,
}

impl TestPatternGrabber {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }
}

impl DisplayGrabber for TestPatternGrabber {
    fn grab(&mut self, dst: &mut PixelBuffer) -> Result<()> {
        if !dst.is_size(self.width, self.height) {
            *dst = PixelBuffer::new(self.width, self.height);
        }
        self.tick = self.tick.wrapping_add(1);
        let tick = self.tick;
        for y in 0..self.height {
            let row = dst.row_mut(y);
            for x in 0..self.width as usize {
                let v = (x as u8).wrapping_add(y as u8).wrapping_add(tick);
                row[x * 4..x * 4 + 4].copy_from_slice(&[v, v, v, 255]);
            }
        }
        Ok(())
    }
}

/// Sleep until close to the deadline, then spin for the final stretch.
fn sleep_until_spin(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        if remaining > SPIN_WINDOW {
            std::thread::sleep(remaining - SPIN_WINDOW);
        } else {
            std::hint::spin_loop();
        }
    }
}
