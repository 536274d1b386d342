use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use huddle_protocol::FrameKind;
use huddle_video::CodecFacade;
use tracing::{debug, info, warn};

use crate::frame::{EncodedFrame, RawFrame};
use crate::priority;
use crate::queue::FrameQueue;
use crate::settings::ShareSettings;
use crate::stats::ShareStats;

/// Bound on the encode stage's wait for new raw frames.
const WAIT_TIMEOUT: Duration = Duration::from_millis(16);

/// The encode loop. Drains the raw queue, runs each bitmap through the
/// codec facade (static-skip → H.264 → JPEG, first non-empty result wins)
/// and enqueues the payload with the session's next sequence number.
pub struct EncodeStage;

impl EncodeStage {
    pub fn spawn(
        mut facade: CodecFacade,
        settings: Arc<Mutex<ShareSettings>>,
        raw_queue: Arc<FrameQueue<RawFrame>>,
        encoded_queue: Arc<FrameQueue<EncodedFrame>>,
        stats: Arc<ShareStats>,
        active: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("screen-encode".into())
            .spawn(move || {
                priority::raise_thread_priority(priority::ENCODE_PRIORITY, "screen-encode");
                info!("screen encode started");

                let mut seq: u64 = 0;
                let mut warned_oversize = false;

                while active.load(Ordering::Relaxed) {
                    let Some(raw) = raw_queue.pop_timeout(WAIT_TIMEOUT) else {
                        continue;
                    };
                    encode_one(
                        &mut facade,
                        &settings,
                        &encoded_queue,
                        &stats,
                        raw,
                        &mut seq,
                        &mut warned_oversize,
                    );
                    // Drain whatever else the capture stage queued meanwhile
                    while let Some(raw) = raw_queue.pop() {
                        encode_one(
                            &mut facade,
                            &settings,
                            &encoded_queue,
                            &stats,
                            raw,
                            &mut seq,
                            &mut warned_oversize,
                        );
                    }
                }

                // Remaining raw frames are freed here, not encoded
                let leftover = raw_queue.clear();
                if leftover > 0 {
                    debug!("freed {leftover} raw frames on encode exit");
                }
                info!("screen encode stopped");
            })
            .context("failed to spawn encode thread")
    }
}

fn encode_one(
    facade: &mut CodecFacade,
    settings: &Mutex<ShareSettings>,
    encoded_queue: &FrameQueue<EncodedFrame>,
    stats: &ShareStats,
    raw: RawFrame,
    seq: &mut u64,
    warned_oversize: &mut bool,
) {
    let s = settings
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();

    let started = Instant::now();

    // Adaptive path: skip frames whose content did not change
    if s.adaptive && facade.frame_unchanged(&raw.pixels) {
        stats.add_frames_skipped(1);
        return;
    }

    let mut payload: Option<(Vec<u8>, FrameKind)> = None;

    if s.adaptive {
        if let Some(bytes) = facade.encode_h264(&raw.pixels, s.bitrate_kbps, s.target_fps as u32)
        {
            if !bytes.is_empty() {
                payload = Some((bytes, FrameKind::H264));
            }
            // Empty output means the encoder has not produced a keyframe
            // yet — fall through to JPEG so the viewer sees something.
        }
    }

    if payload.is_none() {
        if let Some(mut bytes) = facade.encode_jpeg(&raw.pixels, s.quality) {
            if bytes.len() > s.max_frame_bytes as usize {
                // One retry at reduced quality before accepting the size
                let retry_quality = (s.quality / 2).max(20);
                if let Some(smaller) = facade.encode_jpeg(&raw.pixels, retry_quality) {
                    if !*warned_oversize {
                        warn!(
                            "frame exceeded {} bytes at quality {}, retried at {}",
                            s.max_frame_bytes, s.quality, retry_quality
                        );
                        *warned_oversize = true;
                    }
                    bytes = smaller;
                }
            }
            if !bytes.is_empty() {
                payload = Some((bytes, FrameKind::Jpeg));
            }
        }
    }

    let Some((data, kind)) = payload else {
        // Every encoder refused the frame; discard it
        stats.add_frames_dropped(1);
        return;
    };

    stats.record_encode_time(started.elapsed());

    let frame = EncodedFrame {
        data: Bytes::from(data),
        width: raw.pixels.width() as u16,
        height: raw.pixels.height() as u16,
        seq: *seq,
        capture_ts_ms: raw.capture_ts_ms,
        kind,
    };
    *seq += 1;

    if encoded_queue.push(frame).is_some() {
        stats.add_frames_dropped(1);
    }
}
