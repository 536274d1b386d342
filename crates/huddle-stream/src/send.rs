use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::adaptive::{AdaptiveAction, AdaptiveController};
use crate::frame::EncodedFrame;
use crate::orchestrator::StreamOrchestrator;
use crate::queue::FrameQueue;
use crate::settings::ShareSettings;
use crate::stats::ShareStats;

/// Soft timeout for handing one frame to the transport. A frame that
/// cannot be accepted in time is dropped, never retried.
const SEND_TIMEOUT: Duration = Duration::from_millis(200);

/// Courtesy yield after each send while voice is active.
const VOICE_COURTESY_YIELD: Duration = Duration::from_millis(5);

/// Encoded-queue backlog beyond which half the backlog is shed.
const BACKLOG_LIMIT: usize = 3;

/// The pacing loop. Dequeues encoded frames at the effective frame rate,
/// yields to voice, sheds backlog, and feeds observed send latency back
/// into the adaptive controller and the orchestrator.
pub struct SendStage;

impl SendStage {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        encoded_queue: Arc<FrameQueue<EncodedFrame>>,
        video_tx: mpsc::Sender<EncodedFrame>,
        preview_tx: Option<mpsc::Sender<EncodedFrame>>,
        orchestrator: Arc<StreamOrchestrator>,
        mut controller: AdaptiveController,
        settings: Arc<Mutex<ShareSettings>>,
        stats: Arc<ShareStats>,
        active: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("screen send started");

            let mut skip_counter: u64 = 0;
            let mut next_slot = Instant::now();

            while active.load(Ordering::Relaxed) {
                let target_fps = settings
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .target_fps;

                // One consistent orchestrator snapshot per iteration
                let hints = orchestrator.pacing_hints(target_fps);
                stats.set_current_fps(hints.effective_fps);

                // 1. Voice has the transport — back off briefly
                if hints.yield_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(hints.yield_delay_ms)).await;
                }

                // 2. Shed this slot's frame entirely when asked to
                skip_counter += 1;
                if orchestrator.should_skip_video_frame(skip_counter)
                    && encoded_queue.pop().is_some()
                {
                    stats.add_frames_dropped(1);
                }

                // 3. Wait for the next send slot
                let interval = Duration::from_secs_f64(1.0 / hints.effective_fps as f64);
                next_slot += interval;
                let now = Instant::now();
                if next_slot < now {
                    next_slot = now;
                } else {
                    tokio::time::sleep_until(next_slot).await;
                }

                if !active.load(Ordering::Relaxed) {
                    break;
                }

                // 4. Shed stale backlog before dequeuing (most recent wins)
                let backlog = encoded_queue.len();
                if backlog > BACKLOG_LIMIT {
                    let dropped = encoded_queue.drop_oldest(backlog / 2);
                    stats.add_frames_dropped(dropped as u64);
                }
                let Some(frame) = encoded_queue.pop() else {
                    continue;
                };

                let bytes_len = frame.data.len();
                if let Some(preview) = &preview_tx {
                    // Payload is refcounted; a full preview channel just
                    // misses this frame
                    let _ = preview.try_send(frame.clone());
                }

                // 5. Hand to the transport with a soft timeout
                let started = std::time::Instant::now();
                match tokio::time::timeout(SEND_TIMEOUT, video_tx.send(frame)).await {
                    Ok(Ok(())) => {
                        let elapsed = started.elapsed();
                        let send_ms = elapsed.as_secs_f32() * 1000.0;
                        stats.record_send_time(elapsed);
                        stats.add_frame_sent(bytes_len);
                        orchestrator.record_send_latency(send_ms as u32);
                        if let Some(action) = controller.record(send_ms) {
                            apply_adaptive_action(&settings, &stats, action);
                        }
                    }
                    Ok(Err(_closed)) => {
                        warn!("video channel closed, stopping send stage");
                        active.store(false, Ordering::Relaxed);
                        break;
                    }
                    Err(_elapsed) => {
                        // Timed out: the frame is lost with the cancelled
                        // send. Feed the ceiling latency to the controller —
                        // a timeout is the loudest congestion signal we get.
                        stats.add_frames_dropped(1);
                        let send_ms = SEND_TIMEOUT.as_secs_f32() * 1000.0;
                        orchestrator.record_send_latency(send_ms as u32);
                        if let Some(action) = controller.record(send_ms) {
                            apply_adaptive_action(&settings, &stats, action);
                        }
                    }
                }

                // 7. Extra courtesy yield while voice is active
                if hints.voice_active {
                    tokio::time::sleep(VOICE_COURTESY_YIELD).await;
                }
            }

            info!("screen send stopped");
        })
    }
}

fn apply_adaptive_action(
    settings: &Mutex<ShareSettings>,
    stats: &ShareStats,
    action: AdaptiveAction,
) {
    let mut s = settings
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match action {
        AdaptiveAction::ReduceQuality(quality) => {
            s.quality = quality;
            stats.set_quality(quality);
            info!("congestion: quality reduced to {quality}");
        }
        AdaptiveAction::IncreaseQuality(quality) => {
            s.quality = quality;
            stats.set_quality(quality);
            info!("link recovered: quality raised to {quality}");
        }
        AdaptiveAction::ReduceResolution {
            width,
            height,
            quality,
        } => {
            s.target_w = width;
            s.target_h = height;
            s.quality = quality;
            stats.set_resolution(width, height);
            stats.set_quality(quality);
            warn!("sustained congestion: resolution reduced to {width}x{height}, quality reset to {quality}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::QualityPreset;
    use bytes::Bytes;
    use huddle_protocol::FrameKind;

    fn encoded(seq: u64) -> EncodedFrame {
        EncodedFrame {
            data: Bytes::from(vec![0xFF, 0xD8, 0, 0]),
            width: 16,
            height: 16,
            seq,
            capture_ts_ms: seq,
            kind: FrameKind::Jpeg,
        }
    }

    fn harness(
        fps: u16,
    ) -> (
        Arc<FrameQueue<EncodedFrame>>,
        mpsc::Receiver<EncodedFrame>,
        Arc<StreamOrchestrator>,
        Arc<Mutex<ShareSettings>>,
        Arc<ShareStats>,
        Arc<AtomicBool>,
        tokio::task::JoinHandle<()>,
    ) {
        let mut s = QualityPreset::Medium.settings();
        s.target_fps = fps;
        let controller = AdaptiveController::new(&s);
        let settings = Arc::new(Mutex::new(s));
        let queue = Arc::new(FrameQueue::new(30));
        let stats = Arc::new(ShareStats::new(fps, 70, 1280, 720));
        let orchestrator = StreamOrchestrator::new();
        let active = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(8);
        let handle = SendStage::spawn(
            queue.clone(),
            tx,
            None,
            orchestrator.clone(),
            controller,
            settings.clone(),
            stats.clone(),
            active.clone(),
        );
        (queue, rx, orchestrator, settings, stats, active, handle)
    }

    #[tokio::test]
    async fn frames_flow_in_order() {
        let (queue, mut rx, _orch, _settings, stats, active, handle) = harness(60);
        for i in 0..5 {
            queue.push(encoded(i));
        }

        let mut seqs = Vec::new();
        for _ in 0..5 {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("send stage stalled")
                .expect("channel closed");
            seqs.push(frame.seq);
        }
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert_eq!(stats.frames_sent(), 5);

        active.store(false, Ordering::Relaxed);
        drop(rx);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn backlog_is_halved_most_recent_wins() {
        let (queue, mut rx, _orch, _settings, stats, active, handle) = harness(60);

        // Stuff well past the backlog limit before the stage runs a slot
        for i in 0..20 {
            queue.push(encoded(i));
        }

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("send stage stalled")
            .expect("channel closed");
        // Half of the 20-frame backlog (the oldest half) must be gone
        assert!(first.seq >= 10, "expected oldest half shed, got seq {}", first.seq);
        assert!(stats.frames_dropped() >= 10);

        active.store(false, Ordering::Relaxed);
        drop(rx);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn voice_activity_sheds_frames() {
        let (queue, mut rx, orch, _settings, stats, active, handle) = harness(60);

        // Keep voice continuously active while frames queue up
        let voice_active = active.clone();
        let orch2 = orch.clone();
        let voice_task = tokio::spawn(async move {
            while voice_active.load(Ordering::Relaxed) {
                orch2.signal_audio_send();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        let feeder_active = active.clone();
        let queue2 = queue.clone();
        let feeder = tokio::spawn(async move {
            let mut i = 0u64;
            while feeder_active.load(Ordering::Relaxed) {
                queue2.push(encoded(i));
                i += 1;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        // Drain for a second
        let drain = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drain.is_err(), "drain should run the full window");

        active.store(false, Ordering::Relaxed);
        let _ = voice_task.await;
        let _ = feeder.await;
        drop(rx);
        let _ = handle.await;

        let sent = stats.frames_sent();
        let dropped = stats.frames_dropped();
        assert!(dropped > 0, "voice-active window should shed frames");
        // At least ~30% of handled frames shed while voice is active
        assert!(
            dropped as f64 >= (sent + dropped) as f64 * 0.25,
            "sent={sent} dropped={dropped}"
        );
    }

    #[tokio::test]
    async fn preview_observes_sent_frames() {
        let mut s = QualityPreset::Medium.settings();
        s.target_fps = 60;
        let controller = AdaptiveController::new(&s);
        let settings = Arc::new(Mutex::new(s));
        let queue = Arc::new(FrameQueue::new(30));
        let stats = Arc::new(ShareStats::new(60, 70, 1280, 720));
        let orchestrator = StreamOrchestrator::new();
        let active = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::channel(8);
        let (preview_tx, mut preview_rx) = mpsc::channel(8);
        let handle = SendStage::spawn(
            queue.clone(),
            tx,
            Some(preview_tx),
            orchestrator,
            controller,
            settings,
            stats,
            active.clone(),
        );

        queue.push(encoded(0));
        let sent = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("send stage stalled")
            .expect("channel closed");
        let previewed = tokio::time::timeout(Duration::from_secs(2), preview_rx.recv())
            .await
            .expect("no preview frame")
            .expect("preview closed");
        assert_eq!(previewed.seq, sent.seq);
        // Refcounted payload — the preview shares the sent bytes
        assert_eq!(previewed.data, sent.data);

        active.store(false, Ordering::Relaxed);
        drop(rx);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn closed_channel_stops_stage() {
        let (queue, rx, _orch, _settings, _stats, active, handle) = harness(60);
        drop(rx);
        queue.push(encoded(0));

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("stage did not stop on closed channel")
            .unwrap();
        assert!(!active.load(Ordering::Relaxed));
    }
}
