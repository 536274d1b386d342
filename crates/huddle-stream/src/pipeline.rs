use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use huddle_video::CodecFacade;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::adaptive::AdaptiveController;
use crate::capture::{CaptureStage, DisplayGrabber};
use crate::encode::EncodeStage;
use crate::frame::{EncodedFrame, RawFrame};
use crate::orchestrator::StreamOrchestrator;
use crate::queue::FrameQueue;
use crate::send::SendStage;
use crate::settings::ShareSettings;
use crate::stats::ShareStats;

/// Raw-capture queue depth.
const RAW_QUEUE_CAPACITY: usize = 5;
/// Encoded-frame queue depth.
const ENCODED_QUEUE_CAPACITY: usize = 30;
/// Hard join timeout per worker on teardown.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One share session's capture → encode → send pipeline.
///
/// `start` creates fresh queues, stats and codec state, and spawns the
/// capture thread, encode thread and async send stage. `stop` cancels all
/// three once, joins them with hard timeouts, and drains the queues —
/// guaranteed resource release on every exit path, and a second `stop` is
/// a no-op.
pub struct SharePipeline {
    active: Arc<AtomicBool>,
    settings: Arc<Mutex<ShareSettings>>,
    stats: Arc<ShareStats>,
    raw_queue: Arc<FrameQueue<RawFrame>>,
    encoded_queue: Arc<FrameQueue<EncodedFrame>>,
    capture_thread: Option<std::thread::JoinHandle<()>>,
    encode_thread: Option<std::thread::JoinHandle<()>>,
    send_task: Option<tokio::task::JoinHandle<()>>,
}

impl SharePipeline {
    /// Validate the settings and launch all three stages. Must be called
    /// from a tokio runtime context.
    pub fn start(
        grabber: Box<dyn DisplayGrabber>,
        settings: ShareSettings,
        orchestrator: Arc<StreamOrchestrator>,
        video_tx: mpsc::Sender<EncodedFrame>,
        preview_tx: Option<mpsc::Sender<EncodedFrame>>,
    ) -> Result<Self> {
        settings.validate().context("invalid share settings")?;

        let facade = CodecFacade::new().context("failed to initialize codecs")?;
        let controller = AdaptiveController::new(&settings);
        let stats = Arc::new(ShareStats::new(
            settings.target_fps,
            settings.quality,
            settings.target_w,
            settings.target_h,
        ));
        let settings = Arc::new(Mutex::new(settings));
        let raw_queue = Arc::new(FrameQueue::new(RAW_QUEUE_CAPACITY));
        let encoded_queue = Arc::new(FrameQueue::new(ENCODED_QUEUE_CAPACITY));
        let active = Arc::new(AtomicBool::new(true));
        let epoch = Instant::now();

        let capture_thread = CaptureStage::spawn(
            grabber,
            settings.clone(),
            raw_queue.clone(),
            stats.clone(),
            active.clone(),
            epoch,
        )?;
        let encode_thread = match EncodeStage::spawn(
            facade,
            settings.clone(),
            raw_queue.clone(),
            encoded_queue.clone(),
            stats.clone(),
            active.clone(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                // Unwind the capture thread we already started
                active.store(false, Ordering::Relaxed);
                let _ = capture_thread.join();
                return Err(e);
            }
        };
        let send_task = SendStage::spawn(
            encoded_queue.clone(),
            video_tx,
            preview_tx,
            orchestrator,
            controller,
            settings.clone(),
            stats.clone(),
            active.clone(),
        );

        info!("share pipeline started");
        Ok(Self {
            active,
            settings,
            stats,
            raw_queue,
            encoded_queue,
            capture_thread: Some(capture_thread),
            encode_thread: Some(encode_thread),
            send_task: Some(send_task),
        })
    }

    /// Cancel and join every stage, then drain the queues. Safe to call
    /// repeatedly; later calls do nothing.
    pub async fn stop(&mut self) {
        self.active.store(false, Ordering::Relaxed);

        if let Some(handle) = self.capture_thread.take() {
            join_thread_timeout(handle, JOIN_TIMEOUT, "screen-capture").await;
        }
        if let Some(handle) = self.encode_thread.take() {
            join_thread_timeout(handle, JOIN_TIMEOUT, "screen-encode").await;
        }
        if let Some(task) = self.send_task.take() {
            match tokio::time::timeout(JOIN_TIMEOUT, task).await {
                Ok(_) => {}
                Err(_) => warn!("send task did not stop within {JOIN_TIMEOUT:?}"),
            }
        }

        let raw = self.raw_queue.clear();
        let encoded = self.encoded_queue.clear();
        if raw + encoded > 0 {
            info!("drained {raw} raw / {encoded} encoded frames on stop");
        }
        info!("share pipeline stopped");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Arc<ShareStats> {
        self.stats.clone()
    }

    /// Live settings handle (the adaptive controller mutates these).
    pub fn settings(&self) -> Arc<Mutex<ShareSettings>> {
        self.settings.clone()
    }
}

/// Join a worker thread without blocking the executor, giving up after
/// `timeout`. A thread that refuses to die is left detached and logged.
async fn join_thread_timeout(
    handle: std::thread::JoinHandle<()>,
    timeout: Duration,
    label: &str,
) {
    let deadline = Instant::now() + timeout;
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return;
        }
        if Instant::now() >= deadline {
            warn!("{label} thread did not stop within {timeout:?}");
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TestPatternGrabber;
    use crate::settings::QualityPreset;

    fn small_settings() -> ShareSettings {
        let mut s = QualityPreset::Low.settings();
        s.target_fps = 30;
        s.target_w = 32;
        s.target_h = 32;
        // JPEG-only keeps the test independent of H.264 availability
        s.adaptive = false;
        s
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn end_to_end_frames_reach_transport() {
        let orchestrator = StreamOrchestrator::new();
        let (video_tx, mut video_rx) = mpsc::channel(4);

        let mut pipeline = SharePipeline::start(
            Box::new(TestPatternGrabber::new(32, 32)),
            small_settings(),
            orchestrator,
            video_tx,
            None,
        )
        .unwrap();

        let mut seqs = Vec::new();
        for _ in 0..5 {
            let frame = tokio::time::timeout(Duration::from_secs(5), video_rx.recv())
                .await
                .expect("pipeline produced no frame")
                .expect("channel closed");
            assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
            seqs.push(frame.seq);
        }
        // Strictly monotone; gaps only from intentional drops
        for pair in seqs.windows(2) {
            assert!(pair[1] > pair[0]);
        }

        pipeline.stop().await;
        assert!(!pipeline.is_active());
        assert_eq!(pipeline.raw_queue.len(), 0);
        assert_eq!(pipeline.encoded_queue.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_twice_is_a_noop() {
        let orchestrator = StreamOrchestrator::new();
        let (video_tx, _video_rx) = mpsc::channel(4);

        let mut pipeline = SharePipeline::start(
            Box::new(TestPatternGrabber::new(16, 16)),
            small_settings(),
            orchestrator,
            video_tx,
            None,
        )
        .unwrap();

        pipeline.stop().await;
        pipeline.stop().await; // second stop must not hang or panic
        assert!(!pipeline.is_active());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restart_uses_fresh_session_state() {
        let orchestrator = StreamOrchestrator::new();

        let (tx_a, mut rx_a) = mpsc::channel(4);
        let mut a = SharePipeline::start(
            Box::new(TestPatternGrabber::new(16, 16)),
            small_settings(),
            orchestrator.clone(),
            tx_a,
            None,
        )
        .unwrap();
        // Let session a do some work, then tear it down
        let _ = tokio::time::timeout(Duration::from_secs(5), rx_a.recv()).await;
        a.stop().await;

        let (tx_b, mut rx_b) = mpsc::channel(4);
        let b = SharePipeline::start(
            Box::new(TestPatternGrabber::new(16, 16)),
            small_settings(),
            orchestrator,
            tx_b,
            None,
        )
        .unwrap();

        // Session b starts its sequence numbering and stats from zero
        let frame = tokio::time::timeout(Duration::from_secs(5), rx_b.recv())
            .await
            .expect("second session produced no frame")
            .expect("channel closed");
        assert_eq!(frame.seq, 0);
        assert!(b.stats().frames_sent() >= 1);

        let mut b = b;
        b.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_settings_rejected_before_spawning() {
        let orchestrator = StreamOrchestrator::new();
        let (video_tx, _video_rx) = mpsc::channel(4);
        let mut s = small_settings();
        s.target_fps = 0;

        let result = SharePipeline::start(
            Box::new(TestPatternGrabber::new(16, 16)),
            s,
            orchestrator,
            video_tx,
            None,
        );
        assert!(result.is_err());
    }
}

