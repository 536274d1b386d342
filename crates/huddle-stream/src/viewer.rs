use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::DashMap;
use huddle_protocol::types::ConnId;
use huddle_protocol::FrameKind;
use huddle_video::h264::H264Decoder;
use huddle_video::jpeg::JpegCodec;
use huddle_video::{h264_available, PixelBuffer};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

/// Frames a sender must accumulate before playback begins.
pub const JITTER_PREBUFFER: usize = 5;
/// Hard cap on buffered frames per sender; oldest is evicted beyond this.
pub const JITTER_HARD_MAX: usize = 45;

/// Playback tick cadence (~120 Hz).
const TICK_INTERVAL: Duration = Duration::from_millis(8);

/// Pending-decode channel depth. Frames arriving while the decoder is this
/// far behind are dropped and counted.
const DECODE_QUEUE_DEPTH: usize = 60;

/// Per-sender FIFO of decoded frames.
///
/// Absorbs network jitter by holding frames until `prebuffer` have
/// accumulated, then releases one per playback tick. Once warmed it keeps
/// draining to empty rather than re-buffering mid-stream — resuming
/// immediately when frames arrive beats re-introducing latency. Memory is
/// bounded by `hard_max` frames.
pub struct JitterBuffer {
    frames: VecDeque<Arc<PixelBuffer>>,
    warmed: bool,
    prebuffer: usize,
    hard_max: usize,
    evicted: u64,
}

impl JitterBuffer {
    pub fn new(prebuffer: usize, hard_max: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(prebuffer),
            warmed: false,
            prebuffer,
            hard_max,
            evicted: 0,
        }
    }

    /// Enqueue a decoded frame, evicting the oldest at the hard cap.
    pub fn push(&mut self, frame: Arc<PixelBuffer>) {
        if self.frames.len() >= self.hard_max {
            self.frames.pop_front();
            self.evicted += 1;
        }
        self.frames.push_back(frame);
        if self.frames.len() >= self.prebuffer {
            self.warmed = true;
        }
    }

    /// Dequeue one frame for display. Yields nothing until the pre-buffer
    /// has filled once.
    pub fn pop(&mut self) -> Option<Arc<PixelBuffer>> {
        if !self.warmed {
            return None;
        }
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_warmed(&self) -> bool {
        self.warmed
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

/// Published when a remote frame becomes the sender's latest.
#[derive(Debug, Clone)]
pub enum ViewerEvent {
    FrameReady {
        sender_id: ConnId,
        frame: Arc<PixelBuffer>,
    },
}

struct SenderStream {
    jitter: JitterBuffer,
    /// Created on the first H.264 frame from this sender; `None` until
    /// then or when creation failed permanently.
    decoder: Option<H264Decoder>,
    decoder_failed: bool,
    frames_played: u64,
}

impl SenderStream {
    fn new() -> Self {
        Self {
            jitter: JitterBuffer::new(JITTER_PREBUFFER, JITTER_HARD_MAX),
            decoder: None,
            decoder_failed: false,
            frames_played: 0,
        }
    }
}

enum DecodeJob {
    Frame {
        sender_id: ConnId,
        bytes: Vec<u8>,
        kind: FrameKind,
    },
}

/// Receive side of screen sharing (one per connection).
///
/// Frames arrive from the transport handler, get decoded on a dedicated
/// worker thread (JPEG reuses one codec, H.264 keeps one decoder per
/// sender) and accumulate in per-sender jitter buffers. A single ~120 Hz
/// playback task releases one frame per warmed buffer per tick and parks
/// itself whenever every buffer is empty.
pub struct RemoteViewer {
    decode_tx: Option<crossbeam_channel::Sender<DecodeJob>>,
    streams: Arc<DashMap<ConnId, SenderStream>>,
    latest: Arc<DashMap<ConnId, Arc<PixelBuffer>>>,
    wake: Arc<Notify>,
    active: Arc<AtomicBool>,
    frames_received: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
    frames_played: Arc<AtomicU64>,
    decode_thread: Option<std::thread::JoinHandle<()>>,
    tick_task: Option<tokio::task::JoinHandle<()>>,
}

impl RemoteViewer {
    /// Spawn the decode worker and playback task. Must be called from a
    /// tokio runtime context. Events go to `events` (dropped when the
    /// consumer lags).
    pub fn start(events: mpsc::Sender<ViewerEvent>) -> Result<Self> {
        let (decode_tx, decode_rx) = crossbeam_channel::bounded(DECODE_QUEUE_DEPTH);
        let streams: Arc<DashMap<ConnId, SenderStream>> = Arc::new(DashMap::new());
        let latest: Arc<DashMap<ConnId, Arc<PixelBuffer>>> = Arc::new(DashMap::new());
        let wake = Arc::new(Notify::new());
        let active = Arc::new(AtomicBool::new(true));
        let frames_received = Arc::new(AtomicU64::new(0));
        let frames_dropped = Arc::new(AtomicU64::new(0));
        let frames_played = Arc::new(AtomicU64::new(0));

        let decode_thread = spawn_decode_worker(
            decode_rx,
            streams.clone(),
            wake.clone(),
            frames_received.clone(),
            frames_dropped.clone(),
        )?;

        let tick_task = spawn_playback_tick(
            streams.clone(),
            latest.clone(),
            wake.clone(),
            active.clone(),
            frames_played.clone(),
            events,
        );

        Ok(Self {
            decode_tx: Some(decode_tx),
            streams,
            latest,
            wake,
            active,
            frames_received,
            frames_dropped,
            frames_played,
            decode_thread: Some(decode_thread),
            tick_task: Some(tick_task),
        })
    }

    /// Handle an incoming screen frame from `sender_id`. Called by the
    /// transport event loop; never blocks.
    pub fn on_frame(&self, sender_id: ConnId, bytes: Vec<u8>, _width: u16, _height: u16) {
        let kind = match FrameKind::detect(&bytes) {
            Ok(kind) => kind,
            Err(e) => {
                // Unknown magic — drop and count, never forward
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                debug!("dropping unrecognized screen frame from {sender_id}: {e}");
                return;
            }
        };

        if kind == FrameKind::H264 && !h264_available() {
            // No decoder can exist for this frame; skip without
            // instantiating anything
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let job = DecodeJob::Frame {
            sender_id,
            bytes,
            kind,
        };
        if self
            .decode_tx
            .as_ref()
            .map(|tx| tx.try_send(job).is_err())
            .unwrap_or(true)
        {
            // Decoder is saturated; shedding here keeps the event loop live
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A sender stopped sharing: drop its pending frames, decoder and
    /// published frame.
    pub fn on_share_stopped(&self, sender_id: ConnId) {
        if self.streams.remove(&sender_id).is_some() {
            info!("screen share from {sender_id} ended, viewer state released");
        }
        self.latest.remove(&sender_id);
    }

    /// The most recently displayed frame for a sender.
    pub fn latest_frame(&self, sender_id: ConnId) -> Option<Arc<PixelBuffer>> {
        self.latest.get(&sender_id).map(|f| f.value().clone())
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    /// Stop the worker and playback task and drop all per-sender state.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::Relaxed);
        // Closing the channel ends the decode worker's iterator
        self.decode_tx = None;
        self.wake.notify_one();
        if let Some(handle) = self.decode_thread.take() {
            let _ = handle.join();
        }
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
        self.streams.clear();
        self.latest.clear();
    }
}

impl Drop for RemoteViewer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_decode_worker(
    decode_rx: crossbeam_channel::Receiver<DecodeJob>,
    streams: Arc<DashMap<ConnId, SenderStream>>,
    wake: Arc<Notify>,
    frames_received: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
) -> Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("screen-decode".into())
        .spawn(move || {
            let mut jpeg = match JpegCodec::new() {
                Ok(codec) => Some(codec),
                Err(e) => {
                    warn!("JPEG codec unavailable on viewer: {e:#}");
                    None
                }
            };

            for job in decode_rx.iter() {
                let DecodeJob::Frame {
                    sender_id,
                    bytes,
                    kind,
                } = job;

                let mut stream = streams.entry(sender_id).or_insert_with(SenderStream::new);

                let decoded: Option<PixelBuffer> = match kind {
                    FrameKind::Jpeg => match jpeg.as_mut() {
                        Some(codec) => match codec.decode(&bytes) {
                            Ok(frame) => Some(frame),
                            Err(e) => {
                                debug!("JPEG decode failed for {sender_id}: {e:#}");
                                None
                            }
                        },
                        None => None,
                    },
                    FrameKind::H264 => {
                        if stream.decoder.is_none() && !stream.decoder_failed {
                            match H264Decoder::new() {
                                Ok(dec) => stream.decoder = Some(dec),
                                Err(e) => {
                                    // Permanent for this sender; frames skip
                                    warn!("H.264 decoder creation failed for {sender_id}: {e:#}");
                                    stream.decoder_failed = true;
                                }
                            }
                        }
                        match stream.decoder.as_mut() {
                            Some(dec) => match dec.decode(&bytes) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    debug!("H.264 decode failed for {sender_id}: {e:#}");
                                    None
                                }
                            },
                            None => None,
                        }
                    }
                };

                match decoded {
                    Some(frame) => {
                        frames_received.fetch_add(1, Ordering::Relaxed);
                        stream.jitter.push(Arc::new(frame));
                        drop(stream);
                        wake.notify_one();
                    }
                    None => {
                        frames_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        })
        .context("failed to spawn decode thread")
}

fn spawn_playback_tick(
    streams: Arc<DashMap<ConnId, SenderStream>>,
    latest: Arc<DashMap<ConnId, Arc<PixelBuffer>>>,
    wake: Arc<Notify>,
    active: Arc<AtomicBool>,
    frames_played: Arc<AtomicU64>,
    events: mpsc::Sender<ViewerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while active.load(Ordering::Relaxed) {
            // Park until a decoded frame arrives; the periodic wakeup is
            // only there to observe `active` going false.
            let any_buffered = streams.iter().any(|s| !s.jitter.is_empty());
            if !any_buffered {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                }
                continue;
            }

            // Timer is running: release one frame per warmed buffer per tick
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !active.load(Ordering::Relaxed) {
                    return;
                }

                let mut any_remaining = false;
                for mut entry in streams.iter_mut() {
                    let sender_id = *entry.key();
                    if let Some(frame) = entry.jitter.pop() {
                        entry.frames_played += 1;
                        frames_played.fetch_add(1, Ordering::Relaxed);
                        latest.insert(sender_id, frame.clone());
                        let _ = events.try_send(ViewerEvent::FrameReady { sender_id, frame });
                    }
                    if !entry.jitter.is_empty() {
                        any_remaining = true;
                    }
                }

                if !any_remaining {
                    // All buffers drained — stop the timer and park
                    break;
                }
            }
        }
    })
}
