use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use huddle_audio::capture::{start_capture, CaptureStream};
use huddle_audio::decoder::OpusDecoder;
use huddle_audio::denoise::Denoiser;
use huddle_audio::encoder::OpusEncoder;
use huddle_audio::gain;
use huddle_audio::vad::VoiceActivityDetector;
use huddle_audio::OPUS_FRAME_SIZE;
use huddle_protocol::messages::ClientMessage;
use huddle_protocol::types::ConnId;
use huddle_stream::priority;
use huddle_stream::StreamOrchestrator;
use ringbuf::traits::{Consumer, Producer};
use ringbuf::{HeapCons, HeapProd};
use tracing::{debug, info, warn};

use crate::events::{ClientEvent, EventMailbox};
use crate::transport::Transport;

/// Voice activation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VoiceMode {
    PushToTalk = 0,
    OpenMic = 1,
}

impl VoiceMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::OpenMic,
            _ => Self::PushToTalk,
        }
    }
}

/// Whether the speaking gate is open for this frame.
pub(crate) fn decide_speaking(
    mode: VoiceMode,
    ptt_pressed: bool,
    muted: bool,
    voice_detected: bool,
) -> bool {
    match mode {
        VoiceMode::PushToTalk => ptt_pressed && !muted && voice_detected,
        VoiceMode::OpenMic => !muted && voice_detected,
    }
}

/// Frames queued between the frame builder and the audio send thread.
/// 50 × 20 ms ≈ one second of speech.
const VOICE_QUEUE_FRAMES: usize = 50;

/// While speaking, refresh the server's level at this cadence.
const SPEAKING_REFRESH: Duration = Duration::from_millis(500);

/// Keep the gate open this long after the level drops below threshold.
const VAD_HOLD_MS: u32 = 300;

const FRAME_DURATION_MS: u32 = 20;

/// Idle sleep when the capture ring has nothing for us yet.
const RING_IDLE_SLEEP: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct VoiceSendOptions {
    pub device: Option<String>,
    pub mode: VoiceMode,
    /// Normalized VAD gate level (0.0–1.0).
    pub vad_threshold: f32,
    /// Fixed mic boost applied to outgoing frames.
    pub input_gain: f32,
    pub noise_suppression: bool,
}

impl Default for VoiceSendOptions {
    fn default() -> Self {
        Self {
            device: None,
            mode: VoiceMode::PushToTalk,
            vad_threshold: 0.02,
            input_gain: 1.0,
            noise_suppression: true,
        }
    }
}

/// Microphone → VAD/PTT → gain → Opus → transport.
///
/// Two threads own the path: the frame builder drains the capture ring,
/// assembles 20 ms frames, runs noise suppression and the speaking gate,
/// and queues gated frames; the send thread (maximum priority) encodes and
/// fires each packet at the transport without ever blocking — a congested
/// wire drops packets, it never stalls audio.
pub struct VoiceSendEngine {
    active: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    ptt_pressed: Arc<AtomicBool>,
    mode: Arc<AtomicU8>,
    speaking: Arc<AtomicBool>,
    /// Current input level × 1000 (fixed point).
    level_milli: Arc<AtomicU32>,
    noise_suppression: Arc<AtomicBool>,
    _capture: CaptureStream,
    frame_thread: Option<JoinHandle<()>>,
    send_thread: Option<JoinHandle<()>>,
}

impl VoiceSendEngine {
    pub fn start(
        transport: Transport,
        orchestrator: Arc<StreamOrchestrator>,
        mailbox: EventMailbox,
        opts: VoiceSendOptions,
    ) -> Result<Self> {
        let (capture, ring) =
            start_capture(opts.device.as_deref()).context("failed to open capture device")?;
        let encoder = OpusEncoder::new().context("failed to create Opus encoder")?;

        let active = Arc::new(AtomicBool::new(true));
        let muted = Arc::new(AtomicBool::new(false));
        let ptt_pressed = Arc::new(AtomicBool::new(false));
        let mode = Arc::new(AtomicU8::new(opts.mode as u8));
        let speaking = Arc::new(AtomicBool::new(false));
        let level_milli = Arc::new(AtomicU32::new(0));
        let noise_suppression = Arc::new(AtomicBool::new(opts.noise_suppression));

        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<Vec<i16>>(VOICE_QUEUE_FRAMES);

        // Sender goes up first: if the frame builder fails to spawn, its
        // context (and with it the only frame sender) is dropped, which
        // ends the sender's receive loop so the join below cannot hang.
        let send_thread = spawn_audio_sender(encoder, frame_rx, transport.clone(), orchestrator)?;

        let frame_thread = match spawn_frame_builder(FrameBuilderCtx {
            ring,
            frame_tx,
            transport,
            mailbox,
            active: active.clone(),
            muted: muted.clone(),
            ptt_pressed: ptt_pressed.clone(),
            mode: mode.clone(),
            speaking: speaking.clone(),
            level_milli: level_milli.clone(),
            noise_suppression: noise_suppression.clone(),
            vad_threshold: opts.vad_threshold,
            input_gain: opts.input_gain,
        }) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = send_thread.join();
                return Err(e);
            }
        };

        info!("voice send engine started");
        Ok(Self {
            active,
            muted,
            ptt_pressed,
            mode,
            speaking,
            level_milli,
            noise_suppression,
            _capture: capture,
            frame_thread: Some(frame_thread),
            send_thread: Some(send_thread),
        })
    }

    pub fn set_ptt_pressed(&self, pressed: bool) {
        self.ptt_pressed.store(pressed, Ordering::Relaxed);
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn set_mode(&self, mode: VoiceMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn set_noise_suppression(&self, enabled: bool) {
        self.noise_suppression.store(enabled, Ordering::Relaxed);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }

    /// Current input level, 0.0–1.0.
    pub fn current_level(&self) -> f32 {
        self.level_milli.load(Ordering::Relaxed) as f32 / 1000.0
    }

    pub fn stop(&mut self) {
        self.active.store(false, Ordering::Relaxed);
        if let Some(handle) = self.frame_thread.take() {
            let _ = handle.join();
        }
        // The sender exits once the frame channel disconnects (the frame
        // builder owned the only sender)
        if let Some(handle) = self.send_thread.take() {
            let _ = handle.join();
        }
        info!("voice send engine stopped");
    }
}

impl Drop for VoiceSendEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct FrameBuilderCtx {
    ring: HeapCons<i16>,
    frame_tx: crossbeam_channel::Sender<Vec<i16>>,
    transport: Transport,
    mailbox: EventMailbox,
    active: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    ptt_pressed: Arc<AtomicBool>,
    mode: Arc<AtomicU8>,
    speaking: Arc<AtomicBool>,
    level_milli: Arc<AtomicU32>,
    noise_suppression: Arc<AtomicBool>,
    vad_threshold: f32,
    input_gain: f32,
}

fn spawn_frame_builder(mut ctx: FrameBuilderCtx) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("audio-frames".into())
        .spawn(move || {
            priority::raise_thread_priority(priority::AUDIO_FRAME_PRIORITY, "audio-frames");

            let mut vad =
                VoiceActivityDetector::new(ctx.vad_threshold, VAD_HOLD_MS, FRAME_DURATION_MS);
            let mut denoiser = Denoiser::new();
            let mut pending: Vec<i16> = Vec::with_capacity(OPUS_FRAME_SIZE * 2);
            let mut scratch = [0i16; 512];
            let mut speaking = false;
            let mut last_refresh = Instant::now();

            while ctx.active.load(Ordering::Relaxed) {
                let n = ctx.ring.pop_slice(&mut scratch);
                if n == 0 {
                    std::thread::sleep(RING_IDLE_SLEEP);
                    continue;
                }
                pending.extend_from_slice(&scratch[..n]);

                while pending.len() >= OPUS_FRAME_SIZE {
                    let mut frame: Vec<i16> = pending.drain(..OPUS_FRAME_SIZE).collect();

                    if ctx.noise_suppression.load(Ordering::Relaxed) {
                        denoiser.process(&mut frame);
                    }

                    let voice = vad.process(&frame);
                    let level = vad.current_level();
                    ctx.level_milli
                        .store((level * 1000.0) as u32, Ordering::Relaxed);

                    let mode = VoiceMode::from_u8(ctx.mode.load(Ordering::Relaxed));
                    let speak_now = decide_speaking(
                        mode,
                        ctx.ptt_pressed.load(Ordering::Relaxed),
                        ctx.muted.load(Ordering::Relaxed),
                        voice,
                    );

                    if speak_now != speaking {
                        speaking = speak_now;
                        ctx.speaking.store(speak_now, Ordering::Relaxed);
                        ctx.mailbox.post(ClientEvent::LocalSpeakingChanged {
                            speaking: speak_now,
                            level,
                        });
                        let _ = ctx.transport.invoke_nonblocking(
                            ClientMessage::UpdateSpeakingState {
                                is_speaking: speak_now,
                                level: level as f64,
                            },
                        );
                        last_refresh = Instant::now();
                    } else if speak_now && last_refresh.elapsed() >= SPEAKING_REFRESH {
                        let _ = ctx.transport.invoke_nonblocking(
                            ClientMessage::UpdateSpeakingState {
                                is_speaking: true,
                                level: level as f64,
                            },
                        );
                        last_refresh = Instant::now();
                    }

                    if speak_now {
                        gain::apply_gain(&mut frame, ctx.input_gain);
                        // Full queue (≈1 s of backlog) sheds the newest frame
                        let _ = ctx.frame_tx.try_send(frame);
                    }
                }
            }
        })
        .context("failed to spawn audio frame thread")
}

fn spawn_audio_sender(
    mut encoder: OpusEncoder,
    frame_rx: crossbeam_channel::Receiver<Vec<i16>>,
    transport: Transport,
    orchestrator: Arc<StreamOrchestrator>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("audio-send".into())
        .spawn(move || {
            priority::raise_thread_priority_max("audio-send");
            let mut warned_encode = false;

            // Ends when the frame builder drops its sender
            for frame in frame_rx.iter() {
                match encoder.encode(&frame) {
                    Ok(opus) => {
                        match transport.invoke_nonblocking(ClientMessage::SendAudio { opus }) {
                            Ok(()) => orchestrator.signal_audio_send(),
                            // Congested or closed wire loses the packet;
                            // this thread never waits on the network
                            Err(e) => debug!("audio packet dropped: {e}"),
                        }
                    }
                    Err(e) => {
                        if !warned_encode {
                            warn!("Opus encode failed: {e:#}");
                            warned_encode = true;
                        }
                    }
                }
            }
        })
        .context("failed to spawn audio send thread")
}

/// Per-user receive-side audio state.
struct UserAudio {
    gain: f32,
    locally_muted: bool,
}

impl Default for UserAudio {
    fn default() -> Self {
        Self {
            gain: 1.0,
            locally_muted: false,
        }
    }
}

/// Opus from remote senders → per-sender decoder → gain → playback ring.
///
/// Runs on the transport event loop; decoders are created on first audio
/// from a sender and dropped when the sender leaves the channel.
pub struct VoiceReceiveEngine {
    decoders: DashMap<ConnId, OpusDecoder>,
    user_audio: DashMap<ConnId, UserAudio>,
    deafened: AtomicBool,
    /// Master volume × 1000 (fixed point).
    master_gain_milli: AtomicU32,
    playback: Mutex<HeapProd<i16>>,
    orchestrator: Arc<StreamOrchestrator>,
    packets_discarded: AtomicU64,
    samples_overflowed: AtomicU64,
}

impl VoiceReceiveEngine {
    pub fn new(
        playback: HeapProd<i16>,
        orchestrator: Arc<StreamOrchestrator>,
        master_gain: f32,
    ) -> Self {
        Self {
            decoders: DashMap::new(),
            user_audio: DashMap::new(),
            deafened: AtomicBool::new(false),
            master_gain_milli: AtomicU32::new((master_gain * 1000.0) as u32),
            playback: Mutex::new(playback),
            orchestrator,
            packets_discarded: AtomicU64::new(0),
            samples_overflowed: AtomicU64::new(0),
        }
    }

    /// Handle one Opus packet from `sender_id`.
    pub fn on_audio(&self, sender_id: ConnId, opus: &[u8]) {
        if self.deafened.load(Ordering::Relaxed) {
            self.packets_discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if let Some(user) = self.user_audio.get(&sender_id) {
            if user.locally_muted {
                self.packets_discarded.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        self.orchestrator.signal_audio_receive();

        let mut buf = self.orchestrator.acquire_pcm();
        let decoded = {
            let mut decoder = match self.decoders.entry(sender_id) {
                Entry::Occupied(entry) => entry.into_ref(),
                Entry::Vacant(entry) => match OpusDecoder::new() {
                    Ok(dec) => entry.insert(dec),
                    Err(e) => {
                        warn!("failed to create Opus decoder for {sender_id}: {e:#}");
                        self.orchestrator.release_pcm(buf);
                        return;
                    }
                },
            };
            decoder.value_mut().decode_into(opus, &mut buf)
        };

        match decoded {
            Ok(_samples) => {
                let user_gain = self
                    .user_audio
                    .get(&sender_id)
                    .map(|u| u.gain)
                    .unwrap_or(1.0);
                let master = self.master_gain();
                gain::apply_combined_gain(&mut buf, user_gain, master);

                let mut producer = self
                    .playback
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let pushed = producer.push_slice(&buf);
                if pushed < buf.len() {
                    // Ring is full — overflow is discarded, playback keeps
                    // its bounded latency
                    self.samples_overflowed
                        .fetch_add((buf.len() - pushed) as u64, Ordering::Relaxed);
                }
            }
            Err(e) => {
                // Drop only this packet; the decoder stays usable
                debug!("Opus decode failed from {sender_id}: {e:#}");
                self.packets_discarded.fetch_add(1, Ordering::Relaxed);
            }
        }

        // Pooled buffer goes back regardless of the outcome
        self.orchestrator.release_pcm(buf);
    }

    /// Release the sender's decoder when they leave the channel.
    pub fn on_sender_left(&self, sender_id: ConnId) {
        self.decoders.remove(&sender_id);
        self.user_audio.remove(&sender_id);
    }

    pub fn set_deafened(&self, deafened: bool) {
        self.deafened.store(deafened, Ordering::Relaxed);
    }

    pub fn is_deafened(&self) -> bool {
        self.deafened.load(Ordering::Relaxed)
    }

    pub fn set_local_mute(&self, sender_id: ConnId, muted: bool) {
        self.user_audio.entry(sender_id).or_default().locally_muted = muted;
    }

    /// Per-user volume, 0.0 (silent) – 2.0 (boosted).
    pub fn set_user_gain(&self, sender_id: ConnId, gain: f32) {
        self.user_audio.entry(sender_id).or_default().gain = gain.clamp(0.0, 2.0);
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.master_gain_milli
            .store((gain.clamp(0.0, 2.0) * 1000.0) as u32, Ordering::Relaxed);
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain_milli.load(Ordering::Relaxed) as f32 / 1000.0
    }

    pub fn packets_discarded(&self) -> u64 {
        self.packets_discarded.load(Ordering::Relaxed)
    }

    pub fn decoder_count(&self) -> usize {
        self.decoders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_audio::encoder::OpusEncoder;
    use ringbuf::traits::Split;
    use ringbuf::HeapRb;

    #[test]
    fn speaking_decision_matrix() {
        use VoiceMode::*;
        // PTT requires key held, not muted, and voice
        assert!(decide_speaking(PushToTalk, true, false, true));
        assert!(!decide_speaking(PushToTalk, false, false, true));
        assert!(!decide_speaking(PushToTalk, true, true, true));
        assert!(!decide_speaking(PushToTalk, true, false, false));
        // Open mic ignores the key
        assert!(decide_speaking(OpenMic, false, false, true));
        assert!(!decide_speaking(OpenMic, false, true, true));
        assert!(!decide_speaking(OpenMic, false, false, false));
    }

    #[test]
    fn audio_handoff_never_blocks() {
        // The bounded frame queue is the only link between the realtime
        // path and the sender. With the consumer wedged, pushes past the
        // bound must fail fast instead of waiting.
        let (tx, rx) = crossbeam_channel::bounded::<Vec<i16>>(VOICE_QUEUE_FRAMES);
        for _ in 0..VOICE_QUEUE_FRAMES {
            tx.try_send(vec![0; OPUS_FRAME_SIZE]).unwrap();
        }

        let start = Instant::now();
        for _ in 0..100 {
            assert!(tx.try_send(vec![0; OPUS_FRAME_SIZE]).is_err());
        }
        assert!(
            start.elapsed() < Duration::from_millis(5),
            "handoff blocked the realtime path"
        );
        drop(rx);
    }

    fn receive_harness() -> (VoiceReceiveEngine, ringbuf::HeapCons<i16>) {
        let (producer, consumer) = HeapRb::<i16>::new(4800).split();
        let orchestrator = StreamOrchestrator::new();
        (
            VoiceReceiveEngine::new(producer, orchestrator, 1.0),
            consumer,
        )
    }

    fn opus_packet() -> Vec<u8> {
        let mut enc = OpusEncoder::new().unwrap();
        let tone: Vec<i16> = (0..OPUS_FRAME_SIZE)
            .map(|i| ((i as f32 * 0.03).sin() * 12000.0) as i16)
            .collect();
        enc.encode(&tone).unwrap()
    }

    #[test]
    fn decoded_audio_reaches_playback_ring() {
        let (engine, mut consumer) = receive_harness();
        engine.on_audio(7, &opus_packet());

        assert_eq!(engine.decoder_count(), 1);
        let mut out = vec![0i16; OPUS_FRAME_SIZE];
        let popped = consumer.pop_slice(&mut out);
        assert_eq!(popped, OPUS_FRAME_SIZE);
    }

    #[test]
    fn deafened_discards_without_decoding() {
        let (engine, mut consumer) = receive_harness();
        engine.set_deafened(true);
        engine.on_audio(7, &opus_packet());

        assert_eq!(engine.decoder_count(), 0, "no decoder for discarded audio");
        assert_eq!(engine.packets_discarded(), 1);
        let mut out = vec![0i16; 16];
        assert_eq!(consumer.pop_slice(&mut out), 0);
    }

    #[test]
    fn locally_muted_sender_is_discarded() {
        let (engine, mut consumer) = receive_harness();
        engine.set_local_mute(9, true);
        engine.on_audio(9, &opus_packet());
        assert_eq!(engine.packets_discarded(), 1);
        let mut out = vec![0i16; 16];
        assert_eq!(consumer.pop_slice(&mut out), 0);
    }

    #[test]
    fn zero_user_gain_silences_sender() {
        let (engine, mut consumer) = receive_harness();
        engine.set_user_gain(4, 0.0);
        engine.on_audio(4, &opus_packet());

        let mut out = vec![0i16; OPUS_FRAME_SIZE];
        let popped = consumer.pop_slice(&mut out);
        assert_eq!(popped, OPUS_FRAME_SIZE);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn malformed_packet_drops_only_itself() {
        let (engine, mut consumer) = receive_harness();
        engine.on_audio(3, &opus_packet());
        engine.on_audio(3, &[]); // invalid
        engine.on_audio(3, &opus_packet());

        assert_eq!(engine.packets_discarded(), 1);
        let mut out = vec![0i16; OPUS_FRAME_SIZE * 3];
        let popped = consumer.pop_slice(&mut out);
        assert_eq!(popped, OPUS_FRAME_SIZE * 2);
    }

    #[test]
    fn sender_leaving_releases_decoder() {
        let (engine, _consumer) = receive_harness();
        engine.on_audio(5, &opus_packet());
        assert_eq!(engine.decoder_count(), 1);
        engine.on_sender_left(5);
        assert_eq!(engine.decoder_count(), 0);
    }
}
