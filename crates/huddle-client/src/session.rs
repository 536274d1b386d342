use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use huddle_audio::playback::{start_playback, PlaybackStream};
use huddle_protocol::messages::{ClientMessage, ServerMessage};
use huddle_protocol::types::{ChannelId, ConnId, UserId, VoiceUser};
use huddle_stream::stats::StatsSnapshot;
use huddle_stream::viewer::ViewerEvent;
use huddle_stream::{
    DisplayGrabber, EncodedFrame, PixelBuffer, RemoteViewer, ShareSettings, SharePipeline,
    StreamOrchestrator,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::events::{ClientEvent, EventMailbox};
use crate::roster::Roster;
use crate::transport::{Transport, TransportEvent};
use crate::try_best_effort;
use crate::voice::{VoiceReceiveEngine, VoiceSendEngine, VoiceSendOptions};

/// Depth of the pipeline → forwarder frame channel. Small, so transport
/// slowness surfaces as measurable send latency instead of buffering.
const VIDEO_CHANNEL_DEPTH: usize = 2;

/// Teardown budget for the frame forwarder task.
const FORWARDER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct VoiceClientConfig {
    pub voice: VoiceSendOptions,
    pub output_device: Option<String>,
    pub master_volume: f32,
}

impl Default for VoiceClientConfig {
    fn default() -> Self {
        Self {
            voice: VoiceSendOptions::default(),
            output_device: None,
            master_volume: 1.0,
        }
    }
}

/// Identity cached for reconnect re-join.
#[derive(Debug, Clone)]
struct CachedIdentity {
    channel_id: ChannelId,
    user_id: UserId,
    username: String,
    avatar: String,
}

/// Audio resources held while in a voice channel.
struct AudioSession {
    send: VoiceSendEngine,
    receive: Arc<VoiceReceiveEngine>,
    _playback: PlaybackStream,
}

/// Resources held while screen sharing.
struct ShareSession {
    pipeline: SharePipeline,
    forwarder: tokio::task::JoinHandle<()>,
}

struct Inner {
    transport: Transport,
    orchestrator: Arc<StreamOrchestrator>,
    mailbox: EventMailbox,
    roster: Roster,
    config: VoiceClientConfig,
    in_channel: AtomicBool,
    sharing: AtomicBool,
    cached_identity: Mutex<Option<CachedIdentity>>,
    audio: Mutex<Option<AudioSession>>,
    share: tokio::sync::Mutex<Option<ShareSession>>,
    viewer: Mutex<RemoteViewer>,
}

/// The voice/screen-share session coordinator.
///
/// Owns the transport handle, the roster, the audio engines, the share
/// pipeline and the remote viewer, and drives them from the transport
/// event loop. Every teardown path is catch-and-log: `leave`, `stop_sharing`
/// and `disconnect` always run to completion.
pub struct VoiceClient {
    inner: Arc<Inner>,
    event_loop: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl VoiceClient {
    /// Wire up a client over an established transport.
    ///
    /// All inbound handlers are installed (the event loop is running)
    /// before this returns — start the transport's read side afterwards.
    /// Returns the client and the UI event mailbox receiver.
    pub fn connect(
        transport: Transport,
        inbound: mpsc::Receiver<TransportEvent>,
        config: VoiceClientConfig,
    ) -> Result<(Arc<VoiceClient>, mpsc::Receiver<ClientEvent>)> {
        let (mailbox, events_rx) = EventMailbox::new();
        let (viewer_tx, viewer_rx) = mpsc::channel(64);

        let viewer = RemoteViewer::start(viewer_tx).context("failed to start remote viewer")?;

        let inner = Arc::new(Inner {
            transport,
            orchestrator: StreamOrchestrator::new(),
            mailbox: mailbox.clone(),
            roster: Roster::new(),
            config,
            in_channel: AtomicBool::new(false),
            sharing: AtomicBool::new(false),
            cached_identity: Mutex::new(None),
            audio: Mutex::new(None),
            share: tokio::sync::Mutex::new(None),
            viewer: Mutex::new(viewer),
        });

        // Viewer events fan into the UI mailbox
        tokio::spawn(forward_viewer_events(viewer_rx, mailbox));

        let event_loop = tokio::spawn(run_event_loop(inner.clone(), inbound));

        Ok((
            Arc::new(VoiceClient {
                inner,
                event_loop: Mutex::new(Some(event_loop)),
            }),
            events_rx,
        ))
    }

    /// Join a voice channel, caching the identity for reconnect re-join
    /// and starting the audio engines. Audio device failure is logged and
    /// reported, not fatal — it is retried on the next join.
    pub async fn join_voice_channel(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        username: &str,
        avatar: &str,
    ) -> Result<()> {
        {
            let mut cached = lock(&self.inner.cached_identity);
            *cached = Some(CachedIdentity {
                channel_id,
                user_id,
                username: username.to_string(),
                avatar: avatar.to_string(),
            });
        }

        self.inner
            .transport
            .invoke(ClientMessage::JoinVoiceChannel {
                channel_id,
                user_id,
                username: username.to_string(),
                avatar: avatar.to_string(),
            })
            .await
            .context("failed to join voice channel")?;

        self.inner.in_channel.store(true, Ordering::Relaxed);
        start_audio(&self.inner);
        Ok(())
    }

    /// Leave the current voice channel. Ordering is guaranteed: share
    /// stops first, then audio, then a best-effort server notify, then the
    /// roster clears. Never fails.
    pub async fn leave_voice_channel(&self) {
        self.stop_sharing().await;
        stop_audio(&self.inner);
        try_best_effort(
            "leave notify",
            self.inner
                .transport
                .invoke_nonblocking(ClientMessage::LeaveVoiceChannel),
        );
        self.inner.roster.clear();
        self.inner.in_channel.store(false, Ordering::Relaxed);
        *lock(&self.inner.cached_identity) = None;
        info!("left voice channel");
    }

    /// Start sharing a display. An already-running share session is torn
    /// down first, so starting twice leaves no stale resources.
    pub async fn start_sharing(
        &self,
        grabber: Box<dyn DisplayGrabber>,
        settings: ShareSettings,
    ) -> Result<()> {
        settings.validate()?;

        let mut share = self.inner.share.lock().await;
        if let Some(session) = share.take() {
            warn!("share already active — restarting with new settings");
            stop_share_session(&self.inner, session).await;
        }

        let (video_tx, video_rx) = mpsc::channel::<EncodedFrame>(VIDEO_CHANNEL_DEPTH);
        let forwarder = tokio::spawn(forward_frames(self.inner.transport.clone(), video_rx));

        self.inner
            .transport
            .invoke(ClientMessage::StartScreenShare)
            .await
            .context("failed to announce screen share")?;

        let pipeline = SharePipeline::start(
            grabber,
            settings,
            self.inner.orchestrator.clone(),
            video_tx,
            None,
        );

        match pipeline {
            Ok(pipeline) => {
                *share = Some(ShareSession {
                    pipeline,
                    forwarder,
                });
                self.inner.sharing.store(true, Ordering::Relaxed);
                info!("screen share started");
                Ok(())
            }
            Err(e) => {
                forwarder.abort();
                try_best_effort(
                    "share rollback notify",
                    self.inner
                        .transport
                        .invoke_nonblocking(ClientMessage::StopScreenShare),
                );
                Err(e)
            }
        }
    }

    /// Stop the share session. Idempotent; a second call is a no-op.
    pub async fn stop_sharing(&self) {
        let mut share = self.inner.share.lock().await;
        let Some(session) = share.take() else {
            self.inner.sharing.store(false, Ordering::Relaxed);
            return;
        };
        self.inner.sharing.store(false, Ordering::Relaxed);
        stop_share_session(&self.inner, session).await;
        info!("screen share stopped");
    }

    /// Full teardown: share, audio, transport. Catch-and-log throughout.
    pub async fn disconnect(&self) {
        self.stop_sharing().await;
        stop_audio(&self.inner);
        self.inner.roster.clear();
        self.inner.in_channel.store(false, Ordering::Relaxed);
        *lock(&self.inner.cached_identity) = None;
        lock(&self.inner.viewer).stop();
        if let Some(handle) = lock(&self.event_loop).take() {
            handle.abort();
        }
        self.inner.mailbox.post(ClientEvent::ConnectionStateChanged {
            connected: false,
            reason: "disconnected".into(),
        });
        info!("client disconnected");
    }

    pub fn is_in_voice_channel(&self) -> bool {
        self.inner.in_channel.load(Ordering::Relaxed)
    }

    pub fn is_sharing(&self) -> bool {
        self.inner.sharing.load(Ordering::Relaxed)
    }

    pub fn roster_snapshot(&self) -> Vec<VoiceUser> {
        self.inner.roster.snapshot()
    }

    /// Stats of the active share session, if any.
    pub async fn share_stats(&self) -> Option<StatsSnapshot> {
        let share = self.inner.share.lock().await;
        share.as_ref().map(|s| s.pipeline.stats().snapshot())
    }

    /// Latest displayed frame from a remote sharer.
    pub fn latest_remote_frame(&self, sender_id: ConnId) -> Option<Arc<PixelBuffer>> {
        lock(&self.inner.viewer).latest_frame(sender_id)
    }

    // ── Voice controls ───────────────────────────────────────────────────

    pub fn set_ptt_pressed(&self, pressed: bool) {
        if let Some(audio) = &*lock(&self.inner.audio) {
            audio.send.set_ptt_pressed(pressed);
        }
    }

    pub fn set_muted(&self, muted: bool) {
        if let Some(audio) = &*lock(&self.inner.audio) {
            audio.send.set_muted(muted);
        }
    }

    pub fn set_deafened(&self, deafened: bool) {
        if let Some(audio) = &*lock(&self.inner.audio) {
            audio.receive.set_deafened(deafened);
        }
    }

    pub fn set_user_volume(&self, conn_id: ConnId, volume: f32) {
        if let Some(audio) = &*lock(&self.inner.audio) {
            audio.receive.set_user_gain(conn_id, volume);
        }
    }

    pub fn set_local_mute(&self, conn_id: ConnId, muted: bool) {
        if let Some(audio) = &*lock(&self.inner.audio) {
            audio.receive.set_local_mute(conn_id, muted);
        }
    }

    pub fn is_speaking(&self) -> bool {
        lock(&self.inner.audio)
            .as_ref()
            .map(|a| a.send.is_speaking())
            .unwrap_or(false)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Start playback + capture engines. Partial failures clean up what was
/// created; the client continues without audio and retries on next join.
fn start_audio(inner: &Arc<Inner>) {
    let mut audio = lock(&inner.audio);
    if audio.is_some() {
        return;
    }

    let (playback, producer) = match start_playback(inner.config.output_device.as_deref()) {
        Ok(pair) => pair,
        Err(e) => {
            warn!("audio playback unavailable: {e:#}");
            inner.mailbox.post(ClientEvent::VoiceError {
                message: format!("audio output unavailable: {e}"),
            });
            return;
        }
    };

    let receive = Arc::new(VoiceReceiveEngine::new(
        producer,
        inner.orchestrator.clone(),
        inner.config.master_volume,
    ));

    match VoiceSendEngine::start(
        inner.transport.clone(),
        inner.orchestrator.clone(),
        inner.mailbox.clone(),
        inner.config.voice.clone(),
    ) {
        Ok(send) => {
            *audio = Some(AudioSession {
                send,
                receive,
                _playback: playback,
            });
            info!("audio engines started");
        }
        Err(e) => {
            // Playback and receive state drop here — nothing half-open
            // survives the failure
            warn!("audio capture unavailable: {e:#}");
            inner.mailbox.post(ClientEvent::VoiceError {
                message: format!("audio input unavailable: {e}"),
            });
        }
    }
}

fn stop_audio(inner: &Arc<Inner>) {
    let mut audio = lock(&inner.audio);
    if let Some(mut session) = audio.take() {
        session.send.stop();
        info!("audio engines stopped");
    }
}

async fn stop_share_session(inner: &Arc<Inner>, mut session: ShareSession) {
    // Cancels once, joins capture/encode/send with hard timeouts, drains
    // the queues. Dropping the pipeline's video sender ends the forwarder.
    session.pipeline.stop().await;
    match tokio::time::timeout(FORWARDER_STOP_TIMEOUT, session.forwarder).await {
        Ok(_) => {}
        Err(_) => warn!("frame forwarder did not stop in time"),
    }
    try_best_effort(
        "stop share notify",
        inner
            .transport
            .invoke_nonblocking(ClientMessage::StopScreenShare),
    );
}

/// Pump encoded frames from the send stage onto the transport.
async fn forward_frames(transport: Transport, mut video_rx: mpsc::Receiver<EncodedFrame>) {
    while let Some(frame) = video_rx.recv().await {
        let msg = ClientMessage::SendScreenFrame {
            bytes: frame.data.to_vec(),
            width: frame.width,
            height: frame.height,
        };
        if transport.invoke(msg).await.is_err() {
            warn!("transport closed, frame forwarder exiting");
            break;
        }
    }
}

async fn forward_viewer_events(
    mut viewer_rx: mpsc::Receiver<ViewerEvent>,
    mailbox: EventMailbox,
) {
    while let Some(event) = viewer_rx.recv().await {
        match event {
            ViewerEvent::FrameReady { sender_id, .. } => {
                mailbox.post(ClientEvent::RemoteFrameReady { sender_id });
            }
        }
    }
}

async fn run_event_loop(inner: Arc<Inner>, mut inbound: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Message(msg) => handle_server_message(&inner, msg),
            TransportEvent::Reconnecting => {
                inner.mailbox.post(ClientEvent::ConnectionStateChanged {
                    connected: false,
                    reason: "reconnecting".into(),
                });
            }
            TransportEvent::Reconnected => {
                inner.mailbox.post(ClientEvent::ConnectionStateChanged {
                    connected: true,
                    reason: "reconnected".into(),
                });
                let identity = lock(&inner.cached_identity).clone();
                if let Some(id) = identity {
                    info!("re-joining voice channel {} after reconnect", id.channel_id);
                    let result = inner
                        .transport
                        .invoke(ClientMessage::JoinVoiceChannel {
                            channel_id: id.channel_id,
                            user_id: id.user_id,
                            username: id.username,
                            avatar: id.avatar,
                        })
                        .await;
                    try_best_effort("reconnect re-join", result);
                }
            }
            TransportEvent::Closed { reason } => {
                inner.roster.clear();
                inner.in_channel.store(false, Ordering::Relaxed);
                inner.mailbox.post(ClientEvent::ConnectionStateChanged {
                    connected: false,
                    reason,
                });
            }
        }
    }
}

fn handle_server_message(inner: &Arc<Inner>, msg: ServerMessage) {
    match msg {
        ServerMessage::UserJoinedVoice { user } => {
            inner.mailbox.post(ClientEvent::UserJoined { user: user.clone() });
            inner.roster.upsert(user);
        }
        ServerMessage::UserLeftVoice { conn_id } => {
            inner.roster.remove(conn_id);
            // The sender's Opus decoder is released when they leave
            if let Some(audio) = &*lock(&inner.audio) {
                audio.receive.on_sender_left(conn_id);
            }
            inner.mailbox.post(ClientEvent::UserLeft { conn_id });
        }
        ServerMessage::VoiceChannelUsers { users } => {
            inner.roster.replace_all(users);
            inner.mailbox.post(ClientEvent::RosterUpdated);
        }
        ServerMessage::VoiceStateUpdated { user } => {
            inner.roster.upsert(user);
            inner.mailbox.post(ClientEvent::RosterUpdated);
        }
        ServerMessage::UserSpeaking {
            conn_id,
            is_speaking,
            level,
        } => {
            inner.roster.set_speaking(conn_id, is_speaking, level as f32);
            inner.mailbox.post(ClientEvent::SpeakingChanged {
                conn_id,
                speaking: is_speaking,
                level: level as f32,
            });
        }
        ServerMessage::ReceiveAudio { sender_id, opus } => {
            if let Some(audio) = &*lock(&inner.audio) {
                audio.receive.on_audio(sender_id, &opus);
            }
        }
        ServerMessage::ReceiveScreenFrame {
            sender_id,
            bytes,
            width,
            height,
        } => {
            lock(&inner.viewer).on_frame(sender_id, bytes, width, height);
        }
        ServerMessage::ScreenShareStarted {
            conn_id, username, ..
        } => {
            inner.roster.set_sharing(conn_id, true);
            inner
                .mailbox
                .post(ClientEvent::ScreenShareStarted { conn_id, username });
        }
        ServerMessage::ScreenShareStopped { conn_id } => {
            lock(&inner.viewer).on_share_stopped(conn_id);
            inner.roster.set_sharing(conn_id, false);
            inner.mailbox.post(ClientEvent::ScreenShareStopped { conn_id });
        }
        ServerMessage::UserScreenShareChanged { conn_id, is_sharing } => {
            inner.roster.set_sharing(conn_id, is_sharing);
            inner.mailbox.post(ClientEvent::RosterUpdated);
        }
        ServerMessage::ViewerCountUpdated { count } => {
            if let Ok(share) = inner.share.try_lock() {
                if let Some(session) = share.as_ref() {
                    session.pipeline.stats().set_viewer_count(count);
                }
            }
            inner.mailbox.post(ClientEvent::ViewerCountUpdated { count });
        }
        ServerMessage::DisconnectedByAdmin { reason } => {
            inner.roster.clear();
            inner.in_channel.store(false, Ordering::Relaxed);
            inner
                .mailbox
                .post(ClientEvent::DisconnectedByAdmin { reason });
        }
        ServerMessage::MovedToChannel {
            channel_id,
            moved_by,
        } => {
            // Keep the cached identity pointing at where we actually are,
            // so a reconnect re-joins the right channel
            if let Some(identity) = lock(&inner.cached_identity).as_mut() {
                identity.channel_id = channel_id;
            }
            inner.mailbox.post(ClientEvent::MovedToChannel {
                channel_id,
                moved_by,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn user(conn_id: ConnId, name: &str) -> VoiceUser {
        VoiceUser {
            conn_id,
            user_id: conn_id as u32,
            username: name.into(),
            avatar: String::new(),
            channel_id: 1,
            muted: false,
            deafened: false,
            speaking: false,
            level: 0.0,
            is_sharing: false,
            is_video: false,
        }
    }

    struct Harness {
        client: Arc<VoiceClient>,
        outbound_rx: mpsc::Receiver<ClientMessage>,
        inbound_tx: mpsc::Sender<TransportEvent>,
        events_rx: mpsc::Receiver<ClientEvent>,
    }

    fn harness() -> Harness {
        let (transport, outbound_rx) = Transport::channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (client, events_rx) =
            VoiceClient::connect(transport, inbound_rx, VoiceClientConfig::default()).unwrap();
        Harness {
            client,
            outbound_rx,
            inbound_tx,
            events_rx,
        }
    }

    async fn next_outbound(rx: &mut mpsc::Receiver<ClientMessage>) -> Option<ClientMessage> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip messages the audio engines may interleave (speaking updates,
    /// audio packets) and return the next lifecycle message.
    async fn next_lifecycle(rx: &mut mpsc::Receiver<ClientMessage>) -> Option<ClientMessage> {
        loop {
            match next_outbound(rx).await? {
                ClientMessage::UpdateSpeakingState { .. } | ClientMessage::SendAudio { .. } => {
                    continue
                }
                other => return Some(other),
            }
        }
    }

    #[tokio::test]
    async fn reconnect_rejoins_cached_channel_exactly_once() {
        let mut h = harness();

        h.client
            .join_voice_channel(9, 42, "alice", "")
            .await
            .unwrap();
        match next_lifecycle(&mut h.outbound_rx).await {
            Some(ClientMessage::JoinVoiceChannel {
                channel_id,
                user_id,
                ..
            }) => {
                assert_eq!(channel_id, 9);
                assert_eq!(user_id, 42);
            }
            other => panic!("expected join, got {other:?}"),
        }

        h.inbound_tx.send(TransportEvent::Reconnected).await.unwrap();

        match next_lifecycle(&mut h.outbound_rx).await {
            Some(ClientMessage::JoinVoiceChannel {
                channel_id,
                user_id,
                username,
                ..
            }) => {
                assert_eq!(channel_id, 9);
                assert_eq!(user_id, 42);
                assert_eq!(username, "alice");
            }
            other => panic!("expected exactly one re-join, got {other:?}"),
        }

        // No further joins queued behind it
        h.client.stop_sharing().await; // produces nothing on the wire
        assert!(
            tokio::time::timeout(Duration::from_millis(200), async {
                next_lifecycle(&mut h.outbound_rx).await
            })
            .await
            .is_err(),
            "unexpected extra outbound message after reconnect"
        );

        h.client.disconnect().await;
    }

    #[tokio::test]
    async fn reconnect_without_cached_identity_stays_quiet() {
        let mut h = harness();
        h.inbound_tx.send(TransportEvent::Reconnected).await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(200), async {
                next_lifecycle(&mut h.outbound_rx).await
            })
            .await
            .is_err(),
            "re-join sent without ever joining"
        );
    }

    #[tokio::test]
    async fn closed_transport_clears_roster() {
        let mut h = harness();
        h.inbound_tx
            .send(TransportEvent::Message(ServerMessage::VoiceChannelUsers {
                users: vec![user(1, "alice"), user(2, "bob")],
            }))
            .await
            .unwrap();

        // Wait for the roster to fill
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while h.client.roster_snapshot().len() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "roster never filled");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        h.inbound_tx
            .send(TransportEvent::Closed {
                reason: "server gone".into(),
            })
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !h.client.roster_snapshot().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "roster never cleared");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!h.client.is_in_voice_channel());
    }

    #[tokio::test]
    async fn leave_notifies_and_clears() {
        let mut h = harness();
        h.client
            .join_voice_channel(3, 7, "carol", "")
            .await
            .unwrap();
        assert!(h.client.is_in_voice_channel());
        let _ = next_lifecycle(&mut h.outbound_rx).await; // the join

        h.client.leave_voice_channel().await;
        assert!(!h.client.is_in_voice_channel());
        assert!(h.client.roster_snapshot().is_empty());

        match next_lifecycle(&mut h.outbound_rx).await {
            Some(ClientMessage::LeaveVoiceChannel) => {}
            other => panic!("expected leave notify, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_sharing_without_share_is_noop() {
        let h = harness();
        h.client.stop_sharing().await;
        h.client.stop_sharing().await;
        assert!(!h.client.is_sharing());
    }

    #[tokio::test]
    async fn moved_to_channel_updates_rejoin_target() {
        let mut h = harness();
        h.client.join_voice_channel(1, 5, "dave", "").await.unwrap();
        let _ = next_lifecycle(&mut h.outbound_rx).await; // the join

        h.inbound_tx
            .send(TransportEvent::Message(ServerMessage::MovedToChannel {
                channel_id: 4,
                moved_by: "mod".into(),
            }))
            .await
            .unwrap();
        // Allow the event loop to process the move
        tokio::time::sleep(Duration::from_millis(50)).await;

        h.inbound_tx.send(TransportEvent::Reconnected).await.unwrap();
        match next_lifecycle(&mut h.outbound_rx).await {
            Some(ClientMessage::JoinVoiceChannel { channel_id, .. }) => {
                assert_eq!(channel_id, 4, "re-join should target the moved-to channel");
            }
            other => panic!("expected re-join, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn screen_share_stopped_releases_viewer_state() {
        let mut h = harness();
        h.inbound_tx
            .send(TransportEvent::Message(ServerMessage::VoiceChannelUsers {
                users: vec![user(8, "erin")],
            }))
            .await
            .unwrap();
        h.inbound_tx
            .send(TransportEvent::Message(ServerMessage::ScreenShareStarted {
                conn_id: 8,
                username: "erin".into(),
                channel_id: 1,
            }))
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if h.client
                .roster_snapshot()
                .iter()
                .any(|u| u.conn_id == 8 && u.is_sharing)
            {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "share flag never set");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        h.inbound_tx
            .send(TransportEvent::Message(ServerMessage::ScreenShareStopped {
                conn_id: 8,
            }))
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let cleared = h
                .client
                .roster_snapshot()
                .iter()
                .any(|u| u.conn_id == 8 && !u.is_sharing);
            if cleared && h.client.latest_remote_frame(8).is_none() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "share state never cleared");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Drain events so the mailbox assertions in other tests stay valid
        while h.events_rx.try_recv().is_ok() {}
    }
}
