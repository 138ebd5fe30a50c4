//! Call negotiation engine
//!
//! [`NegotiationEngine`] is the collaborator-facing handle; a single
//! actor task owns the live [`CallSession`](crate::session::CallSession)
//! and processes commands, peer-connection events, and channel events
//! strictly in arrival order. Serializing everything through one task is
//! what makes the negotiation flags race-free without locks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use paircall_signaling::methods::hub;
use paircall_signaling::{EventHandler, EventKind, ServerEvent, SignalingChannel};

use crate::config::CallConfig;
use crate::media::{LocalMediaSink, MediaKind, MediaSource, RemoteMediaSink};
use crate::peer::{PeerEvent, PeerEventSender, PeerFactory};
use crate::session::{CallSession, SignalMsg};
use crate::stats::{PeerSlot, StatsCollector, StatsSink};
use crate::{Error, Result};

/// Handle to the call engine actor
pub struct NegotiationEngine {
    messages: mpsc::UnboundedSender<EngineMsg>,
}

enum EngineMsg {
    Command(EngineCommand),
    Peer(PeerEvent),
    Signal(SignalMsg),
}

enum EngineCommand {
    Initialize {
        room_id: String,
        identity: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
    SetLocalSink(Option<LocalMediaSink>),
    SetRemoteSink(Option<RemoteMediaSink>),
    ToggleMedia {
        kind: MediaKind,
        reply: oneshot::Sender<Result<bool>>,
    },
    ToggleCamera {
        reply: oneshot::Sender<Result<()>>,
    },
    StartStats {
        sink: StatsSink,
        interval: Duration,
    },
    StopStats,
}

impl NegotiationEngine {
    /// Create an engine over an explicit peer backend and media source
    pub fn new(
        channel: Arc<SignalingChannel>,
        peers: Arc<dyn PeerFactory>,
        media_source: Arc<dyn MediaSource>,
        config: CallConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (messages, inbox) = mpsc::unbounded_channel();
        let state = EngineState {
            channel,
            peers,
            media_source,
            config,
            messages: messages.clone(),
            channel_handlers: channel_handlers(&messages),
            handlers_registered: false,
            local_sink: None,
            remote_sink: None,
            session: None,
            stats: None,
            stats_peer: Arc::new(RwLock::new(None)),
        };
        tokio::spawn(run_engine(state, inbox));

        Ok(Self { messages })
    }

    /// Create an engine over the `webrtc`-crate backend
    pub fn with_webrtc_backend(
        channel: Arc<SignalingChannel>,
        media_source: Arc<dyn MediaSource>,
        config: CallConfig,
    ) -> Result<Self> {
        let factory = Arc::new(crate::rtc::RtcPeerFactory::new()?);
        Self::new(channel, factory, media_source, config)
    }

    /// Join `room_id` as `identity`, capture local media and become ready
    /// to negotiate. Fails with [`Error::SessionActive`] while a session
    /// is live.
    pub async fn initialize_connection(
        &self,
        room_id: impl Into<String>,
        identity: impl Into<String>,
    ) -> Result<()> {
        let room_id = room_id.into();
        let identity = identity.into();
        self.request(move |reply| EngineCommand::Initialize {
            room_id,
            identity,
            reply,
        })
        .await
    }

    /// Leave the room and tear the session down
    pub async fn close_connection(&self) -> Result<()> {
        self.request(|reply| EngineCommand::Close { reply }).await
    }

    /// Install (or clear) the callback receiving the local media handle
    pub fn set_local_media_sink(&self, sink: Option<LocalMediaSink>) {
        let _ = self
            .messages
            .send(EngineMsg::Command(EngineCommand::SetLocalSink(sink)));
    }

    /// Install (or clear) the callback receiving the remote media handle
    pub fn set_remote_media_sink(&self, sink: Option<RemoteMediaSink>) {
        let _ = self
            .messages
            .send(EngineMsg::Command(EngineCommand::SetRemoteSink(sink)));
    }

    /// Flip the local audio track; returns the new enabled state
    pub async fn toggle_audio(&self) -> Result<bool> {
        self.request(|reply| EngineCommand::ToggleMedia {
            kind: MediaKind::Audio,
            reply,
        })
        .await
    }

    /// Flip the local video track; returns the new enabled state
    pub async fn toggle_video(&self) -> Result<bool> {
        self.request(|reply| EngineCommand::ToggleMedia {
            kind: MediaKind::Video,
            reply,
        })
        .await
    }

    /// Switch between front and back cameras
    pub async fn toggle_camera_facing(&self) -> Result<()> {
        self.request(|reply| EngineCommand::ToggleCamera { reply })
            .await
    }

    /// Start delivering quality reports to `sink` every `interval`.
    /// Logs and returns on double-start or without a live session.
    pub fn start_stats_collection(&self, sink: StatsSink, interval: Duration) {
        let _ = self
            .messages
            .send(EngineMsg::Command(EngineCommand::StartStats {
                sink,
                interval,
            }));
    }

    /// Stop stats collection; idempotent
    pub fn stop_stats_collection(&self) {
        let _ = self
            .messages
            .send(EngineMsg::Command(EngineCommand::StopStats));
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> EngineCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.messages
            .send(EngineMsg::Command(make(tx)))
            .map_err(|_| Error::EngineClosed)?;
        rx.await.map_err(|_| Error::EngineClosed)?
    }
}

/// Stable handler set subscribed on the channel; one `Arc` per event so
/// deregistration matches registration by identity.
fn channel_handlers(
    messages: &mpsc::UnboundedSender<EngineMsg>,
) -> Vec<(EventKind, EventHandler)> {
    [
        EventKind::ReceiveMessage,
        EventKind::ReceiveIceCandidate,
        EventKind::UserLeft,
    ]
    .into_iter()
    .map(|kind| {
        let messages = messages.clone();
        let handler: EventHandler = Arc::new(move |event: &ServerEvent| {
            if let Some(signal) = SignalMsg::from_event(event) {
                let _ = messages.send(EngineMsg::Signal(signal));
            }
        });
        (kind, handler)
    })
    .collect()
}

struct EngineState {
    channel: Arc<SignalingChannel>,
    peers: Arc<dyn PeerFactory>,
    media_source: Arc<dyn MediaSource>,
    config: CallConfig,
    messages: mpsc::UnboundedSender<EngineMsg>,
    channel_handlers: Vec<(EventKind, EventHandler)>,
    handlers_registered: bool,
    local_sink: Option<LocalMediaSink>,
    remote_sink: Option<RemoteMediaSink>,
    session: Option<CallSession>,
    stats: Option<StatsCollector>,
    /// Peer the stats collector polls; repointed on session rebuilds
    stats_peer: PeerSlot,
}

async fn run_engine(mut state: EngineState, mut inbox: mpsc::UnboundedReceiver<EngineMsg>) {
    while let Some(message) = inbox.recv().await {
        match message {
            EngineMsg::Command(command) => state.handle_command(command).await,
            EngineMsg::Peer(event) => state.handle_peer_event(event).await,
            EngineMsg::Signal(signal) => state.handle_signal(signal).await,
        }
    }
    debug!("webrtc: engine task terminated");
}

impl EngineState {
    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Initialize {
                room_id,
                identity,
                reply,
            } => {
                let _ = reply.send(self.initialize(room_id, identity).await);
            }
            EngineCommand::Close { reply } => {
                let _ = reply.send(self.close().await);
            }
            EngineCommand::SetLocalSink(sink) => self.local_sink = sink,
            EngineCommand::SetRemoteSink(sink) => self.remote_sink = sink,
            EngineCommand::ToggleMedia { kind, reply } => {
                let _ = reply.send(self.toggle_media(kind));
            }
            EngineCommand::ToggleCamera { reply } => {
                let _ = reply.send(self.toggle_camera().await);
            }
            EngineCommand::StartStats { sink, interval } => self.start_stats(sink, interval),
            EngineCommand::StopStats => self.stop_stats(),
        }
    }

    async fn initialize(&mut self, room_id: String, identity: String) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::SessionActive);
        }
        self.register_channel_handlers();
        let outcome = self.build_session(room_id, identity, None).await;
        if let Err(e) = &outcome {
            warn!("webrtc: error initializing connection: {}", e);
        }
        outcome
    }

    /// Create the peer, join the room, capture and attach local media.
    /// `fallback_polite` covers servers that return no role on re-join.
    async fn build_session(
        &mut self,
        room_id: String,
        identity: String,
        fallback_polite: Option<bool>,
    ) -> Result<()> {
        info!(
            "webrtc [{}]: initializing connection for room {}",
            identity, room_id
        );
        let peer = self
            .peers
            .create_peer(&self.config, self.peer_events())
            .await?;

        let polite = match self.join_room(&room_id, fallback_polite).await {
            Ok(polite) => polite,
            Err(e) => {
                peer.detach_handlers();
                let _ = peer.close().await;
                return Err(e);
            }
        };
        debug!("webrtc [{}]: room joined, polite={}", identity, polite);

        let media = match self.media_source.capture(&self.config.constraints).await {
            Ok(media) => media,
            Err(e) => {
                peer.detach_handlers();
                let _ = peer.close().await;
                return Err(e);
            }
        };
        if let Some(sink) = &self.local_sink {
            sink(Some(Arc::clone(&media)));
        }

        if let Err(e) = peer.attach_local_media(Arc::clone(&media)).await {
            media.stop();
            if let Some(sink) = &self.local_sink {
                sink(None);
            }
            peer.detach_handlers();
            let _ = peer.close().await;
            return Err(e);
        }

        *self.stats_peer.write() = Some(Arc::clone(&peer));
        self.session = Some(CallSession::new(
            room_id,
            identity,
            polite,
            peer,
            media,
            Arc::clone(&self.channel),
        ));
        Ok(())
    }

    async fn join_room(&self, room_id: &str, fallback_polite: Option<bool>) -> Result<bool> {
        let reply = self
            .channel
            .invoke(hub::JOIN_ROOM, vec![json!(room_id)])
            .await?;
        match reply.as_bool() {
            Some(polite) => Ok(polite),
            None => fallback_polite.ok_or_else(|| Error::UnexpectedReply {
                method: hub::JOIN_ROOM.to_string(),
                reply: reply.to_string(),
            }),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Err(Error::NoSession);
        };
        info!("webrtc [{}]: closing connection", session.identity);

        self.stop_stats();
        *self.stats_peer.write() = None;

        if let Some(media) = session.local_media.take() {
            media.stop();
        }
        if let Some(sink) = &self.local_sink {
            sink(None);
        }

        if let Err(e) = self
            .channel
            .invoke(hub::LEAVE_ROOM, vec![json!(session.room_id)])
            .await
        {
            warn!(
                "webrtc [{}]: failed to leave room: {}",
                session.identity, e
            );
        }

        // Detach before close so nothing fires into the torn-down session.
        session.peer.detach_handlers();
        if let Err(e) = session.peer.close().await {
            warn!(
                "webrtc [{}]: error closing peer connection: {}",
                session.identity, e
            );
        }

        self.unregister_channel_handlers();
        Ok(())
    }

    /// The remote participant left: reset, not terminate. This side
    /// becomes polite, the session is rebuilt and the room re-joined so
    /// the client is ready to pair with whoever arrives next.
    async fn handle_user_left(&mut self, username: String) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        info!("webrtc [{}]: user left: {}", session.identity, username);

        session.polite = true;

        if let Some(remote) = session.remote_media.take() {
            debug!(
                "webrtc [{}]: releasing remote stream {}",
                session.identity,
                remote.id()
            );
        }
        if let Some(sink) = &self.remote_sink {
            sink(None);
        }
        session.reset_flags();

        if let Some(media) = session.local_media.take() {
            media.stop();
        }

        session.peer.detach_handlers();
        if let Err(e) = session.peer.close().await {
            warn!(
                "webrtc [{}]: error closing peer connection: {}",
                session.identity, e
            );
        }
        *self.stats_peer.write() = None;

        let CallSession {
            room_id,
            identity,
            polite,
            ..
        } = session;
        if let Err(e) = self.build_session(room_id, identity, Some(polite)).await {
            warn!(
                "webrtc: failed to re-initialize after peer departure: {}",
                e
            );
        }
    }

    fn toggle_media(&mut self, kind: MediaKind) -> Result<bool> {
        let session = self.session.as_ref().ok_or(Error::NoSession)?;
        let media = session.local_media.as_ref().ok_or(Error::NoSession)?;
        let enabled = media.toggle(kind);
        info!(
            "webrtc [{}]: {} {}",
            session.identity,
            kind,
            if enabled { "enabled" } else { "muted" }
        );
        Ok(enabled)
    }

    async fn toggle_camera(&mut self) -> Result<()> {
        let media = {
            let session = self.session.as_ref().ok_or(Error::NoSession)?;
            Arc::clone(session.local_media.as_ref().ok_or(Error::NoSession)?)
        };
        media.switch_camera().await
    }

    fn start_stats(&mut self, sink: StatsSink, interval: Duration) {
        if self.stats.is_some() {
            warn!("webrtc: stats collection already running");
            return;
        }
        if self.session.is_none() {
            warn!("webrtc: cannot collect stats without an active session");
            return;
        }
        if interval.is_zero() {
            warn!("webrtc: stats interval must be non-zero");
            return;
        }
        self.stats = Some(StatsCollector::start(
            Arc::clone(&self.stats_peer),
            sink,
            interval,
        ));
    }

    fn stop_stats(&mut self) {
        if let Some(stats) = self.stats.take() {
            stats.stop();
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        // Every handler entry is guarded on a live session.
        match event {
            PeerEvent::NegotiationNeeded => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if let Err(e) = session.handle_negotiation_needed().await {
                    warn!(
                        "webrtc [{}]: error handling negotiation needed: {}",
                        session.identity, e
                    );
                }
            }
            PeerEvent::LocalCandidate(candidate) => {
                let Some(session) = self.session.as_ref() else {
                    return;
                };
                if let Err(e) = session.send_local_candidate(candidate).await {
                    warn!(
                        "webrtc [{}]: error sending candidate: {}",
                        session.identity, e
                    );
                }
            }
            PeerEvent::RemoteTrack(remote) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.remote_media = remote.clone();
                if let Some(sink) = &self.remote_sink {
                    sink(remote);
                }
            }
            PeerEvent::IceGatheringStateChanged(state) => {
                debug!("webrtc: ICE gathering state: {}", state);
            }
            PeerEvent::ConnectionStateChanged(state) => {
                info!("webrtc: connection state: {}", state);
            }
        }
    }

    async fn handle_signal(&mut self, signal: SignalMsg) {
        match signal {
            SignalMsg::Message(description) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if let Err(e) = session.handle_remote_description(description).await {
                    warn!(
                        "webrtc [{}]: error handling message received: {}",
                        session.identity, e
                    );
                }
            }
            SignalMsg::Candidate(candidate) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if let Err(e) = session.handle_remote_candidate(candidate).await {
                    warn!(
                        "webrtc [{}]: error handling candidate received: {}",
                        session.identity, e
                    );
                }
            }
            SignalMsg::UserLeft(username) => self.handle_user_left(username).await,
        }
    }

    fn register_channel_handlers(&mut self) {
        if self.handlers_registered {
            return;
        }
        for (kind, handler) in &self.channel_handlers {
            self.channel.on(*kind, Arc::clone(handler));
        }
        self.handlers_registered = true;
    }

    fn unregister_channel_handlers(&mut self) {
        if !self.handlers_registered {
            return;
        }
        for (kind, handler) in &self.channel_handlers {
            self.channel.off(*kind, handler);
        }
        self.handlers_registered = false;
    }

    /// Adapter turning a peer's event stream into engine messages
    fn peer_events(&self) -> PeerEventSender {
        let messages = self.messages.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if messages.send(EngineMsg::Peer(event)).is_err() {
                    break;
                }
            }
        });
        tx
    }
}
