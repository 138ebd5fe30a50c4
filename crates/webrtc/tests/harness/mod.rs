//! Scripted peer, media and hub fakes for engine tests

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use paircall_signaling::methods::{client, hub};
use paircall_signaling::{
    ConnectionStatus, HubConnector, HubTransport, IceCandidate, SdpKind, SessionDescription,
    SignalingChannel, SignalingConfig, TransportEvent,
};
use paircall_webrtc::{
    CallConfig, CameraFacing, Error, IceConnectionState, LocalMedia, MediaConstraints, MediaKind,
    MediaSource, PeerConnection, PeerConnectionState, PeerEvent, PeerEventSender, PeerFactory,
    Result, SignalingState, StatsSnapshot,
};

/// Shared ordered record of interesting actions across fakes
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

// ---------------------------------------------------------------------
// Peer connection fake
// ---------------------------------------------------------------------

/// Peer connection with a browser-like signaling state machine
pub struct FakePeer {
    pub id: String,
    events: PeerEventSender,
    log: EventLog,
    auto_negotiate: bool,
    detached: AtomicBool,
    state: Mutex<SignalingState>,
    local_desc: Mutex<Option<SessionDescription>>,
    remote_desc: Mutex<Option<SessionDescription>>,
    applied_candidates: Mutex<Vec<IceCandidate>>,
    fail_candidates: AtomicBool,
    offer_counter: AtomicUsize,
    closed: AtomicBool,
    snapshots: Mutex<VecDeque<StatsSnapshot>>,
}

impl FakePeer {
    fn new(id: String, events: PeerEventSender, log: EventLog, auto_negotiate: bool) -> Self {
        Self {
            id,
            events,
            log,
            auto_negotiate,
            detached: AtomicBool::new(false),
            state: Mutex::new(SignalingState::Stable),
            local_desc: Mutex::new(None),
            remote_desc: Mutex::new(None),
            applied_candidates: Mutex::new(Vec::new()),
            fail_candidates: AtomicBool::new(false),
            offer_counter: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            snapshots: Mutex::new(VecDeque::new()),
        }
    }

    fn record(&self, entry: String) {
        self.log.lock().push(entry);
    }

    fn emit(&self, event: PeerEvent) {
        if !self.detached.load(Ordering::SeqCst) {
            let _ = self.events.send(event);
        }
    }

    /// Simulate the media layer requesting a (re)negotiation
    pub fn trigger_negotiation(&self) {
        self.emit(PeerEvent::NegotiationNeeded);
    }

    /// Simulate a locally gathered candidate
    pub fn produce_candidate(&self, candidate: Option<IceCandidate>) {
        self.emit(PeerEvent::LocalCandidate(candidate));
    }

    /// Make `add_ice_candidate` fail from now on
    pub fn fail_candidates(&self, fail: bool) {
        self.fail_candidates.store(fail, Ordering::SeqCst);
    }

    /// Script the next stats sample
    pub fn push_snapshot(&self, snapshot: StatsSnapshot) {
        self.snapshots.lock().push_back(snapshot);
    }

    pub fn state(&self) -> SignalingState {
        *self.state.lock()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote_desc.lock().clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.applied_candidates.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let n = self.offer_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: format!("offer-from-{}-{}", self.id, n),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if *self.state.lock() != SignalingState::HaveRemoteOffer {
            return Err(Error::Backend(format!(
                "create_answer in state {}",
                self.state()
            )));
        }
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: format!("answer-from-{}", self.id),
        })
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        *state = match description.kind {
            SdpKind::Offer => SignalingState::HaveLocalOffer,
            SdpKind::Answer => SignalingState::Stable,
            SdpKind::Pranswer => SignalingState::HaveLocalPranswer,
            SdpKind::Rollback => SignalingState::Stable,
        };
        *self.local_desc.lock() = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        match description.kind {
            SdpKind::Offer => {
                if *state == SignalingState::HaveLocalOffer {
                    // Accepting a colliding offer cancels the local one.
                    self.record(format!("rollback:{}", self.id));
                    *self.local_desc.lock() = None;
                }
                *state = SignalingState::HaveRemoteOffer;
            }
            SdpKind::Answer => {
                if *state != SignalingState::HaveLocalOffer {
                    return Err(Error::Backend(format!(
                        "answer applied in state {}",
                        *state
                    )));
                }
                *state = SignalingState::Stable;
            }
            SdpKind::Pranswer => *state = SignalingState::HaveRemotePranswer,
            SdpKind::Rollback => *state = SignalingState::Stable,
        }
        *self.remote_desc.lock() = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.fail_candidates.load(Ordering::SeqCst) {
            return Err(Error::IceApply("scripted candidate failure".to_string()));
        }
        if self.remote_desc.lock().is_none() {
            return Err(Error::IceApply(
                "remote description is not set".to_string(),
            ));
        }
        self.applied_candidates.lock().push(candidate);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state()
    }

    async fn has_remote_description(&self) -> bool {
        self.remote_desc.lock().is_some()
    }

    async fn attach_local_media(&self, _media: Arc<dyn LocalMedia>) -> Result<()> {
        self.record(format!("attach:{}", self.id));
        if self.auto_negotiate {
            self.emit(PeerEvent::NegotiationNeeded);
        }
        Ok(())
    }

    fn detach_handlers(&self) {
        self.detached.store(true, Ordering::SeqCst);
        self.record(format!("detach:{}", self.id));
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock() = SignalingState::Closed;
        self.record(format!("close:{}", self.id));
        Ok(())
    }

    async fn stats_snapshot(&self) -> Result<StatsSnapshot> {
        if let Some(snapshot) = self.snapshots.lock().pop_front() {
            return Ok(snapshot);
        }
        Ok(empty_snapshot())
    }
}

pub fn empty_snapshot() -> StatsSnapshot {
    StatsSnapshot {
        taken_at: Utc::now(),
        connection_state: PeerConnectionState::Connected,
        ice_connection_state: IceConnectionState::Connected,
        signaling_state: SignalingState::Stable,
        inbound: Vec::new(),
        outbound: Vec::new(),
        candidate_pairs: Vec::new(),
    }
}

/// Factory labelling peers `<label>1`, `<label>2`, ...
pub struct FakePeerFactory {
    label: String,
    auto_negotiate: bool,
    log: EventLog,
    peers: Mutex<Vec<Arc<FakePeer>>>,
    counter: AtomicUsize,
}

impl FakePeerFactory {
    pub fn new(label: &str, auto_negotiate: bool, log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            auto_negotiate,
            log,
            peers: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        })
    }

    pub fn peer(&self, index: usize) -> Arc<FakePeer> {
        self.peers.lock()[index].clone()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create_peer(
        &self,
        _config: &CallConfig,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let peer = Arc::new(FakePeer::new(
            format!("{}{}", self.label, n),
            events,
            Arc::clone(&self.log),
            self.auto_negotiate,
        ));
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

// ---------------------------------------------------------------------
// Media fakes
// ---------------------------------------------------------------------

pub struct FakeLocalMedia {
    id: String,
    audio: AtomicBool,
    video: AtomicBool,
    facing: Mutex<CameraFacing>,
    stopped: AtomicBool,
}

impl FakeLocalMedia {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn facing(&self) -> CameraFacing {
        *self.facing.lock()
    }
}

#[async_trait]
impl LocalMedia for FakeLocalMedia {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio.load(Ordering::SeqCst),
            MediaKind::Video => self.video.load(Ordering::SeqCst),
        }
    }

    fn set_enabled(&self, kind: MediaKind, enabled: bool) -> bool {
        match kind {
            MediaKind::Audio => self.audio.store(enabled, Ordering::SeqCst),
            MediaKind::Video => self.video.store(enabled, Ordering::SeqCst),
        }
        enabled
    }

    async fn switch_camera(&self) -> Result<()> {
        let mut facing = self.facing.lock();
        *facing = facing.flipped();
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Default)]
pub struct FakeMediaSource {
    captured: Mutex<Vec<Arc<FakeLocalMedia>>>,
    counter: AtomicUsize,
}

impl FakeMediaSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn media(&self, index: usize) -> Arc<FakeLocalMedia> {
        self.captured.lock()[index].clone()
    }

    pub fn capture_count(&self) -> usize {
        self.captured.lock().len()
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn capture(&self, constraints: &MediaConstraints) -> Result<Arc<dyn LocalMedia>> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let media = Arc::new(FakeLocalMedia {
            id: format!("stream-{n}"),
            audio: AtomicBool::new(constraints.audio),
            video: AtomicBool::new(constraints.video),
            facing: Mutex::new(constraints.facing),
            stopped: AtomicBool::new(false),
        });
        self.captured.lock().push(Arc::clone(&media));
        Ok(media)
    }
}

// ---------------------------------------------------------------------
// Hub fakes
// ---------------------------------------------------------------------

/// Hub transport that answers `JoinRoom` with a scripted politeness and
/// relays `SendMessage`/`SendIceCandidate` to an optional partner hub
pub struct TestHub {
    polite_reply: bool,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    partner: Mutex<Option<Arc<TestHub>>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    log: EventLog,
}

impl TestHub {
    pub fn new(polite_reply: bool, log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            polite_reply,
            events: Mutex::new(None),
            partner: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            log,
        })
    }

    /// Wire two hubs so their rooms relay to each other
    pub fn link(a: &Arc<TestHub>, b: &Arc<TestHub>) {
        *a.partner.lock() = Some(Arc::clone(b));
        *b.partner.lock() = Some(Arc::clone(a));
    }

    /// Push a server event into the owning channel
    pub fn deliver(&self, method: &str, args: Vec<Value>) {
        let sender = self.events.lock().clone().expect("hub not connected");
        let _ = sender.send(TransportEvent::Push {
            method: method.to_string(),
            args,
        });
    }

    pub fn calls_of(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

#[async_trait]
impl HubTransport for TestHub {
    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }

    fn connection_id(&self) -> Option<String> {
        Some("test-hub".to_string())
    }

    async fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> paircall_signaling::Result<Value> {
        self.log.lock().push(format!("invoke:{method}"));
        self.calls.lock().push((method.to_string(), args.clone()));

        match method {
            hub::JOIN_ROOM => Ok(json!(self.polite_reply)),
            hub::SEND_MESSAGE => {
                if let Some(partner) = self.partner.lock().clone() {
                    partner.deliver(client::RECEIVE_MESSAGE, vec![args[1].clone()]);
                }
                Ok(Value::Null)
            }
            hub::SEND_ICE_CANDIDATE => {
                if let Some(partner) = self.partner.lock().clone() {
                    partner.deliver(client::RECEIVE_ICE_CANDIDATE, vec![args[1].clone()]);
                }
                Ok(Value::Null)
            }
            _ => Ok(Value::Null),
        }
    }

    async fn send(&self, method: &str, args: Vec<Value>) -> paircall_signaling::Result<()> {
        self.invoke(method, args).await.map(|_| ())
    }

    async fn stop(&self) -> paircall_signaling::Result<()> {
        Ok(())
    }
}

struct TestConnector {
    hub: Arc<TestHub>,
}

#[async_trait]
impl HubConnector for TestConnector {
    async fn connect(
        &self,
        _config: &SignalingConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> paircall_signaling::Result<Arc<dyn HubTransport>> {
        *self.hub.events.lock() = Some(events);
        Ok(Arc::clone(&self.hub) as Arc<dyn HubTransport>)
    }
}

/// Build and start a channel over the given hub
pub async fn channel_over(hub: Arc<TestHub>) -> Arc<SignalingChannel> {
    let channel = Arc::new(
        SignalingChannel::new(SignalingConfig::default(), Arc::new(TestConnector { hub }))
            .unwrap(),
    );
    channel.start().await.unwrap();
    channel
}

// ---------------------------------------------------------------------
// Misc helpers
// ---------------------------------------------------------------------

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2130706431 192.0.2.{n} 54321 typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

pub fn offer(sdp: &str) -> SessionDescription {
    SessionDescription {
        kind: SdpKind::Offer,
        sdp: sdp.to_string(),
    }
}

/// Poll until `cond` holds; panics after ~1 s
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Yield so queued engine work drains
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
