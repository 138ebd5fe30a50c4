//! Peer-connection backend over the `webrtc` crate
//!
//! [`RtcPeerFactory`] owns one WebRTC API instance (media engine with
//! default codecs plus default interceptors) and produces [`RtcPeer`]
//! adapters that translate `RTCPeerConnection` callbacks into
//! [`PeerEvent`]s for the engine task.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use paircall_signaling::{IceCandidate, SdpKind, SessionDescription};

use crate::config::{CallConfig, IceServerConfig};
use crate::media::{CameraFacing, LocalMedia, MediaConstraints, MediaKind, MediaSource, RemoteMedia};
use crate::peer::{
    IceConnectionState, IceGatheringState, PeerConnection, PeerConnectionState, PeerEvent,
    PeerEventSender, PeerFactory, SignalingState,
};
use crate::stats::{
    CandidatePairStats, RtpInboundStats, RtpOutboundStats, StatsSnapshot,
};
use crate::{Error, Result};

fn backend(e: webrtc::Error) -> Error {
    Error::Backend(e.to_string())
}

/// Factory building `webrtc`-crate peer connections
pub struct RtcPeerFactory {
    api: API,
}

impl RtcPeerFactory {
    /// Build the API with default codecs and interceptors
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(backend)?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::Backend(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create_peer(
        &self,
        config: &CallConfig,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>> {
        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config)
                .await
                .map_err(backend)?,
        );

        let peer = RtcPeer { pc };
        peer.register_handlers(&events);
        Ok(Arc::new(peer))
    }
}

fn to_rtc_ice_server(config: &IceServerConfig) -> RTCIceServer {
    RTCIceServer {
        urls: config.urls.clone(),
        username: config.username.clone().unwrap_or_default(),
        credential: config.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

/// `RTCPeerConnection` adapter
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

impl RtcPeer {
    fn register_handlers(&self, events: &PeerEventSender) {
        let tx = events.clone();
        self.pc.on_negotiation_needed(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PeerEvent::NegotiationNeeded);
            })
        }));

        let tx = events.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = tx.clone();
                Box::pin(async move {
                    debug!(
                        "webrtc backend: remote {} track on stream {}",
                        track.kind(),
                        track.stream_id()
                    );
                    let remote: Arc<dyn RemoteMedia> = Arc::new(RtcRemoteMedia {
                        stream_id: track.stream_id(),
                        track,
                    });
                    let _ = tx.send(PeerEvent::RemoteTrack(Some(remote)));
                })
            },
        ));

        let tx = events.clone();
        self.pc.on_ice_candidate(Box::new(
            move |candidate: Option<RTCIceCandidate>| {
                let tx = tx.clone();
                Box::pin(async move {
                    match candidate {
                        Some(candidate) => match candidate.to_json() {
                            Ok(init) => {
                                let _ = tx.send(PeerEvent::LocalCandidate(Some(IceCandidate {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_mline_index: init.sdp_mline_index,
                                    username_fragment: init.username_fragment,
                                })));
                            }
                            Err(e) => {
                                warn!("webrtc backend: candidate serialization failed: {}", e);
                            }
                        },
                        None => {
                            let _ = tx.send(PeerEvent::LocalCandidate(None));
                        }
                    }
                })
            },
        ));

        let tx = events.clone();
        self.pc.on_ice_gathering_state_change(Box::new(
            move |state: RTCIceGathererState| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send(PeerEvent::IceGatheringStateChanged(map_gathering_state(
                        state,
                    )));
                })
            },
        ));

        let tx = events.clone();
        self.pc.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send(PeerEvent::ConnectionStateChanged(map_connection_state(
                        state,
                    )));
                })
            },
        ));
    }
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await.map_err(backend)?;
        from_rtc_description(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await.map_err(backend)?;
        from_rtc_description(&answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(&description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(backend)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        // The library performs no implicit rollback; accepting a
        // colliding remote offer requires cancelling the pending local
        // offer explicitly.
        if description.kind == SdpKind::Offer
            && self.pc.signaling_state() == RTCSignalingState::HaveLocalOffer
        {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            self.pc
                .set_local_description(rollback)
                .await
                .map_err(backend)?;
        }

        let description = to_rtc_description(&description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(backend)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceApply(e.to_string()))
    }

    fn signaling_state(&self) -> SignalingState {
        map_signaling_state(self.pc.signaling_state())
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn attach_local_media(&self, media: Arc<dyn LocalMedia>) -> Result<()> {
        let local = media
            .as_any()
            .downcast_ref::<RtcLocalMedia>()
            .ok_or_else(|| {
                Error::Media("local media was not produced by the webrtc backend".to_string())
            })?;
        for track in local.rtp_tracks() {
            self.pc.add_track(track).await.map_err(backend)?;
        }
        Ok(())
    }

    fn detach_handlers(&self) {
        // Fixed order; nothing may fire into a half-torn-down session.
        self.pc
            .on_negotiation_needed(Box::new(|| Box::pin(async {})));
        self.pc.on_track(Box::new(
            |_: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                Box::pin(async {})
            },
        ));
        self.pc
            .on_ice_candidate(Box::new(|_: Option<RTCIceCandidate>| Box::pin(async {})));
        self.pc
            .on_ice_gathering_state_change(Box::new(|_: RTCIceGathererState| {
                Box::pin(async {})
            }));
        self.pc
            .on_peer_connection_state_change(Box::new(|_: RTCPeerConnectionState| {
                Box::pin(async {})
            }));
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.map_err(backend)
    }

    async fn stats_snapshot(&self) -> Result<StatsSnapshot> {
        let report = self.pc.get_stats().await;

        let mut inbound = Vec::new();
        let mut outbound_by_ssrc = Vec::new();
        let mut candidate_pairs = Vec::new();
        let mut remote_losses: HashMap<u32, i64> = HashMap::new();

        for (_id, entry) in report.reports {
            match entry {
                StatsReportType::InboundRTP(stats) => {
                    let Some(kind) = parse_kind(&stats.kind) else {
                        continue;
                    };
                    inbound.push(RtpInboundStats {
                        kind,
                        bytes_received: stats.bytes_received,
                        packets_received: stats.packets_received,
                        packets_lost: stats.packets_lost,
                        jitter_secs: stats.jitter,
                        frames_per_second: None,
                        frame_width: None,
                        frame_height: None,
                    });
                }
                StatsReportType::OutboundRTP(stats) => {
                    let Some(kind) = parse_kind(&stats.kind) else {
                        continue;
                    };
                    outbound_by_ssrc.push((
                        stats.ssrc,
                        RtpOutboundStats {
                            kind,
                            bytes_sent: stats.bytes_sent,
                            packets_sent: stats.packets_sent,
                            remote_packets_lost: None,
                            frames_per_second: None,
                            frame_width: None,
                            frame_height: None,
                        },
                    ));
                }
                StatsReportType::RemoteInboundRTP(stats) => {
                    remote_losses.insert(stats.ssrc, stats.packets_lost);
                }
                StatsReportType::CandidatePair(stats) => {
                    candidate_pairs.push(CandidatePairStats {
                        nominated: stats.nominated,
                        current_round_trip_time_secs: (stats.current_round_trip_time > 0.0)
                            .then_some(stats.current_round_trip_time),
                    });
                }
                _ => {}
            }
        }

        // Remote-reported losses describe our outbound streams.
        let outbound = outbound_by_ssrc
            .into_iter()
            .map(|(ssrc, mut entry)| {
                entry.remote_packets_lost = remote_losses.get(&ssrc).copied();
                entry
            })
            .collect();

        Ok(StatsSnapshot {
            taken_at: Utc::now(),
            connection_state: map_connection_state(self.pc.connection_state()),
            ice_connection_state: map_ice_connection_state(self.pc.ice_connection_state()),
            signaling_state: map_signaling_state(self.pc.signaling_state()),
            inbound,
            outbound,
            candidate_pairs,
        })
    }
}

fn parse_kind(kind: &str) -> Option<MediaKind> {
    match kind {
        "audio" => Some(MediaKind::Audio),
        "video" => Some(MediaKind::Video),
        _ => None,
    }
}

fn to_rtc_description(description: &SessionDescription) -> Result<RTCSessionDescription> {
    let converted = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp.clone()),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp.clone()),
        SdpKind::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            return Ok(rollback);
        }
    };
    converted.map_err(backend)
}

fn from_rtc_description(description: &RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        other => {
            return Err(Error::Backend(format!(
                "unexpected description type: {}",
                other
            )))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp.clone(),
    })
}

fn map_signaling_state(state: RTCSignalingState) -> SignalingState {
    match state {
        RTCSignalingState::Stable => SignalingState::Stable,
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        _ => SignalingState::Closed,
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::New => PeerConnectionState::New,
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        _ => PeerConnectionState::Closed,
    }
}

fn map_ice_connection_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        _ => IceConnectionState::Closed,
    }
}

fn map_gathering_state(state: RTCIceGathererState) -> IceGatheringState {
    match state {
        RTCIceGathererState::Gathering => IceGatheringState::Gathering,
        RTCIceGathererState::Complete | RTCIceGathererState::Closed => {
            IceGatheringState::Complete
        }
        _ => IceGatheringState::New,
    }
}

/// Locally captured tracks backed by `TrackLocalStaticSample`
///
/// Enable flags gate the embedder's sample writers; a muted track simply
/// stops receiving samples.
pub struct RtcLocalMedia {
    stream_id: String,
    audio: Option<Arc<TrackLocalStaticSample>>,
    video: Option<Arc<TrackLocalStaticSample>>,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
    facing: Mutex<CameraFacing>,
}

impl RtcLocalMedia {
    /// Wrap pre-built local tracks
    pub fn new(
        stream_id: impl Into<String>,
        audio: Option<Arc<TrackLocalStaticSample>>,
        video: Option<Arc<TrackLocalStaticSample>>,
        facing: CameraFacing,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            audio,
            video,
            audio_enabled: AtomicBool::new(true),
            video_enabled: AtomicBool::new(true),
            facing: Mutex::new(facing),
        }
    }

    /// Audio track handle for the embedder's sample writer
    pub fn audio_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.audio.clone()
    }

    /// Video track handle for the embedder's sample writer
    pub fn video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video.clone()
    }

    /// Current camera
    pub fn facing(&self) -> CameraFacing {
        *self.facing.lock()
    }

    fn rtp_tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        let mut tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> = Vec::new();
        if let Some(audio) = &self.audio {
            tracks.push(Arc::clone(audio) as Arc<dyn TrackLocal + Send + Sync>);
        }
        if let Some(video) = &self.video {
            tracks.push(Arc::clone(video) as Arc<dyn TrackLocal + Send + Sync>);
        }
        tracks
    }

    fn flag(&self, kind: MediaKind) -> &AtomicBool {
        match kind {
            MediaKind::Audio => &self.audio_enabled,
            MediaKind::Video => &self.video_enabled,
        }
    }
}

#[async_trait]
impl LocalMedia for RtcLocalMedia {
    fn id(&self) -> &str {
        &self.stream_id
    }

    fn is_enabled(&self, kind: MediaKind) -> bool {
        self.flag(kind).load(Ordering::SeqCst)
    }

    fn set_enabled(&self, kind: MediaKind, enabled: bool) -> bool {
        self.flag(kind).store(enabled, Ordering::SeqCst);
        enabled
    }

    async fn switch_camera(&self) -> Result<()> {
        let mut facing = self.facing.lock();
        *facing = facing.flipped();
        debug!("webrtc backend: camera switched to {:?}", *facing);
        Ok(())
    }

    fn stop(&self) {
        self.audio_enabled.store(false, Ordering::SeqCst);
        self.video_enabled.store(false, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Remote media surfaced by an incoming track
pub struct RtcRemoteMedia {
    stream_id: String,
    track: Arc<TrackRemote>,
}

impl RtcRemoteMedia {
    /// The underlying remote track
    pub fn track(&self) -> Arc<TrackRemote> {
        Arc::clone(&self.track)
    }
}

impl RemoteMedia for RtcRemoteMedia {
    fn id(&self) -> &str {
        &self.stream_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Media source producing sample-backed Opus/VP8 tracks.
///
/// There is no device capture in this backend; the embedder pulls the
/// track handles off the produced [`RtcLocalMedia`] and writes samples
/// from its own capture pipeline.
#[derive(Debug, Default)]
pub struct RtcMediaSource;

#[async_trait]
impl MediaSource for RtcMediaSource {
    async fn capture(&self, constraints: &MediaConstraints) -> Result<Arc<dyn LocalMedia>> {
        let stream_id = format!("paircall-{}", uuid::Uuid::new_v4());

        let audio = constraints.audio.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                "audio".to_owned(),
                stream_id.clone(),
            ))
        });
        let video = constraints.video.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                "video".to_owned(),
                stream_id.clone(),
            ))
        });

        Ok(Arc::new(RtcLocalMedia::new(
            stream_id,
            audio,
            video,
            constraints.facing,
        )))
    }
}
