//! Per-call negotiation session
//!
//! One [`CallSession`] exists per live call attempt. It owns the
//! negotiation state and implements perfect negotiation: when both sides
//! offer at once, the polite side yields (rolling back its own offer)
//! and the impolite side silently discards the colliding offer. The
//! engine task processes events strictly in arrival order, so state
//! reads and writes here never interleave within one event.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use paircall_signaling::methods::hub;
use paircall_signaling::{
    IceCandidate, SdpKind, ServerEvent, SessionDescription, SignalingChannel,
};

use crate::error::NegotiationFailurePhase;
use crate::media::{LocalMedia, RemoteMedia};
use crate::peer::{PeerConnection, SignalingState};
use crate::{Error, Result};

/// Where this side stands in the offer/answer exchange.
///
/// Replaces a pair of booleans: `MakingOffer` covers the span of the
/// local offer operation, `ApplyingRemote` the span of applying a remote
/// answer. Event processing is serialized, so `MakingOffer` can never be
/// observed together with an ignored offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// Nothing in flight
    Idle,
    /// A local offer is being created and sent
    MakingOffer,
    /// A local offer went out; the answer is outstanding
    AwaitingAnswer,
    /// A remote answer is being applied
    ApplyingRemote,
}

pub(crate) struct CallSession {
    pub room_id: String,
    pub identity: String,
    /// Collision role; the polite side yields
    pub polite: bool,
    pub phase: NegotiationPhase,
    /// Set when a colliding offer was discarded; stray candidates for
    /// that offer are expected and swallowed
    pub ignoring_offer: bool,
    /// Candidates that arrived before the remote description, FIFO
    pub pending_remote_candidates: VecDeque<IceCandidate>,
    pub peer: Arc<dyn PeerConnection>,
    pub local_media: Option<Arc<dyn LocalMedia>>,
    pub remote_media: Option<Arc<dyn RemoteMedia>>,
    channel: Arc<SignalingChannel>,
}

impl CallSession {
    pub fn new(
        room_id: String,
        identity: String,
        polite: bool,
        peer: Arc<dyn PeerConnection>,
        local_media: Arc<dyn LocalMedia>,
        channel: Arc<SignalingChannel>,
    ) -> Self {
        Self {
            room_id,
            identity,
            polite,
            phase: NegotiationPhase::Idle,
            ignoring_offer: false,
            pending_remote_candidates: VecDeque::new(),
            peer,
            local_media: Some(local_media),
            remote_media: None,
            channel,
        }
    }

    /// Reset negotiation state for a session rebuild
    pub fn reset_flags(&mut self) {
        self.phase = NegotiationPhase::Idle;
        self.ignoring_offer = false;
        self.pending_remote_candidates.clear();
    }

    /// The media/connection layer requested a (re)negotiation: create an
    /// offer, apply it locally and relay it. The phase is released on
    /// every path.
    pub async fn handle_negotiation_needed(&mut self) -> Result<()> {
        debug!("webrtc [{}]: negotiation needed", self.identity);
        self.phase = NegotiationPhase::MakingOffer;
        let outcome = self.make_offer().await;
        self.phase = if outcome.is_ok() {
            NegotiationPhase::AwaitingAnswer
        } else {
            NegotiationPhase::Idle
        };
        outcome
    }

    async fn make_offer(&mut self) -> Result<()> {
        let offer = self
            .peer
            .create_offer()
            .await
            .map_err(|e| Error::negotiation(NegotiationFailurePhase::CreatingOffer, e))?;
        self.peer
            .set_local_description(offer.clone())
            .await
            .map_err(|e| {
                Error::negotiation(NegotiationFailurePhase::ApplyingLocalDescription, e)
            })?;
        debug!(
            "webrtc [{}]: signaling state after local description: {}",
            self.identity,
            self.peer.signaling_state()
        );
        self.relay_description(&offer).await?;
        debug!("webrtc [{}]: offer sent", self.identity);
        Ok(())
    }

    /// A session description arrived from the other participant.
    pub async fn handle_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<()> {
        let state = self.peer.signaling_state();
        let ready_for_offer = self.phase != NegotiationPhase::MakingOffer
            && (state == SignalingState::Stable || self.phase == NegotiationPhase::ApplyingRemote);
        let collision = description.is_offer() && !ready_for_offer;
        self.ignoring_offer = collision && !self.polite;

        debug!(
            "webrtc [{}]: {} received, state={}, phase={:?}, collision={}, ignoring={}",
            self.identity,
            description.kind.as_str(),
            state,
            self.phase,
            collision,
            self.ignoring_offer
        );

        if self.ignoring_offer {
            // Protocol-expected discard: the impolite side wins the race.
            debug!("webrtc [{}]: discarding colliding offer", self.identity);
            return Ok(());
        }

        let is_offer = description.is_offer();
        if description.kind == SdpKind::Answer {
            self.phase = NegotiationPhase::ApplyingRemote;
        }

        let outcome = self.apply_remote_description(description).await;
        // Released on every path, including failures.
        self.phase = NegotiationPhase::Idle;
        outcome?;

        if is_offer {
            let answer = self
                .peer
                .create_answer()
                .await
                .map_err(|e| Error::negotiation(NegotiationFailurePhase::CreatingAnswer, e))?;
            self.peer
                .set_local_description(answer.clone())
                .await
                .map_err(|e| {
                    Error::negotiation(NegotiationFailurePhase::ApplyingLocalDescription, e)
                })?;
            self.relay_description(&answer).await?;
            debug!("webrtc [{}]: answer sent", self.identity);
        }
        Ok(())
    }

    async fn apply_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        self.peer
            .set_remote_description(description)
            .await
            .map_err(|e| {
                Error::negotiation(NegotiationFailurePhase::ApplyingRemoteDescription, e)
            })?;
        while let Some(candidate) = self.pending_remote_candidates.pop_front() {
            self.peer
                .add_ice_candidate(candidate)
                .await
                .map_err(|e| Error::IceApply(e.to_string()))?;
        }
        Ok(())
    }

    /// An ICE candidate arrived from the other participant. Candidates
    /// before the remote description are queued in arrival order; a
    /// failure to apply is swallowed only while an offer is being
    /// ignored.
    pub async fn handle_remote_candidate(
        &mut self,
        candidate: Option<IceCandidate>,
    ) -> Result<()> {
        let Some(candidate) = candidate else {
            // Remote end-of-gathering marker.
            return Ok(());
        };

        if !self.peer.has_remote_description().await {
            self.pending_remote_candidates.push_back(candidate);
            return Ok(());
        }

        match self.peer.add_ice_candidate(candidate).await {
            Ok(()) => Ok(()),
            Err(e) if self.ignoring_offer => {
                debug!(
                    "webrtc [{}]: dropping candidate for ignored offer: {}",
                    self.identity, e
                );
                Ok(())
            }
            Err(e) => Err(Error::IceApply(e.to_string())),
        }
    }

    /// Forward a locally produced candidate verbatim, end-of-gathering
    /// marker included.
    pub async fn send_local_candidate(&self, candidate: Option<IceCandidate>) -> Result<()> {
        let payload = match &candidate {
            Some(candidate) => serde_json::to_value(candidate)?,
            None => Value::Null,
        };
        self.channel
            .invoke(hub::SEND_ICE_CANDIDATE, vec![json!(self.room_id), payload])
            .await?;
        debug!("webrtc [{}]: candidate sent", self.identity);
        Ok(())
    }

    async fn relay_description(&self, description: &SessionDescription) -> Result<()> {
        self.channel
            .invoke(
                hub::SEND_MESSAGE,
                vec![json!(self.room_id), serde_json::to_value(description)?],
            )
            .await?;
        Ok(())
    }
}

/// Event payloads the engine subscribes to on the channel
pub(crate) enum SignalMsg {
    Message(SessionDescription),
    Candidate(Option<IceCandidate>),
    UserLeft(String),
}

impl SignalMsg {
    pub fn from_event(event: &ServerEvent) -> Option<Self> {
        match event {
            ServerEvent::ReceiveMessage(description) => {
                Some(SignalMsg::Message(description.clone()))
            }
            ServerEvent::ReceiveIceCandidate(candidate) => {
                Some(SignalMsg::Candidate(candidate.clone()))
            }
            ServerEvent::UserLeft(username) => Some(SignalMsg::UserLeft(username.clone())),
            _ => None,
        }
    }
}
