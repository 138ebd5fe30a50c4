//! Typed events delivered by the signaling channel
//!
//! Server pushes and locally synthesized lifecycle notifications share one
//! closed enum, so subscribers match on payloads instead of string names.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::methods;

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Proposes a session
    Offer,
    /// Provisional answer
    Pranswer,
    /// Confirms a proposed session
    Answer,
    /// Cancels a pending local offer
    Rollback,
}

impl SdpKind {
    /// Canonical lowercase name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Pranswer => "pranswer",
            SdpKind::Answer => "answer",
            SdpKind::Rollback => "rollback",
        }
    }
}

/// An SDP offer or answer relayed through the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description kind
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Raw SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Whether this description proposes a session
    pub fn is_offer(&self) -> bool {
        self.kind == SdpKind::Offer
    }
}

/// An ICE candidate relayed through the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

/// Every event the channel can deliver to subscribers
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A session description from the other participant
    ReceiveMessage(SessionDescription),
    /// An ICE candidate from the other participant; `None` marks the end
    /// of candidate gathering on the remote side
    ReceiveIceCandidate(Option<IceCandidate>),
    /// Another participant joined the room
    UserJoined(String),
    /// The other participant left the room
    UserLeft(String),
    /// The requested room does not exist
    RoomDoesNotExist(String),
    /// The server refused to admit this client to the room
    NotAuthorizedToJoin(String),
    /// The channel connected
    Connected,
    /// The channel lost its connection; carries the failure text when the
    /// close was not requested
    Disconnected(Option<String>),
    /// The transport is attempting automatic recovery
    Reconnecting(Option<String>),
    /// Automatic recovery succeeded; carries the new connection id
    Reconnected(String),
    /// A connect attempt failed
    InitialConnectionFailed(String),
    /// The bounded manual reconnect loop gave up
    MaxReconnectAttemptsReached,
}

/// Payload-less discriminant of [`ServerEvent`], used as subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`ServerEvent::ReceiveMessage`]
    ReceiveMessage,
    /// See [`ServerEvent::ReceiveIceCandidate`]
    ReceiveIceCandidate,
    /// See [`ServerEvent::UserJoined`]
    UserJoined,
    /// See [`ServerEvent::UserLeft`]
    UserLeft,
    /// See [`ServerEvent::RoomDoesNotExist`]
    RoomDoesNotExist,
    /// See [`ServerEvent::NotAuthorizedToJoin`]
    NotAuthorizedToJoin,
    /// See [`ServerEvent::Connected`]
    Connected,
    /// See [`ServerEvent::Disconnected`]
    Disconnected,
    /// See [`ServerEvent::Reconnecting`]
    Reconnecting,
    /// See [`ServerEvent::Reconnected`]
    Reconnected,
    /// See [`ServerEvent::InitialConnectionFailed`]
    InitialConnectionFailed,
    /// See [`ServerEvent::MaxReconnectAttemptsReached`]
    MaxReconnectAttemptsReached,
}

impl ServerEvent {
    /// Discriminant of this event
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::ReceiveMessage(_) => EventKind::ReceiveMessage,
            ServerEvent::ReceiveIceCandidate(_) => EventKind::ReceiveIceCandidate,
            ServerEvent::UserJoined(_) => EventKind::UserJoined,
            ServerEvent::UserLeft(_) => EventKind::UserLeft,
            ServerEvent::RoomDoesNotExist(_) => EventKind::RoomDoesNotExist,
            ServerEvent::NotAuthorizedToJoin(_) => EventKind::NotAuthorizedToJoin,
            ServerEvent::Connected => EventKind::Connected,
            ServerEvent::Disconnected(_) => EventKind::Disconnected,
            ServerEvent::Reconnecting(_) => EventKind::Reconnecting,
            ServerEvent::Reconnected(_) => EventKind::Reconnected,
            ServerEvent::InitialConnectionFailed(_) => EventKind::InitialConnectionFailed,
            ServerEvent::MaxReconnectAttemptsReached => EventKind::MaxReconnectAttemptsReached,
        }
    }

    /// Map an inbound hub notification to a typed event.
    ///
    /// Unknown methods and malformed payloads are logged and dropped; the
    /// hub may gain events this client does not understand.
    pub fn from_push(method: &str, args: Vec<Value>) -> Option<ServerEvent> {
        match method {
            methods::client::RECEIVE_MESSAGE => {
                let value = args.into_iter().next()?;
                match serde_json::from_value(value) {
                    Ok(description) => Some(ServerEvent::ReceiveMessage(description)),
                    Err(e) => {
                        warn!("signaling: malformed session description: {}", e);
                        None
                    }
                }
            }
            methods::client::RECEIVE_ICE_CANDIDATE => {
                let value = args.into_iter().next().unwrap_or(Value::Null);
                if value.is_null() {
                    return Some(ServerEvent::ReceiveIceCandidate(None));
                }
                match serde_json::from_value(value) {
                    Ok(candidate) => Some(ServerEvent::ReceiveIceCandidate(Some(candidate))),
                    Err(e) => {
                        warn!("signaling: malformed ICE candidate: {}", e);
                        None
                    }
                }
            }
            methods::client::USER_JOINED => first_string(args).map(ServerEvent::UserJoined),
            methods::client::USER_LEFT => first_string(args).map(ServerEvent::UserLeft),
            methods::client::ROOM_DOES_NOT_EXIST => {
                first_string(args).map(ServerEvent::RoomDoesNotExist)
            }
            methods::client::NOT_AUTHORIZED_TO_JOIN => {
                first_string(args).map(ServerEvent::NotAuthorizedToJoin)
            }
            other => {
                warn!("signaling: unknown server event: {}", other);
                None
            }
        }
    }
}

fn first_string(args: Vec<Value>) -> Option<String> {
    match args.into_iter().next() {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            warn!("signaling: expected string payload, got {}", other);
            None
        }
        None => {
            warn!("signaling: event payload missing");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_description_wire_shape() {
        let description = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&description).unwrap();
        assert_eq!(json, json!({"type": "offer", "sdp": "v=0\r\n"}));

        let parsed: SessionDescription =
            serde_json::from_value(json!({"type": "answer", "sdp": "v=0\r\n"})).unwrap();
        assert_eq!(parsed.kind, SdpKind::Answer);
    }

    #[test]
    fn ice_candidate_wire_shape() {
        let parsed: IceCandidate = serde_json::from_value(json!({
            "candidate": "candidate:1 1 udp 2130706431 192.0.2.1 54321 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        }))
        .unwrap();
        assert_eq!(parsed.sdp_mid.as_deref(), Some("0"));
        assert_eq!(parsed.sdp_mline_index, Some(0));
        assert!(parsed.username_fragment.is_none());

        let json = serde_json::to_value(&parsed).unwrap();
        assert!(json.get("sdpMLineIndex").is_some());
    }

    #[test]
    fn maps_known_pushes() {
        let event = ServerEvent::from_push(
            methods::client::RECEIVE_MESSAGE,
            vec![json!({"type": "offer", "sdp": "v=0\r\n"})],
        )
        .unwrap();
        assert_eq!(event.kind(), EventKind::ReceiveMessage);

        let event =
            ServerEvent::from_push(methods::client::USER_LEFT, vec![json!("bob")]).unwrap();
        match event {
            ServerEvent::UserLeft(name) => assert_eq!(name, "bob"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn null_candidate_maps_to_end_of_gathering() {
        let event =
            ServerEvent::from_push(methods::client::RECEIVE_ICE_CANDIDATE, vec![Value::Null])
                .unwrap();
        match event {
            ServerEvent::ReceiveIceCandidate(None) => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_method_is_dropped() {
        assert!(ServerEvent::from_push("SomethingNew", vec![json!(1)]).is_none());
    }
}
