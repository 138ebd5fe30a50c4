//! Stable method and event names on the signaling hub

/// Client-to-server hub methods
pub mod hub {
    /// Join a room; the reply is this side's politeness
    pub const JOIN_ROOM: &str = "JoinRoom";
    /// Leave a room
    pub const LEAVE_ROOM: &str = "LeaveRoom";
    /// Relay a session description to the room's other participant
    pub const SEND_MESSAGE: &str = "SendMessage";
    /// Relay an ICE candidate to the room's other participant
    pub const SEND_ICE_CANDIDATE: &str = "SendIceCandidate";
    /// Join a server-side group
    pub const ADD_TO_GROUP: &str = "AddToGroup";
    /// Leave a server-side group
    pub const REMOVE_FROM_GROUP: &str = "RemoveFromGroup";
    /// Liveness probe
    pub const PING: &str = "Ping";
}

/// Server-to-client event names
pub mod client {
    /// A session description from the other participant
    pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
    /// An ICE candidate from the other participant
    pub const RECEIVE_ICE_CANDIDATE: &str = "ReceiveICECandidate";
    /// Another participant joined the room
    pub const USER_JOINED: &str = "UserJoined";
    /// The other participant left the room
    pub const USER_LEFT: &str = "UserLeft";
    /// The requested room does not exist
    pub const ROOM_DOES_NOT_EXIST: &str = "RoomDoesNotExist";
    /// The server refused to admit this client to the room
    pub const NOT_AUTHORIZED_TO_JOIN: &str = "NotAuthorizedToJoin";
}
