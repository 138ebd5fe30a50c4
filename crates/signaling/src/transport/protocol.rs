//! JSON-RPC 2.0 wire frames for the hub protocol
//!
//! Invocations are requests carrying an id and are answered by a
//! completion with the same id; fire-and-forget calls and server pushes
//! are notifications (no id).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version stamped on every frame
pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound call or inbound server push
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Method or event name
    pub method: String,
    /// Positional arguments
    #[serde(default)]
    pub params: Vec<Value>,
    /// Present on invocations awaiting a completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl Request {
    /// Build an invocation awaiting a completion
    pub fn invocation(id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Some(id),
        }
    }

    /// Build a fire-and-forget notification
    pub fn notification(method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: None,
        }
    }
}

/// Completion of an invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Result payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Id of the invocation being completed
    pub id: u64,
}

/// Server-reported invocation failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
}

/// Any frame the server can deliver.
///
/// `Response` is tried first; it requires a bare numeric `id`, which
/// notifications never carry.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// Completion of one of our invocations
    Response(Response),
    /// Server push
    Request(Request),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invocation_roundtrip() {
        let request = Request::invocation(7, "JoinRoom", vec![json!("ROOM1")]);
        let text = serde_json::to_string(&request).unwrap();
        let parsed: Request = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.id, Some(7));
        assert_eq!(parsed.method, "JoinRoom");
        assert_eq!(parsed.params, vec![json!("ROOM1")]);
    }

    #[test]
    fn notification_omits_id() {
        let request = Request::notification("Ping", vec![]);
        let text = serde_json::to_string(&request).unwrap();
        assert!(!text.contains("\"id\""));
    }

    #[test]
    fn frame_distinguishes_completion_from_push() {
        let completion = r#"{"jsonrpc":"2.0","result":true,"id":3}"#;
        match serde_json::from_str::<Frame>(completion).unwrap() {
            Frame::Response(response) => {
                assert_eq!(response.id, 3);
                assert_eq!(response.result, Some(json!(true)));
            }
            Frame::Request(_) => panic!("completion parsed as push"),
        }

        let push = r#"{"jsonrpc":"2.0","method":"UserLeft","params":["bob"]}"#;
        match serde_json::from_str::<Frame>(push).unwrap() {
            Frame::Request(request) => {
                assert_eq!(request.method, "UserLeft");
                assert_eq!(request.id, None);
            }
            Frame::Response(_) => panic!("push parsed as completion"),
        }
    }

    #[test]
    fn error_completion_carries_message() {
        let text = r#"{"jsonrpc":"2.0","error":{"code":-32000,"message":"no such room"},"id":9}"#;
        match serde_json::from_str::<Frame>(text).unwrap() {
            Frame::Response(response) => {
                let error = response.error.unwrap();
                assert_eq!(error.message, "no such room");
            }
            Frame::Request(_) => panic!("error completion parsed as push"),
        }
    }
}
