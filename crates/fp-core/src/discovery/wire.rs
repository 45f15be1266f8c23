//! Wire format shared by the handshake and agent commands.
//!
//! One JSON document per connection in each direction. The client writes its
//! request and half-closes the socket; the agent answers and closes.

use serde::{Deserialize, Serialize};

/// `app_type` every genuine agent reports.
pub const AGENT_APP_TYPE: &str = "py_flight_profiler";

/// Target name of the handshake request.
pub const STATUS_TARGET: &str = "status";

/// Target name asking the agent to shut down.
pub const QUIT_TARGET: &str = "quit";

/// A request sent to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Handler the agent should route to.
    pub target: String,

    /// False only for the handshake.
    pub is_plugin_calling: bool,

    /// Remainder of the command line, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,

    /// Asks the agent to stop the running command for `target`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancel: bool,
}

impl AgentRequest {
    /// The handshake request.
    pub fn status() -> Self {
        Self {
            target: STATUS_TARGET.to_string(),
            is_plugin_calling: false,
            param: None,
            cancel: false,
        }
    }

    /// A plugin invocation carrying the command remainder.
    pub fn plugin(target: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            is_plugin_calling: true,
            param: Some(param.into()),
            cancel: false,
        }
    }

    /// Cancellation of a running plugin.
    pub fn cancel(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            is_plugin_calling: true,
            param: None,
            cancel: true,
        }
    }

    /// Agent shutdown request.
    pub fn quit() -> Self {
        Self {
            target: QUIT_TARGET.to_string(),
            is_plugin_calling: true,
            param: None,
            cancel: false,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Reply to the handshake request. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub app_type: String,
    pub pid: u32,
}

impl HandshakeResponse {
    /// Whether the reply came from this tool's agent.
    pub fn is_ours(&self) -> bool {
        self.app_type == AGENT_APP_TYPE
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_request_is_not_a_plugin_call() {
        let json: serde_json::Value =
            serde_json::from_slice(&AgentRequest::status().encode().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"target": "status", "is_plugin_calling": false})
        );
    }

    #[test]
    fn plugin_request_carries_remainder_verbatim() {
        let json: serde_json::Value =
            serde_json::from_slice(&AgentRequest::plugin("trace", " mod fn -n 3").encode().unwrap())
                .unwrap();
        assert_eq!(json["target"], "trace");
        assert_eq!(json["is_plugin_calling"], true);
        assert_eq!(json["param"], " mod fn -n 3");
        assert!(json.get("cancel").is_none());
    }

    #[test]
    fn cancel_request_sets_flag() {
        let json: serde_json::Value =
            serde_json::from_slice(&AgentRequest::cancel("watch").encode().unwrap()).unwrap();
        assert_eq!(json["cancel"], true);
        assert!(json.get("param").is_none());
    }

    #[test]
    fn handshake_ignores_extra_fields() {
        let resp = HandshakeResponse::decode(
            br#"{"app_type":"py_flight_profiler","pid":4242,"version":"1.2"}"#,
        )
        .unwrap();
        assert_eq!(resp.pid, 4242);
        assert!(resp.is_ours());
    }

    #[test]
    fn foreign_app_type_is_not_ours() {
        let resp = HandshakeResponse::decode(br#"{"app_type":"other_tool","pid":4242}"#).unwrap();
        assert!(!resp.is_ours());
    }

    #[test]
    fn missing_pid_is_a_decode_error() {
        assert!(HandshakeResponse::decode(br#"{"app_type":"py_flight_profiler"}"#).is_err());
        assert!(HandshakeResponse::decode(b"HTTP/1.1 400 Bad Request\r\n").is_err());
    }
}
