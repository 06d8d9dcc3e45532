use axum::extract::ws::Message;
use log::error;
use serde::{Deserialize, Serialize};

use crate::error::SurveyError;
use crate::models::Snapshot;

/// Frames pushed to real-time subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Sent once, to the joining subscriber only.
    State(Snapshot),
    /// A vote was accepted or the online count changed.
    Update(Snapshot),
    /// Full replacement after a reset; clients restart from zero.
    Reset(Snapshot),
    Pong,
}

/// Frames a subscriber may send. Anything else is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Ping,
}

impl ClientMessage {
    /// `None` for malformed or unrecognized frames.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Serialize a frame once so it can be cloned to every subscriber.
pub fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!("Failed to encode {:?}: {}", message, e);
            None
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub selections: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VoteResponse {
    pub fn accepted() -> Self {
        Self {
            success: true,
            message: Some("Vote recorded".to_string()),
            error: None,
        }
    }

    pub fn rejected(err: &SurveyError) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(err.user_message().to_string()),
        }
    }

    /// The body could not be read as a vote at all.
    pub fn malformed() -> Self {
        Self {
            success: false,
            message: None,
            error: Some("Invalid vote request".to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdminResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdminResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Catalog, Tally};
    use std::sync::Arc;

    fn snapshot() -> Snapshot {
        let mut tallies = Tally::zeroed(Arc::new(Catalog::parse("A,B").unwrap()));
        tallies.increment("A");
        Snapshot {
            tallies,
            total_votes: 1,
            online_users: 2,
        }
    }

    #[test]
    fn server_frames_are_tagged() {
        let update = serde_json::to_value(ServerMessage::Update(snapshot())).unwrap();
        assert_eq!(
            update,
            serde_json::json!({
                "type": "update",
                "tallies": {"A": 1, "B": 0},
                "totalVotes": 1,
                "onlineUsers": 2
            })
        );

        let pong = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(pong, r#"{"type":"pong"}"#);
    }

    #[test]
    fn client_frames_tolerate_garbage() {
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#), Some(ClientMessage::Ping));
        assert_eq!(ClientMessage::parse(r#"{"type":"ping","t":12}"#), Some(ClientMessage::Ping));
        assert_eq!(ClientMessage::parse(r#"{"type":"vote"}"#), None);
        assert_eq!(ClientMessage::parse("ping"), None);
        assert_eq!(ClientMessage::parse(""), None);
    }

    #[test]
    fn vote_request_accepts_missing_fields() {
        let request: VoteRequest = serde_json::from_str(r#"{"selections":["A"]}"#).unwrap();
        assert!(request.session_id.is_empty());
        assert_eq!(request.selections, ["A"]);
    }
}
