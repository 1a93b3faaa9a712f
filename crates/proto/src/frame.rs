//! Session channel frames exchanged with the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::ModelName;

/// Frame sent from the client for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Model the prompt is addressed to.
    pub model_name: ModelName,
    /// Prompt text.
    pub prompt: String,
}

impl OutboundFrame {
    /// Creates an outbound prompt frame.
    pub fn new(model_name: ModelName, prompt: impl Into<String>) -> Self {
        Self {
            model_name,
            prompt: prompt.into(),
        }
    }
}

/// Successful answer to a submitted prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyFrame {
    /// Assistant response text.
    pub response: String,
    /// Server timestamp; defaulted to "now" by the receiver when absent or unreadable.
    #[serde(
        default,
        deserialize_with = "crate::timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    /// Updated quota, `-1` for unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_requests: Option<i64>,
    /// Echo of the model the reply was produced by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<ModelName>,
    /// Echo of the prompt the reply answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Server-side rejection of a submitted prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectFrame {
    /// Human-readable reason, surfaced verbatim.
    pub error: String,
    /// Updated quota, `-1` for unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_requests: Option<i64>,
}

/// Frame received from the backend. Exactly one per submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    /// The prompt was answered.
    Reply(ReplyFrame),
    /// The prompt was rejected.
    Rejected(RejectFrame),
}

impl InboundFrame {
    /// Quota carried by the frame, if the server included one.
    pub fn remaining_requests(&self) -> Option<i64> {
        match self {
            InboundFrame::Reply(reply) => reply.remaining_requests,
            InboundFrame::Rejected(reject) => reject.remaining_requests,
        }
    }

    /// Decodes a text frame.
    pub fn from_json(text: &str) -> Result<Self, crate::error::ProtoError> {
        serde_json::from_str(text).map_err(|e| crate::error::ProtoError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_frame_uses_wire_field_names() {
        let frame = OutboundFrame::new(ModelName::from("gemini"), "hello");
        let json = serde_json::to_string(&frame).expect("serialize");
        assert_eq!(json, r#"{"model_name":"gemini","prompt":"hello"}"#);
    }

    #[test]
    fn decodes_minimal_reply() {
        let frame = InboundFrame::from_json(r#"{"response":"hi"}"#).expect("decode");
        match frame {
            InboundFrame::Reply(reply) => {
                assert_eq!(reply.response, "hi");
                assert_eq!(reply.created_at, None);
                assert_eq!(reply.remaining_requests, None);
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn decodes_full_server_reply_with_naive_timestamp() {
        let json = r#"{"prompt":"hi","response":"hello back","created_at":"2025-01-27T12:00:00.5","model_name":"groq","remaining_requests":4}"#;
        let frame = InboundFrame::from_json(json).expect("decode");
        assert_eq!(frame.remaining_requests(), Some(4));
        let InboundFrame::Reply(reply) = frame else {
            panic!("expected reply");
        };
        assert_eq!(reply.model_name, Some(ModelName::from("groq")));
        assert_eq!(reply.prompt.as_deref(), Some("hi"));
        assert!(reply.created_at.is_some());
    }

    #[test]
    fn reply_with_unreadable_timestamp_still_decodes() {
        let json = r#"{"response":"hello back","created_at":"Mon, 01 Jan 2024 00:00:00 GMT"}"#;
        let frame = InboundFrame::from_json(json).expect("decode");
        let InboundFrame::Reply(reply) = frame else {
            panic!("expected reply");
        };
        assert_eq!(reply.response, "hello back");
        assert_eq!(reply.created_at, None);
    }

    #[test]
    fn decodes_error_frame() {
        let frame = InboundFrame::from_json(r#"{"error":"provider overloaded","remaining_requests":0}"#)
            .expect("decode");
        assert_eq!(frame.remaining_requests(), Some(0));
        assert!(matches!(
            frame,
            InboundFrame::Rejected(RejectFrame { ref error, .. }) if error == "provider overloaded"
        ));
    }

    #[test]
    fn rejects_frame_with_neither_shape() {
        let err = InboundFrame::from_json(r#"{"hello":"world"}"#).expect_err("should fail");
        assert!(err.to_string().contains("Serialization error"));
    }
}
