//! Payloads returned by the HTTP collaborators.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Message, ModelName};

/// One stored prompt/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Prompt the user sent.
    pub prompt: String,
    /// Response the model produced.
    pub response: String,
    /// When the pair was stored.
    #[serde(deserialize_with = "crate::timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Expands the record into its user and assistant messages, in that order.
    pub fn into_messages(self) -> [Message; 2] {
        [
            Message {
                role: crate::Role::User,
                content: self.prompt,
                created_at: self.created_at,
            },
            Message::assistant(self.response, self.created_at),
        ]
    }
}

/// Quota snapshot attached to a history response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    /// Requests left, `-1` for unlimited.
    pub remaining_requests: i64,
    /// Configured request ceiling.
    pub limit: i64,
}

/// Response of the history fetch for one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResponse {
    /// Stored records in conversation order.
    #[serde(default)]
    pub chat: Vec<HistoryRecord>,
    /// Quota snapshot, absent on some deployments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_info: Option<UsageInfo>,
}

/// Response of the model list fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformsResponse {
    /// Model names; the first is the default selection.
    pub platforms: Vec<ModelName>,
}

/// Per-model availability flags.
pub type AvailabilityMap = HashMap<ModelName, bool>;
