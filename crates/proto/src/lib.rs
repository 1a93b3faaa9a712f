//! Shared protocol types for the chat client.
//!
//! This crate defines serializable message, frame, and history payloads
//! and the strongly-typed error enums shared across the workspace.

pub mod error;
pub mod frame;
pub mod history;
pub mod message;
pub mod timestamp;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of session channel frames.
pub use frame::{InboundFrame, OutboundFrame, RejectFrame, ReplyFrame};
/// Re-export of HTTP collaborator payloads.
pub use history::{AvailabilityMap, HistoryRecord, HistoryResponse, PlatformsResponse, UsageInfo};
/// Re-export of conversation message types.
pub use message::{Message, ModelName, Role};
