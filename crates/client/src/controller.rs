//! Submission policy: gate check, optimistic append, send, then commit
//! or rollback when the reply (or a disconnect) arrives.

use chrono::Utc;
use proto::{ChatError, InboundFrame, Message, ModelName, OutboundFrame};
use tracing::{debug, info, warn};

use crate::bus::CrossTabBus;
use crate::channel::FrameSink;
use crate::gate::UsageGate;
use crate::store::ConversationStore;

/// Rejection text used when the reply to a submission cannot be used.
pub const UNREADABLE_REPLY: &str = "The server sent a reply that could not be read";

/// How an inbound frame was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The pending message was kept and the reply appended.
    Committed(Message),
    /// The pending message was removed and the input restored.
    RolledBack(ChatError),
    /// No submission was pending; the frame only updated the gate.
    Unsolicited,
}

/// Owns the input field, the `waiting` flag, and the pending token.
///
/// Nothing here retries: every failure ends that one attempt.
#[derive(Debug, Clone, Default)]
pub struct SubmissionController {
    input: String,
    waiting: bool,
    /// Literal input captured at submit time, restored verbatim on failure.
    pending_token: Option<String>,
}

impl SubmissionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn pending_token(&self) -> Option<&str> {
        self.pending_token.as_deref()
    }

    /// Clears input, `waiting`, and the pending token (model switch).
    pub fn reset(&mut self) {
        self.input.clear();
        self.waiting = false;
        self.pending_token = None;
    }

    /// Submits the current input on `model`.
    ///
    /// On success the optimistic user message is in `store`, already
    /// published on `bus`, and its frame is queued on `sink`. Failures
    /// before the append leave every piece of state untouched; a failed
    /// send rolls the append back and restores the input.
    pub fn submit<S: FrameSink + ?Sized>(
        &mut self,
        model: &ModelName,
        store: &mut ConversationStore,
        gate: &UsageGate,
        bus: Option<&CrossTabBus>,
        sink: Option<&mut S>,
    ) -> Result<Message, ChatError> {
        let prompt = self.input.trim();
        if prompt.is_empty() {
            return Err(ChatError::EmptyInput);
        }
        if store.is_pending() {
            return Err(ChatError::SubmissionPending);
        }
        gate.may_start(model).map_err(|refusal| {
            let err = ChatError::from(refusal);
            info!(model = %model, kind = err.kind(), "Submission refused by usage gate");
            err
        })?;

        let prompt = prompt.to_string();
        self.pending_token = Some(self.input.clone());

        let message = Message::user(prompt.clone());
        store
            .append_optimistic(message.clone())
            .map_err(|_| ChatError::SubmissionPending)?;
        // Siblings see the message before the server confirms it and keep it
        // even if this instance later rolls back.
        if let Some(bus) = bus {
            bus.publish(&message);
        }

        self.input.clear();
        self.waiting = true;

        let frame = OutboundFrame::new(model.clone(), prompt);
        let sent = match sink {
            Some(sink) => sink.send_frame(frame),
            None => Err(proto::ChannelError::NotOpen),
        };
        if let Err(e) = sent {
            warn!(model = %model, "Send failed: {e}");
            return Err(self.roll_back(store, ChatError::ChannelNotConnected));
        }

        debug!(model = %model, "Submission sent");
        Ok(message)
    }

    /// Resolves the pending submission with an inbound frame.
    pub fn on_frame(
        &mut self,
        frame: InboundFrame,
        store: &mut ConversationStore,
        gate: &mut UsageGate,
        bus: Option<&CrossTabBus>,
    ) -> ReplyOutcome {
        gate.apply_server_update(frame.remaining_requests());

        if !store.is_pending() {
            warn!("Reply arrived with no pending submission; ignoring");
            return ReplyOutcome::Unsolicited;
        }

        match frame {
            InboundFrame::Reply(reply) => {
                let created_at = reply.created_at.unwrap_or_else(Utc::now);
                let message = Message::assistant(reply.response, created_at);
                if let Err(e) = store.commit(message.clone()) {
                    warn!("Commit failed: {e}");
                    return ReplyOutcome::Unsolicited;
                }
                self.waiting = false;
                self.pending_token = None;
                if let Some(bus) = bus {
                    bus.publish(&message);
                }
                ReplyOutcome::Committed(message)
            }
            InboundFrame::Rejected(reject) => {
                ReplyOutcome::RolledBack(self.roll_back(store, ChatError::ServerRejected(reject.error)))
            }
        }
    }

    /// Resolves a pending submission whose reply arrived but cannot be
    /// applied: undecodable, or produced for another model.
    pub fn on_unusable_reply(&mut self, store: &mut ConversationStore) -> Option<ChatError> {
        if !store.is_pending() {
            return None;
        }
        Some(self.roll_back(store, ChatError::ServerRejected(UNREADABLE_REPLY.to_string())))
    }

    /// Resolves a pending submission after the channel dropped.
    pub fn on_channel_lost(&mut self, store: &mut ConversationStore) -> Option<ChatError> {
        if !store.is_pending() {
            return None;
        }
        Some(self.roll_back(store, ChatError::ConnectionLost))
    }

    fn roll_back(&mut self, store: &mut ConversationStore, error: ChatError) -> ChatError {
        if let Err(e) = store.rollback() {
            warn!("Rollback failed: {e}");
        }
        if let Some(token) = self.pending_token.take() {
            self.input = token;
        }
        self.waiting = false;
        warn!(kind = error.kind(), "Submission rolled back: {error}");
        error
    }
}
