//! Ordered conversation for the active model, with a two-phase
//! optimistic append (`append_optimistic` → `commit` | `rollback`).

use proto::{HistoryRecord, Message, ModelName, StoreError};
use tracing::debug;

/// Conversation for exactly one model.
///
/// At most one optimistic user message is pending at a time. Messages
/// arriving from sibling instances are appended as committed facts and
/// never touch the pending slot.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    model: Option<ModelName>,
    messages: Vec<Message>,
    /// Index of the optimistic user message, if one is pending.
    pending: Option<usize>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole conversation with `history` for `model`.
    ///
    /// Each record expands into a user message followed by an assistant
    /// message. Any pending submission is dropped.
    pub fn reset(&mut self, model: ModelName, history: Vec<HistoryRecord>) {
        self.messages = history
            .into_iter()
            .flat_map(HistoryRecord::into_messages)
            .collect();
        self.pending = None;
        debug!(model = %model, messages = self.messages.len(), "Conversation reset");
        self.model = Some(model);
    }

    /// Appends a speculative user message and marks it pending.
    pub fn append_optimistic(&mut self, msg: Message) -> Result<(), StoreError> {
        if self.pending.is_some() {
            return Err(StoreError::AlreadyPending);
        }
        self.pending = Some(self.messages.len());
        self.messages.push(msg);
        Ok(())
    }

    /// Keeps the pending message and appends the assistant reply.
    pub fn commit(&mut self, reply: Message) -> Result<(), StoreError> {
        if self.pending.take().is_none() {
            return Err(StoreError::NoPendingSubmission);
        }
        self.messages.push(reply);
        Ok(())
    }

    /// Removes the pending message and returns it.
    ///
    /// The removed entry is the one `append_optimistic` added, even if
    /// sibling messages were appended after it in the meantime.
    pub fn rollback(&mut self) -> Result<Message, StoreError> {
        let index = self.pending.take().ok_or(StoreError::NoPendingSubmission)?;
        Ok(self.messages.remove(index))
    }

    /// Appends a message published by a sibling instance.
    pub fn append_from_bus(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Model the conversation belongs to; `None` before the first reset.
    pub fn model(&self) -> Option<&ModelName> {
        self.model.as_ref()
    }
}
