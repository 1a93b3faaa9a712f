//! Composition root: binds one channel, one bus, and one conversation to
//! the selected model and dispatches their events on a single loop.

use std::sync::Arc;

use proto::{BackendError, ChatError, Message, ModelName};
use reqwest::Url;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;
use crate::bus::{BroadcastHub, CrossTabBus};
use crate::channel::{ChannelEvent, ChannelState, ChannelTag, SessionChannel, TaggedEvent};
use crate::controller::{ReplyOutcome, SubmissionController};
use crate::credential::CredentialSource;
use crate::gate::UsageGate;
use crate::store::ConversationStore;

/// What one turn of the dispatch loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The active model's channel finished its handshake.
    Connected(ModelName),
    /// The channel dropped with nothing pending.
    Disconnected { model: ModelName, reason: String },
    /// A reply was committed after the pending user message.
    Committed(Message),
    /// The pending submission was undone.
    RolledBack(ChatError),
    /// A sibling instance's message was appended.
    Synced(Message),
    /// The event belonged to a channel that is no longer active, or
    /// resolved nothing.
    Discarded,
}

/// Everything bound to the currently selected model.
struct ActiveModel {
    model: ModelName,
    generation: u64,
    channel: Option<SessionChannel>,
    bus: CrossTabBus,
}

impl ActiveModel {
    fn tag(&self) -> ChannelTag {
        ChannelTag {
            model: self.model.clone(),
            generation: self.generation,
        }
    }
}

enum Incoming {
    Channel(TaggedEvent),
    Bus(Option<Message>),
}

/// One client instance ("tab").
pub struct ModelSession {
    backend: Arc<dyn ChatBackend>,
    credential: Arc<dyn CredentialSource>,
    hub: BroadcastHub,
    ws_url: Url,
    store: ConversationStore,
    gate: UsageGate,
    controller: SubmissionController,
    active: Option<ActiveModel>,
    generation: u64,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    events_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    notices: Vec<ChatError>,
}

impl ModelSession {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        credential: Arc<dyn CredentialSource>,
        hub: BroadcastHub,
        ws_url: Url,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            credential,
            hub,
            ws_url,
            store: ConversationStore::new(),
            gate: UsageGate::new(),
            controller: SubmissionController::new(),
            active: None,
            generation: 0,
            events_tx,
            events_rx,
            notices: Vec::new(),
        }
    }

    /// Selectable models, as reported by the backend.
    pub async fn models(&self) -> Result<Vec<ModelName>, BackendError> {
        self.backend.models().await
    }

    /// Makes `model` the active one. Returns `false` when it already was.
    ///
    /// Tears down the previous channel and bus, clears the input, loads
    /// history and availability, then opens a fresh channel and bus.
    /// Fetch failures are queued as notices and never abort the switch.
    pub async fn select_model(&mut self, model: ModelName) -> bool {
        if self.active_model() == Some(&model) {
            debug!(model = %model, "Model already active");
            return false;
        }

        self.teardown();
        self.controller.reset();
        self.generation += 1;
        let generation = self.generation;
        info!(model = %model, generation, "Activating model");

        match self.backend.history(&model).await {
            Ok(history) => {
                self.store.reset(model.clone(), history.chat);
                if let Some(usage) = history.usage_info {
                    self.gate.apply_usage_info(usage);
                }
            }
            Err(e) => {
                warn!(model = %model, "History fetch failed: {e}");
                self.store.reset(model.clone(), Vec::new());
                self.notices.push(ChatError::HistoryFetchFailed(e.to_string()));
            }
        }

        match self.backend.availability().await {
            Ok(availability) => self.gate.set_availability(availability),
            Err(e) => {
                warn!(model = %model, "Availability fetch failed: {e}");
                self.gate.forget_availability(&model);
                self.notices
                    .push(ChatError::AvailabilityFetchFailed(e.to_string()));
            }
        }

        let tag = ChannelTag {
            model: model.clone(),
            generation,
        };
        let channel = match SessionChannel::connect(
            &self.ws_url,
            tag,
            self.credential.as_ref(),
            self.events_tx.clone(),
        ) {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!(model = %model, "No session channel opened: {e}");
                self.notices.push(ChatError::ChannelNotConnected);
                None
            }
        };
        let bus = self.hub.join(model.clone());

        self.active = Some(ActiveModel {
            model,
            generation,
            channel,
            bus,
        });
        true
    }

    /// Replaces the input field.
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.controller.set_input(text);
    }

    /// Submits the current input field on the active model.
    pub fn submit(&mut self) -> Result<Message, ChatError> {
        let Some(active) = self.active.as_mut() else {
            return Err(ChatError::ChannelNotConnected);
        };
        self.controller.submit(
            &active.model,
            &mut self.store,
            &self.gate,
            Some(&active.bus),
            active.channel.as_mut(),
        )
    }

    /// Sets the input to `text` and submits it.
    pub fn send(&mut self, text: impl Into<String>) -> Result<Message, ChatError> {
        self.set_input(text);
        self.submit()
    }

    /// Waits for the next channel or bus event and applies it.
    ///
    /// Handlers run to completion; the only suspension point is the wait
    /// itself, so dropping the future mid-wait loses nothing.
    pub async fn next_event(&mut self) -> SessionEvent {
        let incoming = {
            let bus = self.active.as_mut().map(|active| &mut active.bus);
            tokio::select! {
                Some(tagged) = self.events_rx.recv() => Incoming::Channel(tagged),
                message = recv_bus(bus) => Incoming::Bus(message),
            }
        };
        match incoming {
            Incoming::Channel(tagged) => self.handle_channel_event(tagged),
            Incoming::Bus(Some(message)) => self.handle_bus_message(message),
            Incoming::Bus(None) => SessionEvent::Discarded,
        }
    }

    /// Applies one channel event, discarding it unless it came from the
    /// channel that is active right now.
    pub fn handle_channel_event(&mut self, tagged: TaggedEvent) -> SessionEvent {
        let Some(active) = self.active.as_mut() else {
            debug!(model = %tagged.tag.model, "Discarding channel event with no active model");
            return SessionEvent::Discarded;
        };
        if active.tag() != tagged.tag {
            debug!(
                model = %tagged.tag.model,
                generation = tagged.tag.generation,
                active_generation = active.generation,
                "Discarding stale channel event"
            );
            return SessionEvent::Discarded;
        }

        match tagged.event {
            ChannelEvent::Opened => {
                if let Some(channel) = active.channel.as_mut() {
                    channel.mark_open();
                }
                SessionEvent::Connected(active.model.clone())
            }
            ChannelEvent::Reply(frame) => {
                if let proto::InboundFrame::Reply(reply) = &frame
                    && let Some(reply_model) = &reply.model_name
                    && reply_model != &active.model
                {
                    warn!(expected = %active.model, got = %reply_model, "Reply names another model");
                    return match self.controller.on_unusable_reply(&mut self.store) {
                        Some(error) => SessionEvent::RolledBack(error),
                        None => SessionEvent::Discarded,
                    };
                }
                match self
                    .controller
                    .on_frame(frame, &mut self.store, &mut self.gate, Some(&active.bus))
                {
                    ReplyOutcome::Committed(message) => SessionEvent::Committed(message),
                    ReplyOutcome::RolledBack(error) => SessionEvent::RolledBack(error),
                    ReplyOutcome::Unsolicited => SessionEvent::Discarded,
                }
            }
            ChannelEvent::Unreadable { reason } => {
                debug!(model = %active.model, %reason, "Unreadable frame on active channel");
                match self.controller.on_unusable_reply(&mut self.store) {
                    Some(error) => SessionEvent::RolledBack(error),
                    None => SessionEvent::Discarded,
                }
            }
            ChannelEvent::Closed { reason } => {
                if let Some(channel) = active.channel.as_mut() {
                    channel.mark_closed();
                }
                match self.controller.on_channel_lost(&mut self.store) {
                    Some(error) => SessionEvent::RolledBack(error),
                    None => SessionEvent::Disconnected {
                        model: active.model.clone(),
                        reason,
                    },
                }
            }
        }
    }

    /// Appends a message published by a sibling instance.
    pub fn handle_bus_message(&mut self, message: Message) -> SessionEvent {
        if self.active.is_none() {
            return SessionEvent::Discarded;
        }
        self.store.append_from_bus(message.clone());
        SessionEvent::Synced(message)
    }

    /// Closes the channel, then the bus. Used on unmount.
    pub fn shutdown(&mut self) {
        self.teardown();
        self.controller.reset();
    }

    fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let ActiveModel {
            model,
            generation,
            channel,
            bus,
        } = active;
        if let Some(mut channel) = channel {
            channel.close();
        }
        drop(bus);
        debug!(model = %model, generation, "Model session torn down");
    }

    /// Drains the non-fatal notices queued since the last call.
    pub fn take_notices(&mut self) -> Vec<ChatError> {
        std::mem::take(&mut self.notices)
    }

    pub fn active_model(&self) -> Option<&ModelName> {
        self.active.as_ref().map(|active| &active.model)
    }

    /// Tag of the active channel slot, if a model is active.
    pub fn current_tag(&self) -> Option<ChannelTag> {
        self.active.as_ref().map(ActiveModel::tag)
    }

    pub fn channel_state(&self) -> ChannelState {
        self.active
            .as_ref()
            .and_then(|active| active.channel.as_ref())
            .map(SessionChannel::state)
            .unwrap_or(ChannelState::Closed)
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn gate(&self) -> &UsageGate {
        &self.gate
    }

    pub fn input(&self) -> &str {
        self.controller.input()
    }

    pub fn is_waiting(&self) -> bool {
        self.controller.is_waiting()
    }
}

impl Drop for ModelSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn recv_bus(bus: Option<&mut CrossTabBus>) -> Option<Message> {
    match bus {
        Some(bus) => bus.recv().await,
        None => std::future::pending().await,
    }
}
