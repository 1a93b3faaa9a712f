//! Client-side chat state: per-model session channel, conversation
//! store, usage gate, cross-instance bus, and the submission controller
//! that ties them together under [`ModelSession`].

pub mod backend;
pub mod bus;
pub mod channel;
pub mod controller;
pub mod credential;
pub mod gate;
pub mod session;
pub mod store;

pub use backend::{ChatBackend, HttpBackend};
pub use bus::{BroadcastHub, BusEnvelope, CrossTabBus, DEFAULT_BUS_CAPACITY};
pub use channel::{ChannelEvent, ChannelState, ChannelTag, FrameSink, SessionChannel, TaggedEvent};
pub use controller::{ReplyOutcome, SubmissionController, UNREADABLE_REPLY};
pub use credential::{CredentialSource, StaticToken, TokenFile};
pub use gate::{Refusal, UNLIMITED, UsageGate};
pub use session::{ModelSession, SessionEvent};
pub use store::ConversationStore;
