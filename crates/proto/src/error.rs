use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Session channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Send attempted while the channel is not open.
    #[error("Channel is not open")]
    NotOpen,

    /// No bearer token is available, so no channel is opened.
    #[error("No credential available")]
    MissingCredential,
}

/// HTTP collaborator errors
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport-level request failure.
    #[error("Request failed: {0}")]
    Request(String),

    /// Server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not match the expected schema.
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Conversation store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A submission is already awaiting its reply.
    #[error("A submission is already pending")]
    AlreadyPending,

    /// Commit or rollback without a pending submission.
    #[error("No pending submission")]
    NoPendingSubmission,
}

/// User-visible chat failures. None of these are retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Input was empty after trimming.
    #[error("Type a message first")]
    EmptyInput,

    /// A previous submission has not been answered yet.
    #[error("Wait for the current reply before sending another message")]
    SubmissionPending,

    /// Quota exhausted; no network call was made.
    #[error("You have used all of your free messages")]
    RateLimited,

    /// Model provider flagged unavailable; no network call was made.
    #[error("This model is currently unavailable")]
    Unavailable,

    /// Send attempted while the session channel was not open.
    #[error("Not connected to the chat server")]
    ChannelNotConnected,

    /// Server rejected the prompt; text is the server's own.
    #[error("{0}")]
    ServerRejected(String),

    /// Channel dropped while a reply was pending.
    #[error("Connection lost before a reply arrived")]
    ConnectionLost,

    /// History could not be loaded; conversation starts empty.
    #[error("Could not load chat history: {0}")]
    HistoryFetchFailed(String),

    /// Availability could not be loaded; all models treated as available.
    #[error("Could not load model availability: {0}")]
    AvailabilityFetchFailed(String),
}

impl ChatError {
    /// Stable snake_case code, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::EmptyInput => "empty_input",
            ChatError::SubmissionPending => "submission_pending",
            ChatError::RateLimited => "rate_limited",
            ChatError::Unavailable => "unavailable",
            ChatError::ChannelNotConnected => "channel_not_connected",
            ChatError::ServerRejected(_) => "server_rejected",
            ChatError::ConnectionLost => "connection_lost",
            ChatError::HistoryFetchFailed(_) => "history_fetch_failed",
            ChatError::AvailabilityFetchFailed(_) => "availability_fetch_failed",
        }
    }

    /// Whether the failure undid an optimistic append.
    pub fn rolled_back(&self) -> bool {
        matches!(
            self,
            ChatError::ChannelNotConnected | ChatError::ServerRejected(_) | ChatError::ConnectionLost
        )
    }
}

/// Internal proto errors
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Generic serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
