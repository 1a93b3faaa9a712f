//! Usage and availability gate consulted before every submission.

use proto::{AvailabilityMap, ChatError, ModelName, UsageInfo};
use tracing::debug;

/// Sentinel the server uses for "no quota".
pub const UNLIMITED: i64 = -1;

/// Why a submission may not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// Quota is exhausted.
    RateLimited,
    /// The model's provider is flagged unavailable.
    Unavailable,
}

impl From<Refusal> for ChatError {
    fn from(refusal: Refusal) -> Self {
        match refusal {
            Refusal::RateLimited => ChatError::RateLimited,
            Refusal::Unavailable => ChatError::Unavailable,
        }
    }
}

/// Quota and availability state. The server is authoritative: the
/// remaining count only ever changes by replacement with a server value.
#[derive(Debug, Clone)]
pub struct UsageGate {
    remaining_requests: i64,
    limit: i64,
    availability: AvailabilityMap,
}

impl Default for UsageGate {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageGate {
    /// Permissive gate: unlimited quota, availability unknown.
    pub fn new() -> Self {
        Self {
            remaining_requests: UNLIMITED,
            limit: 0,
            availability: AvailabilityMap::new(),
        }
    }

    /// Decides whether a submission on `model` may start. Side-effect free.
    pub fn may_start(&self, model: &ModelName) -> Result<(), Refusal> {
        if self.availability.get(model) == Some(&false) {
            return Err(Refusal::Unavailable);
        }
        if self.remaining_requests == 0 {
            return Err(Refusal::RateLimited);
        }
        Ok(())
    }

    /// Replaces the remaining count when the server supplied one.
    pub fn apply_server_update(&mut self, remaining: Option<i64>) {
        if let Some(remaining) = remaining {
            debug!(remaining, "Usage gate updated from server");
            self.remaining_requests = remaining;
        }
    }

    /// Applies the quota snapshot that accompanies a history fetch.
    pub fn apply_usage_info(&mut self, info: UsageInfo) {
        self.remaining_requests = info.remaining_requests;
        self.limit = info.limit;
    }

    /// Replaces the availability map.
    pub fn set_availability(&mut self, availability: AvailabilityMap) {
        self.availability = availability;
    }

    /// Drops any availability flag for `model`, making it permissive.
    pub fn forget_availability(&mut self, model: &ModelName) {
        self.availability.remove(model);
    }

    /// Availability flag for `model`, `None` when unknown.
    pub fn availability(&self, model: &ModelName) -> Option<bool> {
        self.availability.get(model).copied()
    }

    pub fn remaining(&self) -> i64 {
        self.remaining_requests
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn is_unlimited(&self) -> bool {
        self.remaining_requests == UNLIMITED
    }

    /// Short quota description for status lines.
    pub fn summary(&self) -> String {
        if self.is_unlimited() {
            "unlimited".to_string()
        } else {
            format!("{} of {} requests left", self.remaining_requests, self.limit)
        }
    }
}
