/// Tuning constants shared by every ScrumKit client.
///
/// The defaults must match deployed clients: they govern how often peers
/// expect heartbeats, how long presence stays "recently active" and how
/// aggressively clients retry against the shared backend.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

pub const CONNECTION_MAX_RETRY_ATTEMPTS: u32 = 10;
pub const QUERY_MAX_RETRY_ATTEMPTS: u32 = 3;
pub const INITIAL_RETRY_DELAY_MS: u64 = 1_000;
pub const CONNECTION_MAX_RETRY_DELAY_MS: u64 = 60_000;
pub const QUERY_MAX_RETRY_DELAY_MS: u64 = 10_000;
pub const CONNECTION_CHECK_INTERVAL_MS: u64 = 30_000;
pub const RECENTLY_ACTIVE_THRESHOLD_MS: i64 = 60_000;
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const CURSOR_THROTTLE_MS: u64 = 100;
pub const CURSOR_MIN_MOVEMENT_PX: f64 = 5.0;
pub const MAX_ACTIONS_PER_MINUTE: usize = 30;
pub const VOTE_COOLDOWN_MS: u64 = 500;
pub const ITEM_CREATION_COOLDOWN_MS: u64 = 1_000;
pub const MAX_DISPLAYED_AVATARS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeConfig {
    pub connection_max_retry_attempts: u32,
    pub query_max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub connection_max_retry_delay_ms: u64,
    pub query_max_retry_delay_ms: u64,
    pub connection_check_interval_ms: u64,
    pub recently_active_threshold_ms: i64,
    pub heartbeat_interval_ms: u64,
    pub cursor_throttle_ms: u64,
    pub cursor_min_movement_px: f64,
    pub max_actions_per_minute: usize,
    pub vote_cooldown_ms: u64,
    pub item_creation_cooldown_ms: u64,
    pub max_displayed_avatars: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            connection_max_retry_attempts: CONNECTION_MAX_RETRY_ATTEMPTS,
            query_max_retry_attempts: QUERY_MAX_RETRY_ATTEMPTS,
            initial_retry_delay_ms: INITIAL_RETRY_DELAY_MS,
            connection_max_retry_delay_ms: CONNECTION_MAX_RETRY_DELAY_MS,
            query_max_retry_delay_ms: QUERY_MAX_RETRY_DELAY_MS,
            connection_check_interval_ms: CONNECTION_CHECK_INTERVAL_MS,
            recently_active_threshold_ms: RECENTLY_ACTIVE_THRESHOLD_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            cursor_throttle_ms: CURSOR_THROTTLE_MS,
            cursor_min_movement_px: CURSOR_MIN_MOVEMENT_PX,
            max_actions_per_minute: MAX_ACTIONS_PER_MINUTE,
            vote_cooldown_ms: VOTE_COOLDOWN_MS,
            item_creation_cooldown_ms: ITEM_CREATION_COOLDOWN_MS,
            max_displayed_avatars: MAX_DISPLAYED_AVATARS,
        }
    }
}

impl RealtimeConfig {
    /// Budget for session probes and the query wrapper.
    pub fn query_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.query_max_retry_attempts,
            initial_delay: Duration::from_millis(self.initial_retry_delay_ms),
            max_delay: Duration::from_millis(self.query_max_retry_delay_ms),
        }
    }

    /// Budget for re-opening a realtime channel.
    pub fn channel_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.connection_max_retry_attempts,
            initial_delay: Duration::from_millis(self.initial_retry_delay_ms),
            max_delay: Duration::from_millis(self.connection_max_retry_delay_ms),
        }
    }

    pub fn connection_check_interval(&self) -> Duration {
        Duration::from_millis(self.connection_check_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
