//! Client-side action throttling.
//!
//! A sliding one-minute window caps how many board mutations a user can make,
//! and per-kind cooldowns stop accidental double votes and double submits.
//! Callers pass `now` explicitly so the guard has no hidden clock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::RealtimeConfig;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RateLimited {
    #[error("Too many actions, try again in {}ms", retry_after.as_millis())]
    TooManyActions { retry_after: Duration },

    #[error("Please wait {}ms before doing that again", retry_after.as_millis())]
    Cooldown { retry_after: Duration },
}

impl RateLimited {
    pub fn retry_after(&self) -> Duration {
        match self {
            RateLimited::TooManyActions { retry_after } | RateLimited::Cooldown { retry_after } => {
                *retry_after
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    CreateItem,
    Vote,
    /// Any other mutation: edits, moves, deletes.
    Other,
}

/// Sliding-window counter.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    timestamps: VecDeque<Instant>,
    max_per_window: usize,
}

impl SlidingWindow {
    pub fn new(max_per_window: usize) -> Self {
        Self {
            timestamps: VecDeque::new(),
            max_per_window,
        }
    }

    /// Time until a slot frees up, or `None` if one is free now.
    fn wait_time(&mut self, now: Instant) -> Option<Duration> {
        while self
            .timestamps
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= WINDOW)
        {
            self.timestamps.pop_front();
        }
        if self.timestamps.len() < self.max_per_window {
            return None;
        }
        let oldest = *self.timestamps.front()?;
        Some(WINDOW.saturating_sub(now.saturating_duration_since(oldest)))
    }

    fn record(&mut self, now: Instant) {
        self.timestamps.push_back(now);
    }

    pub fn check(&mut self, now: Instant) -> bool {
        if self.wait_time(now).is_some() {
            return false;
        }
        self.record(now);
        true
    }
}

#[derive(Debug, Clone)]
pub struct Cooldown {
    period: Duration,
    last: Option<Instant>,
}

impl Cooldown {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < self.period).then(|| self.period - elapsed)
    }
}

/// Combined guard a board session consults before each mutation.
#[derive(Debug, Clone)]
pub struct ActionGuard {
    actions: SlidingWindow,
    vote: Cooldown,
    create_item: Cooldown,
}

impl ActionGuard {
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            actions: SlidingWindow::new(config.max_actions_per_minute),
            vote: Cooldown::new(Duration::from_millis(config.vote_cooldown_ms)),
            create_item: Cooldown::new(Duration::from_millis(config.item_creation_cooldown_ms)),
        }
    }

    /// Admit an action at `now`, recording it, or say how long to wait.
    /// A denied action consumes nothing.
    pub fn check(&mut self, kind: ActionKind, now: Instant) -> Result<(), RateLimited> {
        let cooldown = match kind {
            ActionKind::CreateItem => Some(&mut self.create_item),
            ActionKind::Vote => Some(&mut self.vote),
            ActionKind::Other => None,
        };
        if let Some(retry_after) = cooldown.as_ref().and_then(|c| c.remaining(now)) {
            return Err(RateLimited::Cooldown { retry_after });
        }
        if let Some(retry_after) = self.actions.wait_time(now) {
            return Err(RateLimited::TooManyActions { retry_after });
        }

        self.actions.record(now);
        if let Some(cooldown) = cooldown {
            cooldown.last = Some(now);
        }
        Ok(())
    }
}

impl Default for ActionGuard {
    fn default() -> Self {
        Self::new(&RealtimeConfig::default())
    }
}
