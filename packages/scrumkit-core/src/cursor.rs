/// Live cursor sharing.
///
/// Outgoing cursor positions are throttled before they hit the broadcast
/// channel; incoming ones are kept per user and pruned when they go quiet.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::{CURSOR_MIN_MOVEMENT_PX, CURSOR_THROTTLE_MS};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

impl CursorPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &CursorPosition) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Broadcast payload for the `cursor` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMessage {
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub position: CursorPosition,
    pub timestamp: i64,
}

/// Gate for outgoing cursor updates: at most one per throttle window, and
/// only when the pointer actually moved.
#[derive(Debug, Clone)]
pub struct CursorThrottle {
    interval_ms: u64,
    min_movement_px: f64,
    last_sent: Option<(u64, CursorPosition)>,
}

impl Default for CursorThrottle {
    fn default() -> Self {
        Self::new(CURSOR_THROTTLE_MS, CURSOR_MIN_MOVEMENT_PX)
    }
}

impl CursorThrottle {
    pub fn new(interval_ms: u64, min_movement_px: f64) -> Self {
        Self {
            interval_ms,
            min_movement_px,
            last_sent: None,
        }
    }

    /// Returns true and records the position when it should be sent.
    pub fn should_send(&mut self, position: CursorPosition, now_ms: u64) -> bool {
        if let Some((sent_at, sent_pos)) = self.last_sent {
            if now_ms.saturating_sub(sent_at) < self.interval_ms {
                return false;
            }
            if position.distance_to(&sent_pos) < self.min_movement_px {
                return false;
            }
        }
        self.last_sent = Some((now_ms, position));
        true
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCursor {
    pub name: String,
    pub color: String,
    pub position: CursorPosition,
    pub updated_at: i64,
}

/// Cursors of other users on the board.
#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    cursors: HashMap<String, RemoteCursor>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an incoming cursor unless an older message arrived late.
    pub fn update(&mut self, message: &CursorMessage) {
        let incoming = RemoteCursor {
            name: message.name.clone(),
            color: message.color.clone(),
            position: message.position,
            updated_at: message.timestamp,
        };
        match self.cursors.get_mut(&message.user_id) {
            Some(existing) if existing.updated_at > message.timestamp => {}
            Some(existing) => *existing = incoming,
            None => {
                self.cursors.insert(message.user_id.clone(), incoming);
            }
        }
    }

    pub fn remove(&mut self, user_id: &str) {
        self.cursors.remove(user_id);
    }

    pub fn get(&self, user_id: &str) -> Option<&RemoteCursor> {
        self.cursors.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Drop cursors not updated within `max_age_ms`.
    pub fn prune_stale(&mut self, now_ms: i64, max_age_ms: i64) {
        self.cursors
            .retain(|_, cursor| now_ms - cursor.updated_at <= max_age_ms);
    }

    pub fn clear(&mut self) {
        self.cursors.clear();
    }
}
