/// Realtime channel event model.
///
/// A board channel delivers three kinds of traffic: database change
/// notifications, presence join/leave/sync, and ad-hoc broadcasts. Transports
/// translate their wire format into [`ChannelEvent`]s; consumers implement
/// [`ChannelEventSink`] and receive one call per event through [`dispatch`].
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::presence::PresenceMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row change from the database change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub table: String,
    pub event_type: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn decode_new<T: DeserializeOwned>(&self) -> Option<T> {
        self.new
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn decode_old<T: DeserializeOwned>(&self) -> Option<T> {
        self.old
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// `id` of the affected row, from `new` or else `old`.
    pub fn row_id(&self) -> Option<&str> {
        self.new
            .as_ref()
            .and_then(|v| v.get("id"))
            .or_else(|| self.old.as_ref().and_then(|v| v.get("id")))
            .and_then(Value::as_str)
    }
}

/// Subscribes to changes on one table, optionally narrowed by a
/// `column=eq.value` row filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl ChangeFilter {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
        }
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.filter = Some(format!("{}=eq.{}", column, value));
        self
    }

    /// Whether a row (as JSON) passes this filter. Only `eq` filters are
    /// understood; anything else matches every row of the table.
    pub fn matches(&self, table: &str, row: Option<&Value>) -> bool {
        if self.table != table {
            return false;
        }
        let Some((column, value)) = self
            .filter
            .as_deref()
            .and_then(|f| f.split_once("=eq."))
        else {
            return true;
        };
        row.and_then(|r| r.get(column))
            .map(|v| match v {
                Value::String(s) => s == value,
                other => other.to_string() == value,
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub event: String,
    pub payload: Value,
}

impl BroadcastMessage {
    pub fn new<T: Serialize>(event: &str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            event: event.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Broadcast event names used on board channels.
pub mod events {
    pub const CURSOR: &str = "cursor";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const TIMER: &str = "timer";
}

/// Payload of the `heartbeat` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub user_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Subscribed,
    Closed,
    ChannelError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Status(SubscriptionStatus),
    /// Transport-level failure description; always follows or accompanies a
    /// `ChannelError` status.
    Error(String),
    Change(ChangeEvent),
    PresenceSync(Vec<PresenceMeta>),
    PresenceJoin(Vec<PresenceMeta>),
    PresenceLeave(Vec<PresenceMeta>),
    Broadcast(BroadcastMessage),
}

/// Receiver for channel traffic, one method per event kind. Every method
/// defaults to a no-op so sinks only implement what they consume.
pub trait ChannelEventSink: Send {
    fn on_insert(&mut self, _change: &ChangeEvent) {}
    fn on_update(&mut self, _change: &ChangeEvent) {}
    fn on_delete(&mut self, _change: &ChangeEvent) {}
    fn on_presence_sync(&mut self, _users: &[PresenceMeta]) {}
    fn on_presence_join(&mut self, _users: &[PresenceMeta]) {}
    fn on_presence_leave(&mut self, _users: &[PresenceMeta]) {}
    fn on_broadcast(&mut self, _message: &BroadcastMessage) {}
    fn on_status(&mut self, _status: &SubscriptionStatus) {}
    fn on_error(&mut self, _message: &str) {}
}

pub fn dispatch(sink: &mut dyn ChannelEventSink, event: &ChannelEvent) {
    match event {
        ChannelEvent::Status(status) => sink.on_status(status),
        ChannelEvent::Error(message) => sink.on_error(message),
        ChannelEvent::Change(change) => match change.event_type {
            ChangeKind::Insert => sink.on_insert(change),
            ChangeKind::Update => sink.on_update(change),
            ChangeKind::Delete => sink.on_delete(change),
        },
        ChannelEvent::PresenceSync(users) => sink.on_presence_sync(users),
        ChannelEvent::PresenceJoin(users) => sink.on_presence_join(users),
        ChannelEvent::PresenceLeave(users) => sink.on_presence_leave(users),
        ChannelEvent::Broadcast(message) => sink.on_broadcast(message),
    }
}
