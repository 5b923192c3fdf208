/// Wire format of the hosted realtime service.
///
/// The service speaks the Phoenix channel protocol: every frame is a JSON
/// object `{topic, event, payload, ref}`. This module maps frames to and from
/// [`ChannelEvent`]s and [`ChannelCommand`]s; the socket handling lives in
/// `ws.rs`.
use scrumkit_core::presence::PresenceMeta;
use scrumkit_core::realtime::{
    BroadcastMessage, ChangeEvent, ChangeKind, ChannelEvent, SubscriptionStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::transport::{ChannelCommand, JoinRequest};

pub mod event {
    pub const JOIN: &str = "phx_join";
    pub const LEAVE: &str = "phx_leave";
    pub const REPLY: &str = "phx_reply";
    pub const CLOSE: &str = "phx_close";
    pub const ERROR: &str = "phx_error";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
    pub const PRESENCE: &str = "presence";
    pub const PRESENCE_STATE: &str = "presence_state";
    pub const PRESENCE_DIFF: &str = "presence_diff";
    pub const BROADCAST: &str = "broadcast";
}

/// Topic of socket-level messages such as heartbeats.
pub const PHOENIX_TOPIC: &str = "phoenix";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhoenixFrame {
    pub fn new(topic: &str, event: &str, payload: Value, reference: Option<String>) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference,
        }
    }
}

pub fn channel_topic(topic: &str) -> String {
    format!("realtime:{}", topic)
}

pub fn join_frame(request: &JoinRequest, access_token: Option<&str>, reference: &str) -> PhoenixFrame {
    let changes: Vec<Value> = request
        .changes
        .iter()
        .map(|c| {
            let mut change = json!({"event": "*", "schema": "public", "table": c.table});
            if let Some(filter) = &c.filter {
                change["filter"] = json!(filter);
            }
            change
        })
        .collect();

    let mut payload = json!({
        "config": {
            "broadcast": {"self": false, "ack": false},
            "presence": {"key": request.presence_key.clone().unwrap_or_default()},
            "postgres_changes": changes,
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = json!(token);
    }
    PhoenixFrame::new(
        &channel_topic(&request.topic),
        event::JOIN,
        payload,
        Some(reference.to_string()),
    )
}

pub fn command_frame(topic: &str, command: &ChannelCommand, reference: &str) -> PhoenixFrame {
    let (event_name, payload) = match command {
        ChannelCommand::Track(meta) => (
            event::PRESENCE,
            json!({"type": "presence", "event": "track", "payload": meta}),
        ),
        ChannelCommand::Untrack => (
            event::PRESENCE,
            json!({"type": "presence", "event": "untrack"}),
        ),
        ChannelCommand::Broadcast(message) => (
            event::BROADCAST,
            json!({"type": "broadcast", "event": message.event, "payload": message.payload}),
        ),
        ChannelCommand::Leave => (event::LEAVE, json!({})),
    };
    PhoenixFrame::new(topic, event_name, payload, Some(reference.to_string()))
}

pub fn heartbeat_frame(reference: &str) -> PhoenixFrame {
    PhoenixFrame::new(
        PHOENIX_TOPIC,
        event::HEARTBEAT,
        json!({}),
        Some(reference.to_string()),
    )
}

/// Presence payloads are maps of `key -> {metas: [...]}`.
fn presence_metas(value: Option<&Value>) -> Vec<PresenceMeta> {
    let Some(Value::Object(entries)) = value else {
        return Vec::new();
    };
    entries
        .values()
        .filter_map(|entry| entry.get("metas").and_then(Value::as_array))
        .flatten()
        .filter_map(|meta| serde_json::from_value(meta.clone()).ok())
        .collect()
}

#[derive(Deserialize)]
struct ChangePayload {
    #[serde(rename = "type")]
    kind: ChangeKind,
    table: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

fn non_empty(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !matches!(v, Value::Object(map) if map.is_empty()) && !v.is_null())
}

fn channel_error(reason: String) -> Vec<ChannelEvent> {
    vec![
        ChannelEvent::Status(SubscriptionStatus::ChannelError),
        ChannelEvent::Error(reason),
    ]
}

/// Translate a frame addressed to our channel. `join_ref` identifies the
/// reply to our join request.
pub fn decode_frame(frame: &PhoenixFrame, join_ref: &str) -> Vec<ChannelEvent> {
    match frame.event.as_str() {
        event::REPLY => {
            if frame.reference.as_deref() != Some(join_ref) {
                return Vec::new();
            }
            match frame.payload.get("status").and_then(Value::as_str) {
                Some("ok") => vec![ChannelEvent::Status(SubscriptionStatus::Subscribed)],
                _ => {
                    let reason = frame
                        .payload
                        .pointer("/response/reason")
                        .and_then(Value::as_str)
                        .unwrap_or("join rejected")
                        .to_string();
                    channel_error(reason)
                }
            }
        }
        event::CLOSE => vec![ChannelEvent::Status(SubscriptionStatus::Closed)],
        event::ERROR => channel_error("channel crashed".to_string()),
        event::POSTGRES_CHANGES => {
            let Some(data) = frame.payload.get("data") else {
                return Vec::new();
            };
            match serde_json::from_value::<ChangePayload>(data.clone()) {
                Ok(change) => vec![ChannelEvent::Change(ChangeEvent {
                    table: change.table,
                    event_type: change.kind,
                    new: non_empty(change.record),
                    old: non_empty(change.old_record),
                })],
                Err(e) => {
                    log::warn!(target: "scrumkit.ws", "Unreadable change payload: {}", e);
                    Vec::new()
                }
            }
        }
        event::PRESENCE_STATE => vec![ChannelEvent::PresenceSync(presence_metas(Some(
            &frame.payload,
        )))],
        event::PRESENCE_DIFF => {
            let mut events = Vec::new();
            let joins = presence_metas(frame.payload.get("joins"));
            let leaves = presence_metas(frame.payload.get("leaves"));
            if !joins.is_empty() {
                events.push(ChannelEvent::PresenceJoin(joins));
            }
            if !leaves.is_empty() {
                events.push(ChannelEvent::PresenceLeave(leaves));
            }
            events
        }
        event::BROADCAST => {
            let name = frame.payload.get("event").and_then(Value::as_str);
            match name {
                Some(name) => vec![ChannelEvent::Broadcast(BroadcastMessage {
                    event: name.to_string(),
                    payload: frame
                        .payload
                        .get("payload")
                        .cloned()
                        .unwrap_or(Value::Object(Map::new())),
                })],
                None => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrumkit_core::realtime::ChangeFilter;

    fn frame(text: &str) -> PhoenixFrame {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_join_frame_carries_change_filters() {
        let request = JoinRequest::new("board:r1")
            .with_changes(ChangeFilter::table("items"))
            .with_changes(ChangeFilter::table("retrospectives").eq("id", "r1"))
            .with_presence("u1");
        let f = join_frame(&request, Some("jwt"), "1");

        assert_eq!(f.topic, "realtime:board:r1");
        assert_eq!(f.event, "phx_join");
        assert_eq!(f.payload["access_token"], "jwt");
        assert_eq!(f.payload["config"]["presence"]["key"], "u1");
        let changes = f.payload["config"]["postgres_changes"].as_array().unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes[0].get("filter").is_none());
        assert_eq!(changes[1]["filter"], "id=eq.r1");
    }

    #[test]
    fn test_join_reply() {
        let ok = frame(
            r#"{"topic":"realtime:t","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#,
        );
        assert_eq!(
            decode_frame(&ok, "1"),
            vec![ChannelEvent::Status(SubscriptionStatus::Subscribed)]
        );
        // Replies to pushes other than the join are not status changes.
        assert!(decode_frame(&ok, "7").is_empty());

        let rejected = frame(
            r#"{"topic":"realtime:t","event":"phx_reply","payload":{"status":"error","response":{"reason":"unauthorized"}},"ref":"1"}"#,
        );
        assert_eq!(
            decode_frame(&rejected, "1"),
            vec![
                ChannelEvent::Status(SubscriptionStatus::ChannelError),
                ChannelEvent::Error("unauthorized".into())
            ]
        );
    }

    #[test]
    fn test_postgres_delete_has_only_old_row() {
        let f = frame(
            r#"{"topic":"realtime:t","event":"postgres_changes","ref":null,"payload":{"data":{"type":"DELETE","table":"items","schema":"public","record":{},"old_record":{"id":"i1"}}}}"#,
        );
        match decode_frame(&f, "1").as_slice() {
            [ChannelEvent::Change(change)] => {
                assert_eq!(change.event_type, ChangeKind::Delete);
                assert!(change.new.is_none());
                assert_eq!(change.row_id(), Some("i1"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_presence_diff_splits_joins_and_leaves() {
        let f = frame(
            r#"{"topic":"realtime:t","event":"presence_diff","ref":null,"payload":{
                "joins":{"u2":{"metas":[{"phx_ref":"x","userId":"u2","name":"Bob","onlineAt":5}]}},
                "leaves":{}}}"#,
        );
        let events = decode_frame(&f, "1");
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChannelEvent::PresenceJoin(metas) => {
                assert_eq!(metas[0].user_id, "u2");
                assert_eq!(metas[0].online_at, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_frames() {
        let message = BroadcastMessage {
            event: "cursor".into(),
            payload: json!({"userId": "u1"}),
        };
        let out = command_frame(
            "realtime:t",
            &ChannelCommand::Broadcast(message.clone()),
            "3",
        );
        assert_eq!(out.event, "broadcast");
        assert_eq!(out.payload["type"], "broadcast");

        // The service echoes the same shape to other subscribers.
        let incoming = PhoenixFrame::new("realtime:t", "broadcast", out.payload, None);
        assert_eq!(
            decode_frame(&incoming, "1"),
            vec![ChannelEvent::Broadcast(message)]
        );
    }

    #[test]
    fn test_heartbeat_frame_shape() {
        let text = serde_json::to_string(&heartbeat_frame("9")).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": "9"})
        );
    }
}
