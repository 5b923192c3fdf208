/// Realtime collaborator interface.
///
/// A transport opens named channels. Each open channel is a pair of queues:
/// inbound [`ChannelEvent`]s and outbound [`ChannelCommand`]s. Closing a
/// channel is a `Leave` command; the transport releases its resources when it
/// processes it.
use async_trait::async_trait;
use scrumkit_core::presence::PresenceMeta;
use scrumkit_core::realtime::{BroadcastMessage, ChangeFilter, ChannelEvent};
use tokio::sync::mpsc;

use crate::error::RealtimeError;

#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    pub topic: String,
    pub changes: Vec<ChangeFilter>,
    /// Key under which this client's presence is tracked.
    pub presence_key: Option<String>,
}

impl JoinRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            changes: Vec::new(),
            presence_key: None,
        }
    }

    pub fn with_changes(mut self, filter: ChangeFilter) -> Self {
        self.changes.push(filter);
        self
    }

    pub fn with_presence(mut self, key: impl Into<String>) -> Self {
        self.presence_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelCommand {
    Track(PresenceMeta),
    Untrack,
    Broadcast(BroadcastMessage),
    Leave,
}

/// Outbound half of an open channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    topic: String,
    tx: mpsc::UnboundedSender<ChannelCommand>,
}

impl ChannelSender {
    pub fn new(topic: impl Into<String>, tx: mpsc::UnboundedSender<ChannelCommand>) -> Self {
        Self {
            topic: topic.into(),
            tx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn send(&self, command: ChannelCommand) -> Result<(), RealtimeError> {
        self.tx
            .send(command)
            .map_err(|_| RealtimeError::Closed(self.topic.clone()))
    }

    pub fn track(&self, meta: PresenceMeta) -> Result<(), RealtimeError> {
        self.send(ChannelCommand::Track(meta))
    }

    pub fn broadcast(&self, message: BroadcastMessage) -> Result<(), RealtimeError> {
        self.send(ChannelCommand::Broadcast(message))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct ChannelHandle {
    pub sender: ChannelSender,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn join(&self, request: JoinRequest) -> Result<ChannelHandle, RealtimeError>;
}
