/// A live channel subscription feeding a [`ChannelEventSink`].
///
/// Events are dispatched on a dedicated task in arrival order. The latest
/// subscription status is observable through a `watch` channel; a channel
/// error is recorded and reported to the sink, never raised. The channel is
/// released exactly once, by [`Subscription::unsubscribe`] or on drop.
use std::sync::{Arc, Mutex};

use scrumkit_core::realtime::{dispatch, ChannelEvent, ChannelEventSink, SubscriptionStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::RealtimeError;
use crate::transport::{ChannelCommand, ChannelHandle, ChannelSender, JoinRequest, RealtimeTransport};

pub struct Subscription {
    sender: ChannelSender,
    status: watch::Receiver<Option<SubscriptionStatus>>,
    last_error: Arc<Mutex<Option<String>>>,
    task: JoinHandle<()>,
    released: bool,
}

impl Subscription {
    pub async fn open(
        transport: &dyn RealtimeTransport,
        request: JoinRequest,
        sink: Box<dyn ChannelEventSink>,
    ) -> Result<Self, RealtimeError> {
        let handle = transport.join(request).await?;
        Ok(Self::start(handle, sink))
    }

    pub fn start(handle: ChannelHandle, sink: Box<dyn ChannelEventSink>) -> Self {
        let (status_tx, status_rx) = watch::channel(None);
        let last_error = Arc::new(Mutex::new(None));
        let topic = handle.sender.topic().to_string();
        let task = tokio::spawn(pump_events(
            topic,
            handle.events,
            sink,
            status_tx,
            last_error.clone(),
        ));
        Self {
            sender: handle.sender,
            status: status_rx,
            last_error,
            task,
            released: false,
        }
    }

    pub fn topic(&self) -> &str {
        self.sender.topic()
    }

    pub fn sender(&self) -> &ChannelSender {
        &self.sender
    }

    /// Latest status reported by the transport, `None` before the first.
    pub fn status(&self) -> Option<SubscriptionStatus> {
        self.status.borrow().clone()
    }

    pub fn status_changes(&self) -> watch::Receiver<Option<SubscriptionStatus>> {
        self.status.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the channel. Returns `false` if it was already released.
    pub fn unsubscribe(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        if let Err(e) = self.sender.send(ChannelCommand::Leave) {
            log::debug!(target: "scrumkit.subscription", "Leave not delivered: {}", e);
        }
        log::info!(target: "scrumkit.subscription", "Unsubscribed from {}", self.topic());
        true
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
        self.task.abort();
    }
}

async fn pump_events(
    topic: String,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    mut sink: Box<dyn ChannelEventSink>,
    status_tx: watch::Sender<Option<SubscriptionStatus>>,
    last_error: Arc<Mutex<Option<String>>>,
) {
    while let Some(event) = events.recv().await {
        match &event {
            ChannelEvent::Status(status) => {
                match status {
                    SubscriptionStatus::Subscribed => {
                        log::info!(target: "scrumkit.subscription", "Subscribed to {}", topic)
                    }
                    SubscriptionStatus::Closed => {
                        log::info!(target: "scrumkit.subscription", "Channel {} closed", topic)
                    }
                    SubscriptionStatus::ChannelError => {
                        log::error!(target: "scrumkit.subscription", "Channel {} errored", topic)
                    }
                }
                status_tx.send_replace(Some(status.clone()));
            }
            ChannelEvent::Error(message) => {
                log::error!(target: "scrumkit.subscription", "Channel {}: {}", topic, message);
                *last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.clone());
            }
            _ => {}
        }
        dispatch(sink.as_mut(), &event);
    }
    log::debug!(target: "scrumkit.subscription", "Event stream for {} ended", topic);
}
