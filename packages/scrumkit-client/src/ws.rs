/// Realtime transport over the hosted service's WebSocket endpoint.
///
/// One socket per joined channel. A spawned task owns the socket: it forwards
/// channel commands as frames, translates incoming frames into channel events
/// and keeps the socket alive with Phoenix heartbeats.
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use scrumkit_core::config::HEARTBEAT_INTERVAL_MS;
use scrumkit_core::realtime::{ChannelEvent, SubscriptionStatus};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::RealtimeError;
use crate::protocol::{self, PhoenixFrame};
use crate::transport::{ChannelCommand, ChannelHandle, ChannelSender, JoinRequest, RealtimeTransport};

#[derive(Debug, Clone)]
pub struct WsTransport {
    backend_url: String,
    api_key: String,
    access_token: Option<String>,
    heartbeat_interval: Duration,
}

impl WsTransport {
    pub fn new(backend_url: &str, api_key: &str) -> Self {
        Self {
            backend_url: backend_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let mut transport = Self::new(&config.backend_url, &config.anon_key);
        transport.access_token = config.access_token.clone();
        transport.heartbeat_interval = config.realtime.heartbeat_interval();
        transport
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn socket_url(&self) -> String {
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.backend_url
                .replacen("http://", "ws://", 1)
                .replacen("https://", "wss://", 1),
            self.api_key
        )
    }
}

fn encode(frame: &PhoenixFrame) -> Result<Message, RealtimeError> {
    serde_json::to_string(frame)
        .map(|text| Message::Text(text.into()))
        .map_err(|e| RealtimeError::Transport(e.to_string()))
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn join(&self, request: JoinRequest) -> Result<ChannelHandle, RealtimeError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.socket_url())
            .await
            .map_err(|e| RealtimeError::JoinFailed {
                topic: request.topic.clone(),
                reason: e.to_string(),
            })?;
        log::info!(target: "scrumkit.ws", "Connected for {}", request.topic);

        let (mut ws_tx, ws_rx) = ws_stream.split();
        let join_ref = Uuid::new_v4().to_string();
        let join = protocol::join_frame(&request, self.access_token.as_deref(), &join_ref);
        ws_tx
            .send(encode(&join)?)
            .await
            .map_err(|e| RealtimeError::JoinFailed {
                topic: request.topic.clone(),
                reason: e.to_string(),
            })?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(
            ws_tx,
            ws_rx,
            join.topic,
            join_ref,
            command_rx,
            event_tx,
            self.heartbeat_interval,
        ));

        Ok(ChannelHandle {
            sender: ChannelSender::new(request.topic, command_tx),
            events: event_rx,
        })
    }
}

async fn run_socket<S, R>(
    mut ws_tx: S,
    mut ws_rx: R,
    topic: String,
    join_ref: String,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    heartbeat_interval: Duration,
) where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
    R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;
    let fail = |reason: String| {
        for event in [
            ChannelEvent::Status(SubscriptionStatus::ChannelError),
            ChannelEvent::Error(reason),
        ] {
            let _ = events.send(event);
        }
    };

    loop {
        tokio::select! {
            command = commands.recv() => {
                let leaving = matches!(command, Some(ChannelCommand::Leave) | None);
                let command = command.unwrap_or(ChannelCommand::Leave);
                let frame = protocol::command_frame(&topic, &command, &Uuid::new_v4().to_string());
                let sent = match encode(&frame) {
                    Ok(message) => ws_tx.send(message).await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                if leaving {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    let _ = events.send(ChannelEvent::Status(SubscriptionStatus::Closed));
                    log::info!(target: "scrumkit.ws", "Left {}", topic);
                    break;
                }
                if let Err(e) = sent {
                    log::error!(target: "scrumkit.ws", "Send on {} failed: {}", topic, e);
                    fail(e);
                    break;
                }
            }
            incoming = ws_rx.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(t))) => t.to_string(),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::warn!(target: "scrumkit.ws", "Socket for {} closed by server", topic);
                        fail("socket closed".to_string());
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        log::error!(target: "scrumkit.ws", "WS read error on {}: {}", topic, e);
                        fail(e.to_string());
                        break;
                    }
                };

                let frame: PhoenixFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!(target: "scrumkit.ws", "Unparseable frame: {}", e);
                        continue;
                    }
                };
                if frame.topic != topic {
                    continue;
                }
                let closed = frame.event == protocol::event::CLOSE;
                for event in protocol::decode_frame(&frame, &join_ref) {
                    let _ = events.send(event);
                }
                if closed {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                let frame = protocol::heartbeat_frame(&Uuid::new_v4().to_string());
                let sent = match encode(&frame) {
                    Ok(message) => ws_tx.send(message).await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                if let Err(e) = sent {
                    log::error!(target: "scrumkit.ws", "Heartbeat on {} failed: {}", topic, e);
                    fail(e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use scrumkit_core::presence::PresenceMeta;

    #[test]
    fn test_socket_url() {
        let t = WsTransport::new("https://abc.example.co/", "anon");
        assert_eq!(
            t.socket_url(),
            "wss://abc.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        let local = WsTransport::new("http://localhost:54321", "k");
        assert!(local.socket_url().starts_with("ws://localhost:54321/"));
    }

    fn text(value: serde_json::Value) -> Result<Message, tokio_tungstenite::tungstenite::Error> {
        Ok(Message::Text(value.to_string().into()))
    }

    fn sent_frames(rx: &mut capture::Receiver) -> Vec<PhoenixFrame> {
        let mut frames = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let Message::Text(t) = message {
                frames.push(serde_json::from_str(&t.to_string()).unwrap());
            }
        }
        frames
    }

    /// Sink half backed by an mpsc channel so tests can inspect outgoing
    /// frames.
    mod capture {
        use std::pin::Pin;
        use std::task::{Context, Poll};
        use tokio::sync::mpsc;
        use tokio_tungstenite::tungstenite::Message;

        pub type Receiver = mpsc::UnboundedReceiver<Message>;

        pub struct Sender(pub mpsc::UnboundedSender<Message>);

        impl futures_util::Sink<Message> for Sender {
            type Error = String;

            fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), String>> {
                Poll::Ready(Ok(()))
            }

            fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), String> {
                self.0.send(item).map_err(|e| e.to_string())
            }

            fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), String>> {
                Poll::Ready(Ok(()))
            }

            fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), String>> {
                Poll::Ready(Ok(()))
            }
        }
    }

    #[tokio::test]
    async fn test_socket_task_translates_frames() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let incoming = stream::iter(vec![
            text(serde_json::json!({"topic":"realtime:t","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"j1"})),
            text(serde_json::json!({"topic":"realtime:other","event":"phx_close","payload":{},"ref":null})),
            text(serde_json::json!({"topic":"realtime:t","event":"broadcast","payload":{"type":"broadcast","event":"cursor","payload":{"x":1}},"ref":null})),
        ])
        .chain(stream::pending());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_socket(
            capture::Sender(out_tx),
            Box::pin(incoming),
            "realtime:t".to_string(),
            "j1".to_string(),
            command_rx,
            event_tx,
            Duration::from_secs(30),
        ));

        assert_eq!(
            event_rx.recv().await,
            Some(ChannelEvent::Status(SubscriptionStatus::Subscribed))
        );
        match event_rx.recv().await {
            Some(ChannelEvent::Broadcast(message)) => assert_eq!(message.event, "cursor"),
            other => panic!("unexpected {:?}", other),
        }

        command_tx
            .send(ChannelCommand::Track(PresenceMeta {
                user_id: "u1".into(),
                name: "Ada".into(),
                email: None,
                avatar_url: None,
                color: None,
                online_at: 1,
            }))
            .unwrap();
        command_tx.send(ChannelCommand::Leave).unwrap();
        task.await.unwrap();

        assert_eq!(
            event_rx.recv().await,
            Some(ChannelEvent::Status(SubscriptionStatus::Closed))
        );
        let frames = sent_frames(&mut out_rx);
        let names: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
        assert_eq!(names, vec!["presence", "phx_leave"]);
        assert_eq!(frames[0].payload["payload"]["userId"], "u1");
    }

    #[tokio::test]
    async fn test_server_close_is_channel_error() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (_command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        run_socket(
            capture::Sender(out_tx),
            stream::iter(vec![Ok(Message::Close(None))]),
            "realtime:t".to_string(),
            "j1".to_string(),
            command_rx,
            event_tx,
            Duration::from_secs(30),
        )
        .await;

        assert_eq!(
            event_rx.recv().await,
            Some(ChannelEvent::Status(SubscriptionStatus::ChannelError))
        );
        assert_eq!(
            event_rx.recv().await,
            Some(ChannelEvent::Error("socket closed".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_frames() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_socket(
            capture::Sender(out_tx),
            stream::pending(),
            "realtime:t".to_string(),
            "j1".to_string(),
            command_rx,
            event_tx,
            Duration::from_secs(30),
        ));
        tokio::time::sleep(Duration::from_secs(61)).await;
        command_tx.send(ChannelCommand::Leave).unwrap();
        task.await.unwrap();

        let frames = sent_frames(&mut out_rx);
        let heartbeats = frames
            .iter()
            .filter(|f| f.topic == protocol::PHOENIX_TOPIC && f.event == "heartbeat")
            .count();
        assert_eq!(heartbeats, 2);
    }
}
