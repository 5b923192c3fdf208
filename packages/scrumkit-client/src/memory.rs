/// In-process backend: persistence, realtime hub and session probe.
///
/// Behaves like the hosted backend closely enough to run board sessions
/// against it: writes are atomic per call, every write is echoed to the
/// channels whose change filters match, presence is relayed to everyone on a
/// topic and broadcasts go to every peer except the sender.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use scrumkit_core::positions::MovePlan;
use scrumkit_core::presence::PresenceMeta;
use scrumkit_core::realtime::{
    ChangeEvent, ChangeFilter, ChangeKind, ChannelEvent, SubscriptionStatus,
};
use scrumkit_core::types::{BoardSettings, Column, Item, NewItem, Retrospective};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{RealtimeError, StoreError};
use crate::store::{BoardStore, SessionProbe};
use crate::transport::{ChannelCommand, ChannelHandle, ChannelSender, JoinRequest, RealtimeTransport};

#[derive(Default)]
struct BoardData {
    boards: HashMap<String, Retrospective>,
    columns: Vec<Column>,
    items: Vec<Item>,
}

struct Peer {
    events: mpsc::UnboundedSender<ChannelEvent>,
    changes: Vec<ChangeFilter>,
    presence: Option<PresenceMeta>,
}

struct Room {
    peers: HashMap<u64, Peer>,
    next_peer_id: u64,
}

impl Room {
    fn new() -> Self {
        Self {
            peers: HashMap::new(),
            next_peer_id: 1,
        }
    }

    fn presence_state(&self) -> Vec<PresenceMeta> {
        self.peers.values().filter_map(|p| p.presence.clone()).collect()
    }

    fn send_all(&self, event: &ChannelEvent) {
        for peer in self.peers.values() {
            let _ = peer.events.send(event.clone());
        }
    }

    fn send_others(&self, exclude: u64, event: &ChannelEvent) {
        for (&peer_id, peer) in &self.peers {
            if peer_id != exclude {
                let _ = peer.events.send(event.clone());
            }
        }
    }
}

#[derive(Default)]
struct ChannelHub {
    rooms: HashMap<String, Room>,
}

impl ChannelHub {
    fn register(&mut self, request: &JoinRequest) -> (u64, mpsc::UnboundedReceiver<ChannelEvent>) {
        let room = self
            .rooms
            .entry(request.topic.clone())
            .or_insert_with(Room::new);
        let peer_id = room.next_peer_id;
        room.next_peer_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ChannelEvent::Status(SubscriptionStatus::Subscribed));
        let _ = tx.send(ChannelEvent::PresenceSync(room.presence_state()));
        room.peers.insert(
            peer_id,
            Peer {
                events: tx,
                changes: request.changes.clone(),
                presence: None,
            },
        );
        (peer_id, rx)
    }

    fn unregister(&mut self, topic: &str, peer_id: u64) -> Option<Peer> {
        let room = self.rooms.get_mut(topic)?;
        let peer = room.peers.remove(&peer_id)?;
        if let Some(meta) = &peer.presence {
            room.send_all(&ChannelEvent::PresenceLeave(vec![meta.clone()]));
        }
        if room.peers.is_empty() {
            self.rooms.remove(topic);
        }
        Some(peer)
    }

    fn handle(&mut self, topic: &str, peer_id: u64, command: ChannelCommand) {
        let Some(room) = self.rooms.get_mut(topic) else {
            return;
        };
        match command {
            ChannelCommand::Track(meta) => {
                let previous = room
                    .peers
                    .get_mut(&peer_id)
                    .and_then(|peer| peer.presence.replace(meta.clone()));
                room.send_all(&ChannelEvent::PresenceJoin(vec![meta]));
                // A re-track replaces the connection's meta rather than adding one.
                if let Some(previous) = previous {
                    room.send_all(&ChannelEvent::PresenceLeave(vec![previous]));
                }
            }
            ChannelCommand::Untrack => {
                let meta = room.peers.get_mut(&peer_id).and_then(|p| p.presence.take());
                if let Some(meta) = meta {
                    room.send_all(&ChannelEvent::PresenceLeave(vec![meta]));
                }
            }
            ChannelCommand::Broadcast(message) => {
                room.send_others(peer_id, &ChannelEvent::Broadcast(message));
            }
            ChannelCommand::Leave => {}
        }
    }

    fn publish_change(&self, change: &ChangeEvent) {
        let row = change.new.as_ref().or(change.old.as_ref());
        for room in self.rooms.values() {
            for peer in room.peers.values() {
                if peer.changes.iter().any(|f| f.matches(&change.table, row)) {
                    let _ = peer.events.send(ChannelEvent::Change(change.clone()));
                }
            }
        }
    }

    fn peer_count(&self, topic: &str) -> usize {
        self.rooms.get(topic).map_or(0, |r| r.peers.len())
    }
}

#[derive(Default)]
struct Inner {
    data: RwLock<BoardData>,
    hub: Mutex<ChannelHub>,
    offline: AtomicBool,
    failing_requests: AtomicU32,
    leaves: AtomicUsize,
    writes: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

fn row<T: Serialize>(value: &T) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_board(&self, board: Retrospective) {
        let mut data = self.inner.data.write().unwrap_or_else(|e| e.into_inner());
        data.boards.insert(board.id.clone(), board);
    }

    pub fn add_column(&self, column: Column) {
        let mut data = self.inner.data.write().unwrap_or_else(|e| e.into_inner());
        data.columns.push(column);
    }

    /// Seed an item without emitting a change event.
    pub fn add_item(&self, item: Item) {
        let mut data = self.inner.data.write().unwrap_or_else(|e| e.into_inner());
        data.items.push(item);
    }

    pub fn items(&self) -> Vec<Item> {
        self.inner
            .data
            .read()
            .map(|d| d.items.clone())
            .unwrap_or_default()
    }

    /// While offline every request and probe fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` requests or probes with a network error.
    pub fn fail_next_requests(&self, n: u32) {
        self.inner.failing_requests.store(n, Ordering::SeqCst);
    }

    /// Number of channels released through an explicit leave.
    pub fn leave_count(&self) -> usize {
        self.inner.leaves.load(Ordering::SeqCst)
    }

    /// Number of successful write calls.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn peer_count(&self, topic: &str) -> usize {
        self.lock_hub().peer_count(topic)
    }

    /// Report a channel error to every peer on `topic`.
    pub fn inject_channel_error(&self, topic: &str, reason: &str) {
        let hub = self.lock_hub();
        if let Some(room) = hub.rooms.get(topic) {
            room.send_all(&ChannelEvent::Status(SubscriptionStatus::ChannelError));
            room.send_all(&ChannelEvent::Error(reason.to_string()));
        }
    }

    fn lock_hub(&self) -> std::sync::MutexGuard<'_, ChannelHub> {
        self.inner.hub.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Network("backend unreachable".to_string()));
        }
        let consumed = self
            .inner
            .failing_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(StoreError::Network("connection reset".to_string()));
        }
        Ok(())
    }

    fn publish(&self, changes: Vec<ChangeEvent>) {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        let hub = self.lock_hub();
        for change in &changes {
            hub.publish_change(change);
        }
    }
}

#[async_trait]
impl BoardStore for MemoryBackend {
    async fn list_columns(&self, board_id: &str) -> Result<Vec<Column>, StoreError> {
        self.check_available()?;
        let data = self.inner.data.read().unwrap_or_else(|e| e.into_inner());
        let mut columns: Vec<Column> = data
            .columns
            .iter()
            .filter(|c| c.retrospective_id == board_id)
            .cloned()
            .collect();
        columns.sort_by_key(|c| c.position);
        Ok(columns)
    }

    async fn list_items(&self, board_id: &str) -> Result<Vec<Item>, StoreError> {
        self.check_available()?;
        let data = self.inner.data.read().unwrap_or_else(|e| e.into_inner());
        let column_ids: Vec<&str> = data
            .columns
            .iter()
            .filter(|c| c.retrospective_id == board_id)
            .map(|c| c.id.as_str())
            .collect();
        Ok(data
            .items
            .iter()
            .filter(|i| column_ids.contains(&i.column_id.as_str()))
            .cloned()
            .collect())
    }

    async fn apply_move_plan(&self, plan: &MovePlan) -> Result<(), StoreError> {
        self.check_available()?;
        let changes = {
            let mut data = self.inner.data.write().unwrap_or_else(|e| e.into_inner());
            let ids = plan
                .updates
                .iter()
                .map(|u| u.id.as_str())
                .chain(plan.relocation.iter().map(|r| r.id.as_str()));
            for id in ids {
                if !data.items.iter().any(|i| i.id == id) {
                    return Err(StoreError::NotFound(format!("items/{}", id)));
                }
            }
            if let Some(relocation) = &plan.relocation {
                if !data.columns.iter().any(|c| c.id == relocation.column_id) {
                    return Err(StoreError::NotFound(format!(
                        "columns/{}",
                        relocation.column_id
                    )));
                }
            }

            let mut changed: Vec<String> = Vec::new();
            for update in &plan.updates {
                if let Some(item) = data.items.iter_mut().find(|i| i.id == update.id) {
                    item.position = Some(update.position);
                    changed.push(item.id.clone());
                }
            }
            if let Some(relocation) = &plan.relocation {
                if let Some(item) = data.items.iter_mut().find(|i| i.id == relocation.id) {
                    item.column_id = relocation.column_id.clone();
                    item.position = Some(relocation.position);
                    changed.push(item.id.clone());
                }
            }

            changed
                .iter()
                .filter_map(|id| data.items.iter().find(|i| &i.id == id))
                .map(|item| ChangeEvent {
                    table: "items".to_string(),
                    event_type: ChangeKind::Update,
                    new: row(item),
                    old: None,
                })
                .collect()
        };
        self.publish(changes);
        Ok(())
    }

    async fn insert_item(&self, item: &NewItem) -> Result<Item, StoreError> {
        self.check_available()?;
        let created = Item {
            id: Uuid::new_v4().to_string(),
            column_id: item.column_id.clone(),
            position: Some(item.position),
            content: item.content.clone(),
            author_id: item.author_id.clone(),
            author_name: item.author_name.clone(),
        };
        {
            let mut data = self.inner.data.write().unwrap_or_else(|e| e.into_inner());
            data.items.push(created.clone());
        }
        self.publish(vec![ChangeEvent {
            table: "items".to_string(),
            event_type: ChangeKind::Insert,
            new: row(&created),
            old: None,
        }]);
        Ok(created)
    }

    async fn delete_item(&self, item_id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let removed = {
            let mut data = self.inner.data.write().unwrap_or_else(|e| e.into_inner());
            let index = data
                .items
                .iter()
                .position(|i| i.id == item_id)
                .ok_or_else(|| StoreError::NotFound(format!("items/{}", item_id)))?;
            data.items.remove(index)
        };
        self.publish(vec![ChangeEvent {
            table: "items".to_string(),
            event_type: ChangeKind::Delete,
            new: None,
            old: row(&removed),
        }]);
        Ok(())
    }

    async fn read_settings(&self, board_id: &str) -> Result<BoardSettings, StoreError> {
        self.check_available()?;
        let data = self.inner.data.read().unwrap_or_else(|e| e.into_inner());
        data.boards
            .get(board_id)
            .map(|b| b.settings.clone())
            .ok_or_else(|| StoreError::NotFound(format!("retrospectives/{}", board_id)))
    }

    async fn write_settings(
        &self,
        board_id: &str,
        settings: &BoardSettings,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let updated = {
            let mut data = self.inner.data.write().unwrap_or_else(|e| e.into_inner());
            let board = data
                .boards
                .get_mut(board_id)
                .ok_or_else(|| StoreError::NotFound(format!("retrospectives/{}", board_id)))?;
            board.settings = settings.clone();
            board.clone()
        };
        self.publish(vec![ChangeEvent {
            table: "retrospectives".to_string(),
            event_type: ChangeKind::Update,
            new: row(&updated),
            old: None,
        }]);
        Ok(())
    }
}

#[async_trait]
impl SessionProbe for MemoryBackend {
    async fn check_session(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[async_trait]
impl RealtimeTransport for MemoryBackend {
    async fn join(&self, request: JoinRequest) -> Result<ChannelHandle, RealtimeError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(RealtimeError::JoinFailed {
                topic: request.topic,
                reason: "backend unreachable".to_string(),
            });
        }

        let (peer_id, events) = self.lock_hub().register(&request);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let topic = request.topic.clone();
        let backend = self.clone();

        tokio::spawn(async move {
            let mut explicit_leave = false;
            while let Some(command) = command_rx.recv().await {
                if command == ChannelCommand::Leave {
                    explicit_leave = true;
                    break;
                }
                backend.lock_hub().handle(&topic, peer_id, command);
            }

            let peer = backend.lock_hub().unregister(&topic, peer_id);
            if explicit_leave {
                backend.inner.leaves.fetch_add(1, Ordering::SeqCst);
                if let Some(peer) = peer {
                    let _ = peer
                        .events
                        .send(ChannelEvent::Status(SubscriptionStatus::Closed));
                }
            }
            log::debug!(
                target: "scrumkit.memory",
                "Peer {} left {} (explicit={})",
                peer_id,
                topic,
                explicit_leave
            );
        });

        Ok(ChannelHandle {
            sender: ChannelSender::new(request.topic, command_tx),
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrumkit_core::realtime::BroadcastMessage;
    use scrumkit_core::types::{ItemRelocation, PositionUpdate};

    fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.add_board(Retrospective {
            id: "r1".into(),
            title: "Sprint 12".into(),
            team_id: None,
            settings: BoardSettings::default(),
        });
        for (id, pos) in [("c1", 0), ("c2", 1)] {
            backend.add_column(Column {
                id: id.into(),
                retrospective_id: "r1".into(),
                title: id.into(),
                position: pos,
                color: None,
            });
        }
        for (id, col, pos) in [("a", "c1", 0), ("b", "c1", 1), ("x", "c2", 0)] {
            backend.add_item(Item {
                id: id.into(),
                column_id: col.into(),
                position: Some(pos),
                content: id.into(),
                author_id: None,
                author_name: None,
            });
        }
        backend
    }

    #[tokio::test]
    async fn test_move_plan_is_all_or_nothing() {
        let backend = seeded();
        let plan = MovePlan {
            updates: vec![PositionUpdate::new("b", 0), PositionUpdate::new("ghost", 1)],
            relocation: None,
        };
        let err = backend.apply_move_plan(&plan).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        let b = backend.items().into_iter().find(|i| i.id == "b").unwrap();
        assert_eq!(b.position, Some(1));
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test]
    async fn test_relocation_to_unknown_column_is_refused() {
        let backend = seeded();
        let plan = MovePlan {
            updates: vec![],
            relocation: Some(ItemRelocation {
                id: "a".into(),
                column_id: "no-such-column".into(),
                position: 0,
            }),
        };
        let err = backend.apply_move_plan(&plan).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(path) if path == "columns/no-such-column"));
        let a = backend.items().into_iter().find(|i| i.id == "a").unwrap();
        assert_eq!(a.column_id, "c1");
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test]
    async fn test_retrack_replaces_presence() {
        let backend = seeded();
        let one = backend.join(JoinRequest::new("t")).await.unwrap();
        let mut two = backend.join(JoinRequest::new("t")).await.unwrap();
        two.events.recv().await;
        two.events.recv().await;

        let meta = |name: &str| PresenceMeta {
            user_id: "u1".into(),
            name: name.into(),
            email: None,
            avatar_url: None,
            color: None,
            online_at: 1,
        };
        one.sender.track(meta("Ada")).unwrap();
        one.sender.track(meta("Ada L")).unwrap();

        assert_eq!(
            two.events.recv().await,
            Some(ChannelEvent::PresenceJoin(vec![meta("Ada")]))
        );
        assert_eq!(
            two.events.recv().await,
            Some(ChannelEvent::PresenceJoin(vec![meta("Ada L")]))
        );
        assert_eq!(
            two.events.recv().await,
            Some(ChannelEvent::PresenceLeave(vec![meta("Ada")]))
        );
    }

    #[tokio::test]
    async fn test_changes_reach_matching_channels() {
        let backend = seeded();
        let mut items_channel = backend
            .join(JoinRequest::new("board:r1").with_changes(ChangeFilter::table("items")))
            .await
            .unwrap();
        let mut settings_only = backend
            .join(
                JoinRequest::new("board:r1")
                    .with_changes(ChangeFilter::table("retrospectives").eq("id", "r1")),
            )
            .await
            .unwrap();

        backend
            .apply_move_plan(&MovePlan {
                updates: vec![],
                relocation: Some(ItemRelocation {
                    id: "a".into(),
                    column_id: "c2".into(),
                    position: 1,
                }),
            })
            .await
            .unwrap();

        assert_eq!(
            items_channel.events.recv().await,
            Some(ChannelEvent::Status(SubscriptionStatus::Subscribed))
        );
        assert!(matches!(
            items_channel.events.recv().await,
            Some(ChannelEvent::PresenceSync(_))
        ));
        match items_channel.events.recv().await {
            Some(ChannelEvent::Change(change)) => {
                assert_eq!(change.event_type, ChangeKind::Update);
                let item: Item = change.decode_new().unwrap();
                assert_eq!(item.column_id, "c2");
            }
            other => panic!("expected change, got {:?}", other),
        }

        // Drain the join events; nothing else should be queued.
        settings_only.events.recv().await;
        settings_only.events.recv().await;
        assert!(settings_only.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let backend = seeded();
        let mut one = backend.join(JoinRequest::new("t")).await.unwrap();
        let mut two = backend.join(JoinRequest::new("t")).await.unwrap();
        for ch in [&mut one, &mut two] {
            ch.events.recv().await;
            ch.events.recv().await;
        }

        let msg = BroadcastMessage {
            event: "cursor".into(),
            payload: serde_json::json!({"x": 1}),
        };
        one.sender.broadcast(msg.clone()).unwrap();
        assert_eq!(two.events.recv().await, Some(ChannelEvent::Broadcast(msg)));
        tokio::task::yield_now().await;
        assert!(one.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_offline_requests_fail_with_network_error() {
        let backend = seeded();
        backend.set_offline(true);
        let err = backend.list_items("r1").await.unwrap_err();
        assert!(err.is_network());
        assert!(backend.check_session().await.is_err());
        backend.set_offline(false);
        assert_eq!(backend.list_items("r1").await.unwrap().len(), 3);

        backend.fail_next_requests(1);
        assert!(backend.check_session().await.is_err());
        assert!(backend.check_session().await.is_ok());
    }
}
