/// One client's live view of a board.
///
/// Owns everything scoped to a board visit: the local item cache, the
/// presence and cursor maps, the board channel subscription, the heartbeat
/// task and the facilitator timer. Joining builds all of it; leaving (or dropping the session) tears it
/// down. Switching boards means leaving one session and joining another.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use scrumkit_core::config::RealtimeConfig;
use scrumkit_core::cursor::{CursorMessage, CursorPosition, CursorThrottle, CursorTracker, RemoteCursor};
use scrumkit_core::positions::{
    apply_move_plan, column_items, get_next_position, plan_move, reindex_positions, DragOutcome,
    MovePlan,
};
use scrumkit_core::presence::{hashed_color, AvatarStack, ColorPolicy, PresenceMeta, PresenceTracker};
use scrumkit_core::rate_limit::{ActionGuard, ActionKind};
use scrumkit_core::realtime::{
    events, BroadcastMessage, ChangeEvent, ChangeFilter, ChannelEventSink, Heartbeat,
    SubscriptionStatus,
};
use scrumkit_core::timer::TimerState;
use scrumkit_core::types::{now_ms, BoardSettings, Column, Item, NewItem, PositionUpdate, Retrospective, UserIdentity};
use tokio::task::JoinHandle;

use crate::connection::{reconnect_channel, QueryRetry};
use crate::error::SessionError;
use crate::store::BoardStore;
use crate::subscription::Subscription;
use crate::timer::FacilitatorTimer;
use crate::transport::{ChannelSender, JoinRequest, RealtimeTransport};

pub fn board_topic(board_id: &str) -> String {
    format!("board:{}", board_id)
}

struct BoardState {
    columns: Vec<Column>,
    items: Vec<Item>,
    settings: BoardSettings,
    presence: PresenceTracker,
    cursors: CursorTracker,
}

impl BoardState {
    fn has_column(&self, column_id: &str) -> bool {
        self.columns.iter().any(|c| c.id == column_id)
    }

    fn upsert_item(&mut self, item: Item) {
        if !self.has_column(&item.column_id) {
            // Moved to another board.
            self.remove_item(&item.id);
            return;
        }
        match self.items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    fn remove_item(&mut self, item_id: &str) {
        self.items.retain(|i| i.id != item_id);
    }
}

fn lock(state: &Mutex<BoardState>) -> MutexGuard<'_, BoardState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Applies board channel traffic to the shared state.
struct BoardEventSink {
    state: Arc<Mutex<BoardState>>,
    local_user_id: String,
}

impl BoardEventSink {
    fn upsert_row(&mut self, change: &ChangeEvent) {
        match change.table.as_str() {
            "items" => match change.decode_new::<Item>() {
                Some(item) => lock(&self.state).upsert_item(item),
                None => log::warn!(target: "scrumkit.session", "Undecodable item row"),
            },
            "retrospectives" => {
                if let Some(board) = change.decode_new::<Retrospective>() {
                    lock(&self.state).settings = board.settings;
                }
            }
            other => log::debug!(target: "scrumkit.session", "Ignoring change on {}", other),
        }
    }
}

impl ChannelEventSink for BoardEventSink {
    fn on_insert(&mut self, change: &ChangeEvent) {
        self.upsert_row(change);
    }

    fn on_update(&mut self, change: &ChangeEvent) {
        self.upsert_row(change);
    }

    fn on_delete(&mut self, change: &ChangeEvent) {
        if change.table == "items" {
            if let Some(id) = change.row_id() {
                lock(&self.state).remove_item(id);
            }
        }
    }

    fn on_presence_sync(&mut self, users: &[PresenceMeta]) {
        lock(&self.state).presence.sync(users);
    }

    fn on_presence_join(&mut self, users: &[PresenceMeta]) {
        let mut state = lock(&self.state);
        for meta in users {
            state.presence.join(meta);
        }
    }

    fn on_presence_leave(&mut self, users: &[PresenceMeta]) {
        let mut state = lock(&self.state);
        for meta in users {
            // Another tab of the same user keeps them on the board.
            if state.presence.leave(&meta.user_id).is_some() {
                state.cursors.remove(&meta.user_id);
            }
        }
    }

    fn on_broadcast(&mut self, message: &BroadcastMessage) {
        match message.event.as_str() {
            events::CURSOR => {
                if let Some(cursor) = message.decode::<CursorMessage>() {
                    if cursor.user_id != self.local_user_id {
                        lock(&self.state).cursors.update(&cursor);
                    }
                }
            }
            events::HEARTBEAT => {
                if let Some(beat) = message.decode::<Heartbeat>() {
                    lock(&self.state).presence.touch(&beat.user_id, beat.timestamp);
                }
            }
            events::TIMER => {
                if let Some(timer) = message.decode::<TimerState>() {
                    lock(&self.state).settings.facilitator_mut().timer = Some(timer);
                }
            }
            other => log::debug!(target: "scrumkit.session", "Unhandled broadcast: {}", other),
        }
    }

    fn on_status(&mut self, status: &SubscriptionStatus) {
        if *status == SubscriptionStatus::Closed {
            let mut state = lock(&self.state);
            state.presence.clear();
            state.cursors.clear();
        }
    }
}

pub struct BoardSession {
    board_id: String,
    user: UserIdentity,
    config: RealtimeConfig,
    store: Arc<dyn BoardStore>,
    query: QueryRetry,
    state: Arc<Mutex<BoardState>>,
    subscription: Subscription,
    heartbeat: JoinHandle<()>,
    timer: Mutex<Option<Arc<FacilitatorTimer>>>,
    guard: Mutex<ActionGuard>,
    throttle: Mutex<CursorThrottle>,
}

impl BoardSession {
    /// Load the board, open its channel and announce ourselves on it.
    pub async fn join(
        board_id: &str,
        user: UserIdentity,
        store: Arc<dyn BoardStore>,
        transport: &dyn RealtimeTransport,
        config: RealtimeConfig,
    ) -> Result<Self, SessionError> {
        let query = QueryRetry::new(config.query_retry_policy());
        let columns = query.run(|| store.list_columns(board_id)).await?;
        let items = query.run(|| store.list_items(board_id)).await?;
        let settings = query.run(|| store.read_settings(board_id)).await?;

        let state = Arc::new(Mutex::new(BoardState {
            columns,
            items,
            settings,
            presence: PresenceTracker::new(user.id.clone(), ColorPolicy::RoundRobin)
                .with_active_threshold(config.recently_active_threshold_ms),
            cursors: CursorTracker::new(),
        }));

        let request = JoinRequest::new(board_topic(board_id))
            .with_changes(ChangeFilter::table("items"))
            .with_changes(ChangeFilter::table("retrospectives").eq("id", board_id))
            .with_presence(user.id.clone());
        let handle = reconnect_channel(transport, &request, config.channel_retry_policy()).await?;
        let subscription = Subscription::start(
            handle,
            Box::new(BoardEventSink {
                state: state.clone(),
                local_user_id: user.id.clone(),
            }),
        );

        subscription.sender().track(PresenceMeta {
            user_id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            avatar_url: user.avatar_url.clone(),
            color: None,
            online_at: now_ms(),
        })?;

        let heartbeat = tokio::spawn(run_heartbeat(
            subscription.sender().clone(),
            state.clone(),
            user.id.clone(),
            config.heartbeat_interval(),
        ));

        log::info!(
            target: "scrumkit.session",
            "{} joined board {}",
            user.name,
            board_id
        );

        Ok(Self {
            board_id: board_id.to_string(),
            guard: Mutex::new(ActionGuard::new(&config)),
            throttle: Mutex::new(CursorThrottle::new(
                config.cursor_throttle_ms,
                config.cursor_min_movement_px,
            )),
            user,
            config,
            store,
            query,
            state,
            subscription,
            heartbeat,
            timer: Mutex::new(None),
        })
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    pub fn status(&self) -> Option<SubscriptionStatus> {
        self.subscription.status()
    }

    pub fn last_error(&self) -> Option<String> {
        self.subscription.last_error()
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        lock(&self.state)
    }

    fn check_rate(&self, kind: ActionKind) -> Result<(), SessionError> {
        self.guard
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .check(kind, Instant::now())?;
        Ok(())
    }

    pub fn columns(&self) -> Vec<Column> {
        self.state().columns.clone()
    }

    /// Items of one column ordered by position.
    pub fn items_in_column(&self, column_id: &str) -> Vec<Item> {
        column_items(&self.state().items, column_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn settings(&self) -> BoardSettings {
        self.state().settings.clone()
    }

    pub fn presence_view(&self) -> AvatarStack {
        self.state()
            .presence
            .avatar_stack(now_ms(), self.config.max_displayed_avatars)
    }

    pub fn recently_active_count(&self) -> usize {
        self.state().presence.recently_active_count(now_ms())
    }

    pub fn remote_cursor(&self, user_id: &str) -> Option<RemoteCursor> {
        self.state().cursors.get(user_id).cloned()
    }

    /// Persist a finished drag as one write, then mirror it locally.
    pub async fn move_item(&self, outcome: &DragOutcome) -> Result<MovePlan, SessionError> {
        let plan = {
            let state = self.state();
            if !state.items.iter().any(|i| i.id == outcome.item_id) {
                return Err(SessionError::UnknownItem(outcome.item_id.clone()));
            }
            if !state.has_column(&outcome.target_column_id) {
                return Err(SessionError::UnknownColumn(outcome.target_column_id.clone()));
            }
            plan_move(&state.items, outcome)
        };
        if plan.is_empty() {
            return Ok(plan);
        }
        self.check_rate(ActionKind::Other)?;

        self.query.run(|| self.store.apply_move_plan(&plan)).await?;
        apply_move_plan(&mut self.state().items, &plan);
        log::debug!(
            target: "scrumkit.session",
            "Moved {} ({} position updates)",
            outcome.item_id,
            plan.updates.len()
        );
        Ok(plan)
    }

    /// Add an item at the end of `column_id`.
    pub async fn create_item(&self, column_id: &str, content: &str) -> Result<Item, SessionError> {
        self.check_rate(ActionKind::CreateItem)?;

        let new_item = NewItem {
            column_id: column_id.to_string(),
            position: get_next_position(&self.state().items, column_id),
            content: content.to_string(),
            author_id: Some(self.user.id.clone()),
            author_name: Some(self.user.name.clone()),
        };
        let item = self.query.run(|| self.store.insert_item(&new_item)).await?;
        self.state().upsert_item(item.clone());
        Ok(item)
    }

    pub async fn delete_item(&self, item_id: &str) -> Result<(), SessionError> {
        if !self.state().items.iter().any(|i| i.id == item_id) {
            return Err(SessionError::UnknownItem(item_id.to_string()));
        }
        self.check_rate(ActionKind::Other)?;

        self.query.run(|| self.store.delete_item(item_id)).await?;
        self.state().remove_item(item_id);
        Ok(())
    }

    /// Compact a column's positions to `0..n`.
    pub async fn reindex_column(&self, column_id: &str) -> Result<Vec<PositionUpdate>, SessionError> {
        let updates = reindex_positions(&column_items(&self.state().items, column_id));
        if updates.is_empty() {
            return Ok(updates);
        }
        self.check_rate(ActionKind::Other)?;
        let plan = MovePlan {
            updates,
            relocation: None,
        };
        self.query.run(|| self.store.apply_move_plan(&plan)).await?;
        apply_move_plan(&mut self.state().items, &plan);
        Ok(plan.updates)
    }

    /// Share the local pointer position. Returns whether it was sent.
    pub fn send_cursor(&self, position: CursorPosition) -> Result<bool, SessionError> {
        let now = now_ms();
        let allowed = self
            .throttle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .should_send(position, now.max(0) as u64);
        if !allowed {
            return Ok(false);
        }

        let color = self
            .state()
            .presence
            .get(&self.user.id)
            .map(|u| u.color.clone())
            .unwrap_or_else(|| hashed_color(&self.user.id).to_string());
        let message = CursorMessage {
            user_id: self.user.id.clone(),
            name: self.user.name.clone(),
            color,
            position,
            timestamp: now,
        };
        let payload = BroadcastMessage::new(events::CURSOR, &message)
            .map_err(crate::error::StoreError::from)?;
        self.subscription.sender().broadcast(payload)?;
        Ok(true)
    }

    /// Timer driver bound to this board's settings and channel. Created on
    /// first use; the session shuts it down when it leaves.
    pub fn facilitator_timer(&self) -> Arc<FacilitatorTimer> {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = timer.as_ref() {
            return timer.clone();
        }
        let initial = self.state().settings.timer().copied().unwrap_or_default();
        let created = Arc::new(FacilitatorTimer::new(
            self.board_id.clone(),
            self.store.clone(),
            self.subscription.sender().clone(),
            initial,
        ));
        *timer = Some(created.clone());
        created
    }

    /// Release the channel and stop background work.
    pub fn leave(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.heartbeat.abort();
        if let Some(timer) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            timer.shutdown();
        }
        if self.subscription.unsubscribe() {
            log::info!(
                target: "scrumkit.session",
                "{} left board {}",
                self.user.name,
                self.board_id
            );
        }
        let mut state = self.state();
        state.presence.clear();
        state.cursors.clear();
    }
}

impl Drop for BoardSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn run_heartbeat(
    sender: ChannelSender,
    state: Arc<Mutex<BoardState>>,
    user_id: String,
    period: std::time::Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        let beat = Heartbeat {
            user_id: user_id.clone(),
            timestamp: now_ms(),
        };
        lock(&state).presence.touch(&user_id, beat.timestamp);
        let message = match BroadcastMessage::new(events::HEARTBEAT, &beat) {
            Ok(message) => message,
            Err(e) => {
                log::error!(target: "scrumkit.session", "Heartbeat encode failed: {}", e);
                continue;
            }
        };
        if sender.broadcast(message).is_err() {
            log::debug!(target: "scrumkit.session", "Heartbeat stopped, channel closed");
            break;
        }
    }
}
