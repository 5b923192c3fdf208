/// Facilitator timer driver.
///
/// Each `FacilitatorTimer` owns at most one ticking task. Every transition is
/// written into the board settings (`facilitator.timer`) and broadcast as a
/// `timer` event; per-second ticks are broadcast only, and the final tick is
/// persisted again. After `shutdown` the driver refuses further transitions.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use scrumkit_core::realtime::{events, BroadcastMessage};
use scrumkit_core::timer::{Tick, TimerState};
use tokio::task::JoinHandle;

use crate::error::{RealtimeError, SessionError, StoreError};
use crate::store::BoardStore;
use crate::transport::ChannelSender;

const TICK: Duration = Duration::from_secs(1);

struct TimerShared {
    board_id: String,
    store: Arc<dyn BoardStore>,
    sender: ChannelSender,
    state: Mutex<TimerState>,
    closed: AtomicBool,
}

impl TimerShared {
    fn state(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn broadcast(&self, state: TimerState) -> Result<(), SessionError> {
        let message = BroadcastMessage::new(events::TIMER, &state).map_err(StoreError::from)?;
        self.sender.broadcast(message)?;
        Ok(())
    }

    async fn persist(&self, state: TimerState) -> Result<(), SessionError> {
        let mut settings = self.store.read_settings(&self.board_id).await?;
        settings.facilitator_mut().timer = Some(state);
        self.store.write_settings(&self.board_id, &settings).await?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::Closed(self.sender.topic().to_string()).into());
        }
        Ok(())
    }

    async fn publish(&self, state: TimerState) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.persist(state).await?;
        self.broadcast(state)
    }
}

pub struct FacilitatorTimer {
    shared: Arc<TimerShared>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl FacilitatorTimer {
    pub fn new(
        board_id: String,
        store: Arc<dyn BoardStore>,
        sender: ChannelSender,
        initial: TimerState,
    ) -> Self {
        Self {
            shared: Arc::new(TimerShared {
                board_id,
                store,
                sender,
                state: Mutex::new(initial),
                closed: AtomicBool::new(false),
            }),
            ticker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> TimerState {
        *self.shared.state()
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub async fn start(&self, total_seconds: u32) -> Result<TimerState, SessionError> {
        self.shared.ensure_open()?;
        let state = self.transition(|t| t.start(total_seconds));
        self.restart_ticker();
        log::info!(
            target: "scrumkit.timer",
            "Timer started on {}: {}",
            self.shared.board_id,
            state.display()
        );
        self.shared.publish(state).await?;
        Ok(state)
    }

    pub async fn pause(&self) -> Result<TimerState, SessionError> {
        self.shared.ensure_open()?;
        let state = self.transition(TimerState::pause);
        self.stop();
        self.shared.publish(state).await?;
        Ok(state)
    }

    pub async fn resume(&self) -> Result<TimerState, SessionError> {
        self.shared.ensure_open()?;
        let state = self.transition(TimerState::resume);
        if state.is_ticking() {
            self.restart_ticker();
        }
        self.shared.publish(state).await?;
        Ok(state)
    }

    pub async fn reset(&self) -> Result<TimerState, SessionError> {
        self.shared.ensure_open()?;
        let state = self.transition(TimerState::reset);
        self.stop();
        self.shared.publish(state).await?;
        Ok(state)
    }

    pub async fn add_time(&self, seconds: u32) -> Result<TimerState, SessionError> {
        self.shared.ensure_open()?;
        let state = self.transition(|t| t.add_time(seconds));
        if state.is_ticking() && !self.is_ticking() {
            self.restart_ticker();
        }
        self.shared.publish(state).await?;
        Ok(state)
    }

    /// Cancel the ticking task without touching the shared state.
    pub fn stop(&self) {
        if let Some(ticker) = self.ticker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            ticker.abort();
        }
    }

    /// Stop ticking for good; used when the owning session goes away.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.stop();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn transition(&self, f: impl FnOnce(&mut TimerState)) -> TimerState {
        let mut state = self.shared.state();
        f(&mut state);
        *state
    }

    fn restart_ticker(&self) {
        let mut ticker = self.ticker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = ticker.take() {
            previous.abort();
        }
        *ticker = Some(tokio::spawn(run_ticker(self.shared.clone())));
    }
}

impl Drop for FacilitatorTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_ticker(shared: Arc<TimerShared>) {
    let mut interval = tokio::time::interval(TICK);
    interval.tick().await;
    loop {
        interval.tick().await;
        let (tick, state) = {
            let mut state = shared.state();
            (state.tick(), *state)
        };
        match tick {
            Tick::Idle => break,
            Tick::Running { .. } => {
                if let Err(e) = shared.broadcast(state) {
                    log::warn!(target: "scrumkit.timer", "Timer tick not delivered: {}", e);
                }
            }
            Tick::Completed => {
                log::info!(target: "scrumkit.timer", "Timer finished on {}", shared.board_id);
                if let Err(e) = shared.publish(state).await {
                    log::warn!(target: "scrumkit.timer", "Failed to publish finished timer: {}", e);
                }
                break;
            }
        }
    }
}
