/// Connection / resilience layer.
///
/// - [`ConnectionMonitor`] probes the session on start and every check
///   interval, backing off exponentially after failures until the retry
///   budget is spent. A successful probe or a manual [`ConnectionMonitor::reset`]
///   restores the budget.
/// - [`QueryRetry`] wraps a data operation and retries it once after the
///   backoff delay when it fails with a network error.
/// - [`reconnect_channel`] re-opens a realtime channel under the channel
///   budget.
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scrumkit_core::retry::{RetryPolicy, RetryState};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use crate::error::{RealtimeError, StoreError};
use crate::store::SessionProbe;
use crate::transport::{ChannelHandle, JoinRequest, RealtimeTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub retry_count: u32,
    /// No backoff retry is pending; only the regular interval check or a
    /// manual reset will probe again.
    pub retries_exhausted: bool,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            connected: true,
            retry_count: 0,
            retries_exhausted: false,
        }
    }
}

pub struct ConnectionMonitor {
    status: watch::Receiver<ConnectionStatus>,
    reset: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ConnectionMonitor {
    pub fn spawn(probe: Arc<dyn SessionProbe>, policy: RetryPolicy, interval: Duration) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let reset = Arc::new(Notify::new());
        let task = tokio::spawn(run_monitor(probe, policy, interval, status_tx, reset.clone()));
        Self {
            status: status_rx,
            reset,
            task,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn status_stream(&self) -> WatchStream<ConnectionStatus> {
        WatchStream::new(self.status.clone())
    }

    /// Restore the retry budget and probe immediately.
    pub fn reset(&self) {
        self.reset.notify_one();
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_monitor(
    probe: Arc<dyn SessionProbe>,
    policy: RetryPolicy,
    interval: Duration,
    status_tx: watch::Sender<ConnectionStatus>,
    reset: Arc<Notify>,
) {
    let mut retry = RetryState::new(policy);
    loop {
        let wait = match probe.check_session().await {
            Ok(()) => {
                if retry.retry_count() > 0 || !status_tx.borrow().connected {
                    log::info!(target: "scrumkit.connection", "Connection restored");
                }
                retry.reset();
                status_tx.send_replace(ConnectionStatus::default());
                interval
            }
            Err(e) => {
                let delay = retry.next_delay();
                match delay {
                    Some(delay) => log::warn!(
                        target: "scrumkit.connection",
                        "Session check failed ({}), retry {}/{} in {}ms",
                        e,
                        retry.retry_count(),
                        retry.policy().max_attempts,
                        delay.as_millis()
                    ),
                    None => log::error!(
                        target: "scrumkit.connection",
                        "Session check failed ({}), retry budget exhausted",
                        e
                    ),
                }
                status_tx.send_replace(ConnectionStatus {
                    connected: false,
                    retry_count: retry.retry_count(),
                    retries_exhausted: delay.is_none(),
                });
                delay.unwrap_or(interval)
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = reset.notified() => {
                log::info!(target: "scrumkit.connection", "Retry budget reset");
                retry.reset();
            }
        }
    }
}

/// Query wrapper sharing one retry budget across the operations it runs.
pub struct QueryRetry {
    state: Mutex<RetryState>,
}

impl QueryRetry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(RetryState::new(policy)),
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count()
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RetryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `op`; on a network error retry it once after the backoff delay if
    /// the budget allows. Other errors are returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let err = match op().await {
            Ok(value) => {
                self.reset();
                return Ok(value);
            }
            Err(e) if e.is_network() => e,
            Err(e) => return Err(e),
        };

        let Some(delay) = self.lock().next_delay() else {
            log::error!(
                target: "scrumkit.connection",
                "Query failed and retry budget is exhausted: {}",
                err
            );
            return Err(err);
        };
        log::warn!(
            target: "scrumkit.connection",
            "Query failed ({}), retrying in {}ms",
            err,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;

        let result = op().await;
        match &result {
            Ok(_) => self.reset(),
            Err(e) => log::warn!(target: "scrumkit.connection", "Query retry failed: {}", e),
        }
        result
    }
}

/// Open `request` on `transport`, retrying with backoff until the policy's
/// attempts are spent.
pub async fn reconnect_channel(
    transport: &dyn RealtimeTransport,
    request: &JoinRequest,
    policy: RetryPolicy,
) -> Result<ChannelHandle, RealtimeError> {
    let mut retry = RetryState::new(policy);
    loop {
        match transport.join(request.clone()).await {
            Ok(handle) => {
                if retry.retry_count() > 0 {
                    log::info!(
                        target: "scrumkit.connection",
                        "Rejoined {} after {} retries",
                        request.topic,
                        retry.retry_count()
                    );
                }
                return Ok(handle);
            }
            Err(e) => match retry.next_delay() {
                Some(delay) => {
                    log::warn!(
                        target: "scrumkit.connection",
                        "Join {} failed ({}), retrying in {}ms",
                        request.topic,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    log::error!(
                        target: "scrumkit.connection",
                        "Giving up on {}: {}",
                        request.topic,
                        e
                    );
                    return Err(RealtimeError::RetriesExhausted {
                        topic: request.topic.clone(),
                        attempts: retry.retry_count(),
                    });
                }
            },
        }
    }
}
