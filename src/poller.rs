use crate::model::UserStatus;
use crate::session::{SessionSource, SessionStore};
use anyhow::Result;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2_000);

/// Disposer for a running poll loop. Stopping is idempotent and also
/// happens on drop.
#[derive(Debug)]
pub struct PollerHandle {
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("status poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts polling `source` for plan updates. The loop ticks immediately,
/// then every `every`, and ends on its own as soon as `store` is cleared.
pub fn start<S>(source: S, store: SessionStore, every: Duration) -> PollerHandle
where
    S: SessionSource + Clone + 'static,
{
    PollerHandle {
        task: Some(tokio::spawn(poll_loop(source, store, every))),
    }
}

async fn poll_loop<S>(source: S, store: SessionStore, every: Duration)
where
    S: SessionSource + Clone + 'static,
{
    let mut session_rx = store.subscribe();
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight = FuturesUnordered::new();
    let mut next_seq = 0u64;
    let mut applied_seq = 0u64;

    info!("status poller started ({} ms)", every.as_millis());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !store.is_active() {
                    break;
                }
                next_seq += 1;
                in_flight.push(status_request(source.clone(), next_seq));
            }
            Some((seq, result)) = in_flight.next(), if !in_flight.is_empty() => {
                match result {
                    Ok(status) if seq > applied_seq => {
                        applied_seq = seq;
                        let active = match status.plan {
                            Some(plan) => store.update_plan(plan),
                            None => {
                                debug!("status response #{seq} carried no plan");
                                store.is_active()
                            }
                        };
                        if !active {
                            break;
                        }
                    }
                    Ok(_) => debug!("discarding stale status response #{seq}"),
                    Err(error) => debug!("status tick #{seq} dropped: {error:#}"),
                }
            }
            changed = session_rx.changed() => {
                if changed.is_err() || session_rx.borrow_and_update().is_none() {
                    break;
                }
            }
        }
    }
    info!("status poller finished");
}

fn status_request<S>(source: S, seq: u64) -> impl Future<Output = (u64, Result<UserStatus>)>
where
    S: SessionSource + 'static,
{
    async move { (seq, source.user_status().await) }
}

/// Keeps one poll loop alive exactly while the session store is non-empty.
pub struct StatusPoller<S> {
    source: S,
    store: SessionStore,
    every: Duration,
    handle: Option<PollerHandle>,
}

impl<S> StatusPoller<S>
where
    S: SessionSource + Clone + 'static,
{
    pub fn new(source: S, store: SessionStore, every: Duration) -> Self {
        Self {
            source,
            store,
            every,
            handle: None,
        }
    }

    /// Starts the loop when a session is present and none is running; stops
    /// it when the session is gone.
    pub fn sync(&mut self) {
        if self.store.is_active() {
            if !self.is_running() {
                self.handle = Some(start(
                    self.source.clone(),
                    self.store.clone(),
                    self.every,
                ));
            }
        } else {
            self.stop();
        }
    }

    pub fn stop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(PollerHandle::is_running)
    }
}
