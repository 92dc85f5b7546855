//! Periodic poll loop
//!
//! The poller runs as a Tokio task. Every cycle does blocking libusb and
//! sysfs I/O (plus metadata retry sleeps), so cycles run on the blocking pool
//! one after another while the task itself only waits on the interval timer
//! and the cancellation token.
//!
//! Updates are handed to a caller-supplied callback. [`update_queue`] builds
//! a callback over a bounded queue that drops the *oldest* pending update
//! when full, so a slow consumer always ends up with the newest forest.

use crate::changelog::LogEntry;
use crate::monitor::{Monitor, PollOutcome, Snapshot};
use crate::tree::{TreeNode, build_forest};
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Message delivered to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollUpdate {
    /// Current device forest
    Forest {
        timestamp: DateTime<Local>,
        roots: Vec<TreeNode>,
    },
    /// The USB stack could not be queried this cycle
    NoData { timestamp: DateTime<Local> },
}

impl PollUpdate {
    pub fn timestamp(&self) -> DateTime<Local> {
        match self {
            PollUpdate::Forest { timestamp, .. } | PollUpdate::NoData { timestamp } => *timestamp,
        }
    }
}

/// Poller lifecycle; `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Stopped,
}

/// Drives a [`Monitor`] at a fixed interval
pub struct Poller {
    monitor: Arc<Monitor>,
    interval: Duration,
    state: Mutex<PollerState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub fn new(monitor: Arc<Monitor>, interval: Duration) -> Self {
        Self {
            monitor,
            interval,
            state: Mutex::new(PollerState::Idle),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PollerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start polling on the current Tokio runtime
    ///
    /// The first cycle runs immediately and always delivers the full forest.
    /// It reconciles like any other cycle, so it is silent on a fresh engine
    /// and reports changes made since an earlier [`refresh`](Self::refresh).
    /// After that a forest is delivered only when something changed, and
    /// `NoData` whenever the USB stack is unavailable.
    pub fn start<F>(&self, callback: F) -> common::Result<()>
    where
        F: FnMut(PollUpdate) + Send + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != PollerState::Idle {
            return Err(common::Error::InvalidState(format!(
                "poller cannot start while {:?}",
                *state
            )));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| common::Error::InvalidState(format!("no Tokio runtime: {}", e)))?;

        let task = runtime.spawn(run(
            self.monitor.clone(),
            self.interval,
            self.cancel.clone(),
            callback,
        ));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        *state = PollerState::Running;

        info!("Poller started (interval {:?})", self.interval);
        Ok(())
    }

    /// Ask the loop to stop; safe to call any number of times
    ///
    /// Returns immediately. A cycle already in progress finishes, nothing is
    /// delivered afterwards.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == PollerState::Running {
            *state = PollerState::Stopped;
            self.cancel.cancel();
            info!("Poller stopping");
        }
    }

    /// Wait for the loop task to exit after [`stop`](Self::stop)
    pub async fn join(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Poller task failed: {}", e);
            }
        }
    }

    /// Synchronous one-shot snapshot that silently resets the baseline
    ///
    /// Blocks on USB I/O; call through `spawn_blocking` from async code.
    pub fn refresh(&self) -> common::Result<Snapshot> {
        self.monitor.refresh()
    }

    /// Copy of the change log, oldest first
    pub fn log(&self) -> Vec<LogEntry> {
        self.monitor.log()
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<F>(monitor: Arc<Monitor>, period: Duration, cancel: CancellationToken, mut callback: F)
where
    F: FnMut(PollUpdate) + Send + 'static,
{
    let first = {
        let monitor = monitor.clone();
        tokio::task::spawn_blocking(move || monitor.poll_snapshot()).await
    };
    if cancel.is_cancelled() {
        debug!("Poller stopped before the first delivery");
        return;
    }
    match first {
        Ok(Ok(snapshot)) => callback(PollUpdate::Forest {
            timestamp: snapshot.timestamp,
            roots: build_forest(&snapshot.devices),
        }),
        Ok(Err(_)) => callback(PollUpdate::NoData {
            timestamp: Local::now(),
        }),
        Err(e) => error!("Initial poll cycle panicked: {}", e),
    }

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial cycle already ran
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let cycle = {
            let monitor = monitor.clone();
            tokio::task::spawn_blocking(move || monitor.poll()).await
        };
        if cancel.is_cancelled() {
            break;
        }

        match cycle {
            Ok(PollOutcome::Changed { timestamp, devices }) => {
                debug!("Devices changed, delivering {} devices", devices.len());
                callback(PollUpdate::Forest {
                    timestamp,
                    roots: build_forest(&devices),
                });
            }
            Ok(PollOutcome::Unavailable { timestamp }) => {
                callback(PollUpdate::NoData { timestamp });
            }
            Ok(PollOutcome::Unchanged) => {}
            Err(e) => error!("Poll cycle panicked: {}", e),
        }
    }

    debug!("Poller loop exited");
}

/// Callback and receiver pair over a bounded drop-oldest queue
///
/// When the queue is full the oldest pending update is discarded to make
/// room; the producer never blocks and the newest update is never lost.
pub fn update_queue(
    capacity: usize,
) -> (
    impl FnMut(PollUpdate) + Send + 'static,
    async_channel::Receiver<PollUpdate>,
) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    let callback = move |update: PollUpdate| match tx.force_send(update) {
        Ok(Some(_)) => debug!("Update queue full, dropped oldest update"),
        Ok(None) => {}
        Err(_) => debug!("Update queue closed, discarding update"),
    };
    (callback, rx)
}
