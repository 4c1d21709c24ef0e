//! Presence monitor: polls the bus in a background task and reports device
//! arrival, departure, and faults to listeners

use chrono::Utc;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use wirewatch_core::{BusAccessError, BusAddress, BusDirectory};

use crate::config::MonitorConfig;
use crate::event::{EventKind, MonitorEvent, MonitorFault, PresenceListener};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Listeners can only be added before the monitor starts")]
    ListenersFrozen,
    #[error("Monitor has been stopped")]
    Stopped,
    #[error("Poll task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Created,
    Running,
    /// Terminal; construct a new monitor to resume watching
    Stopped,
}

/// Counters accumulated by the poll task, returned when it exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub polls: u64,
    /// Bus faults plus listener failures
    pub faults: u64,
    /// Addresses reported as arrived
    pub arrivals: u64,
    /// Addresses reported as departed
    pub departures: u64,
}

enum Lifecycle {
    Created {
        listeners: Vec<Arc<dyn PresenceListener>>,
    },
    Running {
        cancel: CancellationToken,
        task: JoinHandle<MonitorStats>,
    },
    Stopped {
        stats: MonitorStats,
    },
}

impl Lifecycle {
    fn state(&self) -> MonitorState {
        match self {
            Self::Created { .. } => MonitorState::Created,
            Self::Running { .. } => MonitorState::Running,
            Self::Stopped { .. } => MonitorState::Stopped,
        }
    }
}

/// Watches a bus for devices coming and going.
///
/// Listeners are registered while the monitor is `Created` and frozen once
/// it starts, so the poll task never races a registration. Bus faults are
/// retried forever: each failed poll produces a fault event and the next
/// poll runs after the usual interval.
pub struct PresenceMonitor {
    bus: Arc<dyn BusDirectory>,
    poll_interval: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl PresenceMonitor {
    pub fn new(bus: Arc<dyn BusDirectory>, config: &MonitorConfig) -> Self {
        Self {
            bus,
            poll_interval: config.poll_interval(),
            lifecycle: Mutex::new(Lifecycle::Created {
                listeners: Vec::new(),
            }),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub async fn state(&self) -> MonitorState {
        self.lifecycle.lock().await.state()
    }

    /// Register a listener; only allowed before `start`
    pub async fn add_listener(
        &self,
        listener: Arc<dyn PresenceListener>,
    ) -> Result<(), MonitorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match &mut *lifecycle {
            Lifecycle::Created { listeners } => {
                listeners.push(listener);
                debug!(listeners = listeners.len(), "Listener registered");
                Ok(())
            }
            Lifecycle::Running { .. } => Err(MonitorError::ListenersFrozen),
            Lifecycle::Stopped { .. } => Err(MonitorError::Stopped),
        }
    }

    /// Spawn the poll task. A no-op while already running.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(&self) -> Result<(), MonitorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let listeners = match &mut *lifecycle {
            Lifecycle::Created { listeners } => std::mem::take(listeners),
            Lifecycle::Running { .. } => return Ok(()),
            Lifecycle::Stopped { .. } => return Err(MonitorError::Stopped),
        };

        let cancel = CancellationToken::new();
        let poll = PollLoop {
            bus: Arc::clone(&self.bus),
            listeners,
            interval: self.poll_interval,
            cancel: cancel.clone(),
            previous: BTreeSet::new(),
            consecutive_faults: 0,
            stats: MonitorStats::default(),
        };

        info!(
            interval = ?self.poll_interval,
            listeners = poll.listeners.len(),
            "Starting presence monitor"
        );
        let task = tokio::spawn(poll.run());
        *lifecycle = Lifecycle::Running { cancel, task };
        Ok(())
    }

    /// Cancel the poll task and wait for it to exit.
    ///
    /// Returns promptly even mid-sleep. Stopping twice returns the same
    /// stats; stopping a monitor that never started just retires it.
    pub async fn stop(&self) -> Result<MonitorStats, MonitorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(
            &mut *lifecycle,
            Lifecycle::Stopped {
                stats: MonitorStats::default(),
            },
        );

        match previous {
            Lifecycle::Created { .. } => Ok(MonitorStats::default()),
            Lifecycle::Stopped { stats } => {
                *lifecycle = Lifecycle::Stopped { stats };
                Ok(stats)
            }
            Lifecycle::Running { cancel, task } => {
                cancel.cancel();
                let stats = task.await?;
                info!(
                    polls = stats.polls,
                    faults = stats.faults,
                    "Presence monitor stopped"
                );
                *lifecycle = Lifecycle::Stopped { stats };
                Ok(stats)
            }
        }
    }
}

impl Drop for PresenceMonitor {
    fn drop(&mut self) {
        if let Lifecycle::Running { cancel, .. } = self.lifecycle.get_mut() {
            warn!("Presence monitor dropped while running; cancelling poll task");
            cancel.cancel();
        }
    }
}

/// Addresses that arrived and departed between two snapshots
pub fn diff_snapshots(
    previous: &BTreeSet<BusAddress>,
    current: &BTreeSet<BusAddress>,
) -> (BTreeSet<BusAddress>, BTreeSet<BusAddress>) {
    let arrived = current.difference(previous).copied().collect();
    let departed = previous.difference(current).copied().collect();
    (arrived, departed)
}

/// State owned by the background task
struct PollLoop {
    bus: Arc<dyn BusDirectory>,
    listeners: Vec<Arc<dyn PresenceListener>>,
    interval: Duration,
    cancel: CancellationToken,
    previous: BTreeSet<BusAddress>,
    consecutive_faults: u64,
    stats: MonitorStats,
}

impl PollLoop {
    async fn run(mut self) -> MonitorStats {
        loop {
            if !self.poll_once().await {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        debug!(polls = self.stats.polls, "Poll loop exited");
        self.stats
    }

    /// Run one presence poll; returns false if cancelled mid-query
    async fn poll_once(&mut self) -> bool {
        let bus = Arc::clone(&self.bus);
        let query = tokio::task::spawn_blocking(move || bus.list_devices());

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            result = query => result,
        };

        self.stats.polls += 1;
        let observed_at = Utc::now();

        let handles = match result {
            Ok(Ok(handles)) => handles,
            Ok(Err(e)) => {
                self.bus_fault(observed_at, e);
                return true;
            }
            Err(e) => {
                self.bus_fault(
                    observed_at,
                    BusAccessError::Io(format!("bus query task failed: {}", e)),
                );
                return true;
            }
        };

        if self.consecutive_faults > 0 {
            info!(
                failed_polls = self.consecutive_faults,
                "Bus query recovered"
            );
            self.consecutive_faults = 0;
        }

        let current: BTreeSet<BusAddress> = handles.into_iter().map(|h| h.address).collect();
        let (arrived, departed) = diff_snapshots(&self.previous, &current);
        trace!(
            present = current.len(),
            arrived = arrived.len(),
            departed = departed.len(),
            "Presence poll"
        );

        if !arrived.is_empty() {
            self.stats.arrivals += arrived.len() as u64;
            self.dispatch(MonitorEvent {
                observed_at,
                kind: EventKind::Arrived(arrived),
            });
        }
        if !departed.is_empty() {
            self.stats.departures += departed.len() as u64;
            self.dispatch(MonitorEvent {
                observed_at,
                kind: EventKind::Departed(departed),
            });
        }

        self.previous = current;
        true
    }

    fn bus_fault(&mut self, observed_at: chrono::DateTime<Utc>, error: BusAccessError) {
        self.consecutive_faults += 1;
        warn!(
            error = %error,
            consecutive = self.consecutive_faults,
            "Bus query failed, will retry"
        );
        self.dispatch(MonitorEvent {
            observed_at,
            kind: EventKind::Fault(MonitorFault::Bus(error)),
        });
    }

    /// Deliver to every listener in registration order, isolating failures
    fn dispatch(&mut self, event: MonitorEvent) {
        let mut failures = Vec::new();
        for (index, listener) in self.listeners.iter().enumerate() {
            if let Err(message) = deliver(listener.as_ref(), &event) {
                warn!(listener = index, error = %message, "Listener failed");
                failures.push(MonitorFault::Listener { index, message });
            }
        }

        self.stats.faults += failures.len() as u64;
        if matches!(event.kind, EventKind::Fault(MonitorFault::Bus(_))) {
            self.stats.faults += 1;
        }

        // Failures while reporting a failure are only logged
        for fault in failures {
            let failed = match &fault {
                MonitorFault::Listener { index, .. } => *index,
                MonitorFault::Bus(_) => continue,
            };
            let report = MonitorEvent {
                observed_at: event.observed_at,
                kind: EventKind::Fault(fault),
            };
            for (index, listener) in self.listeners.iter().enumerate() {
                if index == failed {
                    continue;
                }
                if let Err(message) = deliver(listener.as_ref(), &report) {
                    warn!(
                        listener = index,
                        error = %message,
                        "Listener failed while handling a listener fault"
                    );
                }
            }
        }
    }
}

fn deliver(listener: &dyn PresenceListener, event: &MonitorEvent) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("listener panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("listener panicked: {}", s)
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> BusAddress {
        BusAddress::from_bytes([0x28, n, 0, 0, 0, 0, 0, 0])
    }

    fn set(ns: &[u8]) -> BTreeSet<BusAddress> {
        ns.iter().map(|&n| addr(n)).collect()
    }

    #[test]
    fn test_diff_snapshots() {
        let (arrived, departed) = diff_snapshots(&set(&[]), &set(&[1, 2]));
        assert_eq!(arrived, set(&[1, 2]));
        assert!(departed.is_empty());

        let (arrived, departed) = diff_snapshots(&set(&[1, 2]), &set(&[2, 3]));
        assert_eq!(arrived, set(&[3]));
        assert_eq!(departed, set(&[1]));

        let (arrived, departed) = diff_snapshots(&set(&[1, 2]), &set(&[1, 2]));
        assert!(arrived.is_empty() && departed.is_empty());
    }

    #[test]
    fn test_panic_message() {
        let caught = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "listener panicked: boom");

        let caught = catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "listener panicked: code 7");
    }
}
