//! Monitor events and the listener capability

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use thiserror::Error;
use wirewatch_core::{BusAccessError, BusAddress};

/// Failure reported to listeners instead of stopping the poll loop
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorFault {
    #[error("Bus query failed: {0}")]
    Bus(BusAccessError),
    #[error("Listener {index} failed: {message}")]
    Listener { index: usize, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Addresses present now that were absent on the previous poll
    Arrived(BTreeSet<BusAddress>),
    /// Addresses present on the previous poll that are gone now
    Departed(BTreeSet<BusAddress>),
    Fault(MonitorFault),
}

/// One dispatch from the poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorEvent {
    /// When the poll that produced this event completed
    pub observed_at: DateTime<Utc>,
    pub kind: EventKind,
}

impl MonitorEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            observed_at: Utc::now(),
            kind,
        }
    }

    pub fn arrived(&self) -> Option<&BTreeSet<BusAddress>> {
        match &self.kind {
            EventKind::Arrived(set) => Some(set),
            _ => None,
        }
    }

    pub fn departed(&self) -> Option<&BTreeSet<BusAddress>> {
        match &self.kind {
            EventKind::Departed(set) => Some(set),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<&MonitorFault> {
        match &self.kind {
            EventKind::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Consumer of monitor events.
///
/// Listeners run synchronously on the poll task in registration order. A
/// listener that blocks stalls every later poll, so implementations must
/// return promptly and hand long work off elsewhere.
pub trait PresenceListener: Send + Sync {
    fn on_event(&self, event: &MonitorEvent) -> Result<(), ListenerError>;
}

impl<F> PresenceListener for F
where
    F: Fn(&MonitorEvent) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, event: &MonitorEvent) -> Result<(), ListenerError> {
        self(event)
    }
}
