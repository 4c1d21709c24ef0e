//! Stock listeners

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::event::{EventKind, ListenerError, MonitorEvent, PresenceListener};

/// Forwards every event into an unbounded channel so async code can consume
/// it off the poll task
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<MonitorEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PresenceListener for ChannelListener {
    fn on_event(&self, event: &MonitorEvent) -> Result<(), ListenerError> {
        self.tx
            .send(event.clone())
            .map_err(|_| ListenerError::new("event receiver dropped"))
    }
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

impl PresenceListener for LogListener {
    fn on_event(&self, event: &MonitorEvent) -> Result<(), ListenerError> {
        match &event.kind {
            EventKind::Arrived(addresses) => {
                for address in addresses {
                    info!(address = %address, at = %event.observed_at, "Device arrived");
                }
            }
            EventKind::Departed(addresses) => {
                for address in addresses {
                    info!(address = %address, at = %event.observed_at, "Device departed");
                }
            }
            EventKind::Fault(fault) => {
                warn!(error = %fault, at = %event.observed_at, "Monitor fault");
            }
        }
        Ok(())
    }
}
