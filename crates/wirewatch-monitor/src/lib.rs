//! Wirewatch Monitor - Background device-presence monitoring
//!
//! A [`PresenceMonitor`] polls a [`wirewatch_core::BusDirectory`] on its own
//! tokio task, diffs each device snapshot against the previous one, and
//! hands arrival, departure, and fault events to registered listeners.

pub mod config;
pub mod event;
pub mod listener;
pub mod monitor;

pub use config::{ConfigError, MonitorConfig};
pub use event::{EventKind, ListenerError, MonitorEvent, MonitorFault, PresenceListener};
pub use listener::{ChannelListener, LogListener};
pub use monitor::{diff_snapshots, MonitorError, MonitorState, MonitorStats, PresenceMonitor};
