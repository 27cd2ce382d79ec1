// UI-facing notifications - everything the monitor pushes outwards
// Fire-and-forget: sinks never block the monitor and never answer back

#[cfg(feature = "notify")]
mod desktop; // desktop notifications for the things worth interrupting for

#[cfg(feature = "notify")]
pub use desktop::DesktopSink;

use crate::behavior::SkipRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub track_id: String,
    pub track_name: Option<String>,
    pub artist_name: Option<String>,
    pub progress_percent: f64,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub device_volume: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Progress(ProgressUpdate),
    Stopped,
    ConnectionProblem { consecutive_errors: u32, message: String },
    ConnectionRestored,
    SkipDetected(SkipRecord),
}

pub trait NotificationSink: Send + Sync {
    fn send(&self, event: MonitorEvent);
}

/// Forwards events into a tokio channel. A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<MonitorEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn send(&self, event: MonitorEvent) {
        let _ = self.sender.send(event);
    }
}

/// Writes events to the log. Progress ticks only show up at trace level.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn send(&self, event: MonitorEvent) {
        match event {
            MonitorEvent::Progress(update) => tracing::trace!(
                "{} {:.1}% ({}/{}ms)",
                update.track_id,
                update.progress_percent,
                update.position_ms,
                update.duration_ms
            ),
            MonitorEvent::Stopped => debug!("Playback stopped"),
            MonitorEvent::ConnectionProblem { consecutive_errors, message } => {
                warn!("Connection problem after {} errors: {}", consecutive_errors, message)
            }
            MonitorEvent::ConnectionRestored => info!("Connection restored"),
            MonitorEvent::SkipDetected(record) => info!(
                "Skip: {} by {} ({}, {}%)",
                record.track_name,
                record.artist_name,
                record.skip_type.as_str(),
                record.play_percentage
            ),
        }
    }
}

/// Sends every event to each inner sink.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl NotificationSink for FanoutSink {
    fn send(&self, event: MonitorEvent) {
        for sink in &self.sinks {
            sink.send(event.clone());
        }
    }
}
