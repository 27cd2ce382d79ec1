use super::{MonitorEvent, NotificationSink};
use notify_rust::Notification;
use tracing::debug;

const APP_NAME: &str = "skipwatch";

/// Desktop notifications for connection trouble and (optionally) each skip.
#[derive(Debug, Clone)]
pub struct DesktopSink {
    notify_skips: bool,
}

impl DesktopSink {
    pub fn new(notify_skips: bool) -> Self {
        Self { notify_skips }
    }

    fn show(summary: &str, body: &str) {
        if let Err(e) = Notification::new()
            .appname(APP_NAME)
            .summary(summary)
            .body(body)
            .show()
        {
            debug!("Desktop notification failed: {}", e);
        }
    }
}

impl NotificationSink for DesktopSink {
    fn send(&self, event: MonitorEvent) {
        match event {
            MonitorEvent::ConnectionProblem { consecutive_errors, message } => Self::show(
                "Spotify connection problem",
                &format!("{} failed polls in a row: {}", consecutive_errors, message),
            ),
            MonitorEvent::ConnectionRestored => Self::show("Spotify connection restored", "Monitoring resumed"),
            MonitorEvent::SkipDetected(record) if self.notify_skips => Self::show(
                "Skip recorded",
                &format!("{} by {} at {}%", record.track_name, record.artist_name, record.play_percentage),
            ),
            _ => {}
        }
    }
}
