// skipwatch library - core modules for the Spotify skip tracker
// Poll the remote player, spot skips, keep score

pub mod behavior;  // classification, navigation, statistics storage
pub mod config;    // settings and preferences
pub mod monitor;   // poll loop, backoff, progress interpolation
pub mod playback;  // playback snapshot and the state store around it
pub mod spotify;   // provider trait + Web API client
pub mod ui;        // notification sinks

#[cfg(test)]
mod test_support;

// Export the stuff other modules actually use
pub use behavior::{MemoryStore, SkipRecord, SkipSettings, SkipStore, SkipType, TrackChangeCoordinator};
pub use config::Config;
pub use monitor::{Monitor, MonitorConfig, MonitorConfigUpdate, MonitorState};
pub use playback::{PlaybackSnapshot, StateStore};
pub use spotify::{PlaybackProvider, ProviderError};
pub use ui::{MonitorEvent, NotificationSink};
