// Playback state - what the remote player is doing right now
// The snapshot is the single source of truth the monitor and the skip logic share

pub mod store; // in-memory accessor for the current snapshot

pub use store::{Credentials, SharedState, StateStore};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, the unit every timestamp in here uses.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Where playback is coming from (playlist, album, artist, radio...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackContext {
    #[serde(rename = "type")]
    pub kind: String,
    pub uri: String,
    pub name: Option<String>,
    pub id: Option<String>,
}

impl PlaybackContext {
    /// Build a context from a provider uri like `spotify:playlist:37i9dQZF1DX`.
    pub fn from_uri(kind: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let id = uri
            .rsplit(':')
            .next()
            .filter(|part| !part.is_empty() && *part != uri)
            .map(str::to_string);

        Self {
            kind: kind.into(),
            uri,
            name: None,
            id,
        }
    }

    /// Key used for per-context tallies.
    pub fn tally_key(&self) -> String {
        match &self.name {
            Some(name) => format!("{}:{}", self.kind, name),
            None => format!("{}:{}", self.kind, self.id.as_deref().unwrap_or("unknown")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub current_track_id: Option<String>,
    pub current_track_name: Option<String>,
    pub current_artist_name: Option<String>,
    pub current_album_name: Option<String>,
    pub current_track_duration: Option<u64>, // ms
    pub current_track_progress: Option<u64>, // ms, as of last_sync_time
    pub last_progress: Option<u64>,          // ms, last authoritative sample
    pub current_device_name: Option<String>,
    pub current_device_type: Option<String>,
    pub current_device_volume: Option<u8>, // 0-100
    pub current_context: Option<PlaybackContext>,
    pub is_in_library: bool,
    pub library_status_logged: bool,
    pub last_updated: Option<i64>,
    pub last_sync_time: Option<i64>,
    pub last_track_change_timestamp: Option<i64>,
    pub pause_start_time: Option<i64>,
    pub total_pause_duration: u64, // ms
    pub recent_tracks: Vec<String>, // most recent first
}

impl PlaybackSnapshot {
    /// Last known progress as a fraction of the track, if both numbers are known.
    pub fn progress_fraction(&self) -> Option<f64> {
        let duration = self.current_track_duration.filter(|d| *d > 0)?;
        let progress = self.last_progress?;
        Some(progress as f64 / duration as f64)
    }

    /// "Track by Artist" for log lines.
    pub fn display_name(&self) -> String {
        format!(
            "{} by {}",
            self.current_track_name.as_deref().unwrap_or("Unknown track"),
            self.current_artist_name.as_deref().unwrap_or("Unknown artist"),
        )
    }
}

/// Partial update for [`PlaybackSnapshot`]. `None` leaves a field alone;
/// nullable fields take `Some(None)` to clear them.
#[derive(Debug, Clone, Default)]
pub struct SnapshotUpdate {
    pub is_playing: Option<bool>,
    pub current_track_id: Option<Option<String>>,
    pub current_track_name: Option<Option<String>>,
    pub current_artist_name: Option<Option<String>>,
    pub current_album_name: Option<Option<String>>,
    pub current_track_duration: Option<Option<u64>>,
    pub current_track_progress: Option<Option<u64>>,
    pub last_progress: Option<Option<u64>>,
    pub current_device_name: Option<Option<String>>,
    pub current_device_type: Option<Option<String>>,
    pub current_device_volume: Option<Option<u8>>,
    pub current_context: Option<Option<PlaybackContext>>,
    pub is_in_library: Option<bool>,
    pub library_status_logged: Option<bool>,
    pub last_updated: Option<Option<i64>>,
    pub last_sync_time: Option<Option<i64>>,
    pub last_track_change_timestamp: Option<Option<i64>>,
    pub pause_start_time: Option<Option<i64>>,
    pub total_pause_duration: Option<u64>,
}

impl SnapshotUpdate {
    pub(crate) fn apply_to(self, snapshot: &mut PlaybackSnapshot) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(value) = self.$field {
                        snapshot.$field = value;
                    }
                )*
            };
        }

        merge!(
            is_playing,
            current_track_id,
            current_track_name,
            current_artist_name,
            current_album_name,
            current_track_duration,
            current_track_progress,
            last_progress,
            current_device_name,
            current_device_type,
            current_device_volume,
            current_context,
            is_in_library,
            library_status_logged,
            last_updated,
            last_sync_time,
            last_track_change_timestamp,
            pause_start_time,
            total_pause_duration,
        );
    }
}

/// Track metadata as the remote provider reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration_ms: u64,
}

impl RemoteTrack {
    pub fn artist_names(&self) -> String {
        self.artists.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDevice {
    pub name: String,
    pub kind: String,
    pub volume_percent: Option<u8>,
}

/// One authoritative sample of the remote player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePlayback {
    pub is_playing: bool,
    pub progress_ms: Option<u64>,
    pub track: Option<RemoteTrack>,
    pub device: Option<RemoteDevice>,
    pub context: Option<PlaybackContext>,
    pub is_in_library: bool,
}

impl RemotePlayback {
    /// Update that replaces every track and device field with this sample.
    pub fn full_update(&self, now: i64) -> SnapshotUpdate {
        let track = self.track.as_ref();
        let device = self.device.as_ref();

        SnapshotUpdate {
            is_playing: Some(self.is_playing),
            current_track_id: Some(track.map(|t| t.id.clone())),
            current_track_name: Some(track.map(|t| t.name.clone())),
            current_artist_name: Some(track.map(RemoteTrack::artist_names)),
            current_album_name: Some(track.and_then(|t| t.album.clone())),
            current_track_duration: Some(track.map(|t| t.duration_ms)),
            current_track_progress: Some(self.progress_ms),
            last_progress: Some(self.progress_ms),
            current_device_name: Some(device.map(|d| d.name.clone())),
            current_device_type: Some(device.map(|d| d.kind.clone())),
            current_device_volume: Some(device.and_then(|d| d.volume_percent)),
            current_context: Some(self.context.clone()),
            is_in_library: Some(self.is_in_library),
            library_status_logged: Some(false),
            last_updated: Some(Some(now)),
            last_sync_time: Some(Some(now)),
            last_track_change_timestamp: Some(Some(now)),
            pause_start_time: Some(if self.is_playing { None } else { Some(now) }),
            total_pause_duration: Some(0),
        }
    }
}
