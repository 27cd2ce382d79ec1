use super::{PlaybackSnapshot, SnapshotUpdate};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Repeat "now playing" lines for the same track are held back for this long.
pub const NOW_PLAYING_REPEAT_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Handle the poll loop and the interpolation timer share.
/// Locks are only ever held for a read or a merge, never across an await.
pub type SharedState = Arc<Mutex<StateStore>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

#[derive(Debug, Default)]
pub struct StateStore {
    snapshot: PlaybackSnapshot,
    last_logged: HashMap<String, i64>,
    credentials: Option<Credentials>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedState {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Back to defaults. Credentials survive; they belong to the session, not the track.
    pub fn reset(&mut self) {
        self.snapshot = PlaybackSnapshot::default();
        self.last_logged.clear();
    }

    pub fn get(&self) -> &PlaybackSnapshot {
        &self.snapshot
    }

    /// Shallow merge: only the fields set on `update` change.
    pub fn update(&mut self, update: SnapshotUpdate) {
        update.apply_to(&mut self.snapshot);
    }

    pub fn set_recent_tracks(&mut self, track_ids: Vec<String>) {
        self.snapshot.recent_tracks = track_ids;
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    pub fn last_logged(&self, track_id: &str) -> Option<i64> {
        self.last_logged.get(track_id).copied()
    }

    /// Decide whether a "now playing" line should go out, and remember it if so.
    /// Track changes always emit; the same track repeats at most once per window.
    pub fn should_emit_now_playing(&mut self, track_id: &str, now: i64, track_changed: bool) -> bool {
        if !track_changed {
            if let Some(last) = self.last_logged(track_id) {
                if now - last < NOW_PLAYING_REPEAT_WINDOW_MS {
                    return false;
                }
            }
        }

        // entries past the window can no longer hold anything back
        self.last_logged
            .retain(|_, logged_at| now - *logged_at < NOW_PLAYING_REPEAT_WINDOW_MS);
        self.last_logged.insert(track_id.to_string(), now);
        true
    }
}
