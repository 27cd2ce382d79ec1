// Shared fakes for unit tests

use crate::behavior::{
    CompletedPlay, LogLevel, MemoryStore, SkipSettings, SkipStore, SkippedTrack, TrackStatisticsUpdate,
};
use crate::playback::{PlaybackSnapshot, RemoteDevice, RemotePlayback, RemoteTrack};
use crate::spotify::{PlaybackProvider, ProviderError, ProviderResult};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) fn remote(track_id: &str, progress_ms: u64, duration_ms: u64, is_playing: bool, in_library: bool) -> RemotePlayback {
    RemotePlayback {
        is_playing,
        progress_ms: Some(progress_ms),
        track: Some(RemoteTrack {
            id: track_id.to_string(),
            name: format!("Song {}", track_id),
            artists: vec!["Test Artist".to_string()],
            album: Some("Test Album".to_string()),
            duration_ms,
        }),
        device: Some(RemoteDevice {
            name: "Desk Speaker".to_string(),
            kind: "Speaker".to_string(),
            volume_percent: Some(60),
        }),
        context: None,
        is_in_library: in_library,
    }
}

/// Snapshot of a track as it looked when the listener moved on.
pub(crate) fn ended_snapshot(
    track_id: &str,
    last_progress: u64,
    duration: u64,
    in_library: bool,
    last_updated: i64,
) -> PlaybackSnapshot {
    PlaybackSnapshot {
        is_playing: true,
        current_track_id: Some(track_id.to_string()),
        current_track_name: Some(format!("Song {}", track_id)),
        current_artist_name: Some("Test Artist".to_string()),
        current_album_name: Some("Test Album".to_string()),
        current_track_duration: Some(duration),
        current_track_progress: Some(last_progress),
        last_progress: Some(last_progress),
        current_device_name: Some("Desk Speaker".to_string()),
        current_device_type: Some("Speaker".to_string()),
        is_in_library: in_library,
        last_updated: Some(last_updated),
        last_sync_time: Some(last_updated),
        ..Default::default()
    }
}

pub(crate) fn playing_snapshot(track_id: &str) -> PlaybackSnapshot {
    PlaybackSnapshot {
        is_playing: true,
        current_track_id: Some(track_id.to_string()),
        current_track_progress: Some(0),
        last_progress: Some(0),
        ..Default::default()
    }
}

#[derive(Default)]
struct FakeState {
    scripted: VecDeque<ProviderResult<Option<RemotePlayback>>>,
    playback: Option<RemotePlayback>,
    recently_played: Vec<String>,
    tracks: HashMap<String, RemoteTrack>,
    unfavorited: Vec<String>,
    fail_unfavorite: bool,
    fail_recently_played: bool,
    has_credentials: bool,
    playback_calls: u32,
}

/// Scripted stand-in for the Spotify client. Queued results are served first,
/// then the current playback repeats.
pub(crate) struct FakeProvider {
    inner: Mutex<FakeState>,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(FakeState {
                has_credentials: true,
                ..Default::default()
            }),
        }
    }

    pub(crate) fn set_playback(&self, playback: Option<RemotePlayback>) {
        self.inner.lock().playback = playback;
    }

    pub(crate) fn push_error(&self, error: ProviderError) {
        self.inner.lock().scripted.push_back(Err(error));
    }

    pub(crate) fn set_recently_played(&self, track_ids: &[&str]) {
        self.inner.lock().recently_played = track_ids.iter().map(|id| id.to_string()).collect();
    }

    pub(crate) fn add_track(&self, track: RemoteTrack) {
        self.inner.lock().tracks.insert(track.id.clone(), track);
    }

    pub(crate) fn fail_unfavorite(&self) {
        self.inner.lock().fail_unfavorite = true;
    }

    pub(crate) fn fail_recently_played(&self) {
        self.inner.lock().fail_recently_played = true;
    }

    pub(crate) fn clear_credentials(&self) {
        self.inner.lock().has_credentials = false;
    }

    pub(crate) fn unfavorited(&self) -> Vec<String> {
        self.inner.lock().unfavorited.clone()
    }

    pub(crate) fn playback_calls(&self) -> u32 {
        self.inner.lock().playback_calls
    }
}

#[async_trait]
impl PlaybackProvider for FakeProvider {
    async fn get_current_playback(&self) -> ProviderResult<Option<RemotePlayback>> {
        let mut state = self.inner.lock();
        state.playback_calls += 1;
        match state.scripted.pop_front() {
            Some(result) => result,
            None => Ok(state.playback.clone()),
        }
    }

    async fn get_recently_played_tracks(&self) -> ProviderResult<Vec<String>> {
        let state = self.inner.lock();
        if state.fail_recently_played {
            return Err(ProviderError::Status {
                status: 503,
                endpoint: "me/player/recently-played".to_string(),
            });
        }
        Ok(state.recently_played.clone())
    }

    async fn get_track(&self, track_id: &str) -> ProviderResult<RemoteTrack> {
        self.inner
            .lock()
            .tracks
            .get(track_id)
            .cloned()
            .ok_or_else(|| ProviderError::Status {
                status: 404,
                endpoint: format!("tracks/{}", track_id),
            })
    }

    async fn unfavorite(&self, track_id: &str) -> ProviderResult<bool> {
        let mut state = self.inner.lock();
        if state.fail_unfavorite {
            return Err(ProviderError::Status {
                status: 500,
                endpoint: "me/tracks".to_string(),
            });
        }
        state.unfavorited.push(track_id.to_string());
        Ok(true)
    }

    fn has_credentials(&self) -> bool {
        self.inner.lock().has_credentials
    }

    fn set_credentials(&self, client_id: &str, client_secret: &str) {
        self.inner.lock().has_credentials = !client_id.is_empty() && !client_secret.is_empty();
    }
}

/// MemoryStore whose reads can be made to fail.
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SkipStore for FlakyStore {
    async fn get_settings(&self) -> Result<SkipSettings> {
        self.inner.get_settings().await
    }

    async fn get_skipped_tracks(&self) -> Result<Vec<SkippedTrack>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("skipped tracks unreadable"));
        }
        self.inner.get_skipped_tracks().await
    }

    async fn save_skipped_tracks(&self, tracks: &[SkippedTrack]) -> Result<()> {
        self.inner.save_skipped_tracks(tracks).await
    }

    async fn update_track_statistics(&self, update: &TrackStatisticsUpdate) -> Result<()> {
        self.inner.update_track_statistics(update).await
    }

    async fn update_not_skipped_track(&self, play: &CompletedPlay) -> Result<()> {
        self.inner.update_not_skipped_track(play).await
    }

    async fn save_log(&self, message: &str, level: LogLevel) -> Result<()> {
        self.inner.save_log(message, level).await
    }
}
