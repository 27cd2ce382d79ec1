use super::{
    CompletedPlay, LogLevel, SkipSettings, SkipStore, SkippedTrack, TrackStatistics, TrackStatisticsUpdate,
};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Keeps everything in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    settings: SkipSettings,
    skipped: Vec<SkippedTrack>,
    statistics: HashMap<String, TrackStatistics>,
    logs: Vec<(String, LogLevel)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: SkipSettings) -> Self {
        let store = Self::default();
        store.set_settings(settings);
        store
    }

    pub fn set_settings(&self, settings: SkipSettings) {
        self.inner.lock().settings = settings;
    }

    pub fn statistics(&self, track_id: &str) -> Option<TrackStatistics> {
        self.inner.lock().statistics.get(track_id).cloned()
    }

    pub fn logs(&self) -> Vec<(String, LogLevel)> {
        self.inner.lock().logs.clone()
    }
}

#[async_trait]
impl SkipStore for MemoryStore {
    async fn get_settings(&self) -> Result<SkipSettings> {
        Ok(self.inner.lock().settings.clone())
    }

    async fn get_skipped_tracks(&self) -> Result<Vec<SkippedTrack>> {
        Ok(self.inner.lock().skipped.clone())
    }

    async fn save_skipped_tracks(&self, tracks: &[SkippedTrack]) -> Result<()> {
        self.inner.lock().skipped = tracks.to_vec();
        Ok(())
    }

    async fn update_track_statistics(&self, update: &TrackStatisticsUpdate) -> Result<()> {
        let mut state = self.inner.lock();
        state
            .statistics
            .entry(update.track_id.clone())
            .or_insert_with(|| TrackStatistics::new(&update.track_id, &update.track_name, &update.artist_name))
            .apply_skip(update);
        Ok(())
    }

    async fn update_not_skipped_track(&self, play: &CompletedPlay) -> Result<()> {
        let mut state = self.inner.lock();
        if let Some(track) = state.skipped.iter_mut().find(|t| t.id == play.track_id) {
            track.not_skipped_count += 1;
        }
        state
            .statistics
            .entry(play.track_id.clone())
            .or_insert_with(|| TrackStatistics::new(&play.track_id, &play.track_name, &play.artist_name))
            .apply_completion(play);
        Ok(())
    }

    async fn save_log(&self, message: &str, level: LogLevel) -> Result<()> {
        self.inner.lock().logs.push((message.to_string(), level));
        Ok(())
    }
}
