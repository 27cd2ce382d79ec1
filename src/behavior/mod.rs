// Behavior tracking - the "smart" part of skipwatch
// Works out which track changes were real skips and keeps score

pub mod classifier;  // skip / intent heuristics and the quick-skip pattern window
pub mod coordinator; // runs one track transition end to end
#[cfg(feature = "behavior")]
pub mod database;    // SQLite storage for skips and stats
pub mod memory;      // in-memory storage, for tests and --ephemeral runs
pub mod navigation;  // local play history, tells "previous" apart from "next"

pub use classifier::{IntentVerdict, SkipClassifier, TransitionVerdict};
pub use coordinator::{TrackChangeCoordinator, TransitionOutcome, TransitionReport};
#[cfg(feature = "behavior")]
pub use database::BehaviorDatabase;
pub use memory::MemoryStore;
pub use navigation::NavigationTracker;

use crate::playback::PlaybackContext;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How many individual skip records each aggregated track keeps around.
pub const RECENT_SKIPS_PER_TRACK: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipType {
    None,
    Preview,
    Standard,
    NearEnd,
    Auto,
    Manual,
}

impl SkipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipType::None => "none",
            SkipType::Preview => "preview",
            SkipType::Standard => "standard",
            SkipType::NearEnd => "near_end",
            SkipType::Auto => "auto",
            SkipType::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// User-tunable skip settings, owned by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipSettings {
    pub skip_threshold: f64,      // fraction of the track, 0.0 - 1.0
    pub skip_count_threshold: u32, // skips before auto-unlike kicks in
    pub auto_unlike: bool,
    pub polling_interval_override: Option<u64>, // ms
}

impl SkipSettings {
    /// Threshold clamped so a track at 98% or more always counts as completed.
    pub fn effective_threshold(&self) -> f64 {
        if self.skip_threshold.is_nan() {
            return Self::default().skip_threshold;
        }
        self.skip_threshold.clamp(0.01, classifier::COMPLETION_FRACTION)
    }
}

impl Default for SkipSettings {
    fn default() -> Self {
        Self {
            skip_threshold: 0.7,
            skip_count_threshold: 5,
            auto_unlike: false,
            polling_interval_override: None,
        }
    }
}

/// One qualifying skip, built once per event and then folded into a [`SkippedTrack`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    pub album_name: Option<String>,
    pub skipped_at: i64,
    pub play_duration: u64,  // ms
    pub track_duration: u64, // ms
    pub play_percentage: u8,
    pub skip_type: SkipType,
    pub is_manual_skip: bool,
    pub confidence: f64,
    pub reason: String,
    pub context: Option<PlaybackContext>,
}

impl SkipRecord {
    /// Local hour-of-day (0-23) the skip happened in.
    pub fn hour_of_day(&self) -> usize {
        Local
            .timestamp_millis_opt(self.skipped_at)
            .single()
            .map(|dt| dt.hour() as usize)
            .unwrap_or(0)
    }
}

/// Everything known about skips of a single track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedTrack {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub skip_count: u32,
    pub not_skipped_count: u32,
    pub last_skipped: i64,
    pub skip_types: HashMap<SkipType, u32>,
    pub manual_skip_count: u32,
    pub auto_skip_count: u32,
    pub time_of_day: Vec<u32>, // 24 buckets
    pub contexts: HashMap<String, u32>,
    pub recent_skips: Vec<SkipRecord>, // newest first
}

impl SkippedTrack {
    pub fn new(record: &SkipRecord) -> Self {
        Self {
            id: record.track_id.clone(),
            name: record.track_name.clone(),
            artist: record.artist_name.clone(),
            album: record.album_name.clone(),
            skip_count: 0,
            not_skipped_count: 0,
            last_skipped: record.skipped_at,
            skip_types: HashMap::new(),
            manual_skip_count: 0,
            auto_skip_count: 0,
            time_of_day: vec![0; 24],
            contexts: HashMap::new(),
            recent_skips: Vec::new(),
        }
    }

    pub fn apply(&mut self, record: &SkipRecord) {
        self.name = record.track_name.clone();
        self.artist = record.artist_name.clone();
        if record.album_name.is_some() {
            self.album = record.album_name.clone();
        }

        self.skip_count += 1;
        self.last_skipped = record.skipped_at;
        *self.skip_types.entry(record.skip_type).or_insert(0) += 1;

        if record.is_manual_skip {
            self.manual_skip_count += 1;
        } else {
            self.auto_skip_count += 1;
        }

        if self.time_of_day.len() != 24 {
            self.time_of_day.resize(24, 0);
        }
        self.time_of_day[record.hour_of_day()] += 1;

        if let Some(context) = &record.context {
            *self.contexts.entry(context.tally_key()).or_insert(0) += 1;
        }

        self.recent_skips.insert(0, record.clone());
        self.recent_skips.truncate(RECENT_SKIPS_PER_TRACK);
    }
}

/// Fold a skip into the aggregated list. Repeat skips of a track bump its
/// counters instead of adding a second entry. Returns the updated aggregate.
pub fn record_skip<'a>(tracks: &'a mut Vec<SkippedTrack>, record: &SkipRecord) -> &'a SkippedTrack {
    let index = match tracks.iter().position(|t| t.id == record.track_id) {
        Some(index) => index,
        None => {
            tracks.push(SkippedTrack::new(record));
            tracks.len() - 1
        }
    };

    let track = &mut tracks[index];
    track.apply(record);
    track
}

/// Input for a per-track statistics update after a skip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStatisticsUpdate {
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    pub played_at: i64,
    pub play_duration: u64,
    pub track_duration: u64,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub skip_type: SkipType,
    pub is_manual_skip: bool,
    pub hour_of_day: usize,
    pub context: Option<PlaybackContext>,
}

/// A track that played out (or close enough).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedPlay {
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    pub played_at: i64,
    pub played_duration: u64,
    pub track_duration: u64,
    pub device_name: Option<String>,
}

/// Long-running per-track listening statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackStatistics {
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    pub play_count: u32,
    pub skip_count: u32,
    pub completed_count: u32,
    pub total_listened_ms: u64,
    pub last_played: Option<i64>,
    pub devices: HashMap<String, u32>,
    pub skip_types: HashMap<SkipType, u32>,
    pub manual_skips: u32,
    pub auto_skips: u32,
    pub hours: Vec<u32>,
    pub contexts: HashMap<String, u32>,
}

impl TrackStatistics {
    pub fn new(track_id: &str, track_name: &str, artist_name: &str) -> Self {
        Self {
            track_id: track_id.to_string(),
            track_name: track_name.to_string(),
            artist_name: artist_name.to_string(),
            hours: vec![0; 24],
            ..Default::default()
        }
    }

    pub fn apply_skip(&mut self, update: &TrackStatisticsUpdate) {
        self.play_count += 1;
        self.skip_count += 1;
        self.total_listened_ms += update.play_duration;
        self.last_played = Some(update.played_at);

        if let Some(device) = &update.device_name {
            *self.devices.entry(device.clone()).or_insert(0) += 1;
        }
        *self.skip_types.entry(update.skip_type).or_insert(0) += 1;

        if update.is_manual_skip {
            self.manual_skips += 1;
        } else {
            self.auto_skips += 1;
        }

        if self.hours.len() != 24 {
            self.hours.resize(24, 0);
        }
        self.hours[update.hour_of_day.min(23)] += 1;

        if let Some(context) = &update.context {
            *self.contexts.entry(context.tally_key()).or_insert(0) += 1;
        }
    }

    pub fn apply_completion(&mut self, play: &CompletedPlay) {
        self.play_count += 1;
        self.completed_count += 1;
        self.total_listened_ms += play.played_duration;
        self.last_played = Some(play.played_at);

        if let Some(device) = &play.device_name {
            *self.devices.entry(device.clone()).or_insert(0) += 1;
        }
    }

    /// Share of plays that ended in a skip.
    pub fn skip_rate(&self) -> f64 {
        if self.play_count == 0 {
            return 0.0;
        }
        self.skip_count as f64 / self.play_count as f64
    }
}

/// Durable storage the skip logic writes through. Implementations decide the format.
#[async_trait]
pub trait SkipStore: Send + Sync {
    async fn get_settings(&self) -> Result<SkipSettings>;
    async fn get_skipped_tracks(&self) -> Result<Vec<SkippedTrack>>;
    async fn save_skipped_tracks(&self, tracks: &[SkippedTrack]) -> Result<()>;
    async fn update_track_statistics(&self, update: &TrackStatisticsUpdate) -> Result<()>;
    async fn update_not_skipped_track(&self, play: &CompletedPlay) -> Result<()>;
    async fn save_log(&self, message: &str, level: LogLevel) -> Result<()>;
}
