use super::classifier::{SkipClassifier, TransitionVerdict, COMPLETION_FRACTION};
use super::navigation::{provider_history_suggests_backward, NavigationTracker};
use super::{
    record_skip, CompletedPlay, LogLevel, SkipRecord, SkipSettings, SkipStore, TrackStatisticsUpdate,
};
use crate::playback::PlaybackSnapshot;
use crate::spotify::PlaybackProvider;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Longer than this since the last update and we were simply not watching.
pub const RECONNECTION_GAP_MS: i64 = 5 * 60 * 1000;
pub const BRIEF_LOSS_MIN_MS: i64 = 10 * 1000;
pub const BRIEF_LOSS_MAX_MS: i64 = 60 * 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The new sample carries no track.
    Unchanged,
    /// Nothing was playing before, so there is nothing to judge.
    FirstTrack,
    SameTrack,
    AppReconnection { gap_ms: i64 },
    BackwardNavigation,
    /// Looked like a skip but the track is not in the library.
    SkipNotCounted { verdict: TransitionVerdict },
    SkipRecorded {
        record: SkipRecord,
        skip_count: u32,
        unfavorited: bool,
    },
    /// Existing skip history could not be read, so nothing was written.
    SkipNotPersisted { record: SkipRecord },
    Completed { played_duration: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionReport {
    pub outcome: TransitionOutcome,
    pub brief_connection_loss: bool,
}

impl TransitionReport {
    fn new(outcome: TransitionOutcome) -> Self {
        Self {
            outcome,
            brief_connection_loss: false,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self.outcome,
            TransitionOutcome::SkipRecorded { .. } | TransitionOutcome::SkipNotPersisted { .. }
        )
    }
}

/// Runs one track transition end to end: filtering, navigation, classification
/// and the resulting writes. Owns the classifier and navigation state.
pub struct TrackChangeCoordinator {
    classifier: SkipClassifier,
    navigation: NavigationTracker,
    provider: Arc<dyn PlaybackProvider>,
    store: Arc<dyn SkipStore>,
}

impl TrackChangeCoordinator {
    pub fn new(provider: Arc<dyn PlaybackProvider>, store: Arc<dyn SkipStore>) -> Self {
        Self {
            classifier: SkipClassifier::new(),
            navigation: NavigationTracker::new(),
            provider,
            store,
        }
    }

    pub fn classifier(&self) -> &SkipClassifier {
        &self.classifier
    }

    pub fn recent_track_ids(&self) -> Vec<String> {
        self.navigation.recent_track_ids()
    }

    /// Session boundary: forget the skip streak and local history.
    pub fn reset(&mut self) {
        self.classifier.reset();
        self.navigation.reset();
    }

    /// `previous` is the stored snapshot of the track that just ended,
    /// `current` the snapshot built from the fresh sample.
    pub async fn handle_track_change(
        &mut self,
        previous: &PlaybackSnapshot,
        current: &PlaybackSnapshot,
        now: i64,
    ) -> TransitionReport {
        let Some(new_track_id) = current.current_track_id.as_deref() else {
            return TransitionReport::new(TransitionOutcome::Unchanged);
        };

        let Some(previous_track_id) = previous.current_track_id.as_deref() else {
            self.navigation.record(new_track_id, now);
            return TransitionReport::new(TransitionOutcome::FirstTrack);
        };

        if new_track_id == previous_track_id {
            return TransitionReport::new(TransitionOutcome::SameTrack);
        }

        let report = self
            .evaluate(previous, current, previous_track_id, new_track_id, now)
            .await;
        self.navigation.record(new_track_id, now);

        report
    }

    async fn evaluate(
        &mut self,
        previous: &PlaybackSnapshot,
        current: &PlaybackSnapshot,
        previous_track_id: &str,
        new_track_id: &str,
        now: i64,
    ) -> TransitionReport {
        let mut brief_connection_loss = false;
        if let Some(last_updated) = previous.last_updated {
            let gap_ms = now - last_updated;
            if gap_ms > RECONNECTION_GAP_MS {
                info!(
                    "Ignoring change {} -> {}: app reconnection after {}s",
                    previous_track_id,
                    new_track_id,
                    gap_ms / 1000
                );
                return TransitionReport::new(TransitionOutcome::AppReconnection { gap_ms });
            }
            if (BRIEF_LOSS_MIN_MS..=BRIEF_LOSS_MAX_MS).contains(&gap_ms) {
                warn!("Brief connection loss ({}s) before track change", gap_ms / 1000);
                brief_connection_loss = true;
            }
        }

        let outcome = self
            .classify_and_record(previous, current, previous_track_id, new_track_id, now)
            .await;

        TransitionReport {
            outcome,
            brief_connection_loss,
        }
    }

    async fn classify_and_record(
        &mut self,
        previous: &PlaybackSnapshot,
        current: &PlaybackSnapshot,
        previous_track_id: &str,
        new_track_id: &str,
        now: i64,
    ) -> TransitionOutcome {
        let fraction = previous.progress_fraction();

        if self.is_backward_navigation(previous_track_id, new_track_id, fraction, now).await {
            debug!("{} -> {} is backward navigation, not a skip", previous_track_id, new_track_id);
            return TransitionOutcome::BackwardNavigation;
        }

        let settings = self.settings().await;
        let verdict = self
            .classifier
            .classify_transition(previous, settings.effective_threshold());

        if !verdict.is_skip {
            return self.record_completion(previous, previous_track_id, now).await;
        }

        self.classifier
            .record_for_pattern_analysis(previous_track_id, fraction.unwrap_or(0.0), now);

        if !previous.is_in_library {
            debug!(
                "Skip of {} not counted, track is not in the library ({})",
                previous_track_id, verdict.reason
            );
            return TransitionOutcome::SkipNotCounted { verdict };
        }

        let intent = self.classifier.classify_intent(current, previous);
        let record = self
            .build_record(previous, previous_track_id, &verdict, intent.is_manual, intent.confidence, &intent.reason, now)
            .await;

        self.persist_skip(previous, record, &settings).await
    }

    async fn is_backward_navigation(
        &mut self,
        previous_track_id: &str,
        new_track_id: &str,
        fraction: Option<f64>,
        now: i64,
    ) -> bool {
        if self
            .navigation
            .is_forward_skip_after_rewind(previous_track_id, fraction, now)
        {
            debug!("Leaving rewound track {} early, treating as a forward skip", previous_track_id);
            return false;
        }

        if self
            .navigation
            .is_backward_navigation(new_track_id, previous_track_id, fraction, now)
        {
            return true;
        }

        match self.provider.get_recently_played_tracks().await {
            Ok(recent) => provider_history_suggests_backward(&recent, new_track_id, previous_track_id),
            Err(e) => {
                debug!("Recently played lookup failed, skipping provider check: {}", e);
                false
            }
        }
    }

    async fn settings(&self) -> SkipSettings {
        match self.store.get_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Could not load skip settings, using defaults: {:#}", e);
                SkipSettings::default()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_record(
        &self,
        previous: &PlaybackSnapshot,
        track_id: &str,
        verdict: &TransitionVerdict,
        is_manual: bool,
        intent_confidence: f64,
        intent_reason: &str,
        now: i64,
    ) -> SkipRecord {
        let (mut name, mut artist) = (
            previous.current_track_name.clone(),
            previous.current_artist_name.clone(),
        );

        if name.is_none() || artist.is_none() {
            match self.provider.get_track(track_id).await {
                Ok(track) => {
                    name = name.or(Some(track.name.clone()));
                    artist = artist.or(Some(track.artist_names()));
                }
                Err(e) => debug!("Metadata lookup for {} failed: {}", track_id, e),
            }
        }

        let play_duration = previous.last_progress.unwrap_or(0);
        let track_duration = previous.current_track_duration.unwrap_or(0);
        let play_percentage = if track_duration > 0 {
            ((play_duration as f64 / track_duration as f64) * 100.0).round().min(100.0) as u8
        } else {
            0
        };

        SkipRecord {
            track_id: track_id.to_string(),
            track_name: name.unwrap_or_else(|| "Unknown track".to_string()),
            artist_name: artist.unwrap_or_else(|| "Unknown artist".to_string()),
            album_name: previous.current_album_name.clone(),
            skipped_at: now,
            play_duration,
            track_duration,
            play_percentage,
            skip_type: verdict.skip_type,
            is_manual_skip: is_manual,
            confidence: verdict.confidence,
            reason: format!("{} ({}, {:.2})", verdict.reason, intent_reason, intent_confidence),
            context: previous.current_context.clone(),
        }
    }

    async fn persist_skip(
        &self,
        previous: &PlaybackSnapshot,
        record: SkipRecord,
        settings: &SkipSettings,
    ) -> TransitionOutcome {
        let mut tracks = match self.store.get_skipped_tracks().await {
            Ok(tracks) => tracks,
            Err(e) => {
                error!(
                    "Could not read skipped tracks, dropping skip of {} rather than overwriting history: {:#}",
                    record.track_id, e
                );
                return TransitionOutcome::SkipNotPersisted { record };
            }
        };

        let skip_count = record_skip(&mut tracks, &record).skip_count;

        if let Err(e) = self.store.save_skipped_tracks(&tracks).await {
            error!("Failed to save skipped tracks: {:#}", e);
            return TransitionOutcome::SkipNotPersisted { record };
        }

        let update = TrackStatisticsUpdate {
            track_id: record.track_id.clone(),
            track_name: record.track_name.clone(),
            artist_name: record.artist_name.clone(),
            played_at: record.skipped_at,
            play_duration: record.play_duration,
            track_duration: record.track_duration,
            device_name: previous.current_device_name.clone(),
            device_type: previous.current_device_type.clone(),
            skip_type: record.skip_type,
            is_manual_skip: record.is_manual_skip,
            hour_of_day: record.hour_of_day(),
            context: record.context.clone(),
        };
        if let Err(e) = self.store.update_track_statistics(&update).await {
            warn!("Failed to update statistics for {}: {:#}", record.track_id, e);
        }

        let message = format!(
            "Skipped {} by {} at {}% ({}, {} skip{}, confidence {:.2})",
            record.track_name,
            record.artist_name,
            record.play_percentage,
            record.skip_type.as_str(),
            if record.is_manual_skip { "manual" } else { "auto" },
            if skip_count == 1 { "" } else { "s total" },
            record.confidence,
        );
        info!("{}", message);
        self.log(&message, LogLevel::Info).await;

        let mut unfavorited = false;
        if settings.auto_unlike && skip_count >= settings.skip_count_threshold {
            unfavorited = self.unfavorite(&record, skip_count).await;
        }

        TransitionOutcome::SkipRecorded {
            record,
            skip_count,
            unfavorited,
        }
    }

    async fn unfavorite(&self, record: &SkipRecord, skip_count: u32) -> bool {
        match self.provider.unfavorite(&record.track_id).await {
            Ok(true) => {
                let message = format!(
                    "Removed {} by {} from library after {} skips",
                    record.track_name, record.artist_name, skip_count
                );
                info!("{}", message);
                self.log(&message, LogLevel::Info).await;
                true
            }
            Ok(false) => {
                warn!("Provider refused to remove {} from library", record.track_id);
                false
            }
            Err(e) => {
                warn!("Failed to remove {} from library: {}", record.track_id, e);
                self.log(&format!("Failed to unlike {}: {}", record.track_id, e), LogLevel::Warning)
                    .await;
                false
            }
        }
    }

    async fn record_completion(&self, previous: &PlaybackSnapshot, track_id: &str, now: i64) -> TransitionOutcome {
        let track_duration = previous.current_track_duration.unwrap_or(0);
        // polling rarely catches the last second, so a natural finish counts as at least 98%
        let floor = (track_duration as f64 * COMPLETION_FRACTION).round() as u64;
        let played_duration = previous.last_progress.unwrap_or(0).max(floor);

        let play = CompletedPlay {
            track_id: track_id.to_string(),
            track_name: previous
                .current_track_name
                .clone()
                .unwrap_or_else(|| "Unknown track".to_string()),
            artist_name: previous
                .current_artist_name
                .clone()
                .unwrap_or_else(|| "Unknown artist".to_string()),
            played_at: now,
            played_duration,
            track_duration,
            device_name: previous.current_device_name.clone(),
        };

        if let Err(e) = self.store.update_not_skipped_track(&play).await {
            warn!("Failed to record completed play of {}: {:#}", track_id, e);
        }
        debug!("{} completed ({}ms played)", previous.display_name(), played_duration);

        TransitionOutcome::Completed { played_duration }
    }

    async fn log(&self, message: &str, level: LogLevel) {
        if let Err(e) = self.store.save_log(message, level).await {
            debug!("Failed to persist log line: {:#}", e);
        }
    }
}
