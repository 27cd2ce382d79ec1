use crate::playback::{now_millis, PlaybackSnapshot, SharedState, SnapshotUpdate};
use crate::ui::{MonitorEvent, NotificationSink, ProgressUpdate};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where playback probably is right now: last authoritative progress plus the
/// time since it was read, never past the end of the track.
pub fn estimate_progress(snapshot: &PlaybackSnapshot, now: i64) -> Option<ProgressUpdate> {
    if !snapshot.is_playing {
        return None;
    }
    let track_id = snapshot.current_track_id.as_ref()?;
    let duration = snapshot.current_track_duration.filter(|d| *d > 0)?;

    let stored = snapshot.current_track_progress.unwrap_or(0);
    let elapsed = snapshot
        .last_sync_time
        .map(|synced| (now - synced).max(0) as u64)
        .unwrap_or(0);
    let position = stored.saturating_add(elapsed).min(duration);

    Some(ProgressUpdate {
        track_id: track_id.clone(),
        track_name: snapshot.current_track_name.clone(),
        artist_name: snapshot.current_artist_name.clone(),
        progress_percent: position as f64 / duration as f64 * 100.0,
        position_ms: position,
        duration_ms: duration,
        device_name: snapshot.current_device_name.clone(),
        device_type: snapshot.current_device_type.clone(),
        device_volume: snapshot.current_device_volume,
    })
}

/// One interpolation tick. Only touches the store to seed `last_sync_time` once.
pub(crate) fn tick(state: &SharedState, now: i64) -> Option<ProgressUpdate> {
    let mut store = state.lock();
    if store.get().last_sync_time.is_none() {
        store.update(SnapshotUpdate {
            last_sync_time: Some(Some(now)),
            ..Default::default()
        });
    }
    estimate_progress(store.get(), now)
}

pub(crate) async fn run_interpolation(
    state: SharedState,
    sink: Arc<dyn NotificationSink>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Progress interpolation stopped");
                break;
            }
            _ = ticker.tick() => {
                if let Some(update) = tick(&state, now_millis()) {
                    sink.send(MonitorEvent::Progress(update));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::StateStore;

    fn playing_at(progress: u64, duration: u64, synced: i64) -> PlaybackSnapshot {
        PlaybackSnapshot {
            is_playing: true,
            current_track_id: Some("T1".to_string()),
            current_track_duration: Some(duration),
            current_track_progress: Some(progress),
            last_sync_time: Some(synced),
            ..Default::default()
        }
    }

    #[test]
    fn test_estimate_adds_elapsed_time() {
        let update = estimate_progress(&playing_at(60_000, 240_000, 1_000), 4_000).unwrap();
        assert_eq!(update.position_ms, 63_000);
        assert!((update.progress_percent - 26.25).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_is_capped_at_track_end() {
        let update = estimate_progress(&playing_at(239_000, 240_000, 0), 60_000).unwrap();
        assert_eq!(update.position_ms, 240_000);
        assert_eq!(update.progress_percent, 100.0);
    }

    #[test]
    fn test_nothing_to_report_when_paused_or_unknown() {
        let mut paused = playing_at(1_000, 240_000, 0);
        paused.is_playing = false;
        assert!(estimate_progress(&paused, 10).is_none());

        let mut no_duration = playing_at(1_000, 240_000, 0);
        no_duration.current_track_duration = None;
        assert!(estimate_progress(&no_duration, 10).is_none());

        let mut no_track = playing_at(1_000, 240_000, 0);
        no_track.current_track_id = None;
        assert!(estimate_progress(&no_track, 10).is_none());
    }

    #[test]
    fn test_tick_seeds_sync_time_once() {
        let state = StateStore::shared();

        assert!(tick(&state, 5_000).is_none());
        assert_eq!(state.lock().get().last_sync_time, Some(5_000));

        tick(&state, 9_000);
        assert_eq!(state.lock().get().last_sync_time, Some(5_000));
    }
}
