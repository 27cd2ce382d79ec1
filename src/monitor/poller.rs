use super::backoff::Backoff;
use super::config::MonitorConfig;
use crate::behavior::{LogLevel, SkipStore, TrackChangeCoordinator, TransitionOutcome};
use crate::playback::{now_millis, PlaybackSnapshot, RemotePlayback, SharedState, SnapshotUpdate};
use crate::spotify::{PlaybackProvider, ProviderError};
use crate::ui::{MonitorEvent, NotificationSink};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything one poll loop owns. Built fresh on every `Monitor::start`.
pub(crate) struct PollContext {
    provider: Arc<dyn PlaybackProvider>,
    store: Arc<dyn SkipStore>,
    state: SharedState,
    sink: Arc<dyn NotificationSink>,
    config: MonitorConfig,
    coordinator: TrackChangeCoordinator,
    backoff: Backoff,
    errors: Arc<AtomicU32>, // mirrored for Monitor::monitor_state
    warned: bool,
}

impl PollContext {
    pub(crate) fn new(
        provider: Arc<dyn PlaybackProvider>,
        store: Arc<dyn SkipStore>,
        state: SharedState,
        sink: Arc<dyn NotificationSink>,
        config: MonitorConfig,
        errors: Arc<AtomicU32>,
    ) -> Self {
        let coordinator = TrackChangeCoordinator::new(provider.clone(), store.clone());
        Self {
            provider,
            store,
            state,
            sink,
            config,
            coordinator,
            backoff: Backoff::new(),
            errors,
            warned: false,
        }
    }

    /// Normal poll delay. A stored override wins over the monitor config.
    async fn poll_interval(&self) -> Duration {
        match self.store.get_settings().await {
            Ok(settings) => match settings.polling_interval_override.filter(|ms| *ms > 0) {
                Some(ms) => {
                    info!("Using polling interval override of {}ms", ms);
                    Duration::from_millis(ms)
                }
                None => self.config.poll_interval(),
            },
            Err(e) => {
                debug!("Settings unavailable, using configured polling interval: {:#}", e);
                self.config.poll_interval()
            }
        }
    }

    fn current_delay(&self, normal: Duration) -> Duration {
        if self.backoff.is_active() {
            self.backoff.next_delay(&self.config)
        } else {
            normal
        }
    }

    /// One poll cycle. Returns how long to wait before the next one.
    pub(crate) async fn poll_once(&mut self, normal: Duration) -> Duration {
        if !self.provider.has_credentials() {
            warn!("No Spotify credentials, skipping poll");
            return self.current_delay(normal);
        }

        match self.provider.get_current_playback().await {
            Ok(sample) => {
                let errors = self.backoff.consecutive_errors();
                self.errors.store(0, Ordering::Relaxed);
                if self.backoff.record_success() {
                    info!("Poll succeeded after {} failures, back to normal polling", errors);
                }
                if std::mem::take(&mut self.warned) {
                    self.sink.send(MonitorEvent::ConnectionRestored);
                    self.log("Connection to Spotify restored", LogLevel::Info).await;
                }

                self.handle_sample(sample, now_millis()).await;
                normal
            }
            Err(e) if !e.is_transient() => {
                warn!("Skipping poll: {}", e);
                self.current_delay(normal)
            }
            Err(e) => self.handle_failure(e).await,
        }
    }

    async fn handle_failure(&mut self, error: ProviderError) -> Duration {
        let mut delay = self.backoff.record_failure(&self.config);
        if let Some(retry_after) = error.retry_after_ms() {
            delay = delay.max(Duration::from_millis(retry_after));
        }

        let errors = self.backoff.consecutive_errors();
        self.errors.store(errors, Ordering::Relaxed);
        warn!(
            "Poll failed ({} in a row), next attempt in {}ms: {}",
            errors,
            delay.as_millis(),
            error
        );

        if errors >= self.config.error_threshold && !self.warned {
            self.warned = true;
            let message = error.to_string();
            self.sink.send(MonitorEvent::ConnectionProblem {
                consecutive_errors: errors,
                message: message.clone(),
            });
            self.log(
                &format!("Connection problem after {} failed polls: {}", errors, message),
                LogLevel::Warning,
            )
            .await;
        }

        delay
    }

    pub(crate) async fn handle_sample(&mut self, sample: Option<RemotePlayback>, now: i64) {
        let Some(playback) = sample.filter(|p| p.track.is_some()) else {
            self.handle_no_playback(now);
            return;
        };

        let previous = self.state.lock().get().clone();
        let changed = previous.current_track_id.as_deref() != playback.track.as_ref().map(|t| t.id.as_str());

        if changed {
            self.handle_track_change(previous, &playback, now).await;
        } else {
            self.handle_same_track(&previous, &playback, now).await;
        }

        self.log_library_status();
    }

    fn handle_no_playback(&self, now: i64) {
        let was_playing = {
            let mut state = self.state.lock();
            let was_playing = state.get().is_playing;
            if was_playing {
                state.update(SnapshotUpdate {
                    is_playing: Some(false),
                    pause_start_time: Some(Some(now)),
                    last_updated: Some(Some(now)),
                    ..Default::default()
                });
            }
            was_playing
        };

        if was_playing {
            info!("Playback stopped");
            self.sink.send(MonitorEvent::Stopped);
        }
    }

    async fn handle_track_change(&mut self, previous: PlaybackSnapshot, playback: &RemotePlayback, now: i64) {
        let update = playback.full_update(now);
        let mut current = previous.clone();
        update.clone().apply_to(&mut current);

        let report = self.coordinator.handle_track_change(&previous, &current, now).await;
        debug!("Track change handled: {:?}", report.outcome);
        if let TransitionOutcome::SkipRecorded { record, .. } = &report.outcome {
            self.sink.send(MonitorEvent::SkipDetected(record.clone()));
        }

        let recent = self.coordinator.recent_track_ids();
        let emit = {
            let mut state = self.state.lock();
            state.update(update);
            state.set_recent_tracks(recent);
            match current.current_track_id.as_deref() {
                Some(track_id) => state.should_emit_now_playing(track_id, now, true),
                None => false,
            }
        };

        if emit {
            self.announce(&current).await;
        }
    }

    async fn handle_same_track(&self, previous: &PlaybackSnapshot, playback: &RemotePlayback, now: i64) {
        let mut update = SnapshotUpdate {
            is_playing: Some(playback.is_playing),
            current_track_progress: Some(playback.progress_ms),
            last_progress: Some(playback.progress_ms),
            is_in_library: Some(playback.is_in_library),
            last_updated: Some(Some(now)),
            last_sync_time: Some(Some(now)),
            ..Default::default()
        };

        match (previous.is_playing, playback.is_playing) {
            (true, false) => {
                debug!("Paused {}", previous.display_name());
                update.pause_start_time = Some(Some(now));
            }
            (false, true) => {
                if let Some(started) = previous.pause_start_time {
                    let paused = (now - started).max(0) as u64;
                    debug!("Resumed {} after {}ms", previous.display_name(), paused);
                    update.total_pause_duration = Some(previous.total_pause_duration.saturating_add(paused));
                }
                update.pause_start_time = Some(None);
            }
            _ => {}
        }

        let emit = {
            let mut state = self.state.lock();
            state.update(update);
            match (playback.is_playing, previous.current_track_id.as_deref()) {
                (true, Some(track_id)) => state.should_emit_now_playing(track_id, now, false),
                _ => false,
            }
        };

        if emit {
            let current = self.state.lock().get().clone();
            self.announce(&current).await;
        }
    }

    async fn announce(&self, snapshot: &PlaybackSnapshot) {
        let device = snapshot.current_device_name.as_deref().unwrap_or("unknown device");
        let message = format!("Now playing: {} on {}", snapshot.display_name(), device);
        info!("{}", message);
        self.log(&message, LogLevel::Info).await;
    }

    fn log_library_status(&self) {
        let mut state = self.state.lock();
        let snapshot = state.get();
        if snapshot.library_status_logged || snapshot.current_track_id.is_none() {
            return;
        }

        if snapshot.is_in_library {
            debug!("{} is in the library, skips will count", snapshot.display_name());
        } else {
            debug!("{} is not in the library, skips will not count", snapshot.display_name());
        }
        state.update(SnapshotUpdate {
            library_status_logged: Some(true),
            ..Default::default()
        });
    }

    async fn log(&self, message: &str, level: LogLevel) {
        if let Err(e) = self.store.save_log(message, level).await {
            debug!("Failed to persist log line: {:#}", e);
        }
    }
}

/// Self-rescheduling poll loop. The first poll runs immediately; each later
/// one waits for whatever delay the previous cycle asked for. Cancellation
/// never interrupts a request already in flight, it only stops the re-arm.
pub(crate) async fn run_poll_loop(mut ctx: PollContext, cancel: CancellationToken) {
    let normal = ctx.poll_interval().await;
    let mut delay = Duration::ZERO;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = ctx.poll_once(normal).await;

        if cancel.is_cancelled() {
            break;
        }
    }

    debug!("Poll loop stopped");
}
