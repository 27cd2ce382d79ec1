// Monitor - the top-level control loop
// Two tasks per session: a variable-delay poll of the remote player and a fixed-rate progress timer

pub mod backoff;       // failure streak + exponential delay
pub mod config;        // timing knobs, validated on every change
pub mod interpolation; // local progress estimates between polls
mod poller;            // one poll cycle and the loop that re-arms it

pub use backoff::{Backoff, MonitorState};
pub use config::{ConfigError, MonitorConfig, MonitorConfigUpdate};
pub use interpolation::estimate_progress;

use crate::behavior::SkipStore;
use crate::playback::{Credentials, PlaybackSnapshot, SharedState, StateStore};
use crate::spotify::PlaybackProvider;
use crate::ui::NotificationSink;
use poller::{run_poll_loop, PollContext};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

struct RunningMonitor {
    cancel: CancellationToken,
    sink: Arc<dyn NotificationSink>,
    credentials: Credentials,
    session_id: Uuid,
    errors: Arc<AtomicU32>, // this session's failure streak, written by its poll loop
    #[allow(dead_code)] // detached on stop, see Monitor::stop
    poll: JoinHandle<()>,
    progress: JoinHandle<()>,
}

pub struct Monitor {
    provider: Arc<dyn PlaybackProvider>,
    store: Arc<dyn SkipStore>,
    state: SharedState,
    config: MonitorConfig,
    running: Option<RunningMonitor>,
}

impl Monitor {
    pub fn new(provider: Arc<dyn PlaybackProvider>, store: Arc<dyn SkipStore>) -> Self {
        Self {
            provider,
            store,
            state: StateStore::shared(),
            config: MonitorConfig::default(),
            running: None,
        }
    }

    pub fn with_config(
        provider: Arc<dyn PlaybackProvider>,
        store: Arc<dyn SkipStore>,
        config: MonitorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut monitor = Self::new(provider, store);
        monitor.config = config;
        Ok(monitor)
    }

    /// Handle to the live playback state.
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.state.lock().get().clone()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.running.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.running.as_ref().map(|r| r.session_id)
    }

    pub fn monitor_state(&self) -> MonitorState {
        match &self.running {
            None => MonitorState::Stopped,
            Some(running) if running.errors.load(Ordering::Relaxed) > 0 => MonitorState::Backoff,
            Some(_) => MonitorState::Polling,
        }
    }

    /// Start a monitoring session. Must be called inside a tokio runtime.
    ///
    /// Returns false, leaving everything as it was, when the credentials are
    /// blank or the config update does not validate. Starting an active
    /// monitor restarts it with the new arguments.
    pub fn start(
        &mut self,
        sink: Arc<dyn NotificationSink>,
        client_id: &str,
        client_secret: &str,
        config: Option<MonitorConfigUpdate>,
    ) -> bool {
        let credentials = Credentials::new(client_id, client_secret);
        if !credentials.is_complete() {
            warn!("Refusing to start monitor without client credentials");
            return false;
        }

        let config = match config {
            Some(update) => match self.config.merged(&update) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Refusing to start monitor with invalid config: {}", e);
                    return false;
                }
            },
            None => self.config.clone(),
        };

        if self.is_active() {
            info!("Monitor already running, restarting");
            self.stop();
        }

        self.config = config;
        self.launch(sink, credentials);
        true
    }

    fn launch(&mut self, sink: Arc<dyn NotificationSink>, credentials: Credentials) {
        self.provider
            .set_credentials(&credentials.client_id, &credentials.client_secret);
        {
            let mut state = self.state.lock();
            state.reset();
            state.set_credentials(credentials.clone());
        }

        let session_id = Uuid::new_v4();
        let span = info_span!("monitor", session = %session_id);
        let cancel = CancellationToken::new();
        let errors = Arc::new(AtomicU32::new(0));

        let progress = tokio::spawn(
            interpolation::run_interpolation(
                self.state.clone(),
                sink.clone(),
                self.config.progress_interval(),
                cancel.clone(),
            )
            .instrument(span.clone()),
        );

        let ctx = PollContext::new(
            self.provider.clone(),
            self.store.clone(),
            self.state.clone(),
            sink.clone(),
            self.config.clone(),
            errors.clone(),
        );
        let poll = tokio::spawn(run_poll_loop(ctx, cancel.clone()).instrument(span));

        info!(
            "Monitor started (session {}, polling every {}ms, progress every {}ms)",
            session_id,
            self.config.poll_interval().as_millis(),
            self.config.progress_interval_ms
        );

        self.running = Some(RunningMonitor {
            cancel,
            sink,
            credentials,
            session_id,
            errors,
            poll,
            progress,
        });
    }

    /// Stop both timers. Safe to call any number of times.
    ///
    /// A poll request already in flight is left to finish; the loop sees the
    /// cancellation afterwards and does not schedule another one.
    pub fn stop(&mut self) -> bool {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            running.progress.abort();
            info!("Monitor stopped (session {})", running.session_id);
        }
        true
    }

    /// Merge `update` into the config. An active monitor is restarted so the
    /// whole change applies at once.
    pub fn reconfigure(&mut self, update: MonitorConfigUpdate) -> Result<(), ConfigError> {
        let merged = self.config.merged(&update)?;

        match self.running.as_ref().map(|r| (r.sink.clone(), r.credentials.clone())) {
            Some((sink, credentials)) => {
                self.stop();
                self.config = merged;
                self.launch(sink, credentials);
            }
            None => self.config = merged,
        }

        Ok(())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            running.progress.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{MemoryStore, SkipType};
    use crate::spotify::ProviderError;
    use crate::test_support::{remote, FakeProvider};
    use crate::ui::{ChannelSink, MonitorEvent};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::{sleep, timeout, Instant};

    fn monitor(provider: Arc<FakeProvider>, store: Arc<MemoryStore>) -> Monitor {
        Monitor::new(provider, store)
    }

    fn start(monitor: &mut Monitor) -> UnboundedReceiver<MonitorEvent> {
        let (sink, events) = ChannelSink::new();
        assert!(monitor.start(Arc::new(sink), "client", "secret", None));
        events
    }

    async fn wait_for<F>(events: &mut UnboundedReceiver<MonitorEvent>, mut matches: F) -> MonitorEvent
    where
        F: FnMut(&MonitorEvent) -> bool,
    {
        timeout(Duration::from_secs(120), async {
            loop {
                match events.recv().await {
                    Some(event) if matches(&event) => return event,
                    Some(_) => continue,
                    None => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_is_detected_end_to_end() {
        let provider = Arc::new(FakeProvider::new());
        provider.set_playback(Some(remote("T1", 30_000, 180_000, true, true)));
        let store = Arc::new(MemoryStore::new());
        let mut monitor = monitor(provider.clone(), store.clone());
        let mut events = start(&mut monitor);

        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(monitor.snapshot().current_track_id.as_deref(), Some("T1"));

        provider.set_playback(Some(remote("T2", 1_000, 200_000, true, true)));
        let MonitorEvent::SkipDetected(record) =
            wait_for(&mut events, |e| matches!(e, MonitorEvent::SkipDetected(_))).await
        else {
            unreachable!()
        };

        assert_eq!(record.track_id, "T1");
        assert_eq!(record.skip_type, SkipType::Standard);
        assert_eq!(store.get_skipped_tracks().await.unwrap()[0].skip_count, 1);
        assert_eq!(monitor.snapshot().current_track_id.as_deref(), Some("T2"));
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_warning_then_restore() {
        let provider = Arc::new(FakeProvider::new());
        for _ in 0..3 {
            provider.push_error(ProviderError::Status {
                status: 503,
                endpoint: "me/player".into(),
            });
        }
        provider.set_playback(Some(remote("T1", 30_000, 180_000, true, true)));
        let mut monitor = monitor(provider.clone(), Arc::new(MemoryStore::new()));
        let started = Instant::now();
        let mut events = start(&mut monitor);

        // failures at 0, 2000 and 5000ms
        let problem = wait_for(&mut events, |e| matches!(e, MonitorEvent::ConnectionProblem { .. })).await;
        assert!(matches!(problem, MonitorEvent::ConnectionProblem { consecutive_errors: 3, .. }));
        assert!(started.elapsed() >= Duration::from_millis(5_000));
        assert_eq!(monitor.monitor_state(), MonitorState::Backoff);

        // then 4500ms of backoff before the recovering poll
        wait_for(&mut events, |e| *e == MonitorEvent::ConnectionRestored).await;
        assert!(started.elapsed() >= Duration::from_millis(9_500));
        assert_eq!(monitor.monitor_state(), MonitorState::Polling);
        assert_eq!(provider.playback_calls(), 4);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_then_stopped() {
        let provider = Arc::new(FakeProvider::new());
        provider.set_playback(Some(remote("T1", 30_000, 180_000, true, true)));
        let mut monitor = monitor(provider.clone(), Arc::new(MemoryStore::new()));
        let mut events = start(&mut monitor);

        let MonitorEvent::Progress(update) =
            wait_for(&mut events, |e| matches!(e, MonitorEvent::Progress(_))).await
        else {
            unreachable!()
        };
        assert_eq!(update.track_id, "T1");
        assert_eq!(update.duration_ms, 180_000);
        assert!(update.position_ms >= 30_000);

        provider.set_playback(None);
        wait_for(&mut events, |e| *e == MonitorEvent::Stopped).await;
        assert!(!monitor.snapshot().is_playing);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_stops_polling() {
        let provider = Arc::new(FakeProvider::new());
        let mut monitor = monitor(provider.clone(), Arc::new(MemoryStore::new()));
        let _events = start(&mut monitor);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.playback_calls(), 1);

        assert!(monitor.stop());
        assert!(monitor.stop());
        assert!(!monitor.is_active());
        assert_eq!(monitor.monitor_state(), MonitorState::Stopped);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(provider.playback_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_bad_input() {
        let mut monitor = monitor(Arc::new(FakeProvider::new()), Arc::new(MemoryStore::new()));
        let (sink, _events) = ChannelSink::new();
        let sink: Arc<dyn NotificationSink> = Arc::new(sink);

        assert!(!monitor.start(sink.clone(), "client", "  ", None));
        assert!(!monitor.start(
            sink.clone(),
            "client",
            "secret",
            Some(MonitorConfigUpdate {
                polling_interval_ms: Some(0),
                ..Default::default()
            })
        ));
        assert!(!monitor.is_active());
        assert_eq!(monitor.config(), &MonitorConfig::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_restarts_active_monitor() {
        let mut monitor = monitor(Arc::new(FakeProvider::new()), Arc::new(MemoryStore::new()));
        let _events = start(&mut monitor);
        let first_session = monitor.session_id();

        monitor
            .reconfigure(MonitorConfigUpdate {
                polling_interval_ms: Some(2_000),
                ..Default::default()
            })
            .unwrap();
        assert!(monitor.is_active());
        assert_ne!(monitor.session_id(), first_session);
        assert_eq!(monitor.config().polling_interval_ms, 2_000);

        let rejected = monitor.reconfigure(MonitorConfigUpdate {
            backoff_multiplier: Some(0.1),
            ..Default::default()
        });
        assert!(rejected.is_err());
        assert_eq!(monitor.config().backoff_multiplier, 1.5);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_ignores_failures_from_previous_session() {
        let provider = Arc::new(FakeProvider::new());
        provider.set_playback(Some(remote("T1", 30_000, 180_000, true, true)));
        let mut monitor = monitor(provider, Arc::new(MemoryStore::new()));
        let _events = start(&mut monitor);

        let previous_errors = monitor.running.as_ref().map(|r| r.errors.clone()).unwrap();
        let _events = start(&mut monitor);

        // a poll from the old session finishing late and recording its failure
        previous_errors.store(3, Ordering::Relaxed);
        assert_eq!(monitor.monitor_state(), MonitorState::Polling);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_resets_state_and_applies_config() {
        let provider = Arc::new(FakeProvider::new());
        provider.set_playback(Some(remote("T1", 30_000, 180_000, true, true)));
        let mut monitor = monitor(provider.clone(), Arc::new(MemoryStore::new()));
        let _events = start(&mut monitor);
        sleep(Duration::from_millis(100)).await;
        assert!(monitor.snapshot().current_track_id.is_some());

        provider.set_playback(None);
        let (sink, _events) = ChannelSink::new();
        assert!(monitor.start(
            Arc::new(sink),
            "client",
            "secret",
            Some(MonitorConfigUpdate {
                polling_interval_ms: Some(5_000),
                ..Default::default()
            })
        ));
        assert_eq!(monitor.snapshot(), PlaybackSnapshot::default());
        assert_eq!(monitor.config().polling_interval_ms, 5_000);
        monitor.stop();
    }
}
