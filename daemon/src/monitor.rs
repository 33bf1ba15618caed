/// The monitoring loop: locate → tail → match → dispatch.
///
/// Runs as a single tokio task. Every wait is bounded and races the stop
/// signal, so a stop request is noticed within one idle interval when idle,
/// or before the next line when busy.
///
/// State transitions published to [`StatusHandle`]:
///
/// ```text
/// Initializing ─┬─> WaitingForLog ──> Monitoring(path) ──> Error(msg)
///               └─> Monitoring(path)        ^                  │
///                                           └──────────────────┘
/// ```
///
/// `Triggered` is set by the dispatcher and is left alone by the loop until
/// the loop itself changes state.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{self, Config};
use crate::dispatcher::Dispatcher;
use crate::error::MonitorError;
use crate::event_log::EventKind;
use crate::locator::LogLocator;
use crate::matcher::TriggerSet;
use crate::status::{StatusHandle, StatusState};
use crate::tailer::Tailer;

/// Wait before looking for a log file again.
pub const LOCATE_RETRY: Duration = Duration::from_secs(2);
/// Wait after a failed open/read before trying again.
pub const ERROR_RETRY: Duration = Duration::from_secs(2);
/// Wait after a poll that produced no lines.
pub const IDLE_POLL: Duration = Duration::from_millis(500);

pub struct Monitor {
    config: watch::Receiver<Arc<Config>>,
    /// Where to persist an auto-discovered log path; `None` disables write-back.
    config_path: Option<PathBuf>,
    dispatcher: Dispatcher,
    status: StatusHandle,
    tailer: Option<Tailer>,
    /// Triggers compiled from `compiled_from`.
    triggers: Arc<TriggerSet>,
    compiled_from: Option<Arc<Config>>,
    /// Last state this loop published; `Triggered` is never stored here.
    published: StatusState,
}

impl Monitor {
    pub fn new(
        config: watch::Receiver<Arc<Config>>,
        config_path: Option<PathBuf>,
        dispatcher: Dispatcher,
    ) -> Self {
        let status = dispatcher.status().clone();
        Self {
            config,
            config_path,
            dispatcher,
            status,
            tailer: None,
            triggers: Arc::new(TriggerSet::default()),
            compiled_from: None,
            published: StatusState::Initializing,
        }
    }

    /// Spawns the loop onto the current runtime.
    pub fn start(self) -> MonitorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        MonitorHandle { stop_tx, task }
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!("monitor started");
        loop {
            if *stop.borrow() {
                break;
            }
            let wait = self.step(&stop);
            if pause(&mut stop, wait).await {
                break;
            }
        }
        self.dispatcher.cancel_pending_reset();
        if let Some(tailer) = self.tailer.take() {
            info!(path = %tailer.path().display(), "closing log");
        }
        info!("monitor stopped");
    }

    /// Runs one iteration and returns how long to wait before the next.
    fn step(&mut self, stop: &watch::Receiver<bool>) -> Duration {
        let config = self.snapshot();
        let configured = config.global.configured_log_file();

        // A different, existing file chosen by the user takes over.
        if let (Some(tailer), Some(wanted)) = (&self.tailer, &configured) {
            if tailer.path() != wanted.as_path() && wanted.is_file() {
                info!(from = %tailer.path().display(), to = %wanted.display(), "log file changed in config");
                self.tailer = None;
            }
        }

        if self.tailer.as_ref().map_or(true, |t| !t.is_available()) {
            self.tailer = None;
            return self.acquire(&config, configured.as_deref());
        }

        self.read_new_lines(&config, stop)
    }

    /// Returns the current configuration snapshot, recompiling the trigger
    /// set when a new snapshot has been published.
    fn snapshot(&mut self) -> Arc<Config> {
        let config = self.config.borrow_and_update().clone();
        let stale = self
            .compiled_from
            .as_ref()
            .map_or(true, |prev| !Arc::ptr_eq(prev, &config));
        if stale {
            self.triggers = TriggerSet::shared(&config.triggers);
            self.compiled_from = Some(Arc::clone(&config));
            if self.triggers.is_empty() {
                warn!("no usable triggers configured; lines will not match");
            } else {
                let names: Vec<&str> = self.triggers.iter().map(|t| t.name.as_str()).collect();
                info!(triggers = ?names, "trigger set loaded");
            }
        }
        config
    }

    /// Finds and opens a log file.
    fn acquire(&mut self, config: &Config, configured: Option<&Path>) -> Duration {
        let locator = LogLocator::from_config(&config.global);
        let path = match locator.locate(configured).ok_or(MonitorError::LogUnavailable) {
            Ok(path) => path,
            Err(e) => {
                if self.published != StatusState::WaitingForLog {
                    info!(dir = %locator.dir().display(), "{e}; waiting");
                }
                self.publish(StatusState::WaitingForLog);
                return LOCATE_RETRY;
            }
        };

        if configured != Some(path.as_path()) {
            info!(path = %path.display(), "discovered log file");
            self.persist_log_file(config, &path);
        }

        match Tailer::open(&path) {
            Ok(tailer) => {
                info!(path = %path.display(), "monitoring log");
                self.tailer = Some(tailer);
                self.publish(StatusState::Monitoring(path));
                Duration::ZERO
            }
            Err(e) => {
                self.enter_error(&e);
                ERROR_RETRY
            }
        }
    }

    /// Polls the tailer once and dispatches every matching line.
    fn read_new_lines(&mut self, config: &Config, stop: &watch::Receiver<bool>) -> Duration {
        let Some(tailer) = self.tailer.as_mut() else {
            return Duration::ZERO;
        };
        let path = tailer.path().to_path_buf();
        let triggers = Arc::clone(&self.triggers);
        let show_notifications = config.global.show_notifications;

        let mut read = 0usize;
        let mut failure = None;
        match tailer.poll() {
            Ok(lines) => {
                // Publish before dispatching so a trigger in this batch is not
                // overwritten by the recovery to `Monitoring`.
                let monitoring = StatusState::Monitoring(path.clone());
                if lines.is_available() && self.published != monitoring {
                    self.published = monitoring.clone();
                    self.status.set(monitoring);
                }
                for line in lines {
                    if *stop.borrow() {
                        break;
                    }
                    match line {
                        Ok(line) => {
                            read += 1;
                            if let Some(matched) = triggers.find_match(&line) {
                                self.dispatcher.dispatch(&matched, show_notifications, &path);
                            }
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }
            Err(e) => failure = Some(e),
        }

        if let Some(e) = failure {
            self.enter_error(&e);
            return ERROR_RETRY;
        }
        let Some(tailer) = self.tailer.as_ref() else {
            return Duration::ZERO;
        };
        if !tailer.is_available() {
            // Look for a replacement right away.
            return Duration::ZERO;
        }
        if read > 0 {
            debug!(
                lines = read,
                cursor = ?tailer.cursor(),
                reopens = tailer.reopen_count(),
                "read new lines"
            );
        }

        if read == 0 {
            IDLE_POLL
        } else {
            Duration::ZERO
        }
    }

    /// Publishes `state` if it differs from what this loop last published.
    fn publish(&mut self, state: StatusState) {
        if self.published != state {
            self.published = state.clone();
            self.status.set(state);
        }
    }

    fn enter_error(&mut self, e: &MonitorError) {
        let message = e.to_string();
        if !matches!(&self.published, StatusState::Error(m) if *m == message) {
            error!("{message}");
            self.dispatcher.record(EventKind::Error, message.clone());
        }
        self.publish(StatusState::Error(message));
    }

    /// Best-effort write-back of an auto-discovered log path.
    fn persist_log_file(&self, config: &Config, path: &Path) {
        let Some(config_path) = self.config_path.as_deref() else {
            return;
        };
        let mut updated = config.clone();
        updated.global.log_file = path.to_string_lossy().into_owned();
        if let Err(e) = config::save(config_path, &updated) {
            warn!("failed to save discovered log file: {e:#}");
        }
    }
}

/// Sleeps for `wait` unless stopped first. Returns `true` when the loop
/// should exit.
async fn pause(stop: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    if wait.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    return true;
                }
            }
        }
    }
    *stop.borrow()
}

/// A running monitor loop.
pub struct MonitorHandle {
    /// Setting this to `true` signals the loop to stop.
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signals the loop to stop and waits up to `timeout` for it to finish.
    /// Returns `false` if it did not finish in time; that is logged, not fatal.
    pub async fn stop(self, timeout: Duration) -> bool {
        let _ = self.stop_tx.send(true);
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("monitor task failed: {e}");
                true
            }
            Err(_) => {
                warn!("monitor did not stop within {timeout:?}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerConfig;
    use crate::dispatcher::testing::*;
    use crate::event_log::EventLog;
    use crate::sound::{SoundResolver, SoundSource};
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tokio::time::Instant;

    struct Harness {
        dir: tempfile::TempDir,
        events_path: PathBuf,
        config_path: PathBuf,
        player: Arc<RecordingPlayer>,
        notifier: Arc<RecordingNotifier>,
        status: StatusHandle,
        config_tx: watch::Sender<Arc<Config>>,
        handle: Option<MonitorHandle>,
    }

    impl Harness {
        fn start_in(dir: tempfile::TempDir, config: Config) -> Self {
            let events_path = dir.path().join("events.txt");
            let config_path = dir.path().join("config.toml");
            let assets = dir.path().join("assets");
            fs::create_dir_all(&assets).unwrap();
            fs::write(assets.join("ok.wav"), b"RIFF").unwrap();

            let player = Arc::new(RecordingPlayer::default());
            let notifier = Arc::new(RecordingNotifier::default());
            let status = StatusHandle::new();
            let dispatcher = Dispatcher::new(
                EventLog::new(&events_path),
                SoundResolver::new(&assets),
                player.clone(),
                notifier.clone(),
                status.clone(),
            );
            let (config_tx, config_rx) = watch::channel(Arc::new(config));
            let handle = Monitor::new(config_rx, Some(config_path.clone()), dispatcher).start();
            Self {
                dir,
                events_path,
                config_path,
                player,
                notifier,
                status,
                config_tx,
                handle: Some(handle),
            }
        }

        async fn wait_for(&self, what: &str, cond: impl Fn(&StatusState) -> bool) {
            let deadline = Instant::now() + Duration::from_secs(30);
            while !cond(&self.status.snapshot().state) {
                assert!(
                    Instant::now() < deadline,
                    "timed out waiting for {what}; status is {:?}",
                    self.status.snapshot().state
                );
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        async fn wait_monitoring(&self, path: &Path) {
            self.wait_for("monitoring", |s| *s == StatusState::Monitoring(path.to_path_buf()))
                .await;
        }

        async fn wait_triggered(&self, trigger: &str) {
            self.wait_for("trigger", |s| {
                matches!(s, StatusState::Triggered { name, .. } if name == trigger)
            })
            .await;
        }

        fn trigger_records(&self) -> Vec<String> {
            event_lines(&self.events_path)
                .into_iter()
                .filter(|l| l.contains("TRIGGER("))
                .collect()
        }

        async fn stop(&mut self) -> bool {
            self.handle.take().unwrap().stop(Duration::from_secs(1)).await
        }
    }

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new().append(true).create(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    fn push_ok_config(log_file: &Path) -> Config {
        let mut config = Config::default();
        config.global.log_file = log_file.to_string_lossy().into_owned();
        config.global.show_notifications = true;
        config.triggers = vec![TriggerConfig::new(
            "Push OK",
            &["activated content"],
            Some("ok.wav"),
            true,
        )];
        config
    }

    #[tokio::test(start_paused = true)]
    async fn appended_trigger_line_runs_full_dispatch_then_resets() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("editor.log");
        fs::write(&log, "old: Successfully activated content on platform\n").unwrap();
        let mut h = Harness::start_in(dir, push_ok_config(&log));

        h.wait_monitoring(&log).await;
        // Pre-existing content is not replayed.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.trigger_records().is_empty());

        append(&log, "2024 LogX: Successfully activated content on platform\n");
        h.wait_triggered("Push OK").await;
        let triggered_at = Instant::now();

        let records = h.trigger_records();
        assert_eq!(records.len(), 1);
        assert!(records[0].ends_with("TRIGGER(Push OK) - activated content"));
        assert_eq!(
            *h.player.played.lock().unwrap(),
            [SoundSource::File(h.dir.path().join("assets").join("ok.wav"))]
        );
        assert_eq!(
            *h.notifier.sent.lock().unwrap(),
            [("Push OK".to_string(), "activated content".to_string())]
        );
        assert!(h.status.snapshot().last_trigger.is_some());

        h.wait_monitoring(&log).await;
        let shown_for = triggered_at.elapsed();
        assert!(shown_for >= Duration::from_millis(4_900), "reset after {shown_for:?}");
        assert!(shown_for < Duration::from_secs(6), "reset after {shown_for:?}");

        assert!(h.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_disabled_globally_still_plays_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("editor.log");
        fs::write(&log, "").unwrap();
        let mut config = push_ok_config(&log);
        config.global.show_notifications = false;
        let mut h = Harness::start_in(dir, config);

        h.wait_monitoring(&log).await;
        append(&log, "activated content\n");
        h.wait_triggered("Push OK").await;

        assert_eq!(h.trigger_records().len(), 1);
        assert_eq!(h.player.played.lock().unwrap().len(), 1);
        assert!(h.notifier.sent.lock().unwrap().is_empty());
        assert!(h.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn only_first_matching_trigger_fires_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("editor.log");
        fs::write(&log, "").unwrap();
        let mut config = push_ok_config(&log);
        config.triggers = vec![
            TriggerConfig::new("T1", &["A"], None, true),
            TriggerConfig::new("T2", &["a b"], None, true),
        ];
        let mut h = Harness::start_in(dir, config);

        h.wait_monitoring(&log).await;
        append(&log, "x a b y\n");
        h.wait_triggered("T1").await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let records = h.trigger_records();
        assert_eq!(records.len(), 1);
        assert!(records[0].contains("TRIGGER(T1)"));
        assert!(h.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn rotated_log_is_followed_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("editor.log");
        fs::write(&log, "").unwrap();
        let mut h = Harness::start_in(dir, push_ok_config(&log));

        h.wait_monitoring(&log).await;
        append(&log, "activated content #1\n");
        h.wait_triggered("Push OK").await;

        fs::rename(&log, h.dir.path().join("editor.log.1")).unwrap();
        fs::write(&log, "activated content (history of the new file)\n").unwrap();
        // Let the loop notice the replacement before writing to the new file.
        tokio::time::sleep(Duration::from_secs(2)).await;
        append(&log, "activated content #2\n");

        let deadline = Instant::now() + Duration::from_secs(10);
        while h.trigger_records().len() < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.trigger_records().len(), 2);
        assert!(h.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_log_then_discovers_and_persists_it() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("Logs");
        let mut config = push_ok_config(Path::new(""));
        config.global.log_dir = logs.to_string_lossy().into_owned();
        config.global.log_pattern = "Editor*.log".to_string();
        let mut h = Harness::start_in(dir, config);

        h.wait_for("waiting", |s| *s == StatusState::WaitingForLog).await;

        fs::create_dir_all(&logs).unwrap();
        let log = logs.join("Editor-1.log");
        fs::write(&log, "").unwrap();
        h.wait_monitoring(&log).await;

        let saved = config::load_or_default(&h.config_path).unwrap();
        assert_eq!(saved.global.configured_log_file(), Some(log.clone()));
        assert_eq!(saved.triggers[0].name, "Push OK");

        append(&log, "activated content\n");
        h.wait_triggered("Push OK").await;
        assert!(h.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn switches_to_newly_configured_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.log");
        let second = dir.path().join("b.log");
        fs::write(&first, "").unwrap();
        fs::write(&second, "").unwrap();
        let mut h = Harness::start_in(dir, push_ok_config(&first));

        h.wait_monitoring(&first).await;
        h.config_tx.send(Arc::new(push_ok_config(&second))).unwrap();
        h.wait_monitoring(&second).await;

        append(&first, "activated content in the old file\n");
        append(&second, "activated content in the new file\n");
        h.wait_triggered("Push OK").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.trigger_records().len(), 1);
        assert!(h.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_edits_apply_to_following_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("editor.log");
        fs::write(&log, "").unwrap();
        let mut h = Harness::start_in(dir, push_ok_config(&log));
        h.wait_monitoring(&log).await;

        let mut edited = push_ok_config(&log);
        edited.triggers = vec![TriggerConfig::new("Lost", &["connection lost"], None, false)];
        h.config_tx.send(Arc::new(edited)).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        append(&log, "activated content\nERROR: Connection LOST\n");
        h.wait_triggered("Lost").await;
        let records = h.trigger_records();
        assert_eq!(records.len(), 1);
        assert!(records[0].contains("TRIGGER(Lost)"));
        assert!(h.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_observed_within_one_idle_interval() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("editor.log");
        fs::write(&log, "").unwrap();
        let mut h = Harness::start_in(dir, push_ok_config(&log));
        h.wait_monitoring(&log).await;

        let started = Instant::now();
        assert!(h.stop().await);
        assert!(started.elapsed() <= IDLE_POLL);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_waiting_for_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = push_ok_config(Path::new(""));
        config.global.log_dir = dir.path().join("absent").to_string_lossy().into_owned();
        let mut h = Harness::start_in(dir, config);

        h.wait_for("waiting", |s| *s == StatusState::WaitingForLog).await;
        let started = Instant::now();
        assert!(h.stop().await);
        assert!(started.elapsed() < LOCATE_RETRY);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_in_first_batch_after_error_stays_visible() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("editor.log");
        fs::write(&log, "").unwrap();
        let status = StatusHandle::new();
        let (_tx, rx) = watch::channel(Arc::new(push_ok_config(&log)));
        let dispatcher = Dispatcher::new(
            EventLog::new(dir.path().join("events.txt")),
            SoundResolver::new(dir.path()),
            Arc::new(RecordingPlayer::default()),
            Arc::new(RecordingNotifier::default()),
            status.clone(),
        );
        let mut monitor = Monitor::new(rx, None, dispatcher);
        let (_stop_tx, stop) = watch::channel(false);

        monitor.step(&stop);
        assert_eq!(status.snapshot().state, StatusState::Monitoring(log.clone()));

        monitor.enter_error(&MonitorError::log_read(
            &log,
            std::io::Error::new(std::io::ErrorKind::Other, "transient"),
        ));
        append(&log, "Successfully activated content\n");
        monitor.step(&stop);

        assert!(matches!(
            status.snapshot().state,
            StatusState::Triggered { ref name, .. } if name == "Push OK"
        ));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(status.snapshot().state, StatusState::Monitoring(log));
    }

    #[tokio::test]
    async fn repeated_error_is_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let events_path = dir.path().join("events.txt");
        let status = StatusHandle::new();
        let (_tx, rx) = watch::channel(Arc::new(Config::default()));
        let dispatcher = Dispatcher::new(
            EventLog::new(&events_path),
            SoundResolver::new(dir.path()),
            Arc::new(RecordingPlayer::default()),
            Arc::new(RecordingNotifier::default()),
            status.clone(),
        );
        let mut monitor = Monitor::new(rx, None, dispatcher);

        let err = MonitorError::log_read(
            "/logs/editor.log",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        monitor.enter_error(&err);
        monitor.enter_error(&err);

        assert!(matches!(status.snapshot().state, StatusState::Error(ref m) if m.contains("denied")));
        let errors: Vec<_> = event_lines(&events_path)
            .into_iter()
            .filter(|l| l.contains("] ERROR - "))
            .collect();
        assert_eq!(errors.len(), 1);
    }
}
