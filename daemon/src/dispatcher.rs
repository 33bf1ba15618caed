/// Side effects of a matched trigger.
///
/// Every step runs regardless of whether the previous one succeeded; sound
/// and notification failures are logged and dropped.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event_log::{EventKind, EventLog};
use crate::matcher::Match;
use crate::notifier::Notifier;
use crate::sound::{SoundPlayer, SoundResolver};
use crate::status::StatusHandle;

/// How long a trigger stays visible in the status before reverting to
/// `Monitoring`.
pub const STATUS_RESET_DELAY: Duration = Duration::from_secs(5);

pub struct Dispatcher {
    events: EventLog,
    sounds: SoundResolver,
    player: Arc<dyn SoundPlayer>,
    notifier: Arc<dyn Notifier>,
    status: StatusHandle,
    reset_delay: Duration,
    /// The only live status reset; replaced (and the old one aborted) on
    /// every trigger.
    pending_reset: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(
        events: EventLog,
        sounds: SoundResolver,
        player: Arc<dyn SoundPlayer>,
        notifier: Arc<dyn Notifier>,
        status: StatusHandle,
    ) -> Self {
        Self {
            events,
            sounds,
            player,
            notifier,
            status,
            reset_delay: STATUS_RESET_DELAY,
            pending_reset: None,
        }
    }

    #[cfg(test)]
    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    /// Appends a record to the event log.
    pub fn record(&self, kind: EventKind, detail: impl Into<String>) {
        self.events.record(kind, detail);
    }

    /// Records and sends a notification. Failures are logged only.
    pub fn notify(&self, title: &str, message: &str) {
        self.events.record(EventKind::Notify, title);
        if let Err(e) = self.notifier.notify(title, message) {
            warn!("{e}");
        }
    }

    /// Runs every side effect of `matched`, which was found in a line of
    /// `log_path`. Must be called from within a tokio runtime.
    pub fn dispatch(&mut self, matched: &Match<'_>, show_notifications: bool, log_path: &Path) {
        let trigger = matched.trigger;
        info!(trigger = %trigger.name, keyword = matched.keyword, "trigger matched");

        self.events
            .record(EventKind::Trigger(trigger.name.clone()), matched.keyword);

        let source = self.sounds.resolve(trigger.sound.as_deref());
        if let Err(e) = self.player.play(&source) {
            warn!(trigger = %trigger.name, "{e}");
        }

        if show_notifications && trigger.notify {
            self.notify(&trigger.name, matched.keyword);
        }

        let since = Local::now();
        self.status.set_triggered(&trigger.name, since);
        self.schedule_reset(trigger.name.clone(), since, log_path.to_path_buf());
    }

    fn schedule_reset(&mut self, name: String, since: DateTime<Local>, path: PathBuf) {
        self.cancel_pending_reset();
        let status = self.status.clone();
        let delay = self.reset_delay;
        self.pending_reset = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if status.reset_trigger(&name, since, &path) {
                debug!(trigger = %name, "status reset to monitoring");
            }
        }));
    }

    /// Aborts the scheduled status reset, if any.
    pub fn cancel_pending_reset(&mut self) {
        if let Some(handle) = self.pending_reset.take() {
            handle.abort();
        }
    }

    /// `true` while a status reset is scheduled and has not run yet.
    #[cfg(test)]
    pub fn has_pending_reset(&self) -> bool {
        self.pending_reset
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel_pending_reset();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::TriggerConfig;
    use crate::matcher::TriggerSet;
    use crate::sound::SoundSource;
    use crate::status::StatusState;

    struct Fixture {
        dir: tempfile::TempDir,
        events_path: PathBuf,
        log_path: PathBuf,
        player: Arc<RecordingPlayer>,
        notifier: Arc<RecordingNotifier>,
        dispatcher: Dispatcher,
    }

    fn fixture(player: RecordingPlayer, notifier: RecordingNotifier) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let events_path = dir.path().join("events.txt");
        let assets = dir.path().join("assets");
        std::fs::create_dir(&assets).unwrap();
        std::fs::write(assets.join("ok.wav"), b"RIFF").unwrap();

        let player = Arc::new(player);
        let notifier = Arc::new(notifier);
        let dispatcher = Dispatcher::new(
            EventLog::new(&events_path),
            SoundResolver::new(&assets),
            player.clone(),
            notifier.clone(),
            StatusHandle::new(),
        );
        Fixture {
            log_path: dir.path().join("editor.log"),
            dir,
            events_path,
            player,
            notifier,
            dispatcher,
        }
    }

    fn triggers() -> TriggerSet {
        TriggerSet::compile(&[
            TriggerConfig::new("Push OK", &["activated content"], Some("ok.wav"), true),
            TriggerConfig::new("Quiet", &["quiet"], None, false),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_runs_every_side_effect() {
        let mut f = fixture(RecordingPlayer::default(), RecordingNotifier::default());
        let set = triggers();
        let m = set.find_match("Successfully activated content").unwrap();

        f.dispatcher.dispatch(&m, true, &f.log_path);

        let lines = event_lines(&f.events_path);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("TRIGGER(Push OK) - activated content"));
        assert!(lines[1].ends_with("NOTIFY - Push OK"));
        assert_eq!(
            *f.player.played.lock().unwrap(),
            [SoundSource::File(f.dir.path().join("assets").join("ok.wav"))]
        );
        assert_eq!(
            *f.notifier.sent.lock().unwrap(),
            [("Push OK".to_string(), "activated content".to_string())]
        );
        assert!(matches!(
            f.dispatcher.status().snapshot().state,
            StatusState::Triggered { ref name, .. } if name == "Push OK"
        ));
        assert!(f.dispatcher.has_pending_reset());
    }

    #[tokio::test(start_paused = true)]
    async fn notification_requires_global_and_trigger_flags() {
        let mut f = fixture(RecordingPlayer::default(), RecordingNotifier::default());
        let set = triggers();

        f.dispatcher
            .dispatch(&set.find_match("activated content").unwrap(), false, &f.log_path);
        f.dispatcher
            .dispatch(&set.find_match("quiet please").unwrap(), true, &f.log_path);

        assert!(f.notifier.sent.lock().unwrap().is_empty());
        assert_eq!(f.player.played.lock().unwrap().len(), 2);
        let lines = event_lines(&f.events_path);
        assert!(lines.iter().all(|l| !l.contains("NOTIFY")));
    }

    #[tokio::test(start_paused = true)]
    async fn collaborator_failures_do_not_stop_later_steps() {
        let mut f = fixture(
            RecordingPlayer { fail: true, ..Default::default() },
            RecordingNotifier { fail: true, ..Default::default() },
        );
        let set = triggers();

        f.dispatcher
            .dispatch(&set.find_match("activated content").unwrap(), true, &f.log_path);

        assert_eq!(f.notifier.sent.lock().unwrap().len(), 1);
        assert!(matches!(
            f.dispatcher.status().snapshot().state,
            StatusState::Triggered { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn status_reverts_to_monitoring_after_delay() {
        let mut f = fixture(RecordingPlayer::default(), RecordingNotifier::default());
        let set = triggers();
        f.dispatcher
            .dispatch(&set.find_match("activated content").unwrap(), true, &f.log_path);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(matches!(
            f.dispatcher.status().snapshot().state,
            StatusState::Triggered { .. }
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            f.dispatcher.status().snapshot().state,
            StatusState::Monitoring(f.log_path.clone())
        );
        assert!(!f.dispatcher.has_pending_reset());
    }

    #[tokio::test(start_paused = true)]
    async fn second_trigger_supersedes_first_reset() {
        let mut f = fixture(RecordingPlayer::default(), RecordingNotifier::default());
        let set = triggers();

        f.dispatcher
            .dispatch(&set.find_match("activated content").unwrap(), true, &f.log_path);

        tokio::time::sleep(Duration::from_secs(1)).await;
        f.dispatcher
            .dispatch(&set.find_match("quiet").unwrap(), true, &f.log_path);

        assert!(f.dispatcher.has_pending_reset());

        // 5s after the first trigger: still showing the second.
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert!(matches!(
            f.dispatcher.status().snapshot().state,
            StatusState::Triggered { ref name, .. } if name == "Quiet"
        ));

        // 5s after the second trigger: back to monitoring.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            f.dispatcher.status().snapshot().state,
            StatusState::Monitoring(f.log_path.clone())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_reset_keeps_triggered_state() {
        let mut f = fixture(RecordingPlayer::default(), RecordingNotifier::default());
        let set = triggers();
        f.dispatcher
            .dispatch(&set.find_match("activated content").unwrap(), true, &f.log_path);

        f.dispatcher.cancel_pending_reset();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(!f.dispatcher.has_pending_reset());
        assert!(matches!(
            f.dispatcher.status().snapshot().state,
            StatusState::Triggered { .. }
        ));
    }
}
