//! The scheduler loop behind `nudged`.
//!
//! Each cycle sweeps expired tasks, then either fires the earliest due task
//! or sleeps until it is due. Sleeps are capped at `max_sleep` so tasks added
//! by other processes are noticed without any wake-up channel.

use crate::clock::Clock;
use crate::config::DaemonSettings;
use crate::model::{position_of, FiringKey, Task};
use crate::notify::Notifier;
use crate::storage::{TaskStore, WriteMode};
use std::cell::RefCell;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

const FALLBACK_MESSAGE: &str = "Timer done";

/// What one pass over the queue decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Nothing queued; sleep the idle interval.
    Idle,
    /// Earliest task is in the future; sleep this long, then look again.
    Wait(Duration),
    /// Notified for this task and removed it.
    Fired(Task),
    /// Notified, but the task could not be removed; sleep this long before retrying.
    Retry(Duration),
}

pub struct Daemon<N, C> {
    store: TaskStore,
    notifier: N,
    clock: C,
    settings: DaemonSettings,
    /// Task already announced whose removal has not been written yet.
    announced: RefCell<Option<FiringKey>>,
}

impl<N: Notifier, C: Clock> Daemon<N, C> {
    pub fn new(queue: impl Into<PathBuf>, notifier: N, clock: C, settings: DaemonSettings) -> Self {
        let store = TaskStore::open(queue)
            .with_ttl(Duration::ZERO)
            .with_write_mode(WriteMode::AtomicRename);
        Daemon {
            store,
            notifier,
            clock,
            settings,
            announced: RefCell::new(None),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn cycle(&self) -> Step {
        let now = self.clock.now();
        let retention = self.settings.retention_secs;
        let mut live = Vec::new();
        let swept = self.store.batch_update(|tasks| {
            let before = tasks.len();
            let kept: Vec<Task> = tasks
                .into_iter()
                .filter(|t| now.saturating_sub(t.fire_at) < retention)
                .collect();
            if kept.len() < before {
                tracing::info!(expired = before - kept.len(), "dropping stale tasks");
            }
            live = kept.clone();
            kept
        });
        if !swept {
            return Step::Idle;
        }

        let Some(next) = live.into_iter().min_by_key(|t| t.fire_at) else {
            return Step::Idle;
        };
        let delta = next.fire_at.saturating_sub(now);
        if delta > 0 {
            let wait = Duration::from_secs(delta as u64).min(self.settings.max_sleep());
            tracing::debug!(message = %next.message, delta, "next task armed");
            return Step::Wait(wait);
        }

        let body = if next.message.is_empty() {
            FALLBACK_MESSAGE
        } else {
            next.message.as_str()
        };
        let key = next.firing_key();
        if self.announced.borrow().as_ref() != Some(&key) {
            tracing::info!(message = %body, fire_at = next.fire_at, "task fired");
            self.notifier.notify(&self.settings.notify.title, body);
        }
        let removed = self.store.batch_update(|mut tasks| {
            if let Some(idx) = position_of(&tasks, &next) {
                tasks.remove(idx);
            }
            tasks
        });
        if !removed {
            tracing::warn!(message = %body, "could not remove fired task, backing off");
            *self.announced.borrow_mut() = Some(key);
            return Step::Retry(self.settings.idle_interval());
        }
        *self.announced.borrow_mut() = None;
        Step::Fired(next)
    }

    /// Runs cycles until `shutdown` flips, abandoning whatever sleep is in progress.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(queue = ?self.store.path(), "scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let pause = match self.cycle() {
                Step::Fired(_) => continue,
                Step::Idle => self.settings.idle_interval(),
                Step::Wait(wait) | Step::Retry(wait) => wait,
            };
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("scheduler stopped");
    }
}

/// Resolves on SIGTERM or SIGINT.
pub async fn termination_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = term.recv() => tracing::info!("received SIGTERM"),
            _ = interrupt.recv() => tracing::info!("received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use std::cell::RefCell;
    use tempfile::TempDir;
    use tokio::time::Instant;

    const BASE: i64 = 1_800_000_000;

    /// Unix time that follows tokio's (pausable) clock.
    struct VirtualClock {
        base: i64,
        start: Instant,
    }

    impl VirtualClock {
        fn starting_at(base: i64) -> Self {
            VirtualClock {
                base,
                start: Instant::now(),
            }
        }
    }

    impl Clock for VirtualClock {
        fn now(&self) -> i64 {
            self.base + self.start.elapsed().as_secs() as i64
        }
    }

    struct Recorder<C> {
        clock: C,
        fired: RefCell<Vec<(String, i64)>>,
    }

    impl<C: Clock> Recorder<C> {
        fn new(clock: C) -> Self {
            Recorder {
                clock,
                fired: RefCell::new(Vec::new()),
            }
        }

        fn fired(&self) -> Vec<(String, i64)> {
            self.fired.borrow().clone()
        }
    }

    impl<C: Clock> Notifier for Recorder<C> {
        fn notify(&self, _title: &str, body: &str) {
            self.fired
                .borrow_mut()
                .push((body.to_string(), self.clock.now()));
        }
    }

    fn settings() -> DaemonSettings {
        DaemonSettings::default()
    }

    fn queue(dir: &TempDir, tasks: &[Task]) -> PathBuf {
        let path = dir.path().join("queue.json");
        assert!(TaskStore::open(&path).save(tasks));
        path
    }

    #[tokio::test(start_paused = true)]
    async fn fires_each_task_once_at_its_deadline() {
        let dir = TempDir::new().unwrap();
        let clock = VirtualClock::starting_at(BASE);
        let recorder = Recorder::new(&clock);
        let path = queue(
            &dir,
            &[Task::new("later", BASE + 50), Task::new("soon", BASE + 5)],
        );
        let daemon = Daemon::new(&path, &recorder, &clock, settings());
        let (tx, rx) = watch::channel(false);

        tokio::join!(daemon.run(rx), async {
            tokio::time::sleep(Duration::from_secs(120)).await;
            let _ = tx.send(true);
        });

        assert_eq!(
            recorder.fired(),
            vec![("soon".to_string(), BASE + 5), ("later".to_string(), BASE + 50)]
        );
        assert!(daemon.store().load(true).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn nearer_task_from_another_writer_is_picked_up() {
        let dir = TempDir::new().unwrap();
        let clock = VirtualClock::starting_at(BASE);
        let recorder = Recorder::new(&clock);
        let path = queue(&dir, &[Task::new("far", BASE + 3600)]);
        let daemon = Daemon::new(
            &path,
            &recorder,
            &clock,
            DaemonSettings {
                max_sleep_secs: 10,
                ..settings()
            },
        );
        let ui = TaskStore::open(&path);
        let (tx, rx) = watch::channel(false);

        tokio::join!(daemon.run(rx), async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            assert!(ui.batch_update(|mut tasks| {
                tasks.push(Task::new("near", BASE + 15));
                tasks
            }));
            tokio::time::sleep(Duration::from_secs(30)).await;
            let _ = tx.send(true);
        });

        assert_eq!(recorder.fired(), vec![("near".to_string(), BASE + 15)]);
        let left = ui.load(true);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].message, "far");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cuts_a_long_sleep_short() {
        let dir = TempDir::new().unwrap();
        let clock = VirtualClock::starting_at(BASE);
        let recorder = Recorder::new(&clock);
        let path = queue(&dir, &[Task::new("tomorrow", BASE + 86_400)]);
        let daemon = Daemon::new(
            &path,
            &recorder,
            &clock,
            DaemonSettings {
                max_sleep_secs: 86_400,
                ..settings()
            },
        );
        let (tx, rx) = watch::channel(false);
        let started = Instant::now();

        tokio::join!(daemon.run(rx), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(true);
        });

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(recorder.fired().is_empty());
        assert_eq!(daemon.store().load(true).len(), 1);
    }

    #[test]
    fn expired_tasks_are_dropped_without_firing() {
        let dir = TempDir::new().unwrap();
        let now = BASE;
        let retention = settings().retention_secs;
        let stale = Task::new("missed", now - (retention + 1));
        let upcoming = Task::new("upcoming", now + 600);
        let path = queue(&dir, &[stale, upcoming.clone()]);
        let recorder = Recorder::new(FixedClock(now));
        let daemon = Daemon::new(&path, &recorder, FixedClock(now), settings());

        assert_eq!(daemon.cycle(), Step::Wait(Duration::from_secs(60)));
        assert!(recorder.fired().is_empty());
        assert_eq!(daemon.store().load(true), vec![upcoming]);
    }

    #[test]
    fn overdue_backlog_drains_one_per_cycle() {
        let dir = TempDir::new().unwrap();
        let now = BASE;
        let first = Task::new("first", now - 120);
        let second = Task::new("second", now - 60);
        let path = queue(&dir, &[second.clone(), first.clone()]);
        let recorder = Recorder::new(FixedClock(now));
        let daemon = Daemon::new(&path, &recorder, FixedClock(now), settings());

        assert_eq!(daemon.cycle(), Step::Fired(first));
        assert_eq!(daemon.cycle(), Step::Fired(second));
        assert_eq!(daemon.cycle(), Step::Idle);
        assert_eq!(
            recorder.fired(),
            vec![("first".to_string(), now), ("second".to_string(), now)]
        );
    }

    #[test]
    fn empty_message_gets_a_fallback() {
        let dir = TempDir::new().unwrap();
        let path = queue(&dir, &[Task::new("", BASE)]);
        let recorder = Recorder::new(FixedClock(BASE));
        let daemon = Daemon::new(&path, &recorder, FixedClock(BASE), settings());
        assert!(matches!(daemon.cycle(), Step::Fired(_)));
        assert_eq!(recorder.fired(), vec![(FALLBACK_MESSAGE.to_string(), BASE)]);
    }

    #[test]
    fn malformed_queue_is_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, "[{\"message\": ").unwrap();
        let recorder = Recorder::new(FixedClock(BASE));
        let daemon = Daemon::new(&path, &recorder, FixedClock(BASE), settings());
        assert_eq!(daemon.cycle(), Step::Idle);
        assert!(recorder.fired().is_empty());
    }

    #[test]
    fn fired_task_is_removed_by_identity_not_position() {
        let dir = TempDir::new().unwrap();
        let due = Task::new("due", BASE - 1);
        let path = queue(&dir, &[Task::new("x", BASE + 10), due.clone()]);
        let recorder = Recorder::new(FixedClock(BASE));
        let daemon = Daemon::new(&path, &recorder, FixedClock(BASE), settings());
        assert_eq!(daemon.cycle(), Step::Fired(due));
        let left = daemon.store().load(true);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].message, "x");
    }

    #[test]
    fn failed_removal_backs_off_without_notifying_again() {
        let dir = TempDir::new().unwrap();
        let due = Task::new("stuck", BASE - 1);
        let path = queue(&dir, &[due.clone()]);
        // a directory where the rename write wants its temp file
        let blocker = dir.path().join("queue.json.tmp");
        std::fs::create_dir(&blocker).unwrap();
        let recorder = Recorder::new(FixedClock(BASE));
        let daemon = Daemon::new(&path, &recorder, FixedClock(BASE), settings());

        for _ in 0..5 {
            assert_eq!(daemon.cycle(), Step::Retry(Duration::from_secs(60)));
        }
        assert_eq!(recorder.fired(), vec![("stuck".to_string(), BASE)]);
        assert_eq!(daemon.store().load(true), vec![due.clone()]);

        std::fs::remove_dir(&blocker).unwrap();
        assert_eq!(daemon.cycle(), Step::Fired(due));
        assert_eq!(recorder.fired().len(), 1);
        assert!(daemon.store().load(true).is_empty());
    }

    #[test]
    fn extreme_fire_times_do_not_overflow() {
        let dir = TempDir::new().unwrap();
        let far = Task::new("far", i64::MAX);
        let path = queue(&dir, &[Task::new("ancient", i64::MIN), far.clone()]);
        let recorder = Recorder::new(FixedClock(BASE));
        let daemon = Daemon::new(&path, &recorder, FixedClock(BASE), settings());

        assert_eq!(daemon.cycle(), Step::Wait(Duration::from_secs(60)));
        assert!(recorder.fired().is_empty());
        assert_eq!(daemon.store().load(true), vec![far]);
    }
}
