//! In-app reminder popups, independent of the daemon.
//!
//! The poller announces each due firing at most once while it is inside the
//! due window. Shown keys are forgotten once their `fire_at` falls behind the
//! dedup cutoff, so the set stays small and a re-added task can pop again.

use crate::config::PopupSettings;
use crate::model::{FiringKey, Task};
use crate::storage::TaskStore;
use std::collections::HashSet;
use std::sync::Arc;

pub struct PopupPoller {
    store: Arc<TaskStore>,
    interval_secs: i64,
    due_window_secs: i64,
    dedup_cutoff_secs: i64,
    shown: HashSet<FiringKey>,
    last_tick: Option<i64>,
}

impl PopupPoller {
    pub fn new(store: Arc<TaskStore>, settings: &PopupSettings) -> Self {
        PopupPoller {
            store,
            interval_secs: settings.interval_secs as i64,
            due_window_secs: settings.due_window_secs,
            dedup_cutoff_secs: settings.dedup_cutoff_secs,
            shown: HashSet::new(),
            last_tick: None,
        }
    }

    /// Ticks when the poll interval has elapsed since the last tick.
    pub fn poll(&mut self, now: i64) -> Vec<Task> {
        match self.last_tick {
            Some(last) if now - last < self.interval_secs => Vec::new(),
            _ => self.tick(now),
        }
    }

    /// Re-reads the queue and returns tasks that just became due and were not shown yet.
    pub fn tick(&mut self, now: i64) -> Vec<Task> {
        self.last_tick = Some(now);
        let mut due = Vec::new();
        for task in self.store.load(true) {
            if !self.is_due(&task, now) {
                continue;
            }
            if self.shown.insert(task.firing_key()) {
                tracing::info!(
                    message = %task.message,
                    fire_at = task.fire_at,
                    "showing reminder popup"
                );
                due.push(task);
            }
        }
        let cutoff = now - self.dedup_cutoff_secs;
        self.shown.retain(|(_, fire_at)| *fire_at > cutoff);
        due
    }

    /// Hook for "the queue may have changed behind our back": next `poll` reads fresh.
    pub fn refresh(&mut self) {
        self.store.invalidate_cache();
        self.last_tick = None;
    }

    pub fn shown_count(&self) -> usize {
        self.shown.len()
    }

    fn is_due(&self, task: &Task, now: i64) -> bool {
        task.fire_at <= now && task.fire_at > now - self.due_window_secs
    }
}
