//! Read-only view of upcoming tasks, plus the "next task" pill text.

use crate::config::ListSettings;
use crate::model::{sort_by_due, Task};
use crate::storage::TaskStore;
use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pill {
    pub title: String,
    pub meta: Option<String>,
}

pub struct TaskList {
    store: Arc<TaskStore>,
    tasks: Vec<Task>,
    reload_secs: i64,
    last_reload: Option<i64>,
}

impl TaskList {
    pub fn new(store: Arc<TaskStore>, settings: &ListSettings) -> Self {
        TaskList {
            store,
            tasks: Vec::new(),
            reload_secs: settings.reload_secs,
            last_reload: None,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn reload(&mut self, now: i64) {
        let mut tasks: Vec<Task> = self
            .store
            .load(false)
            .into_iter()
            .filter(|t| t.is_pending(now))
            .collect();
        sort_by_due(&mut tasks);
        self.tasks = tasks;
        self.last_reload = Some(now);
    }

    /// Reloads when the slow poll interval has passed. Returns whether it did.
    pub fn maybe_reload(&mut self, now: i64) -> bool {
        match self.last_reload {
            Some(last) if now - last < self.reload_secs => false,
            _ => {
                self.reload(now);
                true
            }
        }
    }

    /// The hosting surface became visible again: drop the cache and reload.
    pub fn on_visible(&mut self, now: i64) {
        self.store.invalidate_cache();
        self.reload(now);
    }

    pub fn next_pill(&self, now: i64) -> Pill {
        pill_for(self.tasks.first(), &Local, now)
    }
}

pub fn pill_for<Tz>(next: Option<&Task>, tz: &Tz, now: i64) -> Pill
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let Some(task) = next else {
        return Pill {
            title: "No tasks for today".into(),
            meta: None,
        };
    };
    let meta = match (
        tz.timestamp_opt(task.fire_at, 0).single(),
        tz.timestamp_opt(now, 0).single(),
    ) {
        (Some(fire), Some(today)) => Some(format!(
            "{} • {} • {}",
            day_label(&fire, &today),
            fire.format("%H:%M"),
            format_time_until(task.fire_at, now)
        )),
        _ => None,
    };
    Pill {
        title: task.message.clone(),
        meta,
    }
}

fn day_label<Tz: TimeZone>(fire: &DateTime<Tz>, now: &DateTime<Tz>) -> String {
    let today = now.date_naive();
    let day = fire.date_naive();
    if day == today {
        "Today".into()
    } else if Some(day) == today.checked_add_signed(ChronoDuration::days(1)) {
        "Tomorrow".into()
    } else {
        day.format("%d.%m").to_string()
    }
}

/// Short relative countdown, e.g. `in 2h 5m`.
pub fn format_time_until(fire_at: i64, now: i64) -> String {
    let secs = fire_at.saturating_sub(now);
    if secs <= 0 {
        return "now".into();
    }
    let (days, hours, mins) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    if days > 0 {
        format!("in {}d {}h", days, hours)
    } else if hours > 0 {
        format!("in {}h {}m", hours, mins)
    } else if mins > 0 {
        format!("in {}m", mins)
    } else {
        format!("in {}s", secs)
    }
}
