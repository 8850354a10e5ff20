//! Writer-side operations on the task queue.
//!
//! Each operation is a single `batch_update`. Callers re-read the store
//! afterwards; nothing is pushed to them.

use crate::clock::{Clock, SystemClock};
use crate::model::{minutes_from, position_of, Task};
use crate::storage::TaskStore;

pub struct Mutations<'s, C: Clock = SystemClock> {
    store: &'s TaskStore,
    clock: C,
}

impl<'s> Mutations<'s, SystemClock> {
    pub fn new(store: &'s TaskStore) -> Self {
        Mutations {
            store,
            clock: SystemClock,
        }
    }
}

impl<'s, C: Clock> Mutations<'s, C> {
    pub fn with_clock(store: &'s TaskStore, clock: C) -> Self {
        Mutations { store, clock }
    }

    pub fn add(&self, task: Task) -> bool {
        tracing::info!(message = %task.message, fire_at = task.fire_at, "adding task");
        self.store.batch_update(|mut tasks| {
            tasks.push(task);
            tasks
        })
    }

    /// Replaces the first task matching `old` with `new`.
    pub fn update(&self, old: &Task, new: Task) -> bool {
        self.store.batch_update(|mut tasks| {
            match position_of(&tasks, old) {
                Some(idx) => tasks[idx] = new,
                None => tracing::debug!("update target not found, queue unchanged"),
            }
            tasks
        })
    }

    /// Removes the first task matching `task`. Deleting twice is a no-op.
    pub fn delete(&self, task: &Task) -> bool {
        self.store.batch_update(|mut tasks| {
            if let Some(idx) = position_of(&tasks, task) {
                tasks.remove(idx);
            }
            tasks
        })
    }

    pub fn complete(&self, task: &Task) -> bool {
        tracing::info!(message = %task.message, "completing task");
        self.delete(task)
    }

    /// Reschedules the first match to `now + minutes`, regardless of its old `fire_at`.
    ///
    /// Returns `false` without touching the queue if the new time is not representable.
    pub fn snooze(&self, task: &Task, minutes: i64) -> bool {
        let Some(fire_at) = minutes_from(self.clock.now(), minutes) else {
            tracing::warn!(minutes, "snooze target out of range");
            return false;
        };
        tracing::info!(message = %task.message, fire_at, "snoozing task");
        self.store.batch_update(|mut tasks| {
            if let Some(idx) = position_of(&tasks, task) {
                tasks[idx].fire_at = fire_at;
            }
            tasks
        })
    }
}
