use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type TaskId = String;

/// A persisted reminder: fire a notification carrying `message` at `fire_at`.
///
/// Unknown fields in the queue file are kept in `extra` and written back
/// untouched, so other tools can hang their own data off a record.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,
    #[serde(default)]
    pub message: String,
    /// Unix seconds.
    #[serde(default)]
    pub fire_at: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Key used to remember which firings were already announced.
pub type FiringKey = (String, i64);

impl Task {
    pub fn new(message: impl Into<String>, fire_at: i64) -> Self {
        Task {
            id: Some(generate_id()),
            message: message.into(),
            fire_at,
            extra: Map::new(),
        }
    }

    /// Whether `self` is the record `target` refers to.
    ///
    /// Records carrying an id are matched by id. Legacy records without one
    /// fall back to whole-record equality, which cannot tell duplicates apart.
    pub fn matches(&self, target: &Task) -> bool {
        match (&self.id, &target.id) {
            (Some(a), Some(b)) => a == b,
            _ => self == target,
        }
    }

    pub fn firing_key(&self) -> FiringKey {
        (self.message.clone(), self.fire_at)
    }

    pub fn is_pending(&self, now: i64) -> bool {
        self.fire_at > now
    }
}

/// `now + minutes * 60` without wrapping.
pub fn minutes_from(now: i64, minutes: i64) -> Option<i64> {
    minutes.checked_mul(60)?.checked_add(now)
}

pub fn generate_id() -> TaskId {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Index of the first task matching `target`.
pub fn position_of(tasks: &[Task], target: &Task) -> Option<usize> {
    tasks.iter().position(|t| t.matches(target))
}

pub fn sort_by_due(tasks: &mut [Task]) {
    tasks.sort_by_key(|t| t.fire_at);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_record_parses_without_id() {
        let task: Task = serde_json::from_str(r#"{"message":"tea","fire_at":1700}"#).unwrap();
        assert_eq!(task.id, None);
        assert_eq!(task.message, "tea");
        assert_eq!(task.fire_at, 1700);
        let back = serde_json::to_string(&task).unwrap();
        assert!(!back.contains("\"id\""));
    }

    #[test]
    fn extra_fields_survive_a_rewrite() {
        let raw = r#"{"message":"call","fire_at":5,"color":"red","repeat":{"every":3}}"#;
        let task: Task = serde_json::from_str(raw).unwrap();
        assert_eq!(task.extra.get("color"), Some(&Value::from("red")));
        let value: Value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["repeat"]["every"], Value::from(3));
    }

    #[test]
    fn matches_by_id_even_after_edit() {
        let original = Task::new("stretch", 100);
        let mut edited = original.clone();
        edited.message = "stretch more".into();
        edited.fire_at = 200;
        assert!(edited.matches(&original));
        assert!(!Task::new("stretch", 100).matches(&original));
    }

    #[test]
    fn id_less_records_match_structurally() {
        let a: Task = serde_json::from_str(r#"{"message":"a","fire_at":1}"#).unwrap();
        let same: Task = serde_json::from_str(r#"{"fire_at":1,"message":"a"}"#).unwrap();
        let other: Task = serde_json::from_str(r#"{"message":"a","fire_at":2}"#).unwrap();
        assert!(same.matches(&a));
        assert!(!other.matches(&a));
    }

    #[test]
    fn minute_offsets_do_not_wrap() {
        assert_eq!(minutes_from(100, 2), Some(220));
        assert_eq!(minutes_from(100, i64::MAX / 2), None);
        assert_eq!(minutes_from(i64::MAX - 30, 1), None);
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
    }
}
