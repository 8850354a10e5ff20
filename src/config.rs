use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const QUEUE_ENV: &str = "NUDGE_QUEUE";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Overrides the queue location; falls back to `NUDGE_QUEUE`, then the data dir.
    pub queue_file: Option<PathBuf>,
    pub store: StoreSettings,
    pub daemon: DaemonSettings,
    pub popup: PopupSettings,
    pub list: ListSettings,
    pub snooze: SnoozeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Unfired tasks older than this are dropped without notifying.
    pub retention_secs: i64,
    pub idle_secs: u64,
    /// Upper bound on a single deadline sleep.
    pub max_sleep_secs: u64,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub program: String,
    pub title: String,
    pub urgency: String,
    pub timeout_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopupSettings {
    pub interval_secs: u64,
    pub due_window_secs: i64,
    pub dedup_cutoff_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListSettings {
    pub reload_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnoozeSettings {
    pub minutes: i64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings { cache_ttl_secs: 30 }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        DaemonSettings {
            retention_secs: 4 * 60 * 60,
            idle_secs: 60,
            max_sleep_secs: 60,
            notify: NotifySettings::default(),
        }
    }
}

impl Default for NotifySettings {
    fn default() -> Self {
        NotifySettings {
            program: "notify-send".into(),
            title: "⏰ Timer Done".into(),
            urgency: "normal".into(),
            timeout_ms: 10_000,
        }
    }
}

impl Default for PopupSettings {
    fn default() -> Self {
        PopupSettings {
            interval_secs: 60,
            due_window_secs: 120,
            dedup_cutoff_secs: 300,
        }
    }
}

impl Default for ListSettings {
    fn default() -> Self {
        ListSettings { reload_secs: 30 }
    }
}

impl Default for SnoozeSettings {
    fn default() -> Self {
        SnoozeSettings { minutes: 5 }
    }
}

impl StoreSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl DaemonSettings {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_secs.max(1))
    }
}

impl Settings {
    /// Loads `config.yml` from the user config dir. Never fails: a missing or
    /// broken file yields defaults.
    pub fn load() -> Self {
        match config_file() {
            Some(path) => Self::load_or_default(&path),
            None => Settings::default(),
        }
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(Some(settings)) => settings,
            Ok(None) => Settings::default(),
            Err(err) => {
                tracing::warn!("ignoring config: {err}");
                Settings::default()
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if data.trim().is_empty() {
            return Ok(Some(Settings::default()));
        }
        let settings = serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(settings))
    }

    pub fn queue_path(&self) -> PathBuf {
        if let Some(path) = &self.queue_file {
            return path.clone();
        }
        if let Some(path) = env::var_os(QUEUE_ENV).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("timers")
            .join("queue.json")
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "nudge")
}

pub fn config_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.yml"))
}

pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}
