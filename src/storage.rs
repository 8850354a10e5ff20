//! File-backed task queue with a short-lived in-process cache.
//!
//! Every read and write of the queue file happens under an exclusive advisory
//! lock on a sidecar `<queue>.lock` file. Locking the sidecar rather than the
//! queue itself keeps rename-based writers and in-place writers serialised on
//! the same inode.

use crate::model::Task;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("i/o on {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("parsing {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("encoding task queue: {0}")]
    Encode(serde_json::Error),
    #[error("locking {path:?}: {source}")]
    Lock { path: PathBuf, source: io::Error },
}

/// How a full queue is put on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Truncate and rewrite the queue file.
    #[default]
    InPlace,
    /// Write a temp file next to the queue and rename it over.
    AtomicRename,
}

struct Snapshot {
    tasks: Vec<Task>,
    taken: Instant,
}

pub struct TaskStore {
    path: PathBuf,
    lock_path: PathBuf,
    ttl: Duration,
    write_mode: WriteMode,
    cache: Mutex<Option<Snapshot>>,
}

impl TaskStore {
    /// Opens the queue at `path`, creating it as `[]` when it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Err(err) = ensure_queue_file(&path) {
            tracing::warn!("could not create task queue {:?}: {err}", path);
        }
        TaskStore {
            lock_path: sibling(&path, ".lock"),
            path,
            ttl: DEFAULT_CACHE_TTL,
            write_mode: WriteMode::InPlace,
            cache: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the queue, served from cache while it is younger than the TTL.
    ///
    /// Never fails: an unreadable or malformed queue yields the last good
    /// cached copy if there is one, otherwise an empty list.
    pub fn load(&self, force_refresh: bool) -> Vec<Task> {
        if !force_refresh {
            if let Some(snapshot) = self.cache().as_ref() {
                if snapshot.taken.elapsed() < self.ttl {
                    return snapshot.tasks.clone();
                }
            }
        }
        match self.try_load() {
            Ok(tasks) => tasks,
            Err(err) => {
                tracing::warn!("task queue unreadable, treating as empty: {err}");
                self.cache()
                    .as_ref()
                    .map(|snapshot| snapshot.tasks.clone())
                    .unwrap_or_default()
            }
        }
    }

    /// Locked read from disk that refreshes the cache.
    pub fn try_load(&self) -> Result<Vec<Task>, StoreError> {
        let tasks = {
            let _lock = QueueLock::acquire(&self.lock_path)?;
            self.read_file()?
        };
        self.remember(&tasks);
        Ok(tasks)
    }

    /// Overwrites the queue with `tasks`. Failures are logged and reported as `false`.
    pub fn save(&self, tasks: &[Task]) -> bool {
        match self.try_save(tasks) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("failed to save task queue: {err}");
                false
            }
        }
    }

    pub fn try_save(&self, tasks: &[Task]) -> Result<(), StoreError> {
        {
            let _lock = QueueLock::acquire(&self.lock_path)?;
            self.write_file(tasks)?;
        }
        self.remember(tasks);
        Ok(())
    }

    /// Read-transform-write as one critical section.
    ///
    /// The read always goes to disk while the lock is held, so two processes
    /// with their own caches cannot overwrite each other's changes.
    pub fn batch_update<F>(&self, transform: F) -> bool
    where
        F: FnOnce(Vec<Task>) -> Vec<Task>,
    {
        match self.try_batch_update(transform) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("task queue update failed: {err}");
                false
            }
        }
    }

    pub fn try_batch_update<F>(&self, transform: F) -> Result<(), StoreError>
    where
        F: FnOnce(Vec<Task>) -> Vec<Task>,
    {
        let updated = {
            let _lock = QueueLock::acquire(&self.lock_path)?;
            let current = match self.read_file() {
                Ok(tasks) => tasks,
                Err(err @ StoreError::Parse { .. }) => {
                    tracing::warn!("discarding malformed task queue: {err}");
                    Vec::new()
                }
                Err(err) => return Err(err),
            };
            let updated = transform(current.clone());
            if updated == current {
                tracing::debug!("task queue unchanged, skipping write");
            } else {
                self.write_file(&updated)?;
            }
            updated
        };
        self.remember(&updated);
        Ok(())
    }

    /// Forces the next `load` to hit the disk.
    pub fn invalidate_cache(&self) {
        *self.cache() = None;
    }

    /// Number of tasks still in the future. May be served from cache.
    pub fn pending_count(&self, now: i64) -> usize {
        self.load(false).iter().filter(|t| t.is_pending(now)).count()
    }

    fn read_file(&self) -> Result<Vec<Task>, StoreError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&data).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn write_file(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(tasks).map_err(StoreError::Encode)?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| StoreError::Io { path, source }
        };
        match self.write_mode {
            WriteMode::InPlace => fs::write(&self.path, &data).map_err(io_err(&self.path))?,
            WriteMode::AtomicRename => {
                let tmp = sibling(&self.path, ".tmp");
                fs::write(&tmp, &data).map_err(io_err(&tmp))?;
                fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
            }
        }
        tracing::debug!("saved {} tasks to {:?}", tasks.len(), self.path);
        Ok(())
    }

    fn remember(&self, tasks: &[Task]) {
        *self.cache() = Some(Snapshot {
            tasks: tasks.to_vec(),
            taken: Instant::now(),
        });
    }

    fn cache(&self) -> MutexGuard<'_, Option<Snapshot>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn ensure_queue_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => fs::write(path, "[]"),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err),
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Exclusive `flock` held until dropped.
struct QueueLock {
    file: File,
}

impl QueueLock {
    fn acquire(path: &Path) -> Result<Self, StoreError> {
        let lock_err = |source| StoreError::Lock {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(lock_err)?;
        lock_exclusive(&file).map_err(lock_err)?;
        Ok(QueueLock { file })
    }
}

impl Drop for QueueLock {
    fn drop(&mut self) {
        if let Err(err) = unlock(&self.file) {
            tracing::debug!("releasing queue lock: {err}");
        }
    }
}

#[cfg(unix)]
fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_EX)
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_UN)
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn queue_in(dir: &TempDir) -> PathBuf {
        dir.path().join("timers").join("queue.json")
    }

    fn sorted(mut tasks: Vec<Task>) -> Vec<Task> {
        tasks.sort_by(|a, b| (a.fire_at, &a.message).cmp(&(b.fire_at, &b.message)));
        tasks
    }

    #[test]
    fn open_creates_empty_queue() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::open(queue_in(&dir));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "[]");
        assert!(store.load(true).is_empty());
    }

    #[test]
    fn saved_tasks_read_back_after_forced_refresh() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::open(queue_in(&dir));
        let tasks = vec![
            Task::new("water plants", 300),
            Task::new("stand up", 100),
            Task::new("stand up", 100),
        ];
        assert!(store.save(&tasks));
        store.invalidate_cache();
        assert_eq!(sorted(store.load(true)), sorted(tasks));
    }

    #[test]
    fn malformed_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = queue_in(&dir);
        let store = TaskStore::open(&path);
        fs::write(&path, "{ not json").unwrap();
        assert!(store.load(true).is_empty());
        assert!(matches!(store.try_load(), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn malformed_file_prefers_last_good_cache() {
        let dir = TempDir::new().unwrap();
        let path = queue_in(&dir);
        let store = TaskStore::open(&path);
        let tasks = vec![Task::new("keep me", 10)];
        assert!(store.save(&tasks));
        fs::write(&path, "][").unwrap();
        assert_eq!(store.load(true), tasks);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = queue_in(&dir);
        let store = TaskStore::open(&path);
        fs::remove_file(&path).unwrap();
        assert!(store.load(true).is_empty());
    }

    #[test]
    fn cached_read_is_stale_until_refreshed() {
        let dir = TempDir::new().unwrap();
        let path = queue_in(&dir);
        let reader = TaskStore::open(&path);
        let writer = TaskStore::open(&path);
        assert!(reader.load(false).is_empty());

        assert!(writer.save(&[Task::new("from elsewhere", 50)]));
        assert!(reader.load(false).is_empty());
        assert_eq!(reader.pending_count(0), 0);

        reader.invalidate_cache();
        assert_eq!(reader.load(false).len(), 1);
        assert_eq!(reader.pending_count(0), 1);
        assert_eq!(reader.pending_count(50), 0);
    }

    #[test]
    fn zero_ttl_always_reads_disk() {
        let dir = TempDir::new().unwrap();
        let path = queue_in(&dir);
        let reader = TaskStore::open(&path).with_ttl(Duration::ZERO);
        let writer = TaskStore::open(&path);
        assert!(reader.load(false).is_empty());
        assert!(writer.save(&[Task::new("fresh", 1)]));
        assert_eq!(reader.load(false).len(), 1);
    }

    #[test]
    fn stale_caches_do_not_lose_updates() {
        let dir = TempDir::new().unwrap();
        let path = Arc::new(queue_in(&dir));
        let start = Arc::new(Barrier::new(2));
        let a = Task::new("A", 10);
        let b = Task::new("B", 20);

        let handles: Vec<_> = [a.clone(), b.clone()]
            .into_iter()
            .map(|task| {
                let path = Arc::clone(&path);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    let store = TaskStore::open(path.as_path());
                    // both caches hold the empty queue before either writes
                    assert!(store.load(false).is_empty());
                    start.wait();
                    assert!(store.batch_update(|mut tasks| {
                        tasks.push(task);
                        tasks
                    }));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let fin = TaskStore::open(path.as_path()).load(true);
        assert_eq!(fin.len(), 2);
        assert!(fin.contains(&a));
        assert!(fin.contains(&b));
    }

    #[test]
    fn concurrent_writers_from_threads_keep_every_append() {
        let dir = TempDir::new().unwrap();
        let path = Arc::new(queue_in(&dir));
        TaskStore::open(path.as_path());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let path = Arc::clone(&path);
                thread::spawn(move || {
                    let store = TaskStore::open(path.as_path());
                    store.load(false);
                    for i in 0..25 {
                        let task = Task::new(format!("w{worker}-{i}"), i);
                        assert!(store.batch_update(|mut tasks| {
                            tasks.push(task);
                            tasks
                        }));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = TaskStore::open(path.as_path());
        assert_eq!(store.load(true).len(), 100);
    }

    #[test]
    fn batch_update_over_malformed_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = queue_in(&dir);
        let store = TaskStore::open(&path);
        fs::write(&path, "garbage").unwrap();
        let task = Task::new("after corruption", 5);
        assert!(store.batch_update(|mut tasks| {
            tasks.push(task.clone());
            tasks
        }));
        assert_eq!(store.load(true), vec![task]);
    }

    #[test]
    fn atomic_rename_mode_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = queue_in(&dir);
        let store = TaskStore::open(&path).with_write_mode(WriteMode::AtomicRename);
        assert!(store.save(&[Task::new("renamed in", 3)]));
        assert!(!sibling(&path, ".tmp").exists());
        assert_eq!(TaskStore::open(&path).load(true).len(), 1);
    }

    #[test]
    fn unchanged_transform_does_not_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = queue_in(&dir);
        let store = TaskStore::open(&path);
        fs::write(&path, r#"[{"message":"as typed","fire_at":9}]"#).unwrap();
        assert!(store.batch_update(|tasks| tasks));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            r#"[{"message":"as typed","fire_at":9}]"#
        );
    }
}
