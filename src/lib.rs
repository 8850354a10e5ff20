//! Durable reminder queue shared by a scheduler daemon and UI processes.
//!
//! ```text
//! UI (nudge)                         nudged
//!   Mutations ──batch_update──┐        Daemon::cycle
//!   TaskList  ──load──────────┤          sweep → sleep → notify → remove
//!   PopupPoller ──load(fresh)─┤               │
//!                             ▼               ▼
//!                     queue.json  (+ queue.json.lock, flock)
//! ```
//!
//! The two binaries never talk to each other; the file and its lock are the
//! only shared state.

pub mod clock;
pub mod config;
pub mod daemon;
pub mod input;
pub mod logging;
pub mod model;
pub mod mutations;
pub mod notify;
pub mod poller;
pub mod presenter;
pub mod storage;

pub use clock::{Clock, SystemClock};
pub use config::Settings;
pub use daemon::{Daemon, Step};
pub use model::Task;
pub use mutations::Mutations;
pub use poller::PopupPoller;
pub use presenter::TaskList;
pub use storage::{TaskStore, WriteMode};
