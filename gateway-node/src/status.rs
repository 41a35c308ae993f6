//! Task status and the context object each task shares with its controllers

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info};

use crate::lock;
use crate::notification::{Command, Commands, Signal};

/// Lifecycle state of a transport or app task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommonStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    FailedToStart,
    Unknown,
}

impl fmt::Display for CommonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommonStatus::Starting => "Starting",
            CommonStatus::Started => "Started",
            CommonStatus::Stopping => "Stopping",
            CommonStatus::Stopped => "Stopped",
            CommonStatus::FailedToStart => "Failed to start",
            CommonStatus::Unknown => "Unknown status",
        })
    }
}

/// Called with the task name and its new status
pub type StatusListener = Box<dyn Fn(&str, CommonStatus) + Send + Sync>;

/// Control surface of one task: its signal and its published status
///
/// Status is written only by the owning task; anyone may read it or notify.
pub struct TaskContext {
    name: &'static str,
    signal: Signal,
    status: Mutex<CommonStatus>,
    listeners: Mutex<Vec<StatusListener>>,
}

impl TaskContext {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            signal: Signal::new(),
            status: Mutex::new(CommonStatus::Stopped),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn status(&self) -> CommonStatus {
        *lock(&self.status)
    }

    /// Deliver a command to the task
    pub fn notify(&self, command: Command) {
        debug!("{}: notify {}", self.name, command);
        self.signal.post(command);
    }

    /// Commands delivered but not yet consumed by the task
    pub fn pending_commands(&self) -> Commands {
        Commands::from_bits(self.signal.pending())
    }

    /// Register a callback for status changes
    pub fn on_status_change(&self, listener: StatusListener) {
        lock(&self.listeners).push(listener);
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Commands {
        self.signal.wait_commands(timeout)
    }

    pub(crate) fn set_status(&self, status: CommonStatus) {
        {
            let mut current = lock(&self.status);
            if *current == status {
                return;
            }
            *current = status;
        }
        info!("{}: {}", self.name, status);
        for listener in lock(&self.listeners).iter() {
            listener(self.name, status);
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}
