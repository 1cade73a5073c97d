//! Process state: whether the running configuration still matches the persisted model.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    Running,
    ReloadRequired,
    RestartRequired,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Running => "running",
            ProcessState::ReloadRequired => "reload-required",
            ProcessState::RestartRequired => "restart-required",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, cloneable handle on a controller's [`ProcessState`].
///
/// The state only ever degrades (`Running` → `ReloadRequired` → `RestartRequired`) until
/// [`ProcessStateHandle::reset`] is called after a reload.
#[derive(Debug, Clone, Default)]
pub struct ProcessStateHandle(Arc<RwLock<ProcessState>>);

impl ProcessStateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProcessState {
        *self.0.read()
    }

    pub fn is_degraded(&self) -> bool {
        self.state() != ProcessState::Running
    }

    pub fn require_reload(&self) {
        let mut state = self.0.write();
        if *state == ProcessState::Running {
            warn!("Process state changed to reload-required");
            *state = ProcessState::ReloadRequired;
        }
    }

    pub fn require_restart(&self) {
        let mut state = self.0.write();
        if *state != ProcessState::RestartRequired {
            warn!("Process state changed to restart-required");
            *state = ProcessState::RestartRequired;
        }
    }

    pub fn reset(&self) {
        *self.0.write() = ProcessState::Running;
    }
}
