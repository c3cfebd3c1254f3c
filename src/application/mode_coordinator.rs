//! C14: serializes mode transitions behind a single mutex. At most one of
//! {Sentinel, Institutional} runs at a time; transitions never perform
//! network I/O while holding the lock.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Sentinel,
    Institutional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    InstitutionalActive,
}

struct CoordinatorState {
    mode: Mode,
    sentinel_handle: Option<JoinHandle<()>>,
    institutional_handle: Option<JoinHandle<()>>,
    monitor_handle: Option<JoinHandle<()>>,
}

/// Holds the running loop tasks so a transition can abort the previous
/// one; callers supply the spawn closures so the coordinator stays
/// independent of the concrete loop types.
pub struct ModeCoordinator {
    state: Mutex<CoordinatorState>,
}

impl Default for ModeCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                mode: Mode::Idle,
                sentinel_handle: None,
                institutional_handle: None,
                monitor_handle: None,
            }),
        }
    }

    pub async fn current_mode(&self) -> Mode {
        self.state.lock().await.mode
    }

    /// `Idle -> Sentinel` only from `Idle`. Starts the position monitor if
    /// it isn't already running.
    pub async fn start_sentinel<F, M>(&self, spawn_sentinel: F, spawn_monitor: M) -> Result<(), TransitionError>
    where
        F: FnOnce() -> JoinHandle<()>,
        M: FnOnce() -> JoinHandle<()>,
    {
        let mut state = self.state.lock().await;
        if state.mode == Mode::Institutional {
            return Err(TransitionError::InstitutionalActive);
        }
        if state.mode == Mode::Sentinel {
            return Ok(());
        }
        state.mode = Mode::Sentinel;
        state.sentinel_handle = Some(spawn_sentinel());
        if state.monitor_handle.is_none() {
            state.monitor_handle = Some(spawn_monitor());
        }
        Ok(())
    }

    /// `Idle|Sentinel -> Institutional`. If Sentinel is active it is
    /// stopped first (its task handle aborted) before Institutional starts.
    pub async fn start_institutional<F, M>(&self, spawn_institutional: F, spawn_monitor: M)
    where
        F: FnOnce() -> JoinHandle<()>,
        M: FnOnce() -> JoinHandle<()>,
    {
        let mut state = self.state.lock().await;
        if state.mode == Mode::Institutional {
            return;
        }
        if let Some(handle) = state.sentinel_handle.take() {
            handle.abort();
        }
        state.mode = Mode::Institutional;
        state.institutional_handle = Some(spawn_institutional());
        if state.monitor_handle.is_none() {
            state.monitor_handle = Some(spawn_monitor());
        }
    }

    /// Unconditional, idempotent: aborts whichever loop is running and
    /// returns to `Idle`. The position monitor is left running — positions
    /// may still be open and must keep being managed.
    pub async fn stop_to_idle(&self) {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.sentinel_handle.take() {
            handle.abort();
        }
        if let Some(handle) = state.institutional_handle.take() {
            handle.abort();
        }
        state.mode = Mode::Idle;
    }
}
