use parking_lot::Mutex;

/// Position of the managed server in the update/restart cycle. Exactly one
/// instance exists, inside a [`LifecycleCell`]; only the orchestrator writes
/// it, the watchdog reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLifecycleState {
    Idle,
    CheckingForUpdate,
    AnnouncingPendingAction,
    Stopping,
    Updating,
    Starting,
    Monitoring,
}

/// Why a restart sequence is running. Carried through the sequence so the
/// announcements pick the right wording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    ScheduledUpdate(String),
    PeriodicMaintenance,
}

/// Mutex-guarded lifecycle state. This is the single mutual-exclusion
/// domain of the control loop: a trigger may only begin a sequence through
/// [`LifecycleCell::begin`], which atomically claims the Idle state.
pub struct LifecycleCell {
    state: Mutex<ServerLifecycleState>,
}

impl LifecycleCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerLifecycleState::Idle),
        }
    }

    pub fn current(&self) -> ServerLifecycleState {
        *self.state.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.current() == ServerLifecycleState::Idle
    }

    /// Claim the state machine for a new sequence: transitions Idle → `next`
    /// and returns true, or leaves the state untouched and returns false if
    /// a sequence is already active. Losing triggers are dropped, never
    /// queued.
    pub fn begin(&self, next: ServerLifecycleState) -> bool {
        let mut state = self.state.lock();
        if *state != ServerLifecycleState::Idle {
            return false;
        }
        *state = next;
        true
    }

    pub fn set(&self, next: ServerLifecycleState) {
        *self.state.lock() = next;
    }
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}
