mod orchestrator;
mod runtime;
mod sequence;
mod state;
mod watchdog;

#[cfg(test)]
mod tests;

pub use orchestrator::UpdateOrchestrator;
pub use runtime::{Keeper, ShutdownReason};
pub use state::{LifecycleCell, RestartReason, ServerLifecycleState};
pub use watchdog::{ProcessWatchdog, WatchdogGate};
