use super::*;
use crate::announce::Announcer;
use crate::channels::NotificationChannel;
use crate::config::{KeeperConfig, MessagesConfig};
use crate::error::{KeeperError, Result};
use crate::process::{ProcessController, StartOutcome, StopOutcome};
use crate::version::{UpdateCheck, VersionSource};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type EventLog = Arc<parking_lot::Mutex<Vec<String>>>;

struct MockProcess {
    running: AtomicBool,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    events: EventLog,
    // When set, the next liveness query raises this gate, simulating a
    // sequence starting while a watchdog poll is already in flight.
    suspend_on_liveness: parking_lot::Mutex<Option<Arc<WatchdogGate>>>,
}

impl MockProcess {
    fn new(events: EventLog, running: bool) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(running),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            events,
            suspend_on_liveness: parking_lot::Mutex::new(None),
        })
    }

    fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessController for MockProcess {
    async fn start(&self) -> Result<StartOutcome> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push("start".to_string());
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(KeeperError::StartFailed);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            Ok(StartOutcome::AlreadyRunning)
        } else {
            Ok(StartOutcome::Started)
        }
    }

    async fn stop(&self, grace: Duration) -> Result<StopOutcome> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push("stop".to_string());
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(KeeperError::StopTimeout {
                grace_secs: grace.as_secs(),
            });
        }
        if self.running.swap(false, Ordering::SeqCst) {
            Ok(StopOutcome::Stopped)
        } else {
            Ok(StopOutcome::NotRunning)
        }
    }

    async fn is_running(&self) -> bool {
        self.events.lock().push("liveness".to_string());
        if let Some(gate) = self.suspend_on_liveness.lock().take() {
            gate.suspend();
        }
        self.running.load(Ordering::SeqCst)
    }
}

struct MockVersion {
    detect_calls: AtomicUsize,
    apply_calls: AtomicUsize,
    fail_apply: AtomicBool,
    responses: parking_lot::Mutex<VecDeque<Result<UpdateCheck>>>,
    events: EventLog,
}

impl MockVersion {
    fn new(events: EventLog, responses: Vec<Result<UpdateCheck>>) -> Arc<Self> {
        Arc::new(Self {
            detect_calls: AtomicUsize::new(0),
            apply_calls: AtomicUsize::new(0),
            fail_apply: AtomicBool::new(false),
            responses: parking_lot::Mutex::new(responses.into()),
            events,
        })
    }

    fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersionSource for MockVersion {
    async fn detect_update(&self) -> Result<UpdateCheck> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push("detect".to_string());
        // Once the scripted responses run out, every further poll is quiet.
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(UpdateCheck::none()))
    }

    async fn apply_update(&self) -> Result<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push("apply".to_string());
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(KeeperError::version("app_update exited with status 8"));
        }
        Ok(())
    }
}

struct CapturingChannel {
    events: EventLog,
    sent: Arc<parking_lot::Mutex<Vec<String>>>,
}

#[async_trait]
impl NotificationChannel for CapturingChannel {
    fn name(&self) -> &str {
        "capture"
    }

    async fn send(&self, text: &str) -> Result<()> {
        self.events.lock().push(format!("announce: {}", text));
        self.sent.lock().push(text.to_string());
        Ok(())
    }
}

struct Harness {
    orchestrator: Arc<UpdateOrchestrator>,
    process: Arc<MockProcess>,
    version: Arc<MockVersion>,
    lifecycle: Arc<LifecycleCell>,
    gate: Arc<WatchdogGate>,
    cancel: CancellationToken,
    events: EventLog,
    sent: Arc<parking_lot::Mutex<Vec<String>>>,
}

fn test_messages() -> MessagesConfig {
    MessagesConfig {
        update_pending: "Update @version lands in @announcebefore.".to_string(),
        maintenance_pending: "Up @hours hours; restarting in @announcebefore.".to_string(),
        restart_complete: "Back online.".to_string(),
    }
}

fn base_config() -> KeeperConfig {
    let mut config = KeeperConfig::default();
    config.server.process_name = "ShooterGameServer".to_string();
    config.server.launch_scripts = vec!["./start.sh".to_string()];
    config.server.install_dir = "/srv/game".to_string();
    config.update.steamcmd_dir = "/opt/steamcmd".to_string();
    config.update.app_id = "1006030".to_string();
    config.messages = test_messages();
    config
}

fn harness(
    config: &KeeperConfig,
    running: bool,
    responses: Vec<Result<UpdateCheck>>,
) -> Harness {
    let events: EventLog = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let process = MockProcess::new(Arc::clone(&events), running);
    let version = MockVersion::new(Arc::clone(&events), responses);
    let lifecycle = Arc::new(LifecycleCell::new());
    let gate = Arc::new(WatchdogGate::new());
    let cancel = CancellationToken::new();

    let announcer = Arc::new(Announcer::new(
        vec![Box::new(CapturingChannel {
            events: Arc::clone(&events),
            sent: Arc::clone(&sent),
        })],
        config.messages.clone(),
        config.update.announce_minutes_before,
        config.general.restart_every_hours,
    ));

    let orchestrator = Arc::new(UpdateOrchestrator::new(
        config,
        process.clone() as Arc<dyn ProcessController>,
        version.clone() as Arc<dyn VersionSource>,
        announcer,
        Arc::clone(&lifecycle),
        Arc::clone(&gate),
        cancel.clone(),
    ));

    Harness {
        orchestrator,
        process,
        version,
        lifecycle,
        gate,
        cancel,
        events,
        sent,
    }
}

/// Step paused time forward until the condition holds. Panics if it never
/// does; each step is a minute so multi-hour scenarios stay quick.
async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
    panic!("condition was not reached in simulated time");
}

#[tokio::test(start_paused = true)]
async fn update_sequence_runs_steps_in_order() {
    let h = harness(
        &base_config(),
        true,
        vec![Ok(UpdateCheck::available("12345".to_string()))],
    );

    let before = tokio::time::Instant::now();
    h.orchestrator.on_update_tick().await;

    // The warning window really was slept through
    assert!(before.elapsed() >= Duration::from_secs(5 * 60));

    let events = h.events.lock().clone();
    assert_eq!(
        events,
        vec![
            "detect",
            "announce: Update 12345 lands in 5 Minutes.",
            "liveness",
            "stop",
            "apply",
            "start",
            "liveness",
            "announce: Back online.",
        ]
    );

    assert_eq!(h.lifecycle.current(), ServerLifecycleState::Idle);
    assert!(!h.gate.is_suspended());
}

#[tokio::test(start_paused = true)]
async fn no_update_returns_straight_to_idle() {
    let h = harness(&base_config(), true, vec![Ok(UpdateCheck::none())]);

    h.orchestrator.on_update_tick().await;

    assert_eq!(h.events.lock().clone(), vec!["detect"]);
    assert_eq!(h.lifecycle.current(), ServerLifecycleState::Idle);
    assert!(h.sent.lock().is_empty());
    assert!(!h.gate.is_suspended());
}

#[tokio::test(start_paused = true)]
async fn detect_failure_is_treated_as_no_update() {
    let h = harness(
        &base_config(),
        true,
        vec![Err(KeeperError::version("steamcmd unreachable"))],
    );

    h.orchestrator.on_update_tick().await;

    assert_eq!(h.lifecycle.current(), ServerLifecycleState::Idle);
    assert_eq!(h.process.stop_calls(), 0);
    assert!(h.sent.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn maintenance_sequence_skips_the_update_step() {
    let mut config = base_config();
    config.general.restart_every_hours = 6;
    let h = harness(&config, true, vec![]);

    h.orchestrator.on_periodic_tick().await;

    let events = h.events.lock().clone();
    assert_eq!(
        events,
        vec![
            "announce: Up 6 hours; restarting in 5 Minutes.",
            "liveness",
            "stop",
            "start",
            "liveness",
            "announce: Back online.",
        ]
    );
    assert_eq!(h.version.detect_calls(), 0);
    assert_eq!(h.version.apply_calls(), 0);
    assert_eq!(h.lifecycle.current(), ServerLifecycleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn stop_failure_aborts_the_sequence() {
    let h = harness(
        &base_config(),
        true,
        vec![Ok(UpdateCheck::available("12345".to_string()))],
    );
    h.process.fail_stop.store(true, Ordering::SeqCst);

    h.orchestrator.on_update_tick().await;

    assert_eq!(h.process.stop_calls(), 1);
    assert_eq!(h.version.apply_calls(), 0);
    assert_eq!(h.process.start_calls(), 0);
    // Back to Idle with the watchdog re-armed so something can recover
    assert_eq!(h.lifecycle.current(), ServerLifecycleState::Idle);
    assert!(!h.gate.is_suspended());
}

#[tokio::test(start_paused = true)]
async fn update_install_failure_aborts_without_a_start() {
    let h = harness(
        &base_config(),
        true,
        vec![Ok(UpdateCheck::available("12345".to_string()))],
    );
    h.version.fail_apply.store(true, Ordering::SeqCst);

    h.orchestrator.on_update_tick().await;

    assert_eq!(h.version.apply_calls(), 1);
    assert_eq!(h.process.start_calls(), 0);
    assert_eq!(h.lifecycle.current(), ServerLifecycleState::Idle);
    assert!(!h.gate.is_suspended());
}

#[tokio::test(start_paused = true)]
async fn start_failure_aborts_without_a_completion_announcement() {
    let h = harness(
        &base_config(),
        true,
        vec![Ok(UpdateCheck::available("12345".to_string()))],
    );
    h.process.fail_start.store(true, Ordering::SeqCst);

    h.orchestrator.on_update_tick().await;

    assert_eq!(h.process.start_calls(), 1);
    assert!(!h.sent.lock().iter().any(|m| m == "Back online."));
    assert_eq!(h.lifecycle.current(), ServerLifecycleState::Idle);
    assert!(!h.gate.is_suspended());
}

#[tokio::test(start_paused = true)]
async fn server_gone_after_warning_window_skips_the_stop() {
    let h = harness(
        &base_config(),
        false,
        vec![Ok(UpdateCheck::available("12345".to_string()))],
    );

    h.orchestrator.on_update_tick().await;

    // Liveness was re-checked after the sleep and found nothing to stop
    assert_eq!(h.process.stop_calls(), 0);
    assert_eq!(h.version.apply_calls(), 1);
    assert_eq!(h.process.start_calls(), 1);
    assert_eq!(h.lifecycle.current(), ServerLifecycleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn trigger_during_an_active_sequence_is_dropped() {
    let mut config = base_config();
    config.general.restart_every_hours = 6;
    let h = harness(&config, true, vec![]);

    let orchestrator = Arc::clone(&h.orchestrator);
    let sequence = tokio::spawn(async move {
        orchestrator.on_periodic_tick().await;
    });

    // Let the sequence reach its warning-window sleep
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        h.lifecycle.current(),
        ServerLifecycleState::AnnouncingPendingAction
    );
    assert!(h.gate.is_suspended());

    // An update poll landing mid-sequence is dropped, not queued
    h.orchestrator.on_update_tick().await;
    assert_eq!(h.version.detect_calls(), 0);

    sequence.await.unwrap();
    assert_eq!(h.lifecycle.current(), ServerLifecycleState::Idle);
    // Only the maintenance sequence ever stopped the server
    assert_eq!(h.process.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn watchdog_restarts_a_crashed_process_when_idle() {
    let h = harness(&base_config(), false, vec![]);

    let watchdog = ProcessWatchdog::new(
        h.process.clone() as Arc<dyn ProcessController>,
        Arc::clone(&h.lifecycle),
        Arc::clone(&h.gate),
        Duration::from_secs(30),
        h.cancel.clone(),
    );

    watchdog.poll().await;
    assert_eq!(h.process.start_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn watchdog_leaves_an_absent_process_alone_during_a_sequence() {
    let h = harness(&base_config(), false, vec![]);
    h.lifecycle.set(ServerLifecycleState::Updating);

    let watchdog = ProcessWatchdog::new(
        h.process.clone() as Arc<dyn ProcessController>,
        Arc::clone(&h.lifecycle),
        Arc::clone(&h.gate),
        Duration::from_secs(30),
        h.cancel.clone(),
    );

    watchdog.poll().await;
    assert_eq!(h.process.start_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn watchdog_skips_the_poll_entirely_while_suspended() {
    let h = harness(&base_config(), false, vec![]);
    h.gate.suspend();

    let watchdog = ProcessWatchdog::new(
        h.process.clone() as Arc<dyn ProcessController>,
        Arc::clone(&h.lifecycle),
        Arc::clone(&h.gate),
        Duration::from_secs(30),
        h.cancel.clone(),
    );

    watchdog.poll().await;
    assert_eq!(h.process.start_calls(), 0);
    // Suspension was seen before the process table was ever queried
    assert!(h.events.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn watchdog_rechecks_the_gate_after_its_liveness_query() {
    let h = harness(&base_config(), false, vec![]);
    // The gate goes up while the watchdog's liveness query is in flight
    *h.process.suspend_on_liveness.lock() = Some(Arc::clone(&h.gate));

    let watchdog = ProcessWatchdog::new(
        h.process.clone() as Arc<dyn ProcessController>,
        Arc::clone(&h.lifecycle),
        Arc::clone(&h.gate),
        Duration::from_secs(30),
        h.cancel.clone(),
    );

    watchdog.poll().await;
    assert_eq!(h.process.start_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn simultaneous_triggers_run_the_update_check_first() {
    let mut config = base_config();
    config.update.poll_interval_minutes = 60;
    config.general.restart_every_hours = 1;
    let h = harness(&config, true, vec![]);

    let orchestrator = Arc::clone(&h.orchestrator);
    let loop_handle = tokio::spawn(async move {
        orchestrator.run().await;
    });

    // Both timers expire at the one-hour mark; the update check wins the
    // biased select, then the periodic trigger is re-evaluated and runs.
    let process = Arc::clone(&h.process);
    let lifecycle = Arc::clone(&h.lifecycle);
    wait_until(move || process.stop_calls() >= 1 && lifecycle.is_idle()).await;

    let events = h.events.lock().clone();
    let detect_pos = events.iter().position(|e| e == "detect").unwrap();
    let stop_pos = events.iter().position(|e| e == "stop").unwrap();
    assert!(detect_pos < stop_pos, "update check must run before the maintenance stop");
    assert_eq!(h.process.stop_calls(), 1);

    h.cancel.cancel();
    loop_handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn one_maintenance_restart_despite_dozens_of_update_polls() {
    let mut config = base_config();
    config.update.poll_interval_minutes = 5;
    config.general.restart_every_hours = 6;
    let h = harness(&config, true, vec![]);

    let orchestrator = Arc::clone(&h.orchestrator);
    let loop_handle = tokio::spawn(async move {
        orchestrator.run().await;
    });

    let process = Arc::clone(&h.process);
    wait_until(move || process.stop_calls() >= 1).await;

    h.cancel.cancel();
    loop_handle.await.unwrap();

    // Roughly 72 quiet polls happened before the six-hour restart
    assert!(h.version.detect_calls() >= 70, "saw {} polls", h.version.detect_calls());
    assert_eq!(h.process.stop_calls(), 1);
    assert_eq!(h.version.apply_calls(), 0);
    assert_eq!(h.process.start_calls(), 1);
    assert_eq!(h.lifecycle.current(), ServerLifecycleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn zero_interval_never_arms_the_periodic_restart() {
    let mut config = base_config();
    config.update.poll_interval_minutes = 60;
    config.general.restart_every_hours = 0;
    let h = harness(&config, true, vec![]);

    assert!(h.orchestrator.restart_interval.is_none());

    let orchestrator = Arc::clone(&h.orchestrator);
    let loop_handle = tokio::spawn(async move {
        orchestrator.run().await;
    });

    let version = Arc::clone(&h.version);
    wait_until(move || version.detect_calls() >= 3).await;

    h.cancel.cancel();
    loop_handle.await.unwrap();

    assert_eq!(h.process.stop_calls(), 0);
    assert!(h.sent.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_loop_without_a_trigger_firing() {
    let mut config = base_config();
    config.update.poll_interval_minutes = 60;
    let h = harness(&config, true, vec![]);

    let orchestrator = Arc::clone(&h.orchestrator);
    let loop_handle = tokio::spawn(async move {
        orchestrator.run().await;
    });

    // Cancel well before the first poll would fire
    tokio::time::sleep(Duration::from_secs(60)).await;
    h.cancel.cancel();
    loop_handle.await.unwrap();

    assert_eq!(h.version.detect_calls(), 0);
}
