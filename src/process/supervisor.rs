use crate::config::AppDefinition;
use crate::error::{Result, VigilError};
use crate::logs::{LogMultiplexer, SinkSet};
use crate::process::monitor::{self, MonitorTarget, SamplerFactory, SysinfoSampler};
use crate::process::restart::RestartDecision;
use crate::process::spawner::{spawn_process, SpawnedProcess};
use crate::process::types::{ExitInfo, LifecyclePhase, RuntimeState, StatusSnapshot, StopReason};
use crate::watcher;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything the control loop reacts to, from the operator and from its own child tasks
#[derive(Debug, Clone)]
pub enum Event {
    /// Leave `Idle` and launch the worker
    Start,
    /// Operator stop; always wins over pending restarts
    Stop,
    /// Operator restart; does not touch the crash budget
    Restart,
    /// The worker of `generation` exited
    Exited { generation: u64, exit: ExitInfo },
    /// Periodic resident memory reading
    MemorySample { generation: u64, bytes: u64 },
    /// First sample of a violation episode at or above the memory ceiling
    MemoryExceeded { generation: u64, bytes: u64 },
    /// Debounced file change under the working directory
    FilesChanged,
}

/// Tunables that are not part of an application's configuration
#[derive(Clone)]
pub struct SupervisorOptions {
    pub sample_interval: Duration,
    pub sampler: SamplerFactory,
    /// How long to keep draining output pipes after the worker exits
    pub drain_timeout: Duration,
    /// How long to wait for exit after SIGKILL before giving up on the process
    pub force_kill_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            sample_interval: monitor::DEFAULT_SAMPLE_INTERVAL,
            sampler: SysinfoSampler::factory(),
            drain_timeout: Duration::from_millis(500),
            force_kill_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Termination {
    Graceful,
    Forced,
}

/// A launched worker together with the tasks bound to it
struct LiveProcess {
    pid: u32,
    generation: u64,
    tasks: CancellationToken,
    monitor: JoinHandle<()>,
    pumps: Vec<JoinHandle<()>>,
    waiter: JoinHandle<()>,
    signals: UnboundedSender<Termination>,
}

enum RunEnd {
    Exited(ExitInfo),
    MemoryKilled(Option<ExitInfo>),
    Restart,
    Stopped,
    TornDown,
}

/// Owns one worker's `RuntimeState` and drives its lifecycle.
///
/// The control loop is the only writer of the state. Monitor, exit waiter and
/// file watcher run as separate tasks and talk to it through `Event`s; readers
/// get snapshots through a `watch` channel.
pub struct Supervisor {
    app: Arc<AppDefinition>,
    instance: usize,
    logs: LogMultiplexer,
    options: SupervisorOptions,
    state: RuntimeState,
    events_tx: UnboundedSender<Event>,
    events: UnboundedReceiver<Event>,
    status: watch::Sender<StatusSnapshot>,
    cancel: CancellationToken,
    stop_requested: bool,
    torn_down: bool,
}

impl Supervisor {
    /// Construct a supervisor in `Idle` and run its control loop on a new task
    pub fn spawn(
        app: Arc<AppDefinition>,
        instance: usize,
        sinks: SinkSet,
        options: SupervisorOptions,
    ) -> SupervisorHandle {
        let (events_tx, events) = mpsc::unbounded_channel();
        let state = RuntimeState::new();
        let (status, status_rx) = watch::channel(state.snapshot(&app.spec.name, instance));
        let cancel = CancellationToken::new();
        let name = app.spec.name.clone();

        let supervisor = Supervisor {
            app,
            instance,
            logs: LogMultiplexer::new(sinks),
            options,
            state,
            events_tx: events_tx.clone(),
            events,
            status,
            cancel: cancel.clone(),
            stop_requested: false,
            torn_down: false,
        };

        let task = tokio::spawn(supervisor.run());

        SupervisorHandle {
            name,
            instance,
            events: events_tx,
            status: status_rx,
            cancel,
            task,
        }
    }

    async fn run(mut self) -> StatusSnapshot {
        debug!(app = %self.app.spec.name, instance = self.instance, "Supervisor idle");

        let reason = match self.await_start().await {
            Some(reason) => reason,
            None => {
                let watcher = self.start_watcher();
                let reason = self.lifecycle().await;
                if let Some((token, handle)) = watcher {
                    token.cancel();
                    let _ = handle.await;
                }
                reason
            }
        };

        self.finish(reason)
    }

    async fn await_start(&mut self) -> Option<StopReason> {
        let cancel = self.cancel.clone();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Some(StopReason::TornDown),
                event = self.events.recv() => event,
            };

            match event {
                Some(Event::Start) => return None,
                Some(Event::Stop) => return Some(StopReason::Requested),
                Some(other) => debug!(?other, "Ignoring event while idle"),
                None => return Some(StopReason::TornDown),
            }
        }
    }

    fn start_watcher(&mut self) -> Option<(CancellationToken, JoinHandle<()>)> {
        if !self.app.watch.enabled {
            return None;
        }

        let token = self.cancel.child_token();
        let sink_paths = self.logs.sinks().paths();
        match watcher::spawn(
            &self.app.spec.cwd,
            &self.app.watch,
            &sink_paths,
            self.events_tx.clone(),
            token.clone(),
        ) {
            Ok(handle) => Some((token, handle)),
            Err(e) => {
                warn!(
                    app = %self.app.spec.name,
                    instance = self.instance,
                    "File watching disabled: {}",
                    e
                );
                None
            }
        }
    }

    async fn lifecycle(&mut self) -> StopReason {
        let mut counts_against_budget = false;

        loop {
            self.enter_starting(counts_against_budget);
            let first_launch = self.state.generation == 1;

            let end = match self.launch() {
                Ok(live) => {
                    self.transition(LifecyclePhase::Running);
                    let end = self.supervise(&live).await;
                    self.release(live).await;
                    end
                }
                Err(e) => {
                    error!(
                        app = %self.app.spec.name,
                        instance = self.instance,
                        "Launch failed: {}",
                        e
                    );
                    self.state.last_error = Some(e.to_string());
                    if first_launch && e.is_resolution_failure() {
                        return StopReason::LaunchFailed;
                    }
                    RunEnd::Exited(ExitInfo::launch_failure())
                }
            };

            let exit = match end {
                RunEnd::Stopped => return StopReason::Requested,
                RunEnd::TornDown => return StopReason::TornDown,
                RunEnd::Restart => {
                    self.state.manual_restarts += 1;
                    counts_against_budget = false;
                    continue;
                }
                RunEnd::Exited(exit) => Some(exit),
                RunEnd::MemoryKilled(exit) => exit,
            };

            if exit.is_some() {
                self.state.last_exit = exit;
            }
            self.transition(LifecyclePhase::Crashed);

            match self.app.policy.decide(self.state.restarts) {
                RestartDecision::RestartAfter(delay) => {
                    info!(
                        app = %self.app.spec.name,
                        instance = self.instance,
                        "Restarting in {:?} (restart {} of {})",
                        delay,
                        self.state.restarts + 1,
                        self.app.policy.max_restarts
                    );
                    self.transition(LifecyclePhase::RestartPending);
                    if let Some(reason) = self.wait_restart_delay(delay).await {
                        return reason;
                    }
                    counts_against_budget = true;
                }
                RestartDecision::Exhausted => return StopReason::Exhausted,
                RestartDecision::Disabled => return StopReason::AutorestartDisabled,
            }
        }
    }

    fn enter_starting(&mut self, counts_against_budget: bool) {
        if counts_against_budget {
            self.state.restarts += 1;
        }
        self.state.generation += 1;
        self.state.started_at = Some(SystemTime::now());
        self.state.memory = None;
        self.transition(LifecyclePhase::Starting);
    }

    fn launch(&mut self) -> Result<LiveProcess> {
        let SpawnedProcess { mut child, pid } = spawn_process(&self.app.spec, self.instance)?;
        let generation = self.state.generation;
        let tasks = self.cancel.child_token();

        let pumps = self.logs.attach(&mut child);

        let events = self.events_tx.clone();
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let waiter = tokio::spawn(async move {
            let exit = reap(child, pid, signal_rx).await;
            let _ = events.send(Event::Exited { generation, exit });
        });

        let monitor = monitor::spawn(
            MonitorTarget {
                pid,
                generation,
                memory_limit: self.app.policy.memory_limit,
                interval: self.options.sample_interval,
            },
            (self.options.sampler)(),
            self.events_tx.clone(),
            tasks.clone(),
        );

        self.state.pid = Some(pid);
        info!(
            app = %self.app.spec.name,
            instance = self.instance,
            pid,
            "Worker started"
        );

        Ok(LiveProcess {
            pid,
            generation,
            tasks,
            monitor,
            pumps,
            waiter,
            signals,
        })
    }

    async fn supervise(&mut self, live: &LiveProcess) -> RunEnd {
        let cancel = self.cancel.clone();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    self.torn_down = true;
                    self.transition(LifecyclePhase::Stopping);
                    self.terminate(live).await;
                    return RunEnd::TornDown;
                }
                event = self.events.recv() => event,
            };

            let Some(event) = event else {
                return RunEnd::TornDown;
            };

            match event {
                Event::Exited { generation, exit } if generation == live.generation => {
                    warn!(
                        app = %self.app.spec.name,
                        instance = self.instance,
                        pid = live.pid,
                        "Worker exited unexpectedly ({})",
                        exit
                    );
                    return RunEnd::Exited(exit);
                }
                Event::MemorySample { generation, bytes } if generation == live.generation => {
                    self.state.memory = Some(bytes);
                    self.publish();
                }
                Event::MemoryExceeded { generation, bytes } if generation == live.generation => {
                    self.state.memory = Some(bytes);
                    self.state.memory_violations += 1;
                    warn!(
                        app = %self.app.spec.name,
                        instance = self.instance,
                        pid = live.pid,
                        "Memory limit exceeded ({} bytes), terminating worker",
                        bytes
                    );
                    self.publish();
                    let exit = self.terminate(live).await;
                    return self.after_termination(RunEnd::MemoryKilled(exit));
                }
                Event::Stop => {
                    info!(app = %self.app.spec.name, instance = self.instance, "Stopping worker");
                    self.stop_requested = true;
                    self.transition(LifecyclePhase::Stopping);
                    self.terminate(live).await;
                    return self.after_termination(RunEnd::Stopped);
                }
                Event::Restart | Event::FilesChanged => {
                    info!(
                        app = %self.app.spec.name,
                        instance = self.instance,
                        trigger = ?event,
                        "Restarting worker"
                    );
                    self.transition(LifecyclePhase::Stopping);
                    self.terminate(live).await;
                    return self.after_termination(RunEnd::Restart);
                }
                Event::Start => debug!("Worker already running"),
                // Leftovers from an earlier generation
                _ => {}
            }
        }
    }

    fn after_termination(&self, end: RunEnd) -> RunEnd {
        if self.torn_down {
            RunEnd::TornDown
        } else if self.stop_requested {
            RunEnd::Stopped
        } else {
            end
        }
    }

    /// Graceful signal, grace period, then forced kill.
    async fn terminate(&mut self, live: &LiveProcess) -> Option<ExitInfo> {
        let _ = live.signals.send(Termination::Graceful);
        let grace = self.app.spec.kill_timeout;
        if let Some(exit) = self.wait_exit(live.generation, grace).await {
            return Some(exit);
        }

        warn!(
            app = %self.app.spec.name,
            instance = self.instance,
            pid = live.pid,
            "Worker did not exit within {:?}, sending SIGKILL",
            grace
        );
        let _ = live.signals.send(Termination::Forced);
        let exit = self
            .wait_exit(live.generation, self.options.force_kill_timeout)
            .await;
        if exit.is_none() {
            error!(pid = live.pid, "Worker still running after SIGKILL");
        }
        exit
    }

    async fn wait_exit(&mut self, generation: u64, timeout: Duration) -> Option<ExitInfo> {
        let deadline = Instant::now() + timeout;
        let cancel = self.cancel.clone();

        loop {
            let event = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return None,
                _ = cancel.cancelled(), if !self.torn_down => {
                    self.torn_down = true;
                    continue;
                }
                event = self.events.recv() => event,
            };

            match event {
                Some(Event::Exited { generation: g, exit }) if g == generation => {
                    return Some(exit)
                }
                Some(Event::Stop) => self.stop_requested = true,
                Some(Event::MemorySample { generation: g, bytes }) if g == generation => {
                    self.state.memory = Some(bytes);
                }
                // Restart requests and repeated violations collapse into the termination in progress
                Some(_) => {}
                None => return None,
            }
        }
    }

    async fn wait_restart_delay(&mut self, delay: Duration) -> Option<StopReason> {
        let deadline = Instant::now() + delay;
        let cancel = self.cancel.clone();

        loop {
            let event = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return None,
                _ = cancel.cancelled() => return Some(StopReason::TornDown),
                event = self.events.recv() => event,
            };

            match event {
                Some(Event::Stop) => {
                    info!(
                        app = %self.app.spec.name,
                        instance = self.instance,
                        "Stop requested, cancelling pending restart"
                    );
                    return Some(StopReason::Requested);
                }
                Some(Event::Restart) | Some(Event::FilesChanged) => {
                    debug!("Restart already pending")
                }
                Some(_) => {}
                None => return Some(StopReason::TornDown),
            }
        }
    }

    /// Stop the monitor, drain the pipes and reap the exit waiter.
    async fn release(&mut self, live: LiveProcess) {
        live.tasks.cancel();
        let _ = live.monitor.await;

        for mut pump in live.pumps {
            if tokio::time::timeout(self.options.drain_timeout, &mut pump)
                .await
                .is_err()
            {
                debug!("Output pipe still open after exit, abandoning it");
                pump.abort();
            }
        }

        live.waiter.abort();
        let _ = live.waiter.await;

        self.state.pid = None;
        self.publish();
    }

    fn finish(mut self, reason: StopReason) -> StatusSnapshot {
        self.state.stop_reason = Some(reason);
        self.state.pid = None;
        self.transition(LifecyclePhase::Stopped);

        if reason.is_failure() {
            warn!(
                app = %self.app.spec.name,
                instance = self.instance,
                restarts = self.state.restarts,
                "Supervisor stopped: {}",
                reason
            );
        } else {
            info!(
                app = %self.app.spec.name,
                instance = self.instance,
                "Supervisor stopped: {}",
                reason
            );
        }

        self.state.snapshot(&self.app.spec.name, self.instance)
    }

    fn transition(&mut self, phase: LifecyclePhase) {
        debug!(
            app = %self.app.spec.name,
            instance = self.instance,
            from = %self.state.phase,
            to = %phase,
            "Phase change"
        );
        self.state.phase = phase;
        self.publish();
    }

    fn publish(&self) {
        self.status
            .send_replace(self.state.snapshot(&self.app.spec.name, self.instance));
    }
}

/// Wait for the worker while delivering termination requests to it.
///
/// Signals go out only while the child is still unreaped, so a pid recycled by
/// the OS after the exit is never hit.
async fn reap(mut child: Child, pid: u32, mut signals: UnboundedReceiver<Termination>) -> ExitInfo {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(termination) = signals.recv() => match child.try_wait() {
                Ok(None) => {
                    if let Err(e) = send_signal(pid, termination) {
                        warn!(pid, "{}", e);
                    }
                }
                Ok(Some(status)) => {
                    debug!(pid, ?termination, "Worker already exited, not signalling");
                    break Ok(status);
                }
                Err(e) => break Err(e),
            },
        }
    };

    match status {
        Ok(status) => ExitInfo::from_status(status),
        Err(e) => {
            warn!(pid, "Failed to wait for worker: {}", e);
            ExitInfo {
                code: None,
                signal: None,
            }
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, termination: Termination) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let signal = match termination {
        Termination::Graceful => Signal::SIGTERM,
        Termination::Forced => Signal::SIGKILL,
    };

    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => {
            debug!(pid, %signal, "Signal sent");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            debug!(pid, "Worker already gone");
            Ok(())
        }
        Err(e) => Err(VigilError::SignalError(format!(
            "Failed to send {} to pid {}: {}",
            signal, pid, e
        ))),
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, termination: Termination) -> Result<()> {
    Err(VigilError::SignalError(format!(
        "Cannot deliver {:?} to pid {}: signals are not supported on this platform",
        termination, pid
    )))
}

/// Owner-side handle to a running supervisor
pub struct SupervisorHandle {
    name: String,
    instance: usize,
    events: UnboundedSender<Event>,
    status: watch::Receiver<StatusSnapshot>,
    cancel: CancellationToken,
    task: JoinHandle<StatusSnapshot>,
}

impl SupervisorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> usize {
        self.instance
    }

    /// Deliver an event to the control loop; false once the loop has ended
    pub fn send(&self, event: Event) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn start(&self) -> bool {
        self.send(Event::Start)
    }

    pub fn stop(&self) -> bool {
        self.send(Event::Stop)
    }

    pub fn restart(&self) -> bool {
        self.send(Event::Restart)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until a published snapshot satisfies `predicate`
    pub async fn wait_for<F>(&self, predicate: F) -> StatusSnapshot
    where
        F: FnMut(&StatusSnapshot) -> bool,
    {
        let mut rx = self.status.clone();
        let result = rx.wait_for(predicate).await.map(|s| s.clone());
        match result {
            Ok(snapshot) => snapshot,
            Err(_) => rx.borrow().clone(),
        }
    }

    pub async fn wait_stopped(&self) -> StatusSnapshot {
        self.wait_for(|s| s.phase.is_terminal()).await
    }

    /// Cancel the control loop and every task it owns, and wait for it to finish
    pub async fn shutdown(self) -> StatusSnapshot {
        self.cancel.cancel();
        match self.task.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(app = %self.name, instance = self.instance, "Supervisor task failed: {}", e);
                self.status.borrow().clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::process::MemorySampler;
    use std::path::Path;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(10);

    fn shell_app(dir: &Path, command: &str) -> AppConfig {
        let mut config = AppConfig::new("sup-test", "/bin/sh");
        config.args = vec!["-c".to_string(), command.to_string()];
        config.cwd = Some(dir.to_path_buf());
        config.out_file = Some(dir.join("out.log"));
        config.error_file = Some(dir.join("err.log"));
        config.restart_delay = 20;
        config.kill_timeout = 500;
        config
    }

    async fn spawn_app(config: AppConfig, options: SupervisorOptions) -> SupervisorHandle {
        let definition = Arc::new(config.definition().unwrap());
        let sinks = SinkSet::open(&definition.logs, None).await;
        Supervisor::spawn(definition, 0, sinks, options)
    }

    async fn stopped(handle: &SupervisorHandle) -> StatusSnapshot {
        tokio::time::timeout(WAIT, handle.wait_stopped())
            .await
            .expect("supervisor should reach Stopped")
    }

    struct ConstantSampler(u64);

    impl MemorySampler for ConstantSampler {
        fn sample(&mut self, _pid: u32) -> Option<u64> {
            Some(self.0)
        }
    }

    #[tokio::test]
    async fn test_idle_until_started() {
        let temp_dir = TempDir::new().unwrap();
        let handle = spawn_app(
            shell_app(temp_dir.path(), "sleep 30"),
            SupervisorOptions::default(),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.status().phase, LifecyclePhase::Idle);
        assert!(handle.status().pid.is_none());

        let status = handle.shutdown().await;
        assert_eq!(status.stop_reason, Some(StopReason::TornDown));
    }

    #[tokio::test]
    async fn test_start_then_stop_does_not_count_restart() {
        let temp_dir = TempDir::new().unwrap();
        let handle = spawn_app(
            shell_app(temp_dir.path(), "sleep 30"),
            SupervisorOptions::default(),
        )
        .await;

        handle.start();
        let running = tokio::time::timeout(
            WAIT,
            handle.wait_for(|s| s.phase == LifecyclePhase::Running),
        )
        .await
        .unwrap();
        assert!(running.pid.is_some());

        handle.stop();
        let status = stopped(&handle).await;
        assert_eq!(status.stop_reason, Some(StopReason::Requested));
        assert_eq!(status.restarts, 0);
        assert!(status.pid.is_none());
    }

    #[tokio::test]
    async fn test_autorestart_disabled_stops_after_one_crash() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = shell_app(temp_dir.path(), "exit 3");
        config.autorestart = false;
        let handle = spawn_app(config, SupervisorOptions::default()).await;

        handle.start();
        let status = stopped(&handle).await;
        assert_eq!(status.stop_reason, Some(StopReason::AutorestartDisabled));
        assert_eq!(status.restarts, 0);
        assert_eq!(status.generation, 1);
        assert_eq!(status.last_exit.map(|e| e.exit_code()), Some(3));
    }

    #[tokio::test]
    async fn test_exactly_max_restarts_then_exhausted() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = shell_app(temp_dir.path(), "exit 1");
        config.max_restarts = 3;
        config.restart_delay = 50;
        let handle = spawn_app(config, SupervisorOptions::default()).await;

        let started = std::time::Instant::now();
        handle.start();
        let status = stopped(&handle).await;

        assert_eq!(status.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(status.restarts, 3);
        // one initial launch plus three restarts
        assert_eq!(status.generation, 4);
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_zero_max_restarts_never_restarts() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = shell_app(temp_dir.path(), "exit 1");
        config.max_restarts = 0;
        let handle = spawn_app(config, SupervisorOptions::default()).await;

        handle.start();
        let status = stopped(&handle).await;
        assert_eq!(status.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(status.generation, 1);
    }

    #[tokio::test]
    async fn test_stop_during_restart_pending_cancels_restart() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = shell_app(temp_dir.path(), "exit 1");
        config.restart_delay = 60_000;
        let handle = spawn_app(config, SupervisorOptions::default()).await;

        handle.start();
        tokio::time::timeout(
            WAIT,
            handle.wait_for(|s| s.phase == LifecyclePhase::RestartPending),
        )
        .await
        .unwrap();

        handle.stop();
        let status = stopped(&handle).await;
        assert_eq!(status.stop_reason, Some(StopReason::Requested));
        assert_eq!(status.generation, 1);
        assert_eq!(status.restarts, 0);
    }

    #[tokio::test]
    async fn test_unresolvable_executable_fails_launch() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = shell_app(temp_dir.path(), "true");
        config.script = "/nonexistent/worker".into();
        let handle = spawn_app(config, SupervisorOptions::default()).await;

        handle.start();
        let status = stopped(&handle).await;
        assert_eq!(status.stop_reason, Some(StopReason::LaunchFailed));
        assert!(status.last_error.unwrap().contains("nonexistent"));
    }

    #[tokio::test]
    async fn test_memory_ceiling_kills_once_and_counts_as_crash() {
        let temp_dir = TempDir::new().unwrap();
        // Ignores SIGTERM so termination has to wait out the grace period
        let mut config = shell_app(temp_dir.path(), "trap '' TERM; exec sleep 30");
        config.max_memory_restart = Some(crate::config::ByteSize(1024));
        config.max_restarts = 0;
        config.kill_timeout = 300;

        let options = SupervisorOptions {
            sample_interval: Duration::from_millis(20),
            sampler: Arc::new(|| Box::new(ConstantSampler(1 << 30)) as Box<dyn MemorySampler>),
            ..SupervisorOptions::default()
        };
        let handle = spawn_app(config, options).await;

        handle.start();
        let status = stopped(&handle).await;
        assert_eq!(status.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(status.memory_violations, 1);
        assert_eq!(status.last_exit.and_then(|e| e.signal), Some(9));
    }

    #[tokio::test]
    async fn test_memory_restart_uses_crash_budget() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = shell_app(temp_dir.path(), "sleep 30");
        config.max_memory_restart = Some(crate::config::ByteSize(1024));
        config.max_restarts = 2;

        let options = SupervisorOptions {
            sample_interval: Duration::from_millis(20),
            sampler: Arc::new(|| Box::new(ConstantSampler(1 << 30)) as Box<dyn MemorySampler>),
            ..SupervisorOptions::default()
        };
        let handle = spawn_app(config, options).await;

        handle.start();
        let status = stopped(&handle).await;
        assert_eq!(status.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(status.restarts, 2);
        assert_eq!(status.memory_violations, 3);
    }

    #[tokio::test]
    async fn test_injected_memory_event_for_stale_generation_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = shell_app(temp_dir.path(), "sleep 30");
        config.max_memory_restart = Some(crate::config::ByteSize(1024));
        let handle = spawn_app(config, SupervisorOptions::default()).await;

        handle.start();
        let running = tokio::time::timeout(
            WAIT,
            handle.wait_for(|s| s.phase == LifecyclePhase::Running),
        )
        .await
        .unwrap();

        handle.send(Event::MemoryExceeded {
            generation: running.generation + 10,
            bytes: 1 << 30,
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.status().phase, LifecyclePhase::Running);
        assert_eq!(handle.status().memory_violations, 0);

        let status = handle.shutdown().await;
        assert_eq!(status.stop_reason, Some(StopReason::TornDown));
    }

    #[tokio::test]
    async fn test_operator_restart_keeps_crash_budget() {
        let temp_dir = TempDir::new().unwrap();
        let handle = spawn_app(
            shell_app(temp_dir.path(), "sleep 30"),
            SupervisorOptions::default(),
        )
        .await;

        handle.start();
        let first = tokio::time::timeout(
            WAIT,
            handle.wait_for(|s| s.phase == LifecyclePhase::Running),
        )
        .await
        .unwrap();

        handle.restart();
        let second = tokio::time::timeout(
            WAIT,
            handle.wait_for(|s| s.phase == LifecyclePhase::Running && s.generation == 2),
        )
        .await
        .unwrap();

        assert_ne!(first.pid, second.pid);
        assert_eq!(second.restarts, 0);
        assert_eq!(second.manual_restarts, 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_output_survives_crash_restart_cycle() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = shell_app(temp_dir.path(), "echo \"run $$\"; exit 1");
        config.max_restarts = 1;
        let handle = spawn_app(config, SupervisorOptions::default()).await;

        handle.start();
        stopped(&handle).await;

        let content = std::fs::read_to_string(temp_dir.path().join("out.log")).unwrap();
        assert_eq!(content.lines().filter(|l| l.contains("] run ")).count(), 2);
    }

    #[tokio::test]
    async fn test_teardown_terminates_worker() {
        let temp_dir = TempDir::new().unwrap();
        let handle = spawn_app(
            shell_app(temp_dir.path(), "sleep 30"),
            SupervisorOptions::default(),
        )
        .await;

        handle.start();
        let running = tokio::time::timeout(
            WAIT,
            handle.wait_for(|s| s.phase == LifecyclePhase::Running),
        )
        .await
        .unwrap();
        let pid = running.pid.unwrap();

        let status = tokio::time::timeout(WAIT, handle.shutdown()).await.unwrap();
        assert_eq!(status.stop_reason, Some(StopReason::TornDown));

        let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok();
        assert!(!alive, "worker should be gone after teardown");
    }

    fn shell_child(command: &str) -> (Child, u32) {
        let child = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        (child, pid)
    }

    #[tokio::test]
    async fn test_signal_for_exited_worker_is_not_delivered() {
        let (child, pid) = shell_child("exit 7");
        // let it become a zombie before the termination request is seen
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (signals, signal_rx) = mpsc::unbounded_channel();
        signals.send(Termination::Graceful).unwrap();
        signals.send(Termination::Forced).unwrap();

        let exit = tokio::time::timeout(WAIT, reap(child, pid, signal_rx))
            .await
            .unwrap();
        assert_eq!(exit.code, Some(7));
        assert_eq!(exit.signal, None);
    }

    #[tokio::test]
    async fn test_reap_delivers_termination_to_live_worker() {
        let (child, pid) = shell_child("exec sleep 30");
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let reaper = tokio::spawn(reap(child, pid, signal_rx));

        signals.send(Termination::Graceful).unwrap();
        let exit = tokio::time::timeout(WAIT, reaper).await.unwrap().unwrap();
        assert_eq!(exit.signal, Some(15));
        assert_eq!(exit.exit_code(), 143);
    }
}
