use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// How many copies of a worker run from one spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    #[default]
    #[serde(alias = "fork_mode")]
    Fork,
    #[serde(alias = "cluster_mode")]
    Cluster,
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecMode::Fork => write!(f, "fork"),
            ExecMode::Cluster => write!(f, "cluster"),
        }
    }
}

/// Immutable description of what to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub script: PathBuf,
    pub interpreter: Option<String>,
    pub interpreter_args: Vec<String>,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub exec_mode: ExecMode,
    pub instances: usize,
    /// Grace period between the graceful and the forced termination signal
    pub kill_timeout: Duration,
}

/// Lifecycle phase of one supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecyclePhase {
    Idle,
    Starting,
    Running,
    Stopping,
    Crashed,
    RestartPending,
    Stopped,
}

impl LifecyclePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecyclePhase::Stopped)
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecyclePhase::Idle => write!(f, "idle"),
            LifecyclePhase::Starting => write!(f, "starting"),
            LifecyclePhase::Running => write!(f, "running"),
            LifecyclePhase::Stopping => write!(f, "stopping"),
            LifecyclePhase::Crashed => write!(f, "crashed"),
            LifecyclePhase::RestartPending => write!(f, "restart-pending"),
            LifecyclePhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why a supervisor reached `Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// Operator asked for it
    Requested,
    /// Restart budget used up
    Exhausted,
    /// Worker died and auto-restart is off
    AutorestartDisabled,
    /// The first launch could not resolve its executable or working directory
    LaunchFailed,
    /// The owner tore the supervisor down
    TornDown,
}

impl StopReason {
    /// Outcomes that must be surfaced to the operator as failures
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StopReason::Exhausted | StopReason::AutorestartDisabled | StopReason::LaunchFailed
        )
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Requested => write!(f, "requested"),
            StopReason::Exhausted => write!(f, "exhausted"),
            StopReason::AutorestartDisabled => write!(f, "autorestart-disabled"),
            StopReason::LaunchFailed => write!(f, "launch-failed"),
            StopReason::TornDown => write!(f, "torn-down"),
        }
    }
}

/// How a worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    /// Status for a launch that never produced a process
    pub fn launch_failure() -> Self {
        Self {
            code: Some(127),
            signal: None,
        }
    }

    /// Shell-style exit code: the code itself, or 128 + signal number
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown"),
        }
    }
}

/// Mutable per-worker state, written only by the supervisor's control loop
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub phase: LifecyclePhase,
    pub pid: Option<u32>,
    /// Launch counter used to discard events from earlier processes
    pub generation: u64,
    /// Crash-triggered restarts, bounded by the restart budget
    pub restarts: u32,
    /// Operator and file-watch restarts, outside the budget
    pub manual_restarts: u32,
    pub started_at: Option<SystemTime>,
    pub last_exit: Option<ExitInfo>,
    pub memory: Option<u64>,
    pub memory_violations: u32,
    pub stop_reason: Option<StopReason>,
    pub last_error: Option<String>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self {
            phase: LifecyclePhase::Idle,
            pid: None,
            generation: 0,
            restarts: 0,
            manual_restarts: 0,
            started_at: None,
            last_exit: None,
            memory: None,
            memory_violations: 0,
            stop_reason: None,
            last_error: None,
        }
    }

    pub fn snapshot(&self, name: &str, instance: usize) -> StatusSnapshot {
        StatusSnapshot {
            name: name.to_string(),
            instance,
            phase: self.phase,
            pid: self.pid,
            generation: self.generation,
            restarts: self.restarts,
            manual_restarts: self.manual_restarts,
            started_at: self.started_at,
            last_exit: self.last_exit,
            memory: self.memory,
            memory_violations: self.memory_violations,
            stop_reason: self.stop_reason,
            last_error: self.last_error.clone(),
        }
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a worker published by its supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub name: String,
    pub instance: usize,
    pub phase: LifecyclePhase,
    pub pid: Option<u32>,
    pub generation: u64,
    pub restarts: u32,
    pub manual_restarts: u32,
    pub started_at: Option<SystemTime>,
    pub last_exit: Option<ExitInfo>,
    pub memory: Option<u64>,
    pub memory_violations: u32,
    pub stop_reason: Option<StopReason>,
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    /// Time since the current process started; zero when nothing is live
    pub fn uptime(&self) -> Duration {
        match (self.pid, self.started_at) {
            (Some(_), Some(started)) => SystemTime::now()
                .duration_since(started)
                .unwrap_or(Duration::from_secs(0)),
            _ => Duration::from_secs(0),
        }
    }
}
