use crate::process::supervisor::Event;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default interval between memory samples
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Reads the resident memory of a process.
///
/// Returning `None` means the process is gone and sampling should end.
pub trait MemorySampler: Send {
    fn sample(&mut self, pid: u32) -> Option<u64>;
}

/// Builds a fresh sampler for each monitored process
pub type SamplerFactory = Arc<dyn Fn() -> Box<dyn MemorySampler> + Send + Sync>;

/// `sysinfo`-backed sampler reading resident set size
pub struct SysinfoSampler {
    system: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    pub fn factory() -> SamplerFactory {
        Arc::new(|| Box::new(SysinfoSampler::new()) as Box<dyn MemorySampler>)
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample(&mut self, pid: u32) -> Option<u64> {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        self.system.process(sys_pid).map(|p| p.memory())
    }
}

/// What one monitor watches
#[derive(Debug, Clone, Copy)]
pub struct MonitorTarget {
    pub pid: u32,
    pub generation: u64,
    pub memory_limit: Option<u64>,
    pub interval: Duration,
}

/// Start sampling `target` on its own task
pub fn spawn(
    target: MonitorTarget,
    sampler: Box<dyn MemorySampler>,
    events: UnboundedSender<Event>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(target, sampler, events, cancel))
}

/// Sample until the process disappears, the supervisor goes away, or `cancel` fires.
///
/// Every sample is reported as `MemorySample`. Crossing the limit reports one
/// `MemoryExceeded`; further over-limit samples stay silent until a sample
/// drops back under the limit.
pub async fn run(
    target: MonitorTarget,
    mut sampler: Box<dyn MemorySampler>,
    events: UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(target.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut tripped = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(bytes) = sampler.sample(target.pid) else {
            debug!(pid = target.pid, "Process no longer sampleable, monitor exiting");
            break;
        };

        let sample = Event::MemorySample {
            generation: target.generation,
            bytes,
        };
        if events.send(sample).is_err() {
            break;
        }

        match target.memory_limit {
            Some(limit) if bytes >= limit => {
                if !tripped {
                    tripped = true;
                    warn!(
                        pid = target.pid,
                        "Memory {} bytes reached limit {} bytes", bytes, limit
                    );
                    let exceeded = Event::MemoryExceeded {
                        generation: target.generation,
                        bytes,
                    };
                    if events.send(exceeded).is_err() {
                        break;
                    }
                }
            }
            _ => tripped = false,
        }
    }
}
