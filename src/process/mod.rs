// Process module - Worker launch, supervision and fleet management

mod manager;
pub mod monitor;
pub mod restart;
pub mod spawner;
pub mod supervisor;
mod types;

pub use manager::{exit_code_of, ProcessManager};
pub use monitor::{MemorySampler, SamplerFactory, SysinfoSampler};
pub use restart::{RestartDecision, RestartPolicy};
pub use spawner::{resolve, spawn_process, ResolvedCommand, SpawnedProcess};
pub use supervisor::{Event, Supervisor, SupervisorHandle, SupervisorOptions};
pub use types::{
    ExecMode, ExitInfo, LifecyclePhase, ProcessSpec, RuntimeState, StatusSnapshot, StopReason,
};
