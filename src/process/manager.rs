use crate::config::{AppConfig, AppDefinition};
use crate::error::{Result, VigilError};
use crate::logs::{read_last_lines, SinkSet, StreamSelector};
use crate::process::supervisor::{Supervisor, SupervisorHandle, SupervisorOptions};
use crate::process::types::{LifecyclePhase, StatusSnapshot, StopReason};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One registered application and its supervisors, one per instance ordinal
struct AppGroup {
    definition: Arc<AppDefinition>,
    /// Indexed by ordinal; merged instances hold clones of the same sinks
    sinks: Vec<SinkSet>,
    instances: Vec<SupervisorHandle>,
}

impl AppGroup {
    fn snapshots(&self) -> Vec<StatusSnapshot> {
        self.instances.iter().map(|h| h.status()).collect()
    }
}

/// Owns every supervisor in the fleet.
///
/// Applications are registered from validated configuration, which opens their
/// log sinks and builds idle supervisors. Lifecycle calls address an application
/// by name and fan out to all of its instances.
pub struct ProcessManager {
    apps: BTreeMap<String, AppGroup>,
    options: SupervisorOptions,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::with_options(SupervisorOptions::default())
    }

    pub fn with_options(options: SupervisorOptions) -> Self {
        Self {
            apps: BTreeMap::new(),
            options,
        }
    }

    /// Register every application in an ecosystem file; returns their names
    pub async fn load_file(&mut self, path: &Path) -> Result<Vec<String>> {
        let configs = AppConfig::from_file(path)?;
        let mut names = Vec::with_capacity(configs.len());
        for config in configs {
            names.push(config.name.clone());
            self.register(config).await?;
        }
        Ok(names)
    }

    /// Validate `config` and build its supervisors in `Idle`.
    ///
    /// Configuration errors surface here and nothing is registered.
    pub async fn register(&mut self, config: AppConfig) -> Result<()> {
        if self.apps.contains_key(&config.name) {
            return Err(VigilError::AppAlreadyExists(config.name.clone()));
        }

        let definition = Arc::new(config.definition()?);
        let count = definition.spec.instances;

        let sinks = if count == 1 {
            vec![SinkSet::open(&definition.logs, None).await]
        } else if definition.logs.merge {
            let shared = SinkSet::open(&definition.logs, None).await;
            vec![shared; count]
        } else {
            let mut sinks = Vec::with_capacity(count);
            for ordinal in 0..count {
                sinks.push(SinkSet::open(&definition.logs, Some(ordinal)).await);
            }
            sinks
        };

        let instances = sinks
            .iter()
            .enumerate()
            .map(|(ordinal, sinks)| {
                Supervisor::spawn(
                    Arc::clone(&definition),
                    ordinal,
                    sinks.clone(),
                    self.options.clone(),
                )
            })
            .collect();

        tracing::info!(
            app = %config.name,
            instances = count,
            mode = %definition.spec.exec_mode,
            "Application registered"
        );

        self.apps.insert(
            config.name.clone(),
            AppGroup {
                definition,
                sinks,
                instances,
            },
        );

        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.apps.keys().cloned().collect()
    }

    fn group(&self, name: &str) -> Result<&AppGroup> {
        self.apps
            .get(name)
            .ok_or_else(|| VigilError::AppNotFound(name.to_string()))
    }

    fn group_mut(&mut self, name: &str) -> Result<&mut AppGroup> {
        self.apps
            .get_mut(name)
            .ok_or_else(|| VigilError::AppNotFound(name.to_string()))
    }

    /// Swap a finished supervisor for a fresh idle one on the same sinks
    fn renew(&mut self, name: &str, ordinal: usize) -> Result<()> {
        let options = self.options.clone();
        let group = self.group_mut(name)?;
        let fresh = Supervisor::spawn(
            Arc::clone(&group.definition),
            ordinal,
            group.sinks[ordinal].clone(),
            options,
        );
        let _finished = std::mem::replace(&mut group.instances[ordinal], fresh);
        tracing::debug!(app = %name, instance = ordinal, "Supervisor renewed");
        Ok(())
    }

    /// Start every instance of `name`. Terminal instances get a fresh supervisor
    /// and a fresh restart budget; running ones are left alone.
    pub fn start(&mut self, name: &str) -> Result<()> {
        let finished: Vec<usize> = self
            .group(name)?
            .instances
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_finished() || h.status().phase.is_terminal())
            .map(|(ordinal, _)| ordinal)
            .collect();

        for ordinal in finished {
            self.renew(name, ordinal)?;
        }

        let group = self.group(name)?;
        for handle in &group.instances {
            handle.start();
        }

        tracing::info!(app = %name, "Start requested");
        Ok(())
    }

    /// Stop every instance of `name` and wait for each to reach `Stopped`
    pub async fn stop(&self, name: &str) -> Result<Vec<StatusSnapshot>> {
        let group = self.group(name)?;
        for handle in &group.instances {
            handle.stop();
        }

        let mut snapshots = Vec::with_capacity(group.instances.len());
        for handle in &group.instances {
            snapshots.push(handle.wait_stopped().await);
        }

        tracing::info!(app = %name, "Stopped");
        Ok(snapshots)
    }

    /// Operator restart. Running instances cycle without touching their crash
    /// budget; idle ones start; terminal ones are renewed and started.
    pub fn restart(&mut self, name: &str) -> Result<()> {
        let phases: Vec<(usize, LifecyclePhase, bool)> = self
            .group(name)?
            .instances
            .iter()
            .enumerate()
            .map(|(ordinal, h)| (ordinal, h.status().phase, h.is_finished()))
            .collect();

        for (ordinal, phase, finished) in phases {
            if finished || phase.is_terminal() {
                self.renew(name, ordinal)?;
                self.group(name)?.instances[ordinal].start();
            } else if phase == LifecyclePhase::Idle {
                self.group(name)?.instances[ordinal].start();
            } else {
                self.group(name)?.instances[ordinal].restart();
            }
        }

        tracing::info!(app = %name, "Restart requested");
        Ok(())
    }

    pub fn status(&self, name: &str) -> Result<Vec<StatusSnapshot>> {
        Ok(self.group(name)?.snapshots())
    }

    pub fn status_all(&self) -> Vec<StatusSnapshot> {
        self.apps.values().flat_map(|g| g.snapshots()).collect()
    }

    /// Last `lines` lines of the selected stream from each of the app's sink files
    pub async fn tail_logs(
        &self,
        name: &str,
        stream: StreamSelector,
        lines: usize,
    ) -> Result<Vec<String>> {
        let group = self.group(name)?;
        let combined = group.definition.logs.combine;
        let filter = if combined { stream.tag() } else { None };

        let mut paths: Vec<PathBuf> = Vec::new();
        for sinks in &group.sinks {
            let selected: Vec<&Path> = if combined {
                vec![sinks.stdout_path()]
            } else {
                match stream {
                    StreamSelector::Out => vec![sinks.stdout_path()],
                    StreamSelector::Err => vec![sinks.stderr_path()],
                    StreamSelector::All => vec![sinks.stdout_path(), sinks.stderr_path()],
                }
            };
            for path in selected {
                if !paths.iter().any(|p| p == path) {
                    paths.push(path.to_path_buf());
                }
            }
        }

        let mut output = Vec::new();
        for path in &paths {
            output.extend(read_last_lines(path, lines, filter).await?);
        }
        Ok(output)
    }

    /// Tear down every supervisor and their workers; returns the final snapshots
    pub async fn shutdown(&mut self) -> Vec<StatusSnapshot> {
        let apps = std::mem::take(&mut self.apps);
        tracing::info!("Shutting down {} applications", apps.len());

        let mut pending = Vec::new();
        for (_, group) in apps {
            for handle in group.instances {
                pending.push(tokio::spawn(handle.shutdown()));
            }
        }

        let mut snapshots = Vec::with_capacity(pending.len());
        for task in pending {
            match task.await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => tracing::error!("Supervisor shutdown failed: {}", e),
            }
        }
        snapshots
    }

    /// Exit code for the current fleet state; see [`exit_code_of`]
    pub fn exit_code(&self) -> i32 {
        exit_code_of(&self.status_all())
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 0 unless some supervisor ended with its restart budget exhausted, in which
/// case the last such worker's exit status (never 0).
pub fn exit_code_of(snapshots: &[StatusSnapshot]) -> i32 {
    snapshots
        .iter()
        .filter(|s| s.stop_reason == Some(StopReason::Exhausted))
        .last()
        .map(|s| match s.last_exit.map(|e| e.exit_code()) {
            Some(0) | None => 1,
            Some(code) => code,
        })
        .unwrap_or(0)
}
