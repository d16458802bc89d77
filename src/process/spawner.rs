use crate::error::{Result, VigilError};
use crate::process::ProcessSpec;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Environment variable carrying the application name into the worker
pub const APP_NAME_ENV: &str = "VIGIL_APP_NAME";

/// Environment variable carrying the instance ordinal into the worker
pub const INSTANCE_ENV: &str = "VIGIL_INSTANCE";

/// Interpreter value meaning "execute the script directly"
const NO_INTERPRETER: &str = "none";

/// The fully resolved command line for one launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Resolve the executable, interpreter indirection and working directory.
///
/// Fails with `ExecutableNotFound` or `InvalidWorkingDirectory` without touching
/// the OS process table.
pub fn resolve(spec: &ProcessSpec) -> Result<ResolvedCommand> {
    if !spec.cwd.is_dir() {
        return Err(VigilError::InvalidWorkingDirectory(
            spec.cwd.display().to_string(),
        ));
    }

    let interpreter = spec
        .interpreter
        .as_deref()
        .filter(|i| !i.is_empty() && *i != NO_INTERPRETER);

    match interpreter {
        Some(interpreter) => {
            let program = find_executable(Path::new(interpreter), &spec.cwd)
                .ok_or_else(|| VigilError::ExecutableNotFound(interpreter.to_string()))?;

            let script = spec.cwd.join(&spec.script);
            if !script.is_file() {
                return Err(VigilError::ExecutableNotFound(
                    script.display().to_string(),
                ));
            }

            let mut args = spec.interpreter_args.clone();
            args.push(script.to_string_lossy().into_owned());
            args.extend(spec.args.iter().cloned());

            Ok(ResolvedCommand {
                program,
                args,
                cwd: spec.cwd.clone(),
            })
        }
        None => {
            let program = find_executable(&spec.script, &spec.cwd).ok_or_else(|| {
                VigilError::ExecutableNotFound(spec.script.display().to_string())
            })?;

            Ok(ResolvedCommand {
                program,
                args: spec.args.clone(),
                cwd: spec.cwd.clone(),
            })
        }
    }
}

/// Find `target` either as a path (absolute or relative to `cwd`) or on `PATH`.
fn find_executable(target: &Path, cwd: &Path) -> Option<PathBuf> {
    let has_separator = target.components().count() > 1 || target.is_absolute();

    let local = cwd.join(target);
    if has_separator || local.is_file() {
        return local.is_file().then_some(local);
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(target))
        .find(|candidate| candidate.is_file())
}

/// Spawn one worker instance from its spec.
///
/// The configured environment overlays the inherited one; stdout and stderr are
/// piped for the log multiplexer.
pub fn spawn_process(spec: &ProcessSpec, instance: usize) -> Result<SpawnedProcess> {
    let resolved = resolve(spec)?;

    let mut command = Command::new(&resolved.program);
    command
        .args(&resolved.args)
        .current_dir(&resolved.cwd)
        .envs(&spec.env)
        .env(APP_NAME_ENV, &spec.name)
        .env(INSTANCE_ENV, instance.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        VigilError::LaunchError(format!(
            "Failed to spawn '{}' ({}): {}",
            spec.name,
            resolved.program.display(),
            e
        ))
    })?;

    let pid = child.id().ok_or_else(|| {
        VigilError::LaunchError(format!("Failed to get PID for '{}'", spec.name))
    })?;

    Ok(SpawnedProcess { child, pid })
}
