mod size;

pub use size::ByteSize;

use crate::error::{Result, VigilError};
use crate::logs::{LogSinkConfig, TimestampFormat};
use crate::process::{ExecMode, ProcessSpec, RestartPolicy};
use crate::watcher::{self, WatchConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory used for log files when an application names none
pub const DEFAULT_LOG_DIR: &str = "/tmp/vigil_logs";

/// Upper bound on instances per application
pub const MAX_INSTANCES: usize = 100;

/// One application record from an ecosystem file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Unique application name
    pub name: String,

    /// Script or executable to run
    pub script: PathBuf,

    /// Interpreter the script is handed to; `"none"` runs the script directly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    #[serde(default)]
    pub interpreter_args: Vec<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory; defaults to the directory holding the config file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    /// Crash restarts allowed over the supervisor's lifetime
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Delay before a crash restart (milliseconds)
    #[serde(default)]
    pub restart_delay: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_restart: Option<ByteSize>,

    /// Grace period between SIGTERM and SIGKILL (milliseconds)
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_date_format: Option<String>,

    #[serde(default)]
    pub combine_logs: bool,

    #[serde(default)]
    pub merge_logs: bool,

    #[serde(default)]
    pub watch: bool,

    #[serde(default)]
    pub ignore_watch: Vec<String>,

    /// Debounce window for file changes (milliseconds)
    #[serde(default = "default_watch_delay")]
    pub watch_delay: u64,

    #[serde(default = "default_instances")]
    pub instances: usize,

    #[serde(default)]
    pub exec_mode: ExecMode,
}

// Default value functions for serde
fn default_autorestart() -> bool {
    true
}

fn default_max_restarts() -> u32 {
    10
}

fn default_kill_timeout() -> u64 {
    1600
}

fn default_watch_delay() -> u64 {
    1000
}

fn default_instances() -> usize {
    1
}

/// Everything a supervisor needs, derived from a validated `AppConfig`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDefinition {
    pub spec: ProcessSpec,
    pub policy: RestartPolicy,
    pub logs: LogSinkConfig,
    pub watch: WatchConfig,
}

impl AppConfig {
    /// A record with every optional field at its default
    pub fn new(name: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            interpreter: None,
            interpreter_args: Vec::new(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            autorestart: default_autorestart(),
            max_restarts: default_max_restarts(),
            restart_delay: 0,
            max_memory_restart: None,
            kill_timeout: default_kill_timeout(),
            out_file: None,
            error_file: None,
            log_file: None,
            log_date_format: None,
            combine_logs: false,
            merge_logs: false,
            watch: false,
            ignore_watch: Vec::new(),
            watch_delay: default_watch_delay(),
            instances: default_instances(),
            exec_mode: ExecMode::Fork,
        }
    }

    /// Load every application from an ecosystem file (TOML or JSON).
    ///
    /// Records are env-expanded, anchored to the file's directory and validated.
    pub fn from_file(path: &Path) -> Result<Vec<AppConfig>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| VigilError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let configs = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(VigilError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        if configs.is_empty() {
            return Err(VigilError::InvalidConfig(
                "No application configuration found in file".to_string(),
            ));
        }

        let base = path
            .parent()
            .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
            .unwrap_or_else(|| Path::new("."));
        let base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());

        let mut seen = std::collections::HashSet::new();
        let mut resolved = Vec::with_capacity(configs.len());
        for mut config in configs {
            config.expand_env_vars();
            config.resolve_relative(&base);
            config.validate()?;
            if !seen.insert(config.name.clone()) {
                return Err(VigilError::ConfigValidationError(format!(
                    "Duplicate application name: {}",
                    config.name
                )));
            }
            resolved.push(config);
        }

        Ok(resolved)
    }

    fn parse_toml(contents: &str) -> Result<Vec<AppConfig>> {
        #[derive(Deserialize)]
        struct Ecosystem {
            apps: Vec<AppConfig>,
        }

        let table: toml::Table = toml::from_str(contents)
            .map_err(|e| VigilError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        if table.contains_key("apps") {
            let file: Ecosystem = toml::from_str(contents)
                .map_err(|e| VigilError::InvalidConfig(format!("Invalid apps table: {}", e)))?;
            Ok(file.apps)
        } else {
            let single: AppConfig = toml::from_str(contents)
                .map_err(|e| VigilError::InvalidConfig(format!("Invalid application: {}", e)))?;
            Ok(vec![single])
        }
    }

    fn parse_json(contents: &str) -> Result<Vec<AppConfig>> {
        #[derive(Deserialize)]
        struct Ecosystem {
            apps: Vec<AppConfig>,
        }

        let value: serde_json::Value = serde_json::from_str(contents)
            .map_err(|e| VigilError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?;

        if value.get("apps").is_some() {
            let file: Ecosystem = serde_json::from_value(value)
                .map_err(|e| VigilError::InvalidConfig(format!("Invalid apps list: {}", e)))?;
            Ok(file.apps)
        } else {
            let single: AppConfig = serde_json::from_value(value)
                .map_err(|e| VigilError::InvalidConfig(format!("Invalid application: {}", e)))?;
            Ok(vec![single])
        }
    }

    /// Validate the record. Existence of the script and working directory is left to launch time.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(VigilError::MissingConfigField("name".to_string()));
        }

        if self.name.contains('/') {
            return Err(VigilError::ConfigValidationError(format!(
                "Application name must not contain '/': {}",
                self.name
            )));
        }

        if self.script.as_os_str().is_empty() {
            return Err(VigilError::MissingConfigField("script".to_string()));
        }

        if self.instances == 0 {
            return Err(VigilError::ConfigValidationError(
                "instances must be at least 1".to_string(),
            ));
        }

        if self.instances > MAX_INSTANCES {
            return Err(VigilError::ConfigValidationError(format!(
                "instances cannot exceed {}",
                MAX_INSTANCES
            )));
        }

        if self.exec_mode == ExecMode::Fork && self.instances > 1 {
            return Err(VigilError::ConfigValidationError(format!(
                "{}: fork mode runs a single instance; use exec_mode = \"cluster\" for {}",
                self.name, self.instances
            )));
        }

        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(VigilError::ConfigValidationError(format!(
                    "Invalid environment variable name: {:?}",
                    key
                )));
            }
        }

        if let Some(ref pattern) = self.log_date_format {
            TimestampFormat::parse(pattern)?;
        }

        watcher::validate_patterns(&self.ignore_watch)?;

        Ok(())
    }

    /// Expand `$VAR` and `${VAR}` in paths, arguments and environment values
    fn expand_env_vars(&mut self) {
        self.script = expand_env_in_path(&self.script);

        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(expand_env_in_path(cwd));
        }

        self.args = self.args.iter().map(|arg| expand_env_in_string(arg)).collect();

        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }

    /// Anchor `cwd` to `base` and the log paths to `cwd`
    fn resolve_relative(&mut self, base: &Path) {
        let cwd = match self.cwd.take() {
            Some(cwd) if cwd.is_absolute() => cwd,
            Some(cwd) => base.join(cwd),
            None => base.to_path_buf(),
        };

        for path in [&mut self.out_file, &mut self.error_file, &mut self.log_file]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = cwd.join(&*path);
            }
        }

        self.cwd = Some(cwd);
    }

    fn working_dir(&self) -> PathBuf {
        self.cwd.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn process_spec(&self) -> ProcessSpec {
        ProcessSpec {
            name: self.name.clone(),
            script: self.script.clone(),
            interpreter: self.interpreter.clone(),
            interpreter_args: self.interpreter_args.clone(),
            args: self.args.clone(),
            cwd: self.working_dir(),
            env: self.env.clone(),
            exec_mode: self.exec_mode,
            instances: self.instances,
            kill_timeout: Duration::from_millis(self.kill_timeout),
        }
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::new(
            self.autorestart,
            self.max_restarts,
            Duration::from_millis(self.restart_delay),
        )
        .with_memory_limit(self.max_memory_restart.map(|b| b.as_u64()))
    }

    pub fn log_sink_config(&self) -> Result<LogSinkConfig> {
        let cwd = self.working_dir();
        let anchor = |path: &PathBuf| {
            if path.is_relative() {
                cwd.join(path)
            } else {
                path.clone()
            }
        };

        let out_file = self
            .out_file
            .as_ref()
            .map(&anchor)
            .unwrap_or_else(|| Path::new(DEFAULT_LOG_DIR).join(format!("{}-out.log", self.name)));
        let error_file = self
            .error_file
            .as_ref()
            .map(&anchor)
            .unwrap_or_else(|| {
                Path::new(DEFAULT_LOG_DIR).join(format!("{}-error.log", self.name))
            });

        let date_format = match self.log_date_format {
            Some(ref pattern) => TimestampFormat::parse(pattern)?,
            None => TimestampFormat::default(),
        };

        Ok(LogSinkConfig {
            out_file,
            error_file,
            log_file: self.log_file.as_ref().map(&anchor),
            combine: self.combine_logs,
            date_format,
            merge: self.merge_logs,
        })
    }

    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            enabled: self.watch,
            ignore: self.ignore_watch.clone(),
            debounce: Duration::from_millis(self.watch_delay),
        }
    }

    /// Validate and convert into the supervisor's view of the application
    pub fn definition(&self) -> Result<AppDefinition> {
        self.validate()?;
        Ok(AppDefinition {
            spec: self.process_spec(),
            policy: self.restart_policy(),
            logs: self.log_sink_config()?,
            watch: self.watch_config(),
        })
    }
}

/// Expand environment variables in a string. Unknown variables are left as written.
fn expand_env_in_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => {
                result.push_str(&value);
                rest = &after[consumed..];
            }
            _ => {
                result.push('$');
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_env_in_string(&path_str))
}
