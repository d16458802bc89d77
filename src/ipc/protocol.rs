// IPC Protocol definitions for client-daemon communication

use crate::logs::StreamSelector;
use crate::process::StatusSnapshot;
use serde::{Deserialize, Serialize};

/// Options for tailing an application's logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOptions {
    pub name: String,
    #[serde(default)]
    pub stream: StreamSelector,
    pub lines: Option<usize>,
}

/// Operator commands understood by the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Start { name: String },
    Stop { name: String },
    Restart { name: String },
    /// Status of one application, or of every application when `name` is absent
    Status { name: Option<String> },
    Logs(LogOptions),
    /// Tear down every supervisor and exit the daemon
    Kill,
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseData {
    Started { name: String },
    /// Final snapshots of the stopped instances
    Stopped { name: String, instances: Vec<StatusSnapshot> },
    Restarted { name: String },
    Status(Vec<StatusSnapshot>),
    Logs(Vec<String>),
    /// Generic success message
    Success(String),
}

/// Request message from client to daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Response message from daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, String>,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: String) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}
