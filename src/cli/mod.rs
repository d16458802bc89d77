// CLI module - Operator command-line interface

mod output;

use crate::error::{Result, VigilError};
use crate::ipc::client::IpcClient;
use crate::ipc::protocol::{Command, LogOptions};
use crate::ipc::DEFAULT_SOCKET_PATH;
use crate::logs::{StreamSelector, DEFAULT_TAIL_LINES};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// vigil - control a running vigild supervisor
#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Control socket of the daemon
    #[arg(short, long, global = true, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an application (fresh restart budget if it had stopped)
    Start { name: String },

    /// Stop an application and wait until every instance is down
    Stop { name: String },

    /// Restart an application without consuming its crash budget
    Restart { name: String },

    /// Show application status
    Status {
        /// Application name (all applications when omitted)
        name: Option<String>,
    },

    /// Show the tail of an application's logs
    Logs {
        name: String,

        /// Which stream to show: out, err or all
        #[arg(long, default_value = "all")]
        stream: StreamSelector,

        /// Number of lines to display
        #[arg(short, long, default_value_t = DEFAULT_TAIL_LINES)]
        lines: usize,
    },

    /// Stop every application and shut the daemon down
    Kill,
}

impl Cli {
    /// Parse arguments, send the command and print the outcome
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(&self) -> Result<()> {
        let command = self.build_command();

        let client = IpcClient::with_socket_path(&self.socket);
        let response = client.send_command(command)?;

        match response.result {
            Ok(data) => {
                output::print_success(&data);
                Ok(())
            }
            Err(error_msg) => Err(VigilError::Other(error_msg)),
        }
    }

    fn build_command(&self) -> Command {
        match &self.command {
            Commands::Start { name } => Command::Start { name: name.clone() },
            Commands::Stop { name } => Command::Stop { name: name.clone() },
            Commands::Restart { name } => Command::Restart { name: name.clone() },
            Commands::Status { name } => Command::Status { name: name.clone() },
            Commands::Logs {
                name,
                stream,
                lines,
            } => Command::Logs(LogOptions {
                name: name.clone(),
                stream: *stream,
                lines: Some(*lines),
            }),
            Commands::Kill => Command::Kill,
        }
    }
}
