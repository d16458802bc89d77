// Daemon - Hosts the process manager behind the IPC control surface

use crate::error::{Result, VigilError};
use crate::ipc::{Command, IpcServer, ResponseData};
use crate::logs::DEFAULT_TAIL_LINES;
use crate::process::{exit_code_of, ProcessManager};
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Coordinates the fleet, the control socket and shutdown
pub struct Daemon {
    manager: Arc<RwLock<ProcessManager>>,
    server: IpcServer,
    shutdown: CancellationToken,
}

impl Daemon {
    pub fn new<P: AsRef<Path>>(manager: ProcessManager, socket_path: P) -> Self {
        Self {
            manager: Arc::new(RwLock::new(manager)),
            server: IpcServer::with_socket_path(socket_path),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that ends `run` when cancelled, same as a `Kill` request
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start every registered application, serve requests until SIGINT, SIGTERM
    /// or `Kill`, then tear everything down. Returns the process exit code.
    pub async fn run(mut self) -> Result<i32> {
        self.server.start()?;
        tracing::info!(
            socket = %self.server.socket_path().display(),
            "IPC server listening"
        );

        {
            let mut manager = self.manager.write().await;
            for name in manager.names() {
                if let Err(e) = manager.start(&name) {
                    tracing::error!(app = %name, "Failed to start: {}", e);
                }
            }
        }

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        let manager = Arc::clone(&self.manager);
        let shutdown = self.shutdown.clone();
        let serve = self.server.run(
            move |command| {
                let manager = Arc::clone(&manager);
                let shutdown = shutdown.clone();
                async move { handle_command(command, manager, shutdown).await }
            },
            self.shutdown.clone(),
        );

        tokio::select! {
            result = serve => {
                if let Err(e) = result {
                    tracing::error!("IPC server error: {}", e);
                }
            }
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
        }
        self.shutdown.cancel();

        tracing::info!("Shutting down daemon...");
        let snapshots = self.manager.write().await.shutdown().await;
        self.server.stop()?;

        let code = exit_code_of(&snapshots);
        tracing::info!(exit_code = code, "Daemon stopped");
        Ok(code)
    }
}

/// Dispatch one operator command against the fleet
pub async fn handle_command(
    command: Command,
    manager: Arc<RwLock<ProcessManager>>,
    shutdown: CancellationToken,
) -> Result<ResponseData> {
    match command {
        Command::Start { name } => {
            manager.write().await.start(&name)?;
            Ok(ResponseData::Started { name })
        }

        Command::Stop { name } => {
            let instances = manager.read().await.stop(&name).await?;
            Ok(ResponseData::Stopped { name, instances })
        }

        Command::Restart { name } => {
            manager.write().await.restart(&name)?;
            Ok(ResponseData::Restarted { name })
        }

        Command::Status { name } => {
            let manager = manager.read().await;
            let snapshots = match name {
                Some(name) => manager.status(&name)?,
                None => manager.status_all(),
            };
            Ok(ResponseData::Status(snapshots))
        }

        Command::Logs(options) => {
            let lines = options.lines.unwrap_or(DEFAULT_TAIL_LINES);
            let output = manager
                .read()
                .await
                .tail_logs(&options.name, options.stream, lines)
                .await?;
            Ok(ResponseData::Logs(output))
        }

        Command::Kill => {
            if shutdown.is_cancelled() {
                return Err(VigilError::Other("Daemon is already shutting down".to_string()));
            }
            shutdown.cancel();
            Ok(ResponseData::Success("Daemon shutting down".to_string()))
        }
    }
}
