use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use vigil::daemon::Daemon;
use vigil::ipc::DEFAULT_SOCKET_PATH;
use vigil::process::ProcessManager;

/// Exit status for an unusable configuration
const CONFIG_ERROR_EXIT: u8 = 2;

/// vigild - supervises the applications of an ecosystem file
#[derive(Parser)]
#[command(name = "vigild")]
#[command(version, about, long_about = None)]
struct Args {
    /// Ecosystem file (.toml or .json)
    #[arg(short, long)]
    config: PathBuf,

    /// Control socket path
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut manager = ProcessManager::new();
    match manager.load_file(&args.config).await {
        Ok(names) => tracing::info!(apps = ?names, "Configuration loaded"),
        Err(e) => {
            tracing::error!(config = %args.config.display(), "{}", e);
            return ExitCode::from(CONFIG_ERROR_EXIT);
        }
    }

    match run(manager, args.socket).await {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(manager: ProcessManager, socket: PathBuf) -> anyhow::Result<i32> {
    Daemon::new(manager, &socket)
        .run()
        .await
        .with_context(|| format!("daemon on {} failed", socket.display()))
}
