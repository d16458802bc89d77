use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use vigil::config::AppConfig;
use vigil::logs::SinkSet;
use vigil::process::{LifecyclePhase, StopReason, Supervisor, SupervisorHandle, SupervisorOptions};

const WAIT: Duration = Duration::from_secs(15);

fn create_test_config(name: &str, dir: &Path, command: &str) -> AppConfig {
    let mut config = AppConfig::new(name, "/bin/sh");
    config.args = vec!["-c".to_string(), command.to_string()];
    config.cwd = Some(dir.to_path_buf());
    config.out_file = Some(dir.join("out.log"));
    config.error_file = Some(dir.join("err.log"));
    config
}

async fn launch(config: AppConfig) -> SupervisorHandle {
    let definition = Arc::new(config.definition().unwrap());
    let sinks = SinkSet::open(&definition.logs, None).await;
    let handle = Supervisor::spawn(definition, 0, sinks, SupervisorOptions::default());
    handle.start();
    tokio::time::timeout(
        WAIT,
        handle.wait_for(|s| s.phase == LifecyclePhase::Running),
    )
    .await
    .expect("worker should start");
    handle
}

#[tokio::test]
async fn test_graceful_shutdown_with_sigterm() {
    let temp_dir = TempDir::new().unwrap();
    let handle = launch(create_test_config("sigterm-test", temp_dir.path(), "sleep 30")).await;

    let started = Instant::now();
    handle.stop();
    let status = tokio::time::timeout(WAIT, handle.wait_stopped()).await.unwrap();

    assert_eq!(status.stop_reason, Some(StopReason::Requested));
    assert_eq!(status.restarts, 0);
    // sleep dies on SIGTERM well inside the default grace period
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test]
async fn test_forced_kill_after_grace_period() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(
        "stubborn",
        temp_dir.path(),
        "trap 'echo ignoring TERM' TERM; while true; do sleep 0.1; done",
    );
    config.kill_timeout = 400;
    let handle = launch(config).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    handle.stop();
    let status = tokio::time::timeout(WAIT, handle.wait_stopped()).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(400));
    assert_eq!(status.stop_reason, Some(StopReason::Requested));

    let out = std::fs::read_to_string(temp_dir.path().join("out.log")).unwrap();
    assert!(out.contains("ignoring TERM"));
}

#[tokio::test]
async fn test_stop_wins_over_watch_restart() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config("watched", temp_dir.path(), "sleep 30");
    config.watch = true;
    config.watch_delay = 50;
    let handle = launch(config).await;

    handle.stop();
    std::fs::write(temp_dir.path().join("touched.txt"), "x").unwrap();

    let status = tokio::time::timeout(WAIT, handle.wait_stopped()).await.unwrap();
    assert_eq!(status.stop_reason, Some(StopReason::Requested));
    assert_eq!(status.generation, 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.status().phase, LifecyclePhase::Stopped);
}

#[tokio::test]
async fn test_file_change_restarts_without_budget() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config("reload", temp_dir.path(), "echo boot; sleep 30");
    config.watch = true;
    config.watch_delay = 100;
    config.max_restarts = 0;
    config.ignore_watch = vec!["cache".to_string()];
    let handle = launch(config).await;
    // let the watcher settle before touching the tree
    tokio::time::sleep(Duration::from_millis(300)).await;

    std::fs::create_dir(temp_dir.path().join("cache")).unwrap();
    std::fs::write(temp_dir.path().join("cache/blob"), "x").unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(handle.status().generation, 1);

    std::fs::write(temp_dir.path().join("app.js"), "changed").unwrap();
    let status = tokio::time::timeout(
        WAIT,
        handle.wait_for(|s| s.phase == LifecyclePhase::Running && s.generation == 2),
    )
    .await
    .unwrap();

    assert_eq!(status.restarts, 0);
    assert_eq!(status.manual_restarts, 1);

    // own log sinks never feed back into restarts
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(handle.status().generation, 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_restart_delay_is_honored_every_cycle() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config("flaky", temp_dir.path(), "exit 2");
    config.max_restarts = 2;
    config.restart_delay = 200;

    let definition = Arc::new(config.definition().unwrap());
    let sinks = SinkSet::open(&definition.logs, None).await;
    let handle = Supervisor::spawn(definition, 0, sinks, SupervisorOptions::default());

    let started = Instant::now();
    handle.start();
    let status = tokio::time::timeout(WAIT, handle.wait_stopped()).await.unwrap();

    assert_eq!(status.stop_reason, Some(StopReason::Exhausted));
    assert_eq!(status.restarts, 2);
    assert_eq!(status.last_exit.map(|e| e.exit_code()), Some(2));
    assert!(started.elapsed() >= Duration::from_millis(400));
}
