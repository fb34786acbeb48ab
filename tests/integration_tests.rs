//! End-to-end scenarios exercising a real child process (a short shell script) to
//! validate the process-group spawn/terminate contract and the manager's reaction to
//! a dependency-ordered fleet, plus a couple of CLI smoke tests over the built binary.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::predicate;
use tempfile::tempdir;

use agent_orchestration_core::agent::LifecycleState;
use agent_orchestration_core::config::{self, ConfigStore};
use agent_orchestration_core::health::{HealthError, HealthHttpClient, HttpProbeResponse};
use agent_orchestration_core::manager::AgentManager;
use agent_orchestration_core::process::OsSpawner;
use agent_orchestration_core::resource::ProcessMetricsSource;

struct AlwaysHealthy;

impl HealthHttpClient for AlwaysHealthy {
    fn get(&self, _url: &url::Url, _timeout: Duration) -> Result<HttpProbeResponse, HealthError> {
        Ok(HttpProbeResponse {
            status: 200,
            body: Vec::new(),
        })
    }
}

struct NoopMetrics;

impl ProcessMetricsSource for NoopMetrics {
    fn sample(&mut self, _pid: u32) -> Option<agent_orchestration_core::resource::ResourceSample> {
        None
    }
}

fn write_config(dir: &std::path::Path, yaml: &str) -> std::path::PathBuf {
    let path = dir.join("fleet.yaml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    path
}

/// A long-lived agent spawned via the real `OsSpawner` reaches `Running` and can be
/// stopped cleanly through its process group.
#[test]
fn long_running_agent_starts_and_stops_via_process_group() {
    let yaml = r#"
version: 1
updated_at: "2026-01-01T00:00:00Z"
agents:
  worker:
    start_command: ["sh", "-c", "trap 'exit 0' TERM; sleep 60"]
    working_directory: "."
    health_url: "http://127.0.0.1:0/health"
    enabled: true
    auto_start: false
"#;
    let config = config::parse(yaml).expect("fixture config must parse");
    let store = Arc::new(ConfigStore::from_config(config));
    let (manager, lifecycle) = AgentManager::new(
        store,
        Arc::new(OsSpawner::new(64)),
        Arc::new(AlwaysHealthy),
        Arc::new(Mutex::new(NoopMetrics)),
    );
    drop(lifecycle);

    let started = manager.start("worker", true).expect("start must succeed");
    assert!(started);
    assert_eq!(manager.status("worker").unwrap().state, LifecycleState::Running);
    assert!(manager.status("worker").unwrap().pid.is_some());

    let stopped = manager.stop("worker", Duration::from_secs(5)).expect("stop must succeed");
    assert!(stopped);
    assert_eq!(manager.status("worker").unwrap().state, LifecycleState::Stopped);

    manager.shutdown();
}

/// A two-tier dependency graph starts its tiers in order and every declared agent ends
/// up running.
#[test]
fn start_all_honors_dependency_order_with_real_processes() {
    let yaml = r#"
version: 1
updated_at: "2026-01-01T00:00:00Z"
agents:
  database:
    start_command: ["sh", "-c", "trap 'exit 0' TERM; sleep 60"]
    working_directory: "."
    health_url: "http://127.0.0.1:0/health"
    enabled: true
    auto_start: true
  api:
    start_command: ["sh", "-c", "trap 'exit 0' TERM; sleep 60"]
    working_directory: "."
    health_url: "http://127.0.0.1:0/health"
    enabled: true
    auto_start: true
    dependencies: ["database"]
"#;
    let config = config::parse(yaml).expect("fixture config must parse");
    let store = Arc::new(ConfigStore::from_config(config));
    let (manager, lifecycle) = AgentManager::new(
        store,
        Arc::new(OsSpawner::new(64)),
        Arc::new(AlwaysHealthy),
        Arc::new(Mutex::new(NoopMetrics)),
    );
    drop(lifecycle);

    let results = manager.start_all().expect("start_all must succeed");
    assert_eq!(results.get("database"), Some(&true));
    assert_eq!(results.get("api"), Some(&true));

    let stop_results = manager.stop_all().expect("stop_all must succeed");
    assert_eq!(stop_results.get("database"), Some(&true));
    assert_eq!(stop_results.get("api"), Some(&true));

    manager.shutdown();
}

/// A child that exits immediately trips the restart engine and eventually gives up,
/// without ever touching the health probe (the agent never reaches `Running`).
#[test]
fn crashing_agent_gives_up_after_exhausting_restarts() {
    let yaml = r#"
version: 1
updated_at: "2026-01-01T00:00:00Z"
agents:
  flaky:
    start_command: ["sh", "-c", "exit 7"]
    working_directory: "."
    health_url: "http://127.0.0.1:0/health"
    enabled: true
    auto_start: false
    restart_policy:
      kind: immediate
      max_restarts: 2
      window: "60s"
"#;
    let config = config::parse(yaml).expect("fixture config must parse");
    let store = Arc::new(ConfigStore::from_config(config));
    let (manager, lifecycle) = AgentManager::new(
        store,
        Arc::new(OsSpawner::new(64)),
        Arc::new(AlwaysHealthy),
        Arc::new(Mutex::new(NoopMetrics)),
    );
    drop(lifecycle);

    manager.start("flaky", false).expect("start must be accepted");

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        if manager.status("flaky").unwrap().state == LifecycleState::GaveUp {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "agent never gave up");
        std::thread::sleep(Duration::from_millis(50));
    }

    manager.shutdown();
}

#[test]
fn cli_validate_config_accepts_a_well_formed_document() {
    let dir = tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
version: 1
updated_at: "2026-01-01T00:00:00Z"
agents:
  worker:
    start_command: ["true"]
    working_directory: "."
    health_url: "http://127.0.0.1:0/health"
"#,
    );

    Command::cargo_bin("agent-orchestrator")
        .unwrap()
        .arg("validate-config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn cli_validate_config_rejects_a_missing_file() {
    Command::cargo_bin("agent-orchestrator")
        .unwrap()
        .arg("validate-config")
        .arg("/no/such/path/fleet.yaml")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn cli_status_prints_every_declared_agent_without_starting_it() {
    let dir = tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
version: 1
updated_at: "2026-01-01T00:00:00Z"
agents:
  worker:
    start_command: ["true"]
    working_directory: "."
    health_url: "http://127.0.0.1:0/health"
"#,
    );

    Command::cargo_bin("agent-orchestrator")
        .unwrap()
        .arg("status")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("worker"))
        .stdout(predicate::str::contains("Stopped"));
}
