//! CLI entrypoint wrapping the agent orchestration core for manual, local operation.
//! `validate-config` and `status` are one-shot operations; `run` starts the fleet and
//! blocks until a SIGINT/SIGTERM is received, mirroring the signal-handler-publishes-an-
//! event pattern used by the wider ambient stack.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use agent_orchestration_core::config::{ConfigStore, FleetConfig};
use agent_orchestration_core::event::cancellation::CancellationMessage;
use agent_orchestration_core::event::channel::pub_sub;
use agent_orchestration_core::health::ReqwestHealthClient;
use agent_orchestration_core::logging::LoggingConfig;
use agent_orchestration_core::manager::AgentManager;
use agent_orchestration_core::process::OsSpawner;
use agent_orchestration_core::resource::SysinfoMetricsSource;

const TAIL_CAPACITY: usize = 200;

#[derive(Debug, Parser)]
#[command(author, about = "Agent orchestration core CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level for this crate's own target (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Optional file to additionally write logs to.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse and validate a fleet configuration document without starting anything.
    ValidateConfig {
        /// Path to the fleet configuration YAML document.
        path: PathBuf,
    },
    /// Load a fleet configuration, start every enabled/auto_start agent in dependency
    /// order, and block until SIGINT/SIGTERM triggers an orderly shutdown.
    Run {
        /// Path to the fleet configuration YAML document.
        path: PathBuf,
    },
    /// Load a fleet configuration and print the status of every declared agent without
    /// starting anything (all agents report `Stopped`; useful to sanity-check a document).
    Status {
        /// Path to the fleet configuration YAML document.
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: cli.log_level.parse().unwrap_or_default(),
        insecure_fine_grained_level: None,
        file_path: cli.log_file.clone(),
    };
    let _guard = logging.try_init().unwrap_or_else(|err| {
        eprintln!("warning: failed to initialize logging: {err}");
        None
    });

    match cli.command {
        Command::ValidateConfig { path } => validate_config(&path),
        Command::Run { path } => run(&path),
        Command::Status { path } => status(&path),
    }
}

fn load_config(path: &PathBuf) -> Result<FleetConfig, ExitCode> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        error!(path = %path.display(), "could not read configuration: {err}");
        ExitCode::from(2)
    })?;
    agent_orchestration_core::config::parse(&contents).map_err(|err| {
        error!(path = %path.display(), "configuration is invalid: {err}");
        ExitCode::from(2)
    })
}

fn validate_config(path: &PathBuf) -> ExitCode {
    match load_config(path) {
        Ok(config) => {
            info!(agents = config.agents.len(), version = config.version, "configuration is valid");
            println!("valid: {} agent(s), version {}", config.agents.len(), config.version);
            ExitCode::SUCCESS
        }
        Err(code) => code,
    }
}

fn status(path: &PathBuf) -> ExitCode {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let store = Arc::new(ConfigStore::from_config(config));
    let (manager, lifecycle_consumer) = AgentManager::new(
        store,
        Arc::new(OsSpawner::new(TAIL_CAPACITY)),
        Arc::new(ReqwestHealthClient::new()),
        Arc::new(Mutex::new(SysinfoMetricsSource::new())),
    );
    drop(lifecycle_consumer);

    for status in manager.status_all() {
        println!(
            "{:<24} {:?}{}",
            status.name,
            status.state,
            status.pid.map(|pid| format!(" pid={pid}")).unwrap_or_default()
        );
    }
    manager.shutdown();
    ExitCode::SUCCESS
}

fn run(path: &PathBuf) -> ExitCode {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let store = Arc::new(ConfigStore::from_config(config));
    let (manager, lifecycle_consumer) = AgentManager::new(
        store,
        Arc::new(OsSpawner::new(TAIL_CAPACITY)),
        Arc::new(ReqwestHealthClient::new()),
        Arc::new(Mutex::new(SysinfoMetricsSource::new())),
    );

    std::thread::spawn(move || {
        while let Ok(event) = lifecycle_consumer.recv() {
            info!(
                agent = event.agent,
                prior = ?event.prior_state,
                new = ?event.new_state,
                reason = event.reason,
                "lifecycle event"
            );
        }
    });

    let (stop_publisher, stop_consumer) = pub_sub::<CancellationMessage>();
    if let Err(err) = ctrlc::set_handler(move || {
        info!("received shutdown signal, stopping fleet");
        let _ = stop_publisher.publish(());
    }) {
        error!("could not install signal handler: {err}");
        return ExitCode::from(2);
    }

    let results = match manager.start_all() {
        Ok(results) => results,
        Err(err) => {
            error!("fatal error starting fleet: {err}");
            return ExitCode::from(2);
        }
    };
    let failures: Vec<String> = results
        .iter()
        .filter(|&(_, ok)| !*ok)
        .map(|(name, _)| name.clone())
        .collect();
    if !failures.is_empty() {
        warn!(failed = ?failures, "one or more agents failed to reach a healthy state at startup");
    }

    while !stop_consumer.is_cancelled(Duration::from_millis(250)) {}

    info!("shutting down fleet");
    let mut emergency = false;
    if let Err(err) = manager.stop_all() {
        error!("error during orderly shutdown, forcing emergency stop: {err}");
        manager.emergency_stop();
        emergency = true;
    }
    manager.shutdown();

    if emergency {
        ExitCode::from(4)
    } else if !failures.is_empty() {
        ExitCode::from(3)
    } else {
        ExitCode::SUCCESS
    }
}
