//! Process spawn/terminate contract: a small `Spawner` trait wrapping `std::process::Command`,
//! a started-process handle that owns stdout/stderr capture into bounded tails, and
//! graceful-then-forceful termination of the whole process group.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::SpawnError;
use crate::utils::threads::spawn_named_thread;

/// Default number of lines retained in a captured stdout/stderr tail.
pub const DEFAULT_TAIL_CAPACITY: usize = 256;

/// A bounded FIFO of the most recent output lines, oldest evicted first.
#[derive(Debug, Clone, Default)]
pub struct OutputTail {
    capacity: usize,
    lines: VecDeque<String>,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

pub type SharedTail = Arc<Mutex<OutputTail>>;

/// Minimal spec the spawner needs: the teacher's `CommandOS*` split into a plain struct
/// since this crate has no per-agent-id file logging concerns to carry.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_directory: std::path::PathBuf,
    pub environment: Vec<(String, String)>,
}

/// Abstracts process creation so the manager/agent-record logic can be unit tested
/// without touching the OS. Implemented for real use by [`OsSpawner`].
pub trait Spawner: Send + Sync {
    fn spawn(&self, spec: &SpawnSpec) -> Result<StartedProcess, SpawnError>;
}

/// A spawned child process, its pid, and the capture threads draining stdout/stderr.
pub struct StartedProcess {
    child: Child,
    pid: u32,
    stdout_tail: SharedTail,
    stderr_tail: SharedTail,
}

impl StartedProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn stdout_tail(&self) -> Vec<String> {
        self.stdout_tail.lock().unwrap().lines()
    }

    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().unwrap().lines()
    }

    /// Non-blocking check: `Some(status)` once the child has exited.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Blocks until the child exits.
    pub fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait()
    }

    /// Polls `try_wait` until the child exits or `timeout` elapses.
    pub fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Sends a graceful termination signal to the whole process group (SIGTERM on
    /// Unix). Non-Unix targets have no process-group concept and this is a no-op;
    /// callers fall back to [`force_kill`](Self::force_kill).
    pub fn terminate_group(&self) -> std::io::Result<()> {
        #[cfg(target_family = "unix")]
        {
            signal_group(self.pid, nix::sys::signal::Signal::SIGTERM)
        }
        #[cfg(not(target_family = "unix"))]
        {
            Ok(())
        }
    }

    /// Unconditionally kills the process (and its group, on Unix).
    pub fn force_kill(&mut self) -> std::io::Result<()> {
        #[cfg(target_family = "unix")]
        {
            let _ = signal_group(self.pid, nix::sys::signal::Signal::SIGKILL);
        }
        self.child.kill()
    }
}

#[cfg(target_family = "unix")]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> std::io::Result<()> {
    use nix::sys::signal;
    use nix::unistd::Pid;
    // A negative pid targets the whole process group (see `setpgid`/`killpg`
    // semantics); the child is placed in its own group at spawn time below.
    signal::kill(Pid::from_raw(-(pid as i32)), signal)
        .map_err(|err| std::io::Error::other(err.to_string()))
}

/// Real [`Spawner`] backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSpawner {
    tail_capacity: usize,
}

impl OsSpawner {
    pub fn new(tail_capacity: usize) -> Self {
        Self { tail_capacity }
    }
}

impl Spawner for OsSpawner {
    fn spawn(&self, spec: &SpawnSpec) -> Result<StartedProcess, SpawnError> {
        if !spec.working_directory.is_dir() {
            return Err(SpawnError::WorkingDirectoryMissing(
                spec.working_directory.to_string_lossy().to_string(),
            ));
        }

        let mut command = build_command(spec);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|err| classify_spawn_error(spec, &err))?;
        let pid = child.id();

        let stdout_tail = Arc::new(Mutex::new(OutputTail::new(self.tail_capacity)));
        let stderr_tail = Arc::new(Mutex::new(OutputTail::new(self.tail_capacity)));

        if let Some(stdout) = child.stdout.take() {
            spawn_tail_reader(stdout, stdout_tail.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_tail_reader(stderr, stderr_tail.clone());
        }

        Ok(StartedProcess {
            child,
            pid,
            stdout_tail,
            stderr_tail,
        })
    }
}

fn build_command(spec: &SpawnSpec) -> Command {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.working_directory)
        .envs(spec.environment.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    place_in_new_process_group(&mut command);
    command
}

#[cfg(target_family = "unix")]
fn place_in_new_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // pgid 0 means "use the child's own pid as its process group id", so SIGTERM/SIGKILL
    // sent to -pid reaches the whole subtree the child spawns.
    command.process_group(0);
}

#[cfg(not(target_family = "unix"))]
fn place_in_new_process_group(_command: &mut Command) {}

fn spawn_tail_reader<R: std::io::Read + Send + 'static>(reader: R, tail: SharedTail) {
    spawn_named_thread("agent-output-reader", move || {
        let mut lines = BufReader::new(reader).lines();
        while let Some(Ok(line)) = lines.next() {
            tail.lock().unwrap().push(line);
        }
    });
}

fn classify_spawn_error(spec: &SpawnSpec, err: &std::io::Error) -> SpawnError {
    match err.kind() {
        std::io::ErrorKind::NotFound => SpawnError::BinaryNotFound(spec.program.clone()),
        std::io::ErrorKind::PermissionDenied => SpawnError::PermissionDenied(spec.program.clone()),
        _ => SpawnError::Other(err.to_string()),
    }
}
