//! Worker process supervision
//!
//! The coordinating process launches N workers, each running the full
//! listener + dispatcher + routing stack, and replaces any worker that
//! exits. The coordinator itself serves no traffic and holds no routes.
//!
//! Worker state per id:
//!
//! ```text
//!   Running ──exit──▶ Crashed ──▶ Restarting ──launch──▶ Running
//! ```
//!
//! With the default policy the restart is immediate and unbounded. With a
//! backoff policy the delay doubles per consecutive crash of the same id and
//! resets once a worker stays up for the configured healthy period.

use crate::config::BackoffConfig;
use std::collections::HashMap;
use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Environment variable that marks a process as worker `<id>`.
pub const WORKER_ENV: &str = "SWITCHYARD_WORKER_ID";

/// Delay before retrying a worker whose launch failed.
const LAUNCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Code(i32),
    Signal(i32),
    Unknown,
}

impl WorkerExit {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerExit::Code(0))
    }
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return WorkerExit::Code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return WorkerExit::Signal(signal);
            }
        }

        WorkerExit::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Crashed,
    Restarting,
}

/// Lifecycle notifications, mostly for tests and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Spawned { id: usize, pid: Option<u32> },
    Exited { id: usize, exit: WorkerExit },
    Restarting { id: usize, delay: Duration },
    LaunchFailed { id: usize, error: String },
}

/// A running worker that can be awaited.
pub trait WorkerHandle: Send + 'static {
    fn pid(&self) -> Option<u32>;

    fn wait(self) -> impl Future<Output = WorkerExit> + Send;
}

/// Starts worker `id`.
pub trait WorkerLauncher: Send {
    type Handle: WorkerHandle;

    fn launch(&mut self, id: usize) -> anyhow::Result<Self::Handle>;
}

/// Launches workers by re-executing a program with `WORKER_ENV` set.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-executes the running binary with its own arguments.
    pub fn current_exe() -> std::io::Result<Self> {
        let program = std::env::current_exe()?;
        let args = std::env::args_os().skip(1).collect();
        Ok(Self::new(program, args))
    }
}

impl WorkerHandle for Child {
    fn pid(&self) -> Option<u32> {
        self.id()
    }

    async fn wait(mut self) -> WorkerExit {
        match Child::wait(&mut self).await {
            Ok(status) => status.into(),
            Err(e) => {
                warn!(error = %e, "Failed to wait on worker");
                WorkerExit::Unknown
            }
        }
    }
}

impl WorkerLauncher for ProcessLauncher {
    type Handle = Child;

    fn launch(&mut self, id: usize) -> anyhow::Result<Child> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ENV, id.to_string())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }
}

/// When a replacement worker is launched.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RestartPolicy {
    /// Launch the replacement at once, every time.
    #[default]
    Immediate,
    /// Exponential delay per worker id.
    Backoff(BackoffConfig),
}

impl From<Option<BackoffConfig>> for RestartPolicy {
    fn from(cfg: Option<BackoffConfig>) -> Self {
        cfg.map_or(RestartPolicy::Immediate, RestartPolicy::Backoff)
    }
}

impl RestartPolicy {
    /// Delay before restarting a worker that crashed `crashes` times in a
    /// row (1 for the first crash).
    pub fn delay(&self, crashes: u32) -> Duration {
        match self {
            RestartPolicy::Immediate => Duration::ZERO,
            RestartPolicy::Backoff(cfg) => {
                let shift = crashes.saturating_sub(1).min(31);
                let ms = cfg.initial_ms.saturating_mul(1u64 << shift).min(cfg.max_ms);
                Duration::from_millis(ms)
            }
        }
    }

    fn healthy_after(&self) -> Option<Duration> {
        match self {
            RestartPolicy::Immediate => None,
            RestartPolicy::Backoff(cfg) => Some(Duration::from_secs(cfg.healthy_after_secs)),
        }
    }
}

enum Tick {
    Exited {
        id: usize,
        uptime: Duration,
        exit: WorkerExit,
    },
    RestartDue {
        id: usize,
    },
}

pub struct ProcessSupervisor<L> {
    launcher: L,
    workers: usize,
    policy: RestartPolicy,
    events: Option<mpsc::UnboundedSender<SupervisorEvent>>,
    states: HashMap<usize, WorkerState>,
    crashes: HashMap<usize, u32>,
    live: watch::Sender<usize>,
}

impl<L: WorkerLauncher> ProcessSupervisor<L> {
    pub fn new(launcher: L, workers: usize) -> Self {
        Self {
            launcher,
            workers: workers.max(1),
            policy: RestartPolicy::default(),
            events: None,
            states: HashMap::new(),
            crashes: HashMap::new(),
            live: watch::channel(0).0,
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<SupervisorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Number of running workers, kept current while `run_until` owns the
    /// supervisor. Updated before the matching `SupervisorEvent` is sent.
    pub fn live(&self) -> watch::Receiver<usize> {
        self.live.subscribe()
    }

    /// Supervises until Ctrl-C.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await
    }

    /// Supervises until `shutdown` completes. Workers still running are
    /// killed when their handles are dropped.
    pub async fn run_until<F: Future<Output = ()>>(mut self, shutdown: F) -> anyhow::Result<()> {
        let mut tasks = JoinSet::new();

        for id in 0..self.workers {
            self.start(id, &mut tasks)?;
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                Some(joined) = tasks.join_next() => match joined? {
                    Tick::Exited { id, uptime, exit } => self.on_exit(id, uptime, exit, &mut tasks),
                    Tick::RestartDue { id } => self.restart(id, &mut tasks),
                },
            }
        }

        tasks.shutdown().await;
        Ok(())
    }

    fn start(&mut self, id: usize, tasks: &mut JoinSet<Tick>) -> anyhow::Result<()> {
        let handle = self.launcher.launch(id)?;
        let pid = handle.pid();

        info!(worker = id, pid = ?pid, "Worker started");
        self.states.insert(id, WorkerState::Running);
        self.publish_live();
        self.emit(SupervisorEvent::Spawned { id, pid });

        tasks.spawn(async move {
            let started = Instant::now();
            let exit = handle.wait().await;
            Tick::Exited {
                id,
                uptime: started.elapsed(),
                exit,
            }
        });

        Ok(())
    }

    fn restart(&mut self, id: usize, tasks: &mut JoinSet<Tick>) {
        if let Err(e) = self.start(id, tasks) {
            error!(worker = id, error = %e, "Failed to launch worker");
            self.emit(SupervisorEvent::LaunchFailed {
                id,
                error: e.to_string(),
            });
            tasks.spawn(async move {
                tokio::time::sleep(LAUNCH_RETRY_DELAY).await;
                Tick::RestartDue { id }
            });
        }
    }

    fn on_exit(&mut self, id: usize, uptime: Duration, exit: WorkerExit, tasks: &mut JoinSet<Tick>) {
        self.states.insert(id, WorkerState::Crashed);
        self.publish_live();
        self.emit(SupervisorEvent::Exited { id, exit });

        let crashes = match self.policy.healthy_after() {
            Some(healthy) if uptime >= healthy => 1,
            _ => self.crashes.get(&id).copied().unwrap_or(0) + 1,
        };
        self.crashes.insert(id, crashes);

        let delay = self.policy.delay(crashes);

        error!(
            worker = id,
            exit = ?exit,
            uptime_ms = uptime.as_millis() as u64,
            delay_ms = delay.as_millis() as u64,
            "worker died un-expectedly... restarting it"
        );

        self.states.insert(id, WorkerState::Restarting);
        self.emit(SupervisorEvent::Restarting { id, delay });

        if delay.is_zero() {
            self.restart(id, tasks);
        } else {
            tasks.spawn(async move {
                tokio::time::sleep(delay).await;
                Tick::RestartDue { id }
            });
        }
    }

    fn publish_live(&self) {
        let running = self
            .states
            .values()
            .filter(|s| **s == WorkerState::Running)
            .count();
        self.live.send_replace(running);
    }

    fn emit(&self, event: SupervisorEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_policy_never_waits() {
        let policy = RestartPolicy::Immediate;
        assert_eq!(policy.delay(1), Duration::ZERO);
        assert_eq!(policy.delay(50), Duration::ZERO);
    }

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let policy = RestartPolicy::Backoff(BackoffConfig {
            initial_ms: 100,
            max_ms: 1_000,
            healthy_after_secs: 60,
        });

        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay(64), Duration::from_millis(1_000));
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_maps_code() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(WorkerExit::from(ExitStatus::from_raw(0)), WorkerExit::Code(0));
        assert_eq!(WorkerExit::from(ExitStatus::from_raw(1 << 8)), WorkerExit::Code(1));
        assert_eq!(WorkerExit::from(ExitStatus::from_raw(9)), WorkerExit::Signal(9));
    }
}
