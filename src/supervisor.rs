//! Daemon process lifecycle.
//!
//! [`ProcessSupervisor`] launches the OpenVPN daemon through a caller-supplied
//! command factory, pumps its stdout/stderr into the log, and arbitrates the
//! two ways a run ends: the process exits on its own, or a stop request sends
//! it an interrupt and waits for the exit to land. The exit outcome is
//! published through a watch slot so any number of observers can await it.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Builds the launch command from the rendered argument vector
/// (executable first). The seam exists so embedders can wrap the daemon in
/// `sudo`, a container runtime, or a test double.
pub type CommandFactory = Box<dyn Fn(&[String]) -> Command + Send + Sync>;

/// Terminal outcome of a daemon run.
#[derive(Debug, Clone)]
pub(crate) enum ExitOutcome {
    /// Exited with a zero status.
    Clean,

    /// Exited with a failure status or could not be awaited.
    Failed(String),
}

/// Supervises a single run of the daemon process.
pub struct ProcessSupervisor {
    factory: CommandFactory,

    /// Trigger for the interrupt-then-wait shutdown path.
    shutdown: CancellationToken,

    /// Completion barrier for the output pumps and waiters.
    tasks: TaskTracker,

    /// Exit slot: `None` while running, set exactly once on exit.
    exit_tx: watch::Sender<Option<ExitOutcome>>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,

    started: AtomicBool,
}

impl ProcessSupervisor {
    pub fn new(factory: CommandFactory) -> Self {
        let (exit_tx, exit_rx) = watch::channel(None);
        Self {
            factory,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            exit_tx,
            exit_rx,
            started: AtomicBool::new(false),
        }
    }

    /// Spawns the daemon with the given arguments.
    ///
    /// Returns as soon as the OS has started the process; whether the daemon
    /// accepts the arguments is only observable through the exit outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] when the argument vector is empty, a run was
    /// already started, or the spawn itself fails.
    pub fn start(&self, arguments: Vec<String>) -> Result<(), ProcessError> {
        if arguments.is_empty() {
            return Err(ProcessError::NoArguments);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::AlreadyStarted);
        }

        let mut command = (self.factory)(&arguments);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(ProcessError::Spawn(e.to_string()));
            }
        };
        let pid = child.id();

        info!(?pid, arguments = ?arguments, "daemon process started");

        if let Some(stdout) = child.stdout.take() {
            self.tasks.spawn(pump_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            self.tasks.spawn(pump_output(stderr, "stderr"));
        }

        // Exit waiter: the only task that reaps the child, publishing the
        // outcome through the watch slot.
        let exit_tx = self.exit_tx.clone();
        self.tasks.spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) if status.success() => {
                    info!("daemon process exited cleanly");
                    ExitOutcome::Clean
                }
                Ok(status) => {
                    warn!(%status, "daemon process exited with failure");
                    ExitOutcome::Failed(status.to_string())
                }
                Err(e) => {
                    error!(error = %e, "failed to await daemon process");
                    ExitOutcome::Failed(e.to_string())
                }
            };
            let _ = exit_tx.send(Some(outcome));
        });

        // Shutdown waiter: on a stop request, interrupts the daemon and
        // holds the task tracker open until the exit lands, so `stop`
        // returns only once the process is gone.
        let shutdown = self.shutdown.clone();
        let mut exit_rx = self.exit_rx.clone();
        self.tasks.spawn(async move {
            let interrupted = tokio::select! {
                _ = shutdown.cancelled() => true,
                _ = exit_rx.wait_for(|outcome| outcome.is_some()) => false,
            };
            if interrupted {
                send_interrupt(pid);
                let _ = exit_rx.wait_for(|outcome| outcome.is_some()).await;
            }
        });
        self.tasks.close();

        Ok(())
    }

    /// Blocks until the daemon exits.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Exited`] when the run ended in failure.
    pub async fn wait(&self) -> Result<(), ProcessError> {
        let mut exit_rx = self.exit_rx.clone();
        let outcome = exit_rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .map_err(|_| ProcessError::ExitUnavailable)?
            .clone();
        match outcome {
            Some(ExitOutcome::Failed(reason)) => Err(ProcessError::Exited(reason)),
            _ => Ok(()),
        }
    }

    /// Requests a graceful shutdown and waits for the process to exit.
    ///
    /// Sends the daemon an interrupt so it can run its own teardown
    /// (removing routes, closing the tunnel) rather than being killed.
    /// Idempotent and safe to call before `start`.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if self.started.load(Ordering::SeqCst) {
            self.tasks.wait().await;
        }
    }

    /// Observer handle for the exit slot.
    pub(crate) fn exit_receiver(&self) -> watch::Receiver<Option<ExitOutcome>> {
        self.exit_rx.clone()
    }
}

/// Sends SIGINT, the daemon's documented soft-shutdown signal.
fn send_interrupt(pid: Option<u32>) {
    let Some(pid) = pid else {
        debug!("daemon already reaped, no interrupt needed");
        return;
    };
    info!(pid, "interrupting daemon process");
    // SAFETY: kill(2) with a known pid and signal has no memory effects.
    let rc = unsafe { libc::kill(pid as i32, libc::SIGINT) };
    if rc != 0 {
        warn!(pid, "failed to signal daemon process");
    }
}

/// Mirrors one of the daemon's output streams into the log, line by line,
/// until the stream closes.
async fn pump_output<R>(stream: R, source: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(source, %line, "daemon output"),
            Ok(None) => {
                info!(source, "daemon output stream ended");
                break;
            }
            Err(e) => {
                warn!(source, error = %e, "failed to read daemon output");
                break;
            }
        }
    }
}

/// Errors from launching or running the daemon process.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The configuration rendered an empty argument vector.
    #[error("no arguments to launch the daemon with")]
    NoArguments,

    /// A run was already started on this supervisor.
    #[error("daemon process already started")]
    AlreadyStarted,

    /// The OS refused to spawn the process.
    #[error("failed to spawn daemon process: {0}")]
    Spawn(String),

    /// The run ended in failure.
    #[error("daemon process failed: {0}")]
    Exited(String),

    /// The exit slot closed without an outcome.
    #[error("daemon exit status unavailable")]
    ExitUnavailable,
}
