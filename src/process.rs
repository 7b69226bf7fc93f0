//! Assembled OpenVPN runner.
//!
//! [`OpenvpnProcess`] sequences a full daemon run: tunnel setup, management
//! listener bind, argument rendering, process launch, and the race between
//! management readiness, early process death, and a connect timeout. Every
//! failure path tears down whatever had been brought up.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use ovpn_management::{Management, ManagementError, Middleware};

use crate::config::{ConfigError, VpnConfig};
use crate::supervisor::{CommandFactory, ExitOutcome, ProcessError, ProcessSupervisor};
use crate::tunnel::{Tunnel, TunnelError};

/// How long the freshly launched daemon gets to dial back to the
/// management interface before the run is declared failed.
const MANAGEMENT_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// A single supervised run of the OpenVPN daemon.
pub struct OpenvpnProcess {
    config: Box<dyn VpnConfig>,
    tunnel: Box<dyn Tunnel>,
    management: Management,
    process: ProcessSupervisor,
}

impl OpenvpnProcess {
    /// Assembles a runner. Middlewares are handed to the management channel
    /// in the given order, which is also their dispatch order.
    pub fn new(
        tunnel: Box<dyn Tunnel>,
        config: Box<dyn VpnConfig>,
        command_factory: CommandFactory,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        Self {
            config,
            tunnel,
            management: Management::new(middlewares),
            process: ProcessSupervisor::new(command_factory),
        }
    }

    /// Brings the daemon up end to end.
    ///
    /// Returns once the daemon has connected to the management interface
    /// and every middleware's start hook has run. On any failure (tunnel
    /// setup, argument rendering, spawn, early process death, or connect
    /// timeout) everything already started is stopped before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] naming the stage that failed.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        self.tunnel.setup(self.config.as_ref())?;

        let address = match self.management.wait_for_connection().await {
            Ok(address) => address,
            Err(e) => {
                self.tunnel.stop();
                return Err(e.into());
            }
        };
        self.config.set_management_address(address);

        let arguments = match self.config.to_arguments() {
            Ok(arguments) => arguments,
            Err(e) => {
                self.management.stop().await;
                self.tunnel.stop();
                return Err(e.into());
            }
        };

        if let Err(e) = self.process.start(arguments) {
            self.management.stop().await;
            self.tunnel.stop();
            return Err(e.into());
        }

        let mut connected = self.management.connected_receiver();
        let mut exited = self.process.exit_receiver();
        tokio::select! {
            result = connected.wait_for(|ready| *ready) => match result {
                Ok(_) => {
                    info!(device = %self.tunnel.device_name(), "daemon is up and managed");
                    Ok(())
                }
                Err(_) => {
                    self.teardown().await;
                    Err(SupervisorError::ManagementStopped)
                }
            },
            _ = wait_for_exit(&mut exited) => {
                let exit = self.process.wait().await;
                self.teardown().await;
                match exit {
                    Err(e) => Err(e.into()),
                    Ok(()) => Err(SupervisorError::DiedTooEarly),
                }
            }
            _ = tokio::time::sleep(MANAGEMENT_WAIT_TIMEOUT) => {
                warn!(
                    timeout = ?MANAGEMENT_WAIT_TIMEOUT,
                    "daemon never connected to the management interface"
                );
                self.teardown().await;
                Err(SupervisorError::ConnectionTimeout)
            }
        }
    }

    /// Blocks until the daemon process exits.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Exited`] when the run ended in failure.
    pub async fn wait(&self) -> Result<(), ProcessError> {
        self.process.wait().await
    }

    /// Stops the run: daemon process and management channel concurrently,
    /// then the tunnel.
    ///
    /// Stopping the process first would lose the middlewares' stop-time
    /// commands; stopping management first would miss the daemon's final
    /// state notifications. Neither ordering dominates, so both halves run
    /// at once and each copes with the other side going away.
    pub async fn stop(&mut self) {
        tokio::join!(self.process.stop(), self.management.stop());
        self.tunnel.stop();
    }

    /// The tunnel device this run is attached to.
    pub fn device_name(&self) -> String {
        self.tunnel.device_name()
    }

    async fn teardown(&mut self) {
        self.process.stop().await;
        self.management.stop().await;
        self.tunnel.stop();
    }
}

async fn wait_for_exit(exited: &mut watch::Receiver<Option<ExitOutcome>>) {
    let _ = exited.wait_for(|outcome| outcome.is_some()).await;
}

/// Errors from bringing the assembled daemon up.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Tunnel device setup failed.
    #[error("tunnel setup failed: {0}")]
    Tunnel(#[from] TunnelError),

    /// The configuration could not be rendered into arguments.
    #[error("invalid daemon configuration: {0}")]
    Config(#[from] ConfigError),

    /// Launching or running the daemon process failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The management channel could not be set up.
    #[error(transparent)]
    Management(#[from] ManagementError),

    /// The daemon exited cleanly before connecting to the management
    /// interface, typically a sign of rejected arguments.
    #[error("daemon process exited before the management connection was established")]
    DiedTooEarly,

    /// The daemon stayed alive but never dialed back in time.
    #[error("timed out waiting for the daemon to connect to the management interface")]
    ConnectionTimeout,

    /// The management channel shut down while waiting for the daemon.
    #[error("management channel stopped before the daemon connected")]
    ManagementStopped,
}
