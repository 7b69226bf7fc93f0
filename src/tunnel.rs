//! Network device seam.

use thiserror::Error;

use crate::config::VpnConfig;

/// Platform-specific tunnel device the daemon attaches to.
///
/// Set up before the management listener is bound, torn down after every
/// failed or completed run. `stop` must be safe to call even when `setup`
/// never ran or already failed.
pub trait Tunnel: Send + Sync {
    /// Prepares the device for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError`] when the device cannot be created or
    /// configured; the supervisor aborts the start in that case.
    fn setup(&mut self, config: &dyn VpnConfig) -> Result<(), TunnelError>;

    /// Releases the device. Must be idempotent.
    fn stop(&mut self);

    /// The device name the daemon should use (e.g. `tun0`).
    fn device_name(&self) -> String;
}

/// Tunnel device failure.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct TunnelError(pub String);
