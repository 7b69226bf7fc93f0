//! Daemon configuration seam.

use std::net::SocketAddr;

use thiserror::Error;

/// Source of the daemon's command-line arguments.
///
/// The supervisor binds the management listener before the daemon is
/// launched and injects the chosen address through
/// [`VpnConfig::set_management_address`]; the rendered arguments must direct
/// the daemon to dial back to it.
pub trait VpnConfig: Send + Sync {
    /// Records the management listener address for argument rendering.
    fn set_management_address(&mut self, address: SocketAddr);

    /// Renders the full argument vector, executable first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration cannot be expressed
    /// as a valid argument list.
    fn to_arguments(&self) -> Result<Vec<String>, ConfigError>;
}

/// Invalid daemon configuration.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct ConfigError(pub String);
