//! Embeddable OpenVPN runner.
//!
//! Launches and supervises an OpenVPN daemon process and drives it over its
//! management interface: the listener is bound before the daemon starts, the
//! daemon dials back, and protocol middlewares (state tracking, traffic
//! counters, client authentication, packet filters) observe and steer the
//! connection from there.
//!
//! The crate is a library, not a binary: embedders supply the tunnel device,
//! the daemon configuration, and the launch command through the [`Tunnel`],
//! [`VpnConfig`], and [`CommandFactory`] seams.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod process;
pub mod supervisor;
pub mod tunnel;

pub use config::{ConfigError, VpnConfig};
pub use process::{OpenvpnProcess, SupervisorError};
pub use supervisor::{CommandFactory, ProcessError, ProcessSupervisor};
pub use tunnel::{Tunnel, TunnelError};

// Re-exports so embedders need only this crate for the common path.
pub use ovpn_core::{ClientEvent, ClientEventKind, ParseError, TrafficCounters, VpnState};
pub use ovpn_management::{CommandWriter, Management, ManagementError, Middleware};
