//! Core domain types for supervising an OpenVPN daemon.
//!
//! This crate holds the vocabulary shared between the process supervisor
//! and the management-interface engine: daemon lifecycle states, traffic
//! counters, and client (server-role) events, together with the parse
//! errors their notification lines can produce.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod event;
pub mod state;
pub mod stats;

// Re-exports for convenience
pub use error::ParseError;
pub use event::{ClientEvent, ClientEventKind};
pub use state::VpnState;
pub use stats::TrafficCounters;
