//! Management-interface engine for the OpenVPN daemon.
//!
//! This crate speaks the daemon's line-oriented local control protocol:
//! it accepts the single inbound control-socket connection, demultiplexes
//! unsolicited event notifications from synchronous command responses, fans
//! events out to an ordered set of independently-stateful observers
//! ("middlewares"), and serializes the commands those observers issue back.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod channel;
pub mod middleware;
pub mod middlewares;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use channel::{CommandError, Management, ManagementError};
pub use middleware::{CommandWriter, Middleware, MiddlewareError};
