//! Concrete management-protocol middlewares.
//!
//! - [`state::StateMiddleware`]: tracks daemon lifecycle states
//! - [`bytecount::BytecountMiddleware`]: periodic traffic counters
//! - [`server`]: server-role middlewares built on the shared client-event
//!   base: credential authentication and per-client packet filters

pub mod bytecount;
pub mod server;
pub mod state;
