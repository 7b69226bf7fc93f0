//! Protocol observer ("middleware") seam.
//!
//! A middleware is a stateful observer of the management protocol that may
//! also issue commands. The management channel offers every unsolicited
//! event line to its middlewares in registration order; the first one that
//! claims a line short-circuits the rest.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use ovpn_core::ParseError;

use crate::channel::CommandError;

/// Write side of the management channel, as seen by middlewares.
///
/// Implementations serialize access internally: at most one command is in
/// flight at a time, and response lines are correlated purely by arrival
/// order. Both methods suspend until the matching response arrives or the
/// connection closes.
#[async_trait]
pub trait CommandWriter: Send + Sync {
    /// Issues a command whose response is a single `SUCCESS:`/`ERROR:` line.
    ///
    /// Returns the text following `SUCCESS:` on success.
    async fn single_line_command(&self, command: &str) -> Result<String, CommandError>;

    /// Issues a command whose response is a run of lines terminated by `END`.
    ///
    /// Returns the intervening lines in arrival order.
    async fn multi_line_command(&self, command: &str) -> Result<Vec<String>, CommandError>;
}

/// A management-protocol observer.
///
/// Lifecycle hooks run once each, in registration order: `start` when the
/// daemon connection becomes ready (the read loop is already running, so
/// hooks may issue commands), `stop` during channel teardown.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Called once when the channel becomes ready.
    async fn start(&self, commands: Arc<dyn CommandWriter>) -> Result<(), MiddlewareError>;

    /// Called once during channel teardown.
    async fn stop(&self, commands: Arc<dyn CommandWriter>) -> Result<(), MiddlewareError>;

    /// Offers one unsolicited event line to this middleware.
    ///
    /// Returns `Ok(false)` if the line is not ours, `Ok(true)` if it was
    /// consumed. `Err(_)` means the line belonged to this middleware's
    /// prefix family but was malformed: the read loop logs the error and
    /// still treats the line as consumed.
    fn consume_line(&self, line: &str) -> Result<bool, MiddlewareError>;
}

/// Errors a middleware can surface to the channel.
#[derive(Error, Debug)]
pub enum MiddlewareError {
    /// A recognized-prefix line carried a malformed payload.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A command issued by the middleware failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}
