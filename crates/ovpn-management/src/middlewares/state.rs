//! Lifecycle-state tracking middleware.
//!
//! Parses `>STATE:` notifications into [`VpnState`] and republishes them to
//! subscribers. On start it replays the daemon's full state history (plus a
//! synthetic process-started state first) before any live notification can
//! be observed, so late subscribers still see a gap-free sequence.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use ovpn_core::{ParseError, VpnState};

use crate::middleware::{CommandWriter, Middleware, MiddlewareError};

const STATE_PREFIX: &str = ">STATE:";

/// Enables live state notifications and dumps the full history in one
/// command: the response is the historical transitions terminated by `END`.
const STATE_ON_ALL: &str = "state on all";

/// Callback receiving each observed state.
pub type StateSubscriber = Box<dyn Fn(VpnState) + Send + Sync>;

/// Middleware tracking daemon lifecycle states.
#[derive(Default)]
pub struct StateMiddleware {
    subscribers: Mutex<Vec<StateSubscriber>>,
}

impl StateMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback invoked for every observed state, historical
    /// replay included.
    pub fn subscribe(&self, subscriber: impl Fn(VpnState) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Box::new(subscriber));
    }

    fn deliver(&self, state: VpnState) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for subscriber in subscribers.iter() {
            subscriber(state);
        }
    }
}

#[async_trait]
impl Middleware for StateMiddleware {
    async fn start(&self, commands: Arc<dyn CommandWriter>) -> Result<(), MiddlewareError> {
        // Synthetic state first: the process is running before the daemon
        // reports anything.
        self.deliver(VpnState::ProcessStarted);

        let history = commands.multi_line_command(STATE_ON_ALL).await?;
        for line in &history {
            self.deliver(parse_state_body(line)?);
        }
        Ok(())
    }

    async fn stop(&self, _commands: Arc<dyn CommandWriter>) -> Result<(), MiddlewareError> {
        Ok(())
    }

    fn consume_line(&self, line: &str) -> Result<bool, MiddlewareError> {
        let Some(body) = line.strip_prefix(STATE_PREFIX) else {
            return Ok(false);
        };
        self.deliver(parse_state_body(body)?);
        Ok(true)
    }
}

/// Parses the body of a state notification: `<unix-ts>,<STATE_NAME>,<freeform...>`.
fn parse_state_body(body: &str) -> Result<VpnState, ParseError> {
    let mut fields = body.splitn(3, ',');
    let _timestamp = fields.next();
    let name = fields
        .next()
        .ok_or_else(|| ParseError::malformed("state name", "missing field"))?;
    VpnState::from_name(name)
}
