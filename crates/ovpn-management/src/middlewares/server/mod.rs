//! Shared client-event base for server-role middlewares.
//!
//! The OpenVPN server announces client transitions as a run of `>CLIENT:`
//! lines: a header naming the transition and the client, zero or more
//! environment entries, and a terminator. This module assembles those runs
//! into [`ClientEvent`]s and publishes each completed event exactly once to
//! the registered handler.
//!
//! Handlers run on their own spawned task and receive the channel's command
//! writer, so they can accept/deny clients or push filters without blocking
//! the read loop that delivers their command responses.

pub mod credentials;
pub mod filter;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::warn;

use ovpn_core::{ClientEvent, ClientEventKind, ParseError};

use crate::channel::CommandError;
use crate::middleware::{CommandWriter, Middleware, MiddlewareError};

const CLIENT_PREFIX: &str = ">CLIENT:";

/// Future returned by a client-event handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handler invoked once per completed client event.
pub type ClientEventHandler =
    Arc<dyn Fn(ClientEvent, Arc<dyn CommandWriter>) -> HandlerFuture + Send + Sync>;

/// In-progress events, keyed by (client id, client key).
///
/// Environment lines carry no identifier of their own, so the most recently
/// opened key receives them.
#[derive(Default)]
struct EventAssembly {
    pending: HashMap<(u64, u64), ClientEvent>,
    current: Option<(u64, u64)>,
}

/// Middleware assembling `>CLIENT:` notification runs into client events.
pub struct ClientEventMiddleware {
    handler: ClientEventHandler,
    commands: Mutex<Option<Arc<dyn CommandWriter>>>,
    assembly: Mutex<EventAssembly>,
}

impl ClientEventMiddleware {
    pub fn new(handler: ClientEventHandler) -> Self {
        Self {
            handler,
            commands: Mutex::new(None),
            assembly: Mutex::new(EventAssembly::default()),
        }
    }

    fn open_event(&self, kind: ClientEventKind, client_id: u64, client_key: u64) {
        let mut assembly = lock(&self.assembly);
        let key = (client_id, client_key);
        assembly
            .pending
            .insert(key, ClientEvent::new(kind, client_id, client_key));
        assembly.current = Some(key);
    }

    fn append_env(&self, name: &str, value: &str) -> Result<(), ParseError> {
        let mut assembly = lock(&self.assembly);
        let key = assembly
            .current
            .ok_or_else(|| ParseError::malformed("client event", "ENV entry with no open event"))?;
        if let Some(event) = assembly.pending.get_mut(&key) {
            event.env.insert(name.to_string(), value.to_string());
        }
        Ok(())
    }

    fn complete_event(&self) -> Result<(), ParseError> {
        let event = {
            let mut assembly = lock(&self.assembly);
            let key = assembly.current.take().ok_or_else(|| {
                ParseError::malformed("client event", "ENV list ended with no open event")
            })?;
            assembly.pending.remove(&key)
        };
        let Some(event) = event else {
            return Ok(());
        };

        let commands = lock(&self.commands).clone();
        let Some(commands) = commands else {
            warn!(
                client_id = event.client_id,
                "dropping client event: channel not ready"
            );
            return Ok(());
        };

        // Published once, on its own task: handlers issue commands and must
        // not block the read loop that will deliver their responses.
        tokio::spawn((self.handler)(event, commands));
        Ok(())
    }
}

#[async_trait]
impl Middleware for ClientEventMiddleware {
    async fn start(&self, commands: Arc<dyn CommandWriter>) -> Result<(), MiddlewareError> {
        *lock(&self.commands) = Some(commands);
        Ok(())
    }

    async fn stop(&self, _commands: Arc<dyn CommandWriter>) -> Result<(), MiddlewareError> {
        lock(&self.commands).take();
        Ok(())
    }

    fn consume_line(&self, line: &str) -> Result<bool, MiddlewareError> {
        let Some(body) = line.strip_prefix(CLIENT_PREFIX) else {
            return Ok(false);
        };

        let (kind, rest) = body.split_once(',').unwrap_or((body, ""));
        match kind {
            "CONNECT" | "REAUTH" => {
                let (cid, kid) = rest
                    .split_once(',')
                    .ok_or_else(|| ParseError::malformed("client event", "missing client key"))?;
                let event_kind = if kind == "CONNECT" {
                    ClientEventKind::Connect
                } else {
                    ClientEventKind::Reauth
                };
                self.open_event(event_kind, parse_id("client id", cid)?, parse_id("client key", kid)?);
            }
            "ESTABLISHED" | "DISCONNECT" => {
                // These carry the client id only; the key defaults to 0.
                let cid = rest.split(',').next().unwrap_or("");
                let event_kind = if kind == "ESTABLISHED" {
                    ClientEventKind::Established
                } else {
                    ClientEventKind::Disconnect
                };
                self.open_event(event_kind, parse_id("client id", cid)?, 0);
            }
            "ENV" => {
                if rest == "END" {
                    self.complete_event()?;
                } else {
                    let (name, value) = rest.split_once('=').unwrap_or((rest, ""));
                    self.append_env(name, value)?;
                }
            }
            other => {
                return Err(ParseError::malformed(
                    "client event",
                    format!("unknown event kind: {other}"),
                )
                .into());
            }
        }
        Ok(true)
    }
}

/// Issues the command accepting a client, addressed by id and key.
pub async fn client_accept(
    commands: &dyn CommandWriter,
    client_id: u64,
    client_key: u64,
) -> Result<(), CommandError> {
    commands
        .single_line_command(&format!("client-auth-nt {client_id} {client_key}"))
        .await
        .map(drop)
}

/// Issues the command denying a client with the given reason.
pub async fn client_deny(
    commands: &dyn CommandWriter,
    client_id: u64,
    client_key: u64,
    reason: &str,
) -> Result<(), CommandError> {
    commands
        .single_line_command(&format!("client-deny {client_id} {client_key} \"{reason}\""))
        .await
        .map(drop)
}

fn parse_id(field: &str, raw: &str) -> Result<u64, ParseError> {
    raw.parse::<u64>()
        .map_err(|e| ParseError::malformed(field, e.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
