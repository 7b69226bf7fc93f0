//! Credential authentication middleware (server role).
//!
//! Intercepts client connect/re-authenticate events and accepts or denies
//! each client through a pluggable validator callback. Established and
//! disconnect events are informational only.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use ovpn_core::{ClientEvent, ClientEventKind};

use crate::channel::CommandError;
use crate::middleware::{CommandWriter, Middleware, MiddlewareError};

use super::{client_accept, client_deny, ClientEventHandler, ClientEventMiddleware};

/// Validation failure reported by the embedder's credential check.
pub type ValidatorError = Box<dyn std::error::Error + Send + Sync>;

/// Credential check supplied by the embedder: `(client id, client key,
/// username, password)` → accepted. An `Err` denies the client with an
/// internal-error message rather than propagating.
pub type Validator = Arc<dyn Fn(u64, u64, &str, &str) -> Result<bool, ValidatorError> + Send + Sync>;

/// Middleware authorizing incoming clients by the given validator.
pub struct CredentialsMiddleware {
    base: ClientEventMiddleware,
}

impl CredentialsMiddleware {
    pub fn new(validator: Validator) -> Self {
        let handler: ClientEventHandler = Arc::new(move |event, commands| {
            let validator = Arc::clone(&validator);
            Box::pin(async move {
                handle_client_event(&validator, commands.as_ref(), &event).await;
            })
        });
        Self {
            base: ClientEventMiddleware::new(handler),
        }
    }
}

#[async_trait]
impl Middleware for CredentialsMiddleware {
    async fn start(&self, commands: Arc<dyn CommandWriter>) -> Result<(), MiddlewareError> {
        self.base.start(commands).await
    }

    async fn stop(&self, commands: Arc<dyn CommandWriter>) -> Result<(), MiddlewareError> {
        self.base.stop(commands).await
    }

    fn consume_line(&self, line: &str) -> Result<bool, MiddlewareError> {
        self.base.consume_line(line)
    }
}

async fn handle_client_event(
    validator: &Validator,
    commands: &dyn CommandWriter,
    event: &ClientEvent,
) {
    match event.kind {
        ClientEventKind::Connect | ClientEventKind::Reauth => {
            if let Err(e) = authenticate(validator, commands, event).await {
                error!(
                    client_id = event.client_id,
                    error = %e,
                    "unable to authenticate client"
                );
            }
        }
        ClientEventKind::Established => {
            info!(client_id = event.client_id, "client connection established");
        }
        ClientEventKind::Disconnect => {
            info!(client_id = event.client_id, "client disconnected");
        }
    }
}

/// Runs the credential check and issues exactly one accept or deny command.
async fn authenticate(
    validator: &Validator,
    commands: &dyn CommandWriter,
    event: &ClientEvent,
) -> Result<(), CommandError> {
    let (cid, kid) = (event.client_id, event.client_key);
    let username = event.env_value("username");
    let password = event.env_value("password");

    info!(client_id = cid, client_key = kid, username, "authenticating client");

    if username.is_empty() || password.is_empty() {
        return client_deny(commands, cid, kid, "missing username or password").await;
    }

    match validator(cid, kid, username, password) {
        Err(e) => {
            error!(client_id = cid, error = %e, "credentials validator failed");
            client_deny(commands, cid, kid, "internal error").await
        }
        Ok(false) => client_deny(commands, cid, kid, "wrong username or password").await,
        Ok(true) => client_accept(commands, cid, kid).await,
    }
}
