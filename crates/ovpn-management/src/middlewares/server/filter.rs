//! Per-client packet-filter middleware (server role).
//!
//! On every client connect or re-authentication, renders a fixed allow/block
//! subnet program and pushes it to the daemon. The server must have been
//! started with the `--management-client-pf` directive so that client
//! traffic is required to conform to the pushed filter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use ovpn_core::{ClientEvent, ClientEventKind};

use crate::channel::CommandError;
use crate::middleware::{CommandWriter, Middleware, MiddlewareError};

use super::{ClientEventHandler, ClientEventMiddleware};

/// Middleware pushing a per-client allow/block subnet filter.
pub struct FilterMiddleware {
    base: ClientEventMiddleware,
}

impl FilterMiddleware {
    /// Creates the middleware; `allow` and `block` are ordered subnet lists
    /// (e.g. `"10.0.0.0/8"`). Empty lists still push the fixed skeleton.
    pub fn new(allow: Vec<String>, block: Vec<String>) -> Self {
        let allow = Arc::new(allow);
        let block = Arc::new(block);

        let handler: ClientEventHandler = Arc::new(move |event, commands| {
            let allow = Arc::clone(&allow);
            let block = Arc::clone(&block);
            Box::pin(async move {
                handle_client_event(&allow, &block, commands.as_ref(), &event).await;
            })
        });
        Self {
            base: ClientEventMiddleware::new(handler),
        }
    }
}

#[async_trait]
impl Middleware for FilterMiddleware {
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
    allow: &[String],
    block: &[String],
    commands: &dyn CommandWriter,
    event: &ClientEvent,
) {
    match event.kind {
        ClientEventKind::Connect | ClientEventKind::Reauth => {
            if let Err(e) = push_filter(commands, event.client_id, allow, block).await {
                error!(
                    client_id = event.client_id,
                    error = %e,
                    "unable to push packet filter for client"
                );
            }
        }
        ClientEventKind::Established | ClientEventKind::Disconnect => {}
    }
}

/// Transmits the rendered filter program as one command.
async fn push_filter(
    commands: &dyn CommandWriter,
    client_id: u64,
    allow: &[String],
    block: &[String],
) -> Result<(), CommandError> {
    commands
        .single_line_command(&render_filter(client_id, allow, block))
        .await
        .map(drop)
}

/// Renders the exact multi-line filter text the daemon expects: an opening
/// directive naming the client, a default-drop clients section, an
/// accept-all subnets section, one `+` line per allow entry, one `-` line
/// per block entry, and the closing markers.
fn render_filter(client_id: u64, allow: &[String], block: &[String]) -> String {
    let mut text = format!("client-pf {client_id}\n[CLIENTS DROP]\n[SUBNETS ACCEPT]\n");
    for subnet in allow {
        text.push('+');
        text.push_str(subnet);
        text.push('\n');
    }
    for subnet in block {
        text.push('-');
        text.push_str(subnet);
        text.push('\n');
    }
    text.push_str("[END]\nEND");
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::MockCommandWriter;

    fn subnets(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_lists_render_the_bare_skeleton() {
        assert_eq!(
            render_filter(0, &[], &[]),
            "client-pf 0\n\
             [CLIENTS DROP]\n\
             [SUBNETS ACCEPT]\n\
             [END]\n\
             END"
        );
    }

    #[test]
    fn test_allow_entries_render_plus_lines() {
        let allow = subnets(&["1.1.1.1/32", "2.2.2.0/24"]);
        assert_eq!(
            render_filter(0, &allow, &[]),
            "client-pf 0\n\
             [CLIENTS DROP]\n\
             [SUBNETS ACCEPT]\n\
             +1.1.1.1/32\n\
             +2.2.2.0/24\n\
             [END]\n\
             END"
        );
    }

    #[test]
    fn test_block_entries_render_minus_lines() {
        let block = subnets(&["1.1.1.1/32", "2.2.2.0/24"]);
        assert_eq!(
            render_filter(0, &[], &block),
            "client-pf 0\n\
             [CLIENTS DROP]\n\
             [SUBNETS ACCEPT]\n\
             -1.1.1.1/32\n\
             -2.2.2.0/24\n\
             [END]\n\
             END"
        );
    }

    #[test]
    fn test_allow_lines_precede_block_lines() {
        let allow = subnets(&["1.1.1.1/32", "2.2.2.0/24"]);
        let block = subnets(&["3.3.3.3/32", "4.4.4.0/24"]);
        assert_eq!(
            render_filter(0, &allow, &block),
            "client-pf 0\n\
             [CLIENTS DROP]\n\
             [SUBNETS ACCEPT]\n\
             +1.1.1.1/32\n\
             +2.2.2.0/24\n\
             -3.3.3.3/32\n\
             -4.4.4.0/24\n\
             [END]\n\
             END"
        );
    }

    #[tokio::test]
    async fn test_connect_event_pushes_one_filter_command() {
        let commands = MockCommandWriter::new();
        let allow = subnets(&["1.1.1.1/32"]);

        let event = ClientEvent::new(ClientEventKind::Connect, 5, 0);
        handle_client_event(&allow, &[], &commands, &event).await;

        assert_eq!(commands.command_count(), 1);
        assert_eq!(
            commands.last_command().as_deref(),
            Some(
                "client-pf 5\n\
                 [CLIENTS DROP]\n\
                 [SUBNETS ACCEPT]\n\
                 +1.1.1.1/32\n\
                 [END]\n\
                 END"
            )
        );
    }

    #[tokio::test]
    async fn test_informational_events_push_nothing() {
        let commands = MockCommandWriter::new();

        for kind in [ClientEventKind::Established, ClientEventKind::Disconnect] {
            let event = ClientEvent::new(kind, 5, 0);
            handle_client_event(&[], &[], &commands, &event).await;
        }

        assert_eq!(commands.command_count(), 0);
    }
}
