//! Server-role client events.

use std::collections::HashMap;

/// The transition a client event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEventKind {
    /// A client is connecting and must be accepted or denied.
    Connect,
    /// A connected client is re-authenticating.
    Reauth,
    /// The client's connection was fully established.
    Established,
    /// The client disconnected.
    Disconnect,
}

/// A complete server-role notification bundle for one client transition.
///
/// Assembled incrementally from a run of `>CLIENT:` lines (header, zero or
/// more environment entries, terminator), published once to the registered
/// handler, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEvent {
    /// What happened to the client.
    pub kind: ClientEventKind,

    /// Daemon-assigned client identifier.
    pub client_id: u64,

    /// Daemon-assigned key/session identifier (0 where the daemon omits it).
    pub client_key: u64,

    /// Environment entries accompanying the event (e.g. "username",
    /// "password"). Keys are unique.
    pub env: HashMap<String, String>,
}

impl ClientEvent {
    /// Creates an event with an empty environment.
    pub fn new(kind: ClientEventKind, client_id: u64, client_key: u64) -> Self {
        Self {
            kind,
            client_id,
            client_key,
            env: HashMap::new(),
        }
    }

    /// Looks up an environment entry, defaulting to the empty string.
    pub fn env_value(&self, key: &str) -> &str {
        self.env.get(key).map(String::as_str).unwrap_or("")
    }
}
