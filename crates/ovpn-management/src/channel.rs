//! Management channel to the OpenVPN daemon.
//!
//! The channel:
//! - Binds a loopback listener before the daemon is launched, so the bound
//!   address can be injected into the daemon's arguments
//! - Accepts a single inbound connection from the daemon
//! - Runs a dedicated read loop that demultiplexes unsolicited event lines
//!   from command responses
//! - Serializes outbound commands issued concurrently by middlewares
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  bind 127.0.0.1:0   ┌──────────────┐
//! │  Management  │────────────────────▶│ TcpListener  │
//! └──────┬───────┘                     └──────┬───────┘
//!        │                                    │ accept() (daemon dials back)
//!        │ start hooks                        ▼
//!        │ (registration order)        ┌──────────────┐    events   ┌─────────────┐
//!        └───────────────────────────▶ │  read loop   │────────────▶│ Middlewares │
//!                                      └──────┬───────┘             └──────┬──────┘
//!                                             │ responses                  │ commands
//!                                             ▼                            ▼
//!                                      ┌──────────────────────────────────────┐
//!                                      │ pending command slot (one in flight) │
//!                                      └──────────────────────────────────────┘
//! ```
//!
//! The protocol has no request identifiers: responses are matched to
//! commands purely by arrival order, so exactly one command may await a
//! response at any time. The command mutex is held by the issuing task for
//! the full write-then-await span and is never taken by the read loop,
//! which keeps the loop free to deliver the response that unblocks the
//! mutex holder; middlewares may therefore issue commands from tasks
//! spawned out of their own event handling without deadlocking.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use async_trait::async_trait;

use crate::middleware::{CommandWriter, Middleware};

/// Prefix distinguishing unsolicited event lines from command responses.
const EVENT_PREFIX: char = '>';

/// Terminator line of a multi-line command response.
const MULTILINE_TERMINATOR: &str = "END";

/// Management channel to a single OpenVPN daemon.
///
/// Owns the accepted socket for its lifetime. Middlewares are an immutable
/// ordered sequence captured at construction; dispatch needs no locking.
pub struct Management {
    /// Protocol observers, in registration order.
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,

    /// Shared command/response state.
    channel: Arc<ChannelInner>,

    /// One-shot shutdown trigger for the acceptor and read loop.
    cancel: CancellationToken,

    /// Completion barrier for the background tasks.
    tasks: TaskTracker,

    /// Readiness flag, set once the daemon has connected and all middleware
    /// start hooks have run.
    connected_tx: Arc<watch::Sender<bool>>,
    connected_rx: watch::Receiver<bool>,

    /// Listen address chosen by the OS, resolved before the daemon launches.
    bound_addr: Option<SocketAddr>,

    /// Guards the teardown hooks so repeated stops are no-ops.
    stopped: AtomicBool,
}

impl Management {
    /// Creates a channel with the given observers.
    ///
    /// Registration order is dispatch order; the first middleware to claim
    /// a line short-circuits the rest.
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        let (connected_tx, connected_rx) = watch::channel(false);
        Self {
            middlewares: Arc::new(middlewares),
            channel: Arc::new(ChannelInner::new()),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            connected_tx: Arc::new(connected_tx),
            connected_rx,
            bound_addr: None,
            stopped: AtomicBool::new(false),
        }
    }

    /// Binds the loopback listener and starts waiting for the daemon.
    ///
    /// Returns the bound address immediately so the caller can inject it
    /// into the daemon's arguments; actual readiness is observed through
    /// [`Management::connected_receiver`]. The acceptor takes exactly one
    /// connection, starts the read loop, then runs every middleware's
    /// `start` hook in registration order (hook failures are logged, never
    /// fatal) before flipping the readiness flag.
    pub async fn wait_for_connection(&mut self) -> Result<SocketAddr, ManagementError> {
        if self.bound_addr.is_some() {
            return Err(ManagementError::AlreadyStarted);
        }

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| ManagementError::Bind(e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ManagementError::Bind(e.to_string()))?;
        self.bound_addr = Some(addr);

        info!(address = %addr, "management interface listening");

        let cancel = self.cancel.clone();
        let tasks = self.tasks.clone();
        let channel = Arc::clone(&self.channel);
        let middlewares = Arc::clone(&self.middlewares);
        let connected_tx = Arc::clone(&self.connected_tx);

        self.tasks.spawn(async move {
            let stream = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("management channel stopped before the daemon connected");
                    return;
                }
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        info!(peer = %peer, "daemon connected to management interface");
                        stream
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept management connection");
                        return;
                    }
                }
            };

            // One connection per channel lifetime.
            drop(listener);

            let (reader, writer) = stream.into_split();
            *channel.writer.lock().await = Some(writer);

            // The read loop must be live before any start hook issues a
            // command, otherwise the hook would wait forever for its
            // response.
            tasks.spawn(read_loop(
                reader,
                Arc::clone(&channel),
                Arc::clone(&middlewares),
                cancel.clone(),
            ));

            let commands: Arc<dyn CommandWriter> = Arc::new(ManagementCommands {
                inner: Arc::clone(&channel),
            });
            for middleware in middlewares.iter() {
                if let Err(e) = middleware.start(Arc::clone(&commands)).await {
                    warn!(error = %e, "middleware start hook failed");
                }
            }

            if !cancel.is_cancelled() {
                let _ = connected_tx.send(true);
            }
        });
        self.tasks.close();

        Ok(addr)
    }

    /// The address the daemon must dial back to, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }

    /// Readiness signal: becomes `true` once the daemon has connected and
    /// the middleware start hooks have completed.
    pub fn connected_receiver(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    /// A cheap-to-clone handle for issuing commands over this channel.
    pub fn command_writer(&self) -> Arc<dyn CommandWriter> {
        Arc::new(ManagementCommands {
            inner: Arc::clone(&self.channel),
        })
    }

    /// Tears the channel down.
    ///
    /// Runs every middleware's `stop` hook (best effort, while the read
    /// loop is still able to deliver responses), then closes the socket and
    /// waits for the read loop to finish; after `stop` returns, no further
    /// middleware callbacks will fire. Idempotent.
    pub async fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let commands = self.command_writer();
            for middleware in self.middlewares.iter() {
                if let Err(e) = middleware.stop(Arc::clone(&commands)).await {
                    warn!(error = %e, "middleware stop hook failed");
                }
            }
        }

        self.cancel.cancel();
        self.channel.close();

        if self.bound_addr.is_some() {
            self.tasks.wait().await;
        }

        // Dropping the write half closes our side of the socket.
        self.channel.writer.lock().await.take();
    }
}

/// The one in-flight command's response destination.
enum PendingResponse {
    /// Completed by the first non-event line.
    Single(oneshot::Sender<String>),

    /// Accumulates lines until the terminator.
    Multi {
        lines: Vec<String>,
        respond_to: oneshot::Sender<Vec<String>>,
    },
}

/// State shared between the read loop and command issuers.
struct ChannelInner {
    /// Held by the issuing task for the full write-then-await span. The
    /// read loop never takes this lock.
    command_lock: Mutex<()>,

    /// Write half of the accepted socket, installed on accept.
    writer: Mutex<Option<OwnedWriteHalf>>,

    /// Where the read loop routes response lines.
    pending: Mutex<Option<PendingResponse>>,

    /// Set once the connection is gone; commands fail fast afterwards.
    closed: AtomicBool,
}

impl ChannelInner {
    fn new() -> Self {
        Self {
            command_lock: Mutex::new(()),
            writer: Mutex::new(None),
            pending: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Command-writer handle backed by a live channel.
#[derive(Clone)]
struct ManagementCommands {
    inner: Arc<ChannelInner>,
}

impl ManagementCommands {
    async fn write_line(&self, command: &str) -> Result<(), CommandError> {
        let mut writer = self.inner.writer.lock().await;
        let writer = writer.as_mut().ok_or(CommandError::NotConnected)?;
        writer
            .write_all(format!("{command}\n").as_bytes())
            .await
            .map_err(|e| CommandError::Io(e.to_string()))
    }

    async fn issue(&self, command: &str, pending: PendingResponse) -> Result<(), CommandError> {
        // The closed check and the install must be atomic with respect to
        // the read loop's exit sequence (close, then drain the slot): a
        // slot installed after the final drain would never be released.
        {
            let mut slot = self.inner.pending.lock().await;
            if self.inner.is_closed() {
                return Err(CommandError::ConnectionClosed);
            }
            *slot = Some(pending);
        }

        if let Err(e) = self.write_line(command).await {
            self.inner.pending.lock().await.take();
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl CommandWriter for ManagementCommands {
    async fn single_line_command(&self, command: &str) -> Result<String, CommandError> {
        let _guard = self.inner.command_lock.lock().await;

        let (tx, rx) = oneshot::channel();
        self.issue(command, PendingResponse::Single(tx)).await?;

        let line = rx.await.map_err(|_| CommandError::ConnectionClosed)?;
        parse_single_response(&line)
    }

    async fn multi_line_command(&self, command: &str) -> Result<Vec<String>, CommandError> {
        let _guard = self.inner.command_lock.lock().await;

        let (tx, rx) = oneshot::channel();
        self.issue(
            command,
            PendingResponse::Multi {
                lines: Vec::new(),
                respond_to: tx,
            },
        )
        .await?;

        rx.await.map_err(|_| CommandError::ConnectionClosed)
    }
}

/// Interprets the single response line of a one-line command.
fn parse_single_response(line: &str) -> Result<String, CommandError> {
    if let Some(message) = line.strip_prefix("SUCCESS:") {
        Ok(message.trim().to_string())
    } else if let Some(message) = line.strip_prefix("ERROR:") {
        Err(CommandError::Rejected(message.trim().to_string()))
    } else {
        Err(CommandError::UnexpectedResponse(line.to_string()))
    }
}

/// Single point of truth for routing inbound lines.
///
/// Runs for the connection's lifetime; terminates on socket close, read
/// error, or cancellation. On exit the channel is marked disconnected and
/// any pending command caller is released with a connection-closed error.
async fn read_loop(
    reader: OwnedReadHalf,
    channel: Arc<ChannelInner>,
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("management read loop cancelled");
                break;
            }
            result = lines.next_line() => match result {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("daemon closed the management connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read from management connection");
                    break;
                }
            }
        };

        let line = line.trim_end_matches('\r');
        if line.starts_with(EVENT_PREFIX) {
            dispatch_event(&middlewares, line);
        } else {
            route_response(&channel, line).await;
        }
    }

    channel.close();
    // Releases a caller blocked mid-command: dropping the sender fails the
    // receive with a connection-closed error instead of blocking forever.
    channel.pending.lock().await.take();
}

/// Offers an event line to each middleware until one claims it.
fn dispatch_event(middlewares: &[Arc<dyn Middleware>], line: &str) {
    for middleware in middlewares {
        match middleware.consume_line(line) {
            Ok(false) => continue,
            Ok(true) => return,
            Err(e) => {
                // The line was ours to interpret; the error is surfaced
                // here rather than aborting the loop.
                warn!(error = %e, line, "middleware failed to process event line");
                return;
            }
        }
    }
    debug!(line, "unclaimed event line");
}

/// Appends a response line to the in-flight command, completing it when
/// the protocol says so.
async fn route_response(channel: &ChannelInner, line: &str) {
    let mut pending = channel.pending.lock().await;
    match pending.take() {
        Some(PendingResponse::Single(respond_to)) => {
            let _ = respond_to.send(line.to_string());
        }
        Some(PendingResponse::Multi {
            mut lines,
            respond_to,
        }) => {
            if line == MULTILINE_TERMINATOR {
                let _ = respond_to.send(lines);
            } else {
                lines.push(line.to_string());
                *pending = Some(PendingResponse::Multi { lines, respond_to });
            }
        }
        None => {
            debug!(line, "response line with no command in flight");
        }
    }
}

/// Errors that can occur while operating the channel itself.
#[derive(Error, Debug)]
pub enum ManagementError {
    /// The loopback listener could not be bound.
    #[error("failed to bind management listener: {0}")]
    Bind(String),

    /// `wait_for_connection` was called twice.
    #[error("management channel already started")]
    AlreadyStarted,
}

/// Errors surfaced to a command issuer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The daemon has not connected yet.
    #[error("management channel is not connected")]
    NotConnected,

    /// The connection closed before or while awaiting the response.
    #[error("management connection closed while command was in flight")]
    ConnectionClosed,

    /// The daemon reported a protocol-level failure.
    #[error("daemon rejected command: {0}")]
    Rejected(String),

    /// The response line matched neither `SUCCESS:` nor `ERROR:`.
    #[error("unexpected response line: {0}")]
    UnexpectedResponse(String),

    /// Writing the command failed.
    #[error("failed to write command: {0}")]
    Io(String),
}
