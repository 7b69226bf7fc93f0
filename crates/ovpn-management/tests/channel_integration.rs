//! Integration tests for the management channel.
//!
//! These drive a real loopback TCP connection with a scripted fake daemon
//! on the far side, verifying command/response routing, event dispatch
//! ordering, middleware wiring, and disconnect behavior.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - the panic-free policy applies
//! to production code only.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use ovpn_core::VpnState;
use ovpn_management::middlewares::state::StateMiddleware;
use ovpn_management::{CommandError, CommandWriter, Management, Middleware, MiddlewareError};

/// Upper bound for any single await in these tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers
// ============================================================================

/// Scripted far side of the management connection.
struct FakeDaemon {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FakeDaemon {
    /// Dials back to the channel's bound address, as the daemon would.
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect to channel");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Reads the next command issued by the channel.
    async fn recv_command(&mut self) -> String {
        let mut line = String::new();
        timeout(TEST_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("command within timeout")
            .expect("read command");
        line.trim_end().to_string()
    }

    /// Writes one protocol line toward the channel.
    async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write line");
    }
}

/// Spawns a channel with the given middlewares and connects a fake daemon.
async fn connected_pair(middlewares: Vec<Arc<dyn Middleware>>) -> (Management, FakeDaemon) {
    let mut management = Management::new(middlewares);
    let addr = management
        .wait_for_connection()
        .await
        .expect("bind management listener");
    let daemon = FakeDaemon::connect(addr).await;
    (management, daemon)
}

/// Waits until the channel reports readiness.
async fn wait_connected(management: &Management) {
    let mut connected = management.connected_receiver();
    timeout(TEST_TIMEOUT, connected.wait_for(|ready| *ready))
        .await
        .expect("readiness within timeout")
        .expect("readiness signal");
}

/// Middleware that claims (or declines) every line and counts offers.
struct CountingMiddleware {
    consume: bool,
    offered: AtomicUsize,
    consumed: AtomicUsize,
}

impl CountingMiddleware {
    fn new(consume: bool) -> Arc<Self> {
        Arc::new(Self {
            consume,
            offered: AtomicUsize::new(0),
            consumed: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Middleware for CountingMiddleware {
    async fn start(&self, _commands: Arc<dyn CommandWriter>) -> Result<(), MiddlewareError> {
        Ok(())
    }

    async fn stop(&self, _commands: Arc<dyn CommandWriter>) -> Result<(), MiddlewareError> {
        Ok(())
    }

    fn consume_line(&self, _line: &str) -> Result<bool, MiddlewareError> {
        self.offered.fetch_add(1, Ordering::SeqCst);
        if self.consume {
            self.consumed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(self.consume)
    }
}

// ============================================================================
// Command/Response Tests
// ============================================================================

#[tokio::test]
async fn test_single_line_command_round_trip() {
    let (management, mut daemon) = connected_pair(Vec::new()).await;
    wait_connected(&management).await;

    let commands = management.command_writer();
    let issue = tokio::spawn(async move { commands.single_line_command("pid").await });

    assert_eq!(daemon.recv_command().await, "pid");
    daemon.send_line("SUCCESS: pid=4242").await;

    let response = timeout(TEST_TIMEOUT, issue)
        .await
        .expect("response within timeout")
        .expect("command task");
    assert_eq!(response, Ok("pid=4242".to_string()));

    management.stop().await;
}

#[tokio::test]
async fn test_single_line_command_daemon_rejection() {
    let (management, mut daemon) = connected_pair(Vec::new()).await;
    wait_connected(&management).await;

    let commands = management.command_writer();
    let issue = tokio::spawn(async move { commands.single_line_command("bogus").await });

    assert_eq!(daemon.recv_command().await, "bogus");
    daemon.send_line("ERROR: unknown command").await;

    let response = timeout(TEST_TIMEOUT, issue)
        .await
        .expect("response within timeout")
        .expect("command task");
    assert_eq!(
        response,
        Err(CommandError::Rejected("unknown command".to_string()))
    );

    management.stop().await;
}

#[tokio::test]
async fn test_multi_line_command_collects_until_terminator() {
    let (management, mut daemon) = connected_pair(Vec::new()).await;
    wait_connected(&management).await;

    let commands = management.command_writer();
    let issue = tokio::spawn(async move { commands.multi_line_command("status").await });

    assert_eq!(daemon.recv_command().await, "status");
    daemon.send_line("OpenVPN STATISTICS").await;
    daemon.send_line("TUN/TAP read bytes,100").await;
    daemon.send_line("END").await;

    let response = timeout(TEST_TIMEOUT, issue)
        .await
        .expect("response within timeout")
        .expect("command task");
    assert_eq!(
        response,
        Ok(vec![
            "OpenVPN STATISTICS".to_string(),
            "TUN/TAP read bytes,100".to_string(),
        ])
    );

    management.stop().await;
}

#[tokio::test]
async fn test_pending_command_released_on_disconnect() {
    let (management, mut daemon) = connected_pair(Vec::new()).await;
    wait_connected(&management).await;

    let commands = management.command_writer();
    let issue = tokio::spawn(async move { commands.single_line_command("state").await });

    // Drop the connection instead of answering.
    assert_eq!(daemon.recv_command().await, "state");
    drop(daemon);

    let response = timeout(TEST_TIMEOUT, issue)
        .await
        .expect("release within timeout")
        .expect("command task");
    assert_eq!(response, Err(CommandError::ConnectionClosed));

    // Later commands fail fast rather than blocking.
    let result = management.command_writer().single_line_command("pid").await;
    assert_eq!(result, Err(CommandError::ConnectionClosed));

    management.stop().await;
}

// ============================================================================
// Dispatch Tests
// ============================================================================

#[tokio::test]
async fn test_first_consumer_short_circuits_dispatch() {
    let declining = CountingMiddleware::new(false);
    let claiming = CountingMiddleware::new(true);
    let shadowed = CountingMiddleware::new(true);

    let (management, mut daemon) = connected_pair(vec![
        Arc::clone(&declining) as Arc<dyn Middleware>,
        Arc::clone(&claiming) as Arc<dyn Middleware>,
        Arc::clone(&shadowed) as Arc<dyn Middleware>,
    ])
    .await;
    wait_connected(&management).await;

    daemon.send_line(">INFO:OpenVPN Management Interface").await;
    daemon.send_line(">LOG:1700000000,I,Initialization Sequence Completed").await;

    // Both lines must pass the decliner and stop at the first claimer.
    timeout(TEST_TIMEOUT, async {
        while claiming.consumed.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("dispatch within timeout");

    assert_eq!(declining.offered.load(Ordering::SeqCst), 2);
    assert_eq!(claiming.offered.load(Ordering::SeqCst), 2);
    assert_eq!(shadowed.offered.load(Ordering::SeqCst), 0);

    management.stop().await;
}

#[tokio::test]
async fn test_no_callbacks_after_stop() {
    let observer = CountingMiddleware::new(true);
    let (management, mut daemon) =
        connected_pair(vec![Arc::clone(&observer) as Arc<dyn Middleware>]).await;
    wait_connected(&management).await;

    management.stop().await;
    let seen = observer.offered.load(Ordering::SeqCst);

    daemon.send_line(">INFO:too late").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(observer.offered.load(Ordering::SeqCst), seen);
}

// ============================================================================
// State Middleware End-to-End
// ============================================================================

#[tokio::test]
async fn test_state_history_replays_before_live_notifications() {
    let state = Arc::new(StateMiddleware::new());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    state.subscribe(move |s| {
        let _ = events_tx.send(s);
    });

    let (management, mut daemon) =
        connected_pair(vec![Arc::clone(&state) as Arc<dyn Middleware>]).await;

    // The start hook requests the backlog; service it.
    assert_eq!(daemon.recv_command().await, "state on all");
    daemon.send_line("1495493709,CONNECTING,,,,,,").await;
    daemon.send_line("1518445456,ASSIGN_IP,,10.8.0.1,,,,").await;
    daemon.send_line("END").await;

    wait_connected(&management).await;

    // Live notification after the replay.
    daemon.send_line(">STATE:1495493720,CONNECTED,,,,,,").await;

    let mut observed = Vec::new();
    for _ in 0..4 {
        let state = timeout(TEST_TIMEOUT, events_rx.recv())
            .await
            .expect("state within timeout")
            .expect("state event");
        observed.push(state);
    }
    assert_eq!(
        observed,
        vec![
            VpnState::ProcessStarted,
            VpnState::Connecting,
            VpnState::AssignIp,
            VpnState::Connected,
        ]
    );

    management.stop().await;
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (management, _daemon) = connected_pair(Vec::new()).await;
    wait_connected(&management).await;

    timeout(TEST_TIMEOUT, management.stop())
        .await
        .expect("first stop");
    timeout(TEST_TIMEOUT, management.stop())
        .await
        .expect("second stop");
}

#[tokio::test]
async fn test_stop_before_daemon_connects() {
    let mut management = Management::new(Vec::new());
    management
        .wait_for_connection()
        .await
        .expect("bind management listener");

    timeout(TEST_TIMEOUT, management.stop())
        .await
        .expect("stop without connection");
}

#[tokio::test]
async fn test_wait_for_connection_rejects_second_call() {
    let mut management = Management::new(Vec::new());
    management
        .wait_for_connection()
        .await
        .expect("first bind");
    assert!(management.wait_for_connection().await.is_err());

    management.stop().await;
}
