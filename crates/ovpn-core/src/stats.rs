//! Traffic counters reported by the daemon.

/// A single traffic-count notification: cumulative bytes moved through the
/// tunnel since the daemon started.
///
/// Produced by parsing one `>BYTECOUNT:` line and handed straight to the
/// recorder callback; nothing retains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrafficCounters {
    /// Bytes received from the tunnel.
    pub bytes_received: u64,

    /// Bytes sent into the tunnel.
    pub bytes_sent: u64,
}
