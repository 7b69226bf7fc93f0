//! Daemon lifecycle states.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Closed enumeration of OpenVPN lifecycle states.
///
/// Every variant except [`VpnState::ProcessStarted`] mirrors a state name
/// the daemon reports over the management interface. `ProcessStarted` is
/// synthetic: it is emitted locally before any daemon notification arrives
/// so subscribers always observe a complete history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VpnState {
    /// Synthetic local state, never reported by the daemon.
    ProcessStarted,
    /// Connecting to the remote server.
    Connecting,
    /// Waiting for an initial response from the server.
    Wait,
    /// Authenticating with the server.
    Authenticating,
    /// Downloading configuration options from the server.
    GetConfig,
    /// Assigning an IP address to the virtual network interface.
    AssignIp,
    /// Adding routes to the system.
    AddRoutes,
    /// Initialization sequence completed.
    Connected,
    /// Restarting the connection.
    Reconnecting,
    /// Establishing the TCP transport.
    TcpConnect,
    /// Graceful exit in progress.
    Exiting,
}

impl VpnState {
    /// Parses a daemon-reported state name.
    ///
    /// Names outside the closed enumeration fail with
    /// [`ParseError::UnknownState`]; the synthetic `ProcessStarted` state
    /// has no daemon-side name and is never produced here.
    pub fn from_name(name: &str) -> Result<Self, ParseError> {
        match name {
            "CONNECTING" => Ok(Self::Connecting),
            "WAIT" => Ok(Self::Wait),
            "AUTH" => Ok(Self::Authenticating),
            "GET_CONFIG" => Ok(Self::GetConfig),
            "ASSIGN_IP" => Ok(Self::AssignIp),
            "ADD_ROUTES" => Ok(Self::AddRoutes),
            "CONNECTED" => Ok(Self::Connected),
            "RECONNECTING" => Ok(Self::Reconnecting),
            "TCP_CONNECT" => Ok(Self::TcpConnect),
            "EXITING" => Ok(Self::Exiting),
            other => Err(ParseError::UnknownState(other.to_string())),
        }
    }

    /// The daemon-side name, or the synthetic marker for `ProcessStarted`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessStarted => "PROCESS_STARTED",
            Self::Connecting => "CONNECTING",
            Self::Wait => "WAIT",
            Self::Authenticating => "AUTH",
            Self::GetConfig => "GET_CONFIG",
            Self::AssignIp => "ASSIGN_IP",
            Self::AddRoutes => "ADD_ROUTES",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::TcpConnect => "TCP_CONNECT",
            Self::Exiting => "EXITING",
        }
    }
}

impl FromStr for VpnState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl fmt::Display for VpnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
