//! VPN Gateway
//!
//! Handle on the OS-level tunnel owned by the host application. The
//! authentication core only asks it to drop, rebuild or re-target the
//! connection.

/// OS tunnel control
pub trait VpnGateway: Send + Sync {
    /// Tunnel is connected or connecting
    fn is_connected(&self) -> bool;

    /// Tear the tunnel down
    fn disconnect(&self);

    /// Reconnect to the same target (e.g. after key rotation)
    fn reconnect(&self);

    /// Connect to any other eligible server
    fn quick_connect(&self);
}
