use std::net::Ipv4Addr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Knobs for a single half-open probe.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// How long to wait for a correlated reply before calling the port filtered.
    pub timeout: Duration,
    /// Source address for the datagram. When `None` the transport picks the
    /// address the routing table would use to reach the target.
    pub source_ip: Option<Ipv4Addr>,
    pub ttl: u8,
    pub window: u16,
    /// Fixed initial sequence number; random per probe when `None`.
    pub sequence: Option<u32>,
    /// Upper bound on how long the capture task blocks in a single read, and
    /// therefore how quickly it notices a stop request.
    pub poll_interval: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            source_ip: None,
            ttl: 64,
            window: u16::MAX,
            sequence: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}
