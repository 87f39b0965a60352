use std::io;

use thiserror::Error;

use crate::scan::ProbeState;

/// Reasons a captured frame is not a decodable IPv4/TCP frame.
///
/// All of these are recoverable: the capture task drops the frame and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated frame: needed {needed} bytes, captured {captured}")]
    TruncatedFrame { needed: usize, captured: usize },

    #[error("not an IPv4 frame (ethertype 0x{0:04x})")]
    NotIpv4(u16),

    #[error("not a TCP datagram (IP protocol {0})")]
    NotTcp(u8),

    #[error("unsupported IP version {0}")]
    UnsupportedIpVersion(u8),

    #[error("invalid IPv4 header length: {0} bytes")]
    InvalidHeaderLength(usize),
}

/// Reasons a datagram cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("TCP segment of {len} bytes does not fit an IPv4 datagram (max {max})")]
    SegmentTooLarge { len: usize, max: usize },
}

/// Failure of one of the raw socket primitives.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to reserve a local port: {0}")]
    Reserve(#[source] io::Error),

    #[error("failed to send datagram: {0}")]
    Send(#[source] io::Error),

    #[error("short send: wrote {sent} of {expected} bytes")]
    ShortSend { sent: usize, expected: usize },

    #[error("failed to open raw channel (requires CAP_NET_RAW): {0}")]
    Open(#[source] io::Error),

    #[error("no route to target: {0}")]
    NoRoute(#[source] io::Error),
}

/// Error from a single probe. A missing reply is not an error; it yields
/// [`PortState::Filtered`](crate::scan::PortState::Filtered).
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    #[error("failed to build SYN: {0}")]
    Encode(#[from] EncodeError),

    #[error("capture task is no longer running")]
    CaptureClosed,

    #[error("port {0} is already being watched by another probe")]
    PortInUse(u16),

    #[error("operation not valid in state {0:?}")]
    InvalidState(ProbeState),
}
