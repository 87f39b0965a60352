//! Half-open TCP port probing.
//!
//! A [`ProbeCoordinator`] reserves an ephemeral port, sends a single
//! hand-built SYN over a raw socket and classifies the target port from the
//! first correlated reply picked up by a background [`Capture`].

pub mod config;
pub mod error;
pub mod hextools;
pub mod net;
pub mod scan;
pub mod transport;

pub use config::ProbeConfig;
pub use error::{DecodeError, EncodeError, ProbeError, TransportError};
pub use scan::{PortState, ProbeCoordinator, ProbeState};
pub use transport::{Capture, FrameSource, PacketCapture, RawTransport, Transport};
