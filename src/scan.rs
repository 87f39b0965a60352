//! The probe coordinator: one SYN out, one verdict back.

use std::fmt;
use std::net::SocketAddrV4;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Instant;

use tracing::{debug, info, trace};

use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::net::{construct_tcp_datagram, DecodedFrame, TcpFlags, TcpHeader};
use crate::transport::{Capture, Subscription, Transport};

/// Verdict for the probed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// SYN+ACK observed.
    Open,
    /// RST observed.
    Closed,
    /// Nothing correlated before the deadline.
    Filtered,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::Filtered => "filtered",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    PortReserved(u16),
    ProbeSent,
    AwaitingReply,
    Finished(PortState),
}

/// Maps the flags of a correlated reply to a verdict. Anything other than
/// SYN+ACK or RST says nothing about the port.
pub fn classify(flags: TcpFlags) -> Option<PortState> {
    if flags.syn && flags.ack {
        Some(PortState::Open)
    } else if flags.rst {
        Some(PortState::Closed)
    } else {
        None
    }
}

fn comes_from(reply: &DecodedFrame, target: SocketAddrV4) -> bool {
    reply.ipv4.source_address == *target.ip() && reply.tcp.source_port == target.port()
}

struct Reservation<H> {
    port: u16,
    _handle: H,
}

struct InFlight {
    subscription: Subscription,
    target: SocketAddrV4,
    deadline: Instant,
}

/// Drives one probe at a time through
/// `Idle -> PortReserved -> ProbeSent -> AwaitingReply -> Finished`.
///
/// The reserved port survives a finished probe, so consecutive probes reuse
/// it until [`ProbeCoordinator::release_port`] is called. Several
/// coordinators may share one [`Capture`] as long as their ports differ.
pub struct ProbeCoordinator<'c, T: Transport> {
    transport: T,
    capture: &'c Capture,
    config: ProbeConfig,
    reservation: Option<Reservation<T::Handle>>,
    in_flight: Option<InFlight>,
    state: ProbeState,
}

impl<'c, T: Transport> ProbeCoordinator<'c, T> {
    pub fn new(transport: T, capture: &'c Capture, config: ProbeConfig) -> Self {
        Self {
            transport,
            capture,
            config,
            reservation: None,
            in_flight: None,
            state: ProbeState::Idle,
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn local_port(&self) -> Option<u16> {
        self.reservation.as_ref().map(|r| r.port)
    }

    pub fn reserve_port(&mut self) -> Result<u16, ProbeError> {
        match self.state {
            ProbeState::Idle | ProbeState::Finished(_) => {}
            other => return Err(ProbeError::InvalidState(other)),
        }

        let (port, handle) = self.transport.reserve_port()?;
        debug!(port, "reserved local port");

        self.reservation = Some(Reservation {
            port,
            _handle: handle,
        });
        self.state = ProbeState::PortReserved(port);
        Ok(port)
    }

    /// Drops the reservation and any probe still in flight.
    pub fn release_port(&mut self) {
        self.in_flight = None;
        if let Some(reservation) = self.reservation.take() {
            debug!(port = reservation.port, "released local port");
        }
        self.state = ProbeState::Idle;
    }

    /// Builds the SYN and hands it to the transport. The reply route is
    /// registered first so an immediate answer cannot be missed.
    pub fn send_probe(&mut self, target: SocketAddrV4) -> Result<(), ProbeError> {
        let port = match (self.state, &self.reservation) {
            (ProbeState::PortReserved(_) | ProbeState::Finished(_), Some(reservation)) => {
                reservation.port
            }
            (state, _) => return Err(ProbeError::InvalidState(state)),
        };

        let subscription = self.capture.subscribe(port)?;

        // A configured source wins over the route the transport would pick.
        let source_ip = match self.config.source_ip {
            Some(ip) => ip,
            None => self.transport.source_ip(*target.ip())?,
        };
        let sequence = self.config.sequence.unwrap_or_else(rand::random);
        let mut syn = TcpHeader::syn(port, target.port(), sequence, self.config.window);
        let datagram = construct_tcp_datagram(
            &mut syn,
            &[],
            source_ip,
            *target.ip(),
            rand::random(),
            self.config.ttl,
        )?;

        self.transport.send_raw(&datagram, *target.ip())?;
        debug!(%source_ip, port, peer = %target, sequence, "SYN sent");

        self.in_flight = Some(InFlight {
            subscription,
            target,
            deadline: Instant::now() + self.config.timeout,
        });
        self.state = ProbeState::ProbeSent;
        Ok(())
    }

    /// Waits for the first correlated SYN+ACK or RST, or the deadline.
    ///
    /// The capture only routes by local port, and a reused port may still
    /// receive late answers for an earlier target. A reply counts only when it
    /// comes from the target address and port.
    pub fn await_verdict(&mut self) -> Result<PortState, ProbeError> {
        let in_flight = match (self.state, self.in_flight.take()) {
            (ProbeState::ProbeSent, Some(in_flight)) => in_flight,
            (state, in_flight) => {
                self.in_flight = in_flight;
                return Err(ProbeError::InvalidState(state));
            }
        };
        self.state = ProbeState::AwaitingReply;

        let verdict = loop {
            let remaining = in_flight.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break PortState::Filtered;
            }

            match in_flight.subscription.recv_timeout(remaining) {
                Ok(reply) if !comes_from(&reply, in_flight.target) => trace!(
                    source = %reply.ipv4.source_address,
                    source_port = reply.tcp.source_port,
                    peer = %in_flight.target,
                    "reply from another peer"
                ),
                Ok(reply) => match classify(reply.tcp.flags()) {
                    Some(verdict) => break verdict,
                    None => trace!(
                        flags = format_args!("0x{:02x}", reply.tcp.control),
                        "reply does not settle the port"
                    ),
                },
                Err(RecvTimeoutError::Timeout) => break PortState::Filtered,
                Err(RecvTimeoutError::Disconnected) => {
                    self.state = ProbeState::PortReserved(in_flight.subscription.port());
                    return Err(ProbeError::CaptureClosed);
                }
            }
        };

        info!(peer = %in_flight.target, %verdict, "probe finished");
        self.state = ProbeState::Finished(verdict);
        Ok(verdict)
    }

    /// Reserves a port if none is held, sends one SYN and waits for the verdict.
    pub fn probe(&mut self, target: SocketAddrV4) -> Result<PortState, ProbeError> {
        if self.reservation.is_none() {
            self.reserve_port()?;
        }
        self.send_probe(target)?;
        self.await_verdict()
    }
}
