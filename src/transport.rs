//! Raw socket plumbing and the background capture task.
//!
//! Sending goes through an `IPPROTO_RAW` socket with `IP_HDRINCL`, capture
//! through an `AF_PACKET` socket that sees every link-layer frame. Both need
//! `CAP_NET_RAW`.

use std::collections::HashMap;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, error, trace};

use crate::error::{ProbeError, TransportError};
use crate::hextools::format_hexdump;
use crate::net::{decode_frame, DecodedFrame};

const CAPTURE_BUFFER_SIZE: usize = 65536;

/// The send side of the raw channel.
pub trait Transport {
    /// Keeps the reserved port bound for as long as it is held.
    type Handle;

    /// Source address the host would use to reach `target`.
    fn source_ip(&self, target: Ipv4Addr) -> Result<Ipv4Addr, TransportError>;

    fn reserve_port(&mut self) -> Result<(u16, Self::Handle), TransportError>;

    /// Transmits a complete IPv4 datagram, header included.
    fn send_raw(&mut self, datagram: &[u8], destination: Ipv4Addr) -> Result<(), TransportError>;
}

/// An endless supply of captured link-layer frames.
///
/// `WouldBlock`, `TimedOut` and `Interrupted` errors mean nothing arrived
/// yet; any other error ends the capture.
pub trait FrameSource: Send + 'static {
    fn next_frame(&mut self) -> io::Result<Vec<u8>>;
}

/// Asks the routing table which local address would be used to reach
/// `target`. Connecting a UDP socket sends nothing.
pub fn route_source_ip(target: Ipv4Addr) -> Result<Ipv4Addr, TransportError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(TransportError::NoRoute)?;
    socket.connect((target, 80)).map_err(TransportError::NoRoute)?;
    match socket.local_addr().map_err(TransportError::NoRoute)?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(_) => Err(TransportError::NoRoute(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "route resolved to an IPv6 source",
        ))),
    }
}

pub struct RawTransport {
    socket: Socket,
}

impl RawTransport {
    pub fn open() -> Result<Self, TransportError> {
        let socket = Socket::new(
            Domain::IPV4,
            Type::RAW,
            Some(Protocol::from(libc::IPPROTO_RAW)),
        )
        .map_err(TransportError::Open)?;
        socket
            .set_header_included_v4(true)
            .map_err(TransportError::Open)?;

        Ok(Self { socket })
    }
}

impl Transport for RawTransport {
    type Handle = Socket;

    fn source_ip(&self, target: Ipv4Addr) -> Result<Ipv4Addr, TransportError> {
        route_source_ip(target)
    }

    /// Binds an unconnected TCP socket to port 0 and keeps it open so the
    /// kernel does not hand the same port to anyone else.
    fn reserve_port(&mut self) -> Result<(u16, Socket), TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(TransportError::Reserve)?;
        socket
            .bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
            .map_err(TransportError::Reserve)?;

        let port = socket
            .local_addr()
            .map_err(TransportError::Reserve)?
            .as_socket_ipv4()
            .map(|addr| addr.port())
            .ok_or_else(|| {
                TransportError::Reserve(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "bound socket has no IPv4 address",
                ))
            })?;

        Ok((port, socket))
    }

    fn send_raw(&mut self, datagram: &[u8], destination: Ipv4Addr) -> Result<(), TransportError> {
        let address = SockAddr::from(SocketAddrV4::new(destination, 0));
        let sent = self
            .socket
            .send_to(datagram, &address)
            .map_err(TransportError::Send)?;

        if sent != datagram.len() {
            return Err(TransportError::ShortSend {
                sent,
                expected: datagram.len(),
            });
        }
        Ok(())
    }
}

/// `AF_PACKET` socket receiving every frame on every interface.
pub struct PacketCapture {
    socket: Socket,
    buffer: Vec<u8>,
}

impl PacketCapture {
    pub fn open(poll_interval: Duration) -> Result<Self, TransportError> {
        let eth_p_all = Protocol::from(i32::from((libc::ETH_P_ALL as u16).to_be()));
        let socket =
            Socket::new(Domain::PACKET, Type::RAW, Some(eth_p_all)).map_err(TransportError::Open)?;
        socket
            .set_read_timeout(Some(poll_interval))
            .map_err(TransportError::Open)?;

        Ok(Self {
            socket,
            buffer: vec![0; CAPTURE_BUFFER_SIZE],
        })
    }
}

impl FrameSource for PacketCapture {
    fn next_frame(&mut self) -> io::Result<Vec<u8>> {
        let len = self.socket.read(&mut self.buffer)?;
        Ok(self.buffer[..len].to_vec())
    }
}

type Routes = HashMap<u16, Sender<DecodedFrame>>;

struct Shared {
    routes: Mutex<Routes>,
    running: AtomicBool,
    stop: AtomicBool,
}

impl Shared {
    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background task draining a [`FrameSource`].
///
/// Frames are decoded on the capture thread and handed to whichever
/// [`Subscription`] watches their TCP destination port. Everything else is
/// dropped there, so a slow probe never stalls the capture socket.
pub struct Capture {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Capture {
    pub fn start<S: FrameSource>(source: S) -> Result<Self, TransportError> {
        let shared = Arc::new(Shared {
            routes: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
            stop: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("capture".into())
            .spawn(move || capture_loop(source, &worker_shared))
            .map_err(TransportError::Open)?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Starts routing frames addressed to `port` to the returned subscription.
    pub fn subscribe(&self, port: u16) -> Result<Subscription, ProbeError> {
        let mut routes = self.shared.routes();
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(ProbeError::CaptureClosed);
        }
        if routes.contains_key(&port) {
            return Err(ProbeError::PortInUse(port));
        }

        let (tx, rx) = mpsc::channel();
        routes.insert(port, tx);
        trace!(port, "watching port");

        Ok(Subscription {
            port,
            rx,
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("capture thread panicked");
            }
        }
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Frames routed to one local port. The route is removed on drop.
pub struct Subscription {
    port: u16,
    rx: Receiver<DecodedFrame>,
    shared: Arc<Shared>,
}

impl Subscription {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<DecodedFrame, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.routes().remove(&self.port);
    }
}

fn capture_loop<S: FrameSource>(mut source: S, shared: &Shared) {
    debug!("capture started");

    while !shared.stop.load(Ordering::Acquire) {
        match source.next_frame() {
            Ok(frame) => dispatch(shared, &frame),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                error!("capture read failed: {e}");
                break;
            }
        }
    }

    // Dropping the senders wakes every waiting probe.
    let mut routes = shared.routes();
    shared.running.store(false, Ordering::Release);
    routes.clear();
    debug!("capture stopped");
}

fn dispatch(shared: &Shared, frame: &[u8]) {
    let decoded = match decode_frame(frame) {
        Ok(decoded) => decoded,
        Err(e) => {
            trace!(len = frame.len(), "skipping frame: {e}");
            return;
        }
    };

    let port = decoded.tcp.destination_port;
    if let Some(tx) = route(shared, port) {
        trace!(
            port,
            source = %decoded.ipv4.source_address,
            "routing frame\n{}",
            format_hexdump(frame)
        );
        // The probe may have given up already; the frame is just dropped.
        let _ = tx.send(decoded);
    }
}

/// The sender watching `port`, if any. The routes lock is released on return.
fn route(shared: &Shared, port: u16) -> Option<Sender<DecodedFrame>> {
    shared.routes().get(&port).cloned()
}
