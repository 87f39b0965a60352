pub mod checksum;
pub mod ethernet;
pub mod frame;
pub mod ip;
pub mod tcp;

pub use checksum::rfc1071_checksum;
pub use ethernet::EthernetHeader;
pub use frame::{decode_frame, encode_frame, DecodedFrame};
pub use ip::{construct_tcp_datagram, Ipv4Header};
pub use tcp::{PseudoHeader, TcpFlags, TcpHeader};
