use std::net::Ipv4Addr;

use tracing::trace;

use super::checksum::{rfc1071_checksum, verify};
use super::tcp::TcpHeader;
use crate::error::{DecodeError, EncodeError};
use crate::hextools::format_hexdump;

pub const TCP_PROTOCOL_NUM: u8 = 6;
pub const IP_HEADER_LENGTH: usize = 20;

/// Largest TCP segment, header included, that fits the 16-bit total length
/// of an options-less IPv4 datagram.
pub const MAX_SEGMENT_LEN: usize = u16::MAX as usize - IP_HEADER_LENGTH;

/// Don't Fragment, in the 3-bit flags field.
pub const FLAG_DONT_FRAGMENT: u8 = 0b010;

/// Fixed part of an IPv4 header. Options are never encoded and are skipped on
/// decode; `ihl` still reports their presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    // version: 4 bits
    pub version: u8,
    // Internet header length in 32-bit words: 4 bits
    pub ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub identification: u16,
    // 3 bits
    pub flags: u8,
    // 13 bits
    pub frag_offset: u16,
    pub ttl: u8,
    pub proto: u8,
    pub checksum: u16,
    pub source_address: Ipv4Addr,
    pub destination_address: Ipv4Addr,
}

impl Ipv4Header {
    /// An options-less header carrying a TCP segment of `segment_len` bytes,
    /// at most [`MAX_SEGMENT_LEN`]. The checksum is left at zero; see
    /// [`Ipv4Header::with_checksum`].
    pub fn for_tcp(
        source: Ipv4Addr,
        destination: Ipv4Addr,
        segment_len: usize,
        identification: u16,
        ttl: u8,
    ) -> Result<Self, EncodeError> {
        let total_length =
            u16::try_from(IP_HEADER_LENGTH + segment_len).map_err(|_| EncodeError::SegmentTooLarge {
                len: segment_len,
                max: MAX_SEGMENT_LEN,
            })?;

        Ok(Self {
            version: 4,
            ihl: 5,
            tos: 0,
            total_length,
            identification,
            flags: FLAG_DONT_FRAGMENT,
            frag_offset: 0,
            ttl,
            proto: TCP_PROTOCOL_NUM,
            checksum: 0,
            source_address: source,
            destination_address: destination,
        })
    }

    /// Header length in octets as declared by the IHL field.
    pub fn header_len(&self) -> usize {
        usize::from(self.ihl) * 4
    }

    pub fn pack(&self) -> [u8; IP_HEADER_LENGTH] {
        let mut buffer = [0u8; IP_HEADER_LENGTH];

        buffer[0] = (self.version << 4) | (self.ihl & 0x0f);
        buffer[1] = self.tos;
        buffer[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        buffer[4..6].copy_from_slice(&self.identification.to_be_bytes());
        let flags_frag = (u16::from(self.flags) << 13) | (self.frag_offset & 0x1fff);
        buffer[6..8].copy_from_slice(&flags_frag.to_be_bytes());
        buffer[8] = self.ttl;
        buffer[9] = self.proto;
        buffer[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        buffer[12..16].copy_from_slice(&self.source_address.octets());
        buffer[16..20].copy_from_slice(&self.destination_address.octets());

        buffer
    }

    /// Returns a copy whose checksum field covers the packed header.
    pub fn with_checksum(mut self) -> Self {
        self.checksum = 0;
        self.checksum = rfc1071_checksum(&self.pack());
        self
    }

    /// Decodes the fixed 20 bytes at the start of `bytes`. Any options that
    /// follow are the caller's business.
    pub fn unpack(bytes: &[u8]) -> Result<Self, DecodeError> {
        let b = bytes
            .get(..IP_HEADER_LENGTH)
            .ok_or(DecodeError::TruncatedFrame {
                needed: IP_HEADER_LENGTH,
                captured: bytes.len(),
            })?;

        let flags_frag = u16::from_be_bytes([b[6], b[7]]);

        Ok(Self {
            version: b[0] >> 4,
            ihl: b[0] & 0x0f,
            tos: b[1],
            total_length: u16::from_be_bytes([b[2], b[3]]),
            identification: u16::from_be_bytes([b[4], b[5]]),
            flags: (flags_frag >> 13) as u8,
            frag_offset: flags_frag & 0x1fff,
            ttl: b[8],
            proto: b[9],
            checksum: u16::from_be_bytes([b[10], b[11]]),
            source_address: Ipv4Addr::new(b[12], b[13], b[14], b[15]),
            destination_address: Ipv4Addr::new(b[16], b[17], b[18], b[19]),
        })
    }

    /// Validates the checksum over the full on-wire header, options included.
    pub fn checksum_valid(header_bytes: &[u8]) -> bool {
        verify(header_bytes)
    }
}

/// Builds a complete IPv4 datagram around `tcp_header` and `payload`, filling
/// in both the TCP checksum and the IPv4 header checksum. Fails rather than
/// truncate a length field when the segment exceeds [`MAX_SEGMENT_LEN`].
pub fn construct_tcp_datagram(
    tcp_header: &mut TcpHeader,
    payload: &[u8],
    source_ip: Ipv4Addr,
    dest_ip: Ipv4Addr,
    identification: u16,
    ttl: u8,
) -> Result<Vec<u8>, EncodeError> {
    tcp_header.checksum = tcp_header.compute_checksum(source_ip, dest_ip, payload)?;
    let segment = tcp_header.pack();

    let ip_header = Ipv4Header::for_tcp(
        source_ip,
        dest_ip,
        segment.len() + payload.len(),
        identification,
        ttl,
    )?
    .with_checksum();

    let mut datagram = Vec::with_capacity(usize::from(ip_header.total_length));
    datagram.extend_from_slice(&ip_header.pack());
    datagram.extend_from_slice(&segment);
    datagram.extend_from_slice(payload);

    trace!(
        tcp_checksum = format_args!("0x{:04x}", tcp_header.checksum),
        ip_checksum = format_args!("0x{:04x}", ip_header.checksum),
        "datagram constructed\n{}",
        format_hexdump(&datagram)
    );

    Ok(datagram)
}
