use std::net::Ipv4Addr;

use super::checksum::{rfc1071_checksum, verify};
use super::ip::{MAX_SEGMENT_LEN, TCP_PROTOCOL_NUM};
use crate::error::{DecodeError, EncodeError};

pub const TCP_HEADER_LENGTH: usize = 20;

pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_ACK: u8 = 0x10;
pub const TCP_URG: u8 = 0x20;
pub const TCP_ECE: u8 = 0x40;
pub const TCP_CWR: u8 = 0x80;

/// Represents the structure of a TCP header without options.
///
/// `flags` holds the control bits exactly as they appear on the wire; use
/// [`TcpHeader::flags`] for a decomposed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence_number: u32,
    pub ack_number: u32,
    /// Data offset (4 bits) - Number of 32-bit words in header
    pub data_offset: u8,
    pub control: u8,
    pub window: u16,
    pub checksum: u16,
    pub urgent_pointer: u16,
}

/// Read-only projection of the control byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub cwr: bool, // Congestion Window Reduced
    pub ece: bool, // ECN-Echo
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,
}

impl From<u8> for TcpFlags {
    fn from(byte: u8) -> Self {
        Self {
            cwr: byte & TCP_CWR != 0,
            ece: byte & TCP_ECE != 0,
            urg: byte & TCP_URG != 0,
            ack: byte & TCP_ACK != 0,
            psh: byte & TCP_PSH != 0,
            rst: byte & TCP_RST != 0,
            syn: byte & TCP_SYN != 0,
            fin: byte & TCP_FIN != 0,
        }
    }
}

/// The IPv4 pseudo header that prefixes a TCP segment for checksumming.
/// Never transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PseudoHeader {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub tcp_length: u16,
}

impl PseudoHeader {
    /// `tcp_length` covers header and payload and must not exceed
    /// [`MAX_SEGMENT_LEN`].
    pub fn new(
        source: Ipv4Addr,
        destination: Ipv4Addr,
        tcp_length: usize,
    ) -> Result<Self, EncodeError> {
        let too_large = EncodeError::SegmentTooLarge {
            len: tcp_length,
            max: MAX_SEGMENT_LEN,
        };
        if tcp_length > MAX_SEGMENT_LEN {
            return Err(too_large);
        }

        Ok(Self {
            source,
            destination,
            protocol: TCP_PROTOCOL_NUM,
            tcp_length: u16::try_from(tcp_length).map_err(|_| too_large)?,
        })
    }

    pub fn pack(&self) -> [u8; 12] {
        let mut buffer = [0u8; 12];
        buffer[0..4].copy_from_slice(&self.source.octets());
        buffer[4..8].copy_from_slice(&self.destination.octets());
        // buffer[8] stays zero
        buffer[9] = self.protocol;
        buffer[10..12].copy_from_slice(&self.tcp_length.to_be_bytes());
        buffer
    }
}

impl TcpHeader {
    /// A bare SYN: no options, no ack, checksum still to be computed.
    pub fn syn(source_port: u16, destination_port: u16, sequence_number: u32, window: u16) -> Self {
        Self {
            source_port,
            destination_port,
            sequence_number,
            ack_number: 0,
            data_offset: 5,
            control: TCP_SYN,
            window,
            checksum: 0,
            urgent_pointer: 0,
        }
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from(self.control)
    }

    pub fn pack(&self) -> [u8; TCP_HEADER_LENGTH] {
        let mut buffer = [0u8; TCP_HEADER_LENGTH];

        buffer[0..2].copy_from_slice(&self.source_port.to_be_bytes());
        buffer[2..4].copy_from_slice(&self.destination_port.to_be_bytes());
        buffer[4..8].copy_from_slice(&self.sequence_number.to_be_bytes());
        buffer[8..12].copy_from_slice(&self.ack_number.to_be_bytes());
        // Reserved bits are always sent as zero.
        buffer[12] = self.data_offset << 4;
        buffer[13] = self.control;
        buffer[14..16].copy_from_slice(&self.window.to_be_bytes());
        buffer[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        buffer[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());

        buffer
    }

    /// Decodes the fixed 20 bytes at the start of `bytes`; options are ignored.
    pub fn unpack(bytes: &[u8]) -> Result<Self, DecodeError> {
        let b = bytes
            .get(..TCP_HEADER_LENGTH)
            .ok_or(DecodeError::TruncatedFrame {
                needed: TCP_HEADER_LENGTH,
                captured: bytes.len(),
            })?;

        Ok(Self {
            source_port: u16::from_be_bytes([b[0], b[1]]),
            destination_port: u16::from_be_bytes([b[2], b[3]]),
            sequence_number: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
            ack_number: u32::from_be_bytes([b[8], b[9], b[10], b[11]]),
            data_offset: b[12] >> 4,
            control: b[13],
            window: u16::from_be_bytes([b[14], b[15]]),
            checksum: u16::from_be_bytes([b[16], b[17]]),
            urgent_pointer: u16::from_be_bytes([b[18], b[19]]),
        })
    }

    /// Pseudo header, header (checksum zeroed) and payload, in the order the
    /// checksum covers them.
    pub fn checksum_data(
        &self,
        source_ip: Ipv4Addr,
        dest_ip: Ipv4Addr,
        payload: &[u8],
    ) -> Result<Vec<u8>, EncodeError> {
        let pseudo_header =
            PseudoHeader::new(source_ip, dest_ip, TCP_HEADER_LENGTH + payload.len())?;
        let header = TcpHeader { checksum: 0, ..*self };

        let mut buffer = Vec::with_capacity(12 + TCP_HEADER_LENGTH + payload.len());
        buffer.extend_from_slice(&pseudo_header.pack());
        buffer.extend_from_slice(&header.pack());
        buffer.extend_from_slice(payload);
        Ok(buffer)
    }

    pub fn compute_checksum(
        &self,
        source_ip: Ipv4Addr,
        dest_ip: Ipv4Addr,
        payload: &[u8],
    ) -> Result<u16, EncodeError> {
        Ok(rfc1071_checksum(&self.checksum_data(source_ip, dest_ip, payload)?))
    }

    /// Validates a received segment (header, options and payload as captured)
    /// the way a receiving stack would. A segment too long for IPv4 is never
    /// valid.
    pub fn checksum_valid(segment: &[u8], source_ip: Ipv4Addr, dest_ip: Ipv4Addr) -> bool {
        let Ok(pseudo_header) = PseudoHeader::new(source_ip, dest_ip, segment.len()) else {
            return false;
        };
        let mut buffer = Vec::with_capacity(12 + segment.len());
        buffer.extend_from_slice(&pseudo_header.pack());
        buffer.extend_from_slice(segment);
        verify(&buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCALHOST: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

    #[test]
    fn test_tcp_header_pack() {
        // Fixed part of a SYN as seen in Wireshark:
        //   [0-1]   Source Port:       0xcf4a        (53066)
        //   [2-3]   Destination Port:  0x240d        (9229)
        //   [4-7]   Sequence Number:   0x0c08a8b4
        //   [8-11]  Ack Number:        0x00000000
        //   [12]    Data Offset:       5 << 4
        //   [13]    Flags:             0x02          (only SYN set)
        //   [14-15] Window:            0xffff
        //   [16-17] Checksum:          0xfe34
        //   [18-19] Urgent Pointer:    0x0000
        let expected: [u8; 20] = [
            0xcf, 0x4a, 0x24, 0x0d, 0x0c, 0x08, 0xa8, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x50, 0x02,
            0xff, 0xff, 0xfe, 0x34, 0x00, 0x00,
        ];

        let header = TcpHeader {
            checksum: 0xfe34,
            ..TcpHeader::syn(53066, 9229, 0x0c08a8b4, 65535)
        };

        assert_eq!(header.pack(), expected);
        assert_eq!(TcpHeader::unpack(&expected), Ok(header));
    }

    #[test]
    fn checksum_data_layout() {
        let header = TcpHeader::syn(44755, 44755, 2_000_000_000, 65535);
        let want: [u8; 32] = [
            0x7f, 0x00, 0x00, 0x01, 0x7f, 0x00, 0x00, 0x01, 0x00, 0x06, 0x00, 0x14, 0xae, 0xd3,
            0xae, 0xd3, 0x77, 0x35, 0x94, 0x00, 0x00, 0x00, 0x00, 0x00, 0x50, 0x02, 0xff, 0xff,
            0x00, 0x00, 0x00, 0x00,
        ];

        assert_eq!(header.checksum_data(LOCALHOST, LOCALHOST, &[]), Ok(want.to_vec()));
        assert_eq!(header.compute_checksum(LOCALHOST, LOCALHOST, &[]), Ok(0x4903));
    }

    #[test]
    fn checksum_ignores_stale_checksum_field() {
        let fresh = TcpHeader::syn(44755, 44755, 2_000_000_000, 65535);
        let stale = TcpHeader {
            checksum: 0xdead,
            ..fresh
        };

        assert_eq!(
            stale.compute_checksum(LOCALHOST, LOCALHOST, &[]),
            fresh.compute_checksum(LOCALHOST, LOCALHOST, &[])
        );
    }

    #[test]
    fn encoded_segment_verifies_like_a_receiver() {
        let source = Ipv4Addr::new(192, 168, 0, 10);
        let destination = Ipv4Addr::new(192, 168, 0, 1);
        let mut header = TcpHeader::syn(51000, 22, 0x01020304, 29200);
        header.checksum = header.compute_checksum(source, destination, &[]).unwrap();

        let segment = header.pack();
        assert!(TcpHeader::checksum_valid(&segment, source, destination));
        assert!(!TcpHeader::checksum_valid(&segment, source, LOCALHOST));
    }

    #[test]
    fn flags_projection() {
        assert_eq!(
            TcpHeader::syn(1, 2, 3, 4).flags(),
            TcpFlags {
                syn: true,
                ..TcpFlags::default()
            }
        );

        let syn_ack = TcpFlags::from(TCP_SYN | TCP_ACK);
        assert!(syn_ack.syn && syn_ack.ack);
        assert!(!syn_ack.rst && !syn_ack.fin && !syn_ack.psh);

        let all = TcpFlags::from(0xff);
        assert!(all.cwr && all.ece && all.urg && all.ack && all.psh && all.rst && all.syn && all.fin);
    }

    #[test]
    fn pseudo_header_pack() {
        let pseudo =
            PseudoHeader::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 23).unwrap();
        assert_eq!(pseudo.pack(), [10, 0, 0, 1, 10, 0, 0, 2, 0, 6, 0, 23]);
    }

    #[test]
    fn pseudo_header_length_is_bounded_by_ipv4() {
        let largest = PseudoHeader::new(LOCALHOST, LOCALHOST, MAX_SEGMENT_LEN).unwrap();
        assert_eq!(largest.tcp_length, 65515);

        // 65556 would have been sent as a length of 20.
        for len in [MAX_SEGMENT_LEN + 1, 65556] {
            assert_eq!(
                PseudoHeader::new(LOCALHOST, LOCALHOST, len),
                Err(EncodeError::SegmentTooLarge {
                    len,
                    max: MAX_SEGMENT_LEN
                })
            );
        }

        let header = TcpHeader::syn(1, 2, 3, 4);
        assert!(header
            .compute_checksum(LOCALHOST, LOCALHOST, &vec![0u8; 65536])
            .is_err());
        assert!(!TcpHeader::checksum_valid(&vec![0u8; 65556], LOCALHOST, LOCALHOST));
    }

    #[test]
    fn unpack_rejects_short_buffer() {
        assert_eq!(
            TcpHeader::unpack(&[0u8; 19]),
            Err(DecodeError::TruncatedFrame {
                needed: 20,
                captured: 19
            })
        );
    }
}
