//! Decoding of captured link-layer frames.
//!
//! Captured bytes are untrusted: every slice is bounds checked against what
//! was actually captured before it is read, and the TCP header is located from
//! the IHL field rather than a fixed offset.

use super::ethernet::{EthernetHeader, ETHERNET_HEADER_LEN, ETHERTYPE_IPV4};
use super::ip::{Ipv4Header, IP_HEADER_LENGTH, TCP_PROTOCOL_NUM};
use super::tcp::{TcpHeader, TCP_HEADER_LENGTH};
use crate::error::DecodeError;

/// The three headers of an Ethernet/IPv4/TCP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame {
    pub ethernet: EthernetHeader,
    pub ipv4: Ipv4Header,
    pub tcp: TcpHeader,
}

pub fn decode_frame(frame: &[u8]) -> Result<DecodedFrame, DecodeError> {
    let ethernet = EthernetHeader::unpack(require(frame, ETHERNET_HEADER_LEN)?)?;
    if ethernet.ethertype != ETHERTYPE_IPV4 {
        return Err(DecodeError::NotIpv4(ethernet.ethertype));
    }

    let version_ihl = require(frame, ETHERNET_HEADER_LEN + 1)?[ETHERNET_HEADER_LEN];
    let version = version_ihl >> 4;
    if version != 4 {
        return Err(DecodeError::UnsupportedIpVersion(version));
    }
    let ip_header_len = usize::from(version_ihl & 0x0f) * 4;
    if ip_header_len < IP_HEADER_LENGTH {
        return Err(DecodeError::InvalidHeaderLength(ip_header_len));
    }

    let tcp_offset = ETHERNET_HEADER_LEN + ip_header_len;
    let ipv4 = Ipv4Header::unpack(&require(frame, tcp_offset)?[ETHERNET_HEADER_LEN..])?;
    if ipv4.proto != TCP_PROTOCOL_NUM {
        return Err(DecodeError::NotTcp(ipv4.proto));
    }

    let tcp = TcpHeader::unpack(&require(frame, tcp_offset + TCP_HEADER_LENGTH)?[tcp_offset..])?;

    Ok(DecodedFrame {
        ethernet,
        ipv4,
        tcp,
    })
}

/// Prefixes an IPv4 datagram with an Ethernet header.
pub fn encode_frame(ethernet: &EthernetHeader, datagram: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETHERNET_HEADER_LEN + datagram.len());
    frame.extend_from_slice(&ethernet.pack());
    frame.extend_from_slice(datagram);
    frame
}

fn require(frame: &[u8], needed: usize) -> Result<&[u8], DecodeError> {
    frame.get(..needed).ok_or(DecodeError::TruncatedFrame {
        needed,
        captured: frame.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ip::construct_tcp_datagram;
    use crate::net::tcp::{TcpFlags, TCP_ACK, TCP_SYN};
    use std::net::Ipv4Addr;

    const LOCALHOST: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
    const SRC_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
    const DST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

    fn syn_frame() -> (TcpHeader, Vec<u8>) {
        let mut tcp = TcpHeader::syn(44755, 44755, 2_000_000_000, 65535);
        let datagram = construct_tcp_datagram(&mut tcp, &[], LOCALHOST, LOCALHOST, 0, 64).unwrap();
        (tcp, encode_frame(&EthernetHeader::ipv4(DST_MAC, SRC_MAC), &datagram))
    }

    /// A frame whose IPv4 header carries one word of options (IHL = 6).
    fn frame_with_ip_options(tcp: &TcpHeader) -> Vec<u8> {
        let mut ip = Ipv4Header::for_tcp(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            TCP_HEADER_LENGTH,
            0,
            64,
        )
        .unwrap();
        ip.ihl = 6;
        ip.total_length += 4;

        let mut frame = EthernetHeader::ipv4(DST_MAC, SRC_MAC).pack().to_vec();
        frame.extend_from_slice(&ip.pack());
        frame.extend_from_slice(&[0x01, 0x01, 0x01, 0x00]); // NOP, NOP, NOP, EOL
        frame.extend_from_slice(&tcp.pack());
        frame
    }

    #[test]
    fn syn_round_trips_through_the_decoder() {
        let (tcp, frame) = syn_frame();
        let decoded = decode_frame(&frame).expect("decode");

        assert_eq!(decoded.ethernet, EthernetHeader::ipv4(DST_MAC, SRC_MAC));
        assert_eq!(decoded.ipv4.source_address, LOCALHOST);
        assert_eq!(decoded.ipv4.destination_address, LOCALHOST);
        assert_eq!(decoded.ipv4.header_len(), 20);
        assert!(Ipv4Header::checksum_valid(&frame[14..34]));
        assert_eq!(decoded.tcp, tcp);
        assert_eq!(decoded.tcp.source_port, 44755);
        assert_eq!(decoded.tcp.destination_port, 44755);
        assert_eq!(
            decoded.tcp.flags(),
            TcpFlags {
                syn: true,
                ..TcpFlags::default()
            }
        );
    }

    #[test]
    fn short_frames_are_truncated_not_panics() {
        for len in 0..14 {
            assert_eq!(
                decode_frame(&vec![0u8; len]),
                Err(DecodeError::TruncatedFrame {
                    needed: 14,
                    captured: len
                })
            );
        }
    }

    #[test]
    fn every_prefix_of_a_valid_frame_fails_cleanly() {
        let (_, frame) = syn_frame();
        for len in 0..frame.len() {
            assert!(matches!(
                decode_frame(&frame[..len]),
                Err(DecodeError::TruncatedFrame { .. })
            ));
        }
    }

    #[test]
    fn non_ipv4_ethertype_is_rejected_before_ip_decoding() {
        let mut frame = EthernetHeader {
            destination: DST_MAC,
            source: SRC_MAC,
            ethertype: 0x0806,
        }
        .pack()
        .to_vec();
        // Would be a truncated IPv4 header if it were looked at.
        frame.push(0x45);

        assert_eq!(decode_frame(&frame), Err(DecodeError::NotIpv4(0x0806)));
    }

    #[test]
    fn non_tcp_protocol_is_rejected() {
        let (_, mut frame) = syn_frame();
        frame[14 + 9] = 17;

        assert_eq!(decode_frame(&frame), Err(DecodeError::NotTcp(17)));
    }

    #[test]
    fn version_other_than_four_is_rejected() {
        let (_, mut frame) = syn_frame();
        frame[14] = 0x65;

        assert_eq!(decode_frame(&frame), Err(DecodeError::UnsupportedIpVersion(6)));

        // Checked before the IHL, which is meaningless for other versions.
        frame[14] = 0x60;
        assert_eq!(decode_frame(&frame), Err(DecodeError::UnsupportedIpVersion(6)));
    }

    #[test]
    fn ihl_below_five_is_rejected() {
        let (_, mut frame) = syn_frame();
        frame[14] = 0x44;

        assert_eq!(decode_frame(&frame), Err(DecodeError::InvalidHeaderLength(16)));
    }

    #[test]
    fn ihl_longer_than_capture_is_truncated() {
        let (_, mut frame) = syn_frame();
        frame[14] = 0x4f; // 60-byte header, capture holds 40 bytes of IP
        assert_eq!(
            decode_frame(&frame),
            Err(DecodeError::TruncatedFrame {
                needed: 74,
                captured: 54
            })
        );
    }

    #[test]
    fn tcp_header_is_located_after_ip_options() {
        let tcp = TcpHeader {
            control: TCP_SYN | TCP_ACK,
            ack_number: 2_000_000_001,
            ..TcpHeader::syn(443, 51515, 0x11223344, 64240)
        };
        let frame = frame_with_ip_options(&tcp);
        let decoded = decode_frame(&frame).expect("decode");

        assert_eq!(decoded.ipv4.ihl, 6);
        assert_eq!(decoded.ipv4.header_len(), 24);
        assert_eq!(decoded.tcp, tcp);
        // Reading at 14 + 20 would have produced the option word as ports.
        assert_ne!(decoded.tcp.source_port, 0x0101);
    }

    #[test]
    fn options_frame_missing_tcp_bytes_is_truncated() {
        let tcp = TcpHeader::syn(443, 51515, 1, 1);
        let frame = frame_with_ip_options(&tcp);

        assert_eq!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(DecodeError::TruncatedFrame {
                needed: 58,
                captured: 57
            })
        );
    }
}
