use crate::error::DecodeError;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// Ethernet II header: destination MAC, source MAC, ethertype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub destination: [u8; 6],
    pub source: [u8; 6],
    pub ethertype: u16,
}

impl EthernetHeader {
    pub fn ipv4(destination: [u8; 6], source: [u8; 6]) -> Self {
        Self {
            destination,
            source,
            ethertype: ETHERTYPE_IPV4,
        }
    }

    pub fn pack(&self) -> [u8; ETHERNET_HEADER_LEN] {
        let mut buffer = [0u8; ETHERNET_HEADER_LEN];
        buffer[0..6].copy_from_slice(&self.destination);
        buffer[6..12].copy_from_slice(&self.source);
        buffer[12..14].copy_from_slice(&self.ethertype.to_be_bytes());
        buffer
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, DecodeError> {
        let bytes: &[u8; ETHERNET_HEADER_LEN] = bytes
            .get(..ETHERNET_HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(DecodeError::TruncatedFrame {
                needed: ETHERNET_HEADER_LEN,
                captured: bytes.len(),
            })?;

        let mut destination = [0u8; 6];
        let mut source = [0u8; 6];
        destination.copy_from_slice(&bytes[0..6]);
        source.copy_from_slice(&bytes[6..12]);

        Ok(Self {
            destination,
            source,
            ethertype: u16::from_be_bytes([bytes[12], bytes[13]]),
        })
    }
}
