/// Internet checksum as described in RFC 1071.
///
/// The buffer is summed as big-endian 16-bit words with carries folded back
/// into the low 16 bits after every addition. A trailing odd byte is the high
/// byte of a word whose low byte is zero.
pub fn rfc1071_checksum(buffer: &[u8]) -> u16 {
    let mut words = buffer.chunks_exact(2);
    let mut sum: u32 = 0;

    for word in words.by_ref() {
        sum = fold(sum + u32::from(u16::from_be_bytes([word[0], word[1]])));
    }
    if let [last] = words.remainder() {
        sum = fold(sum + (u32::from(*last) << 8));
    }

    !(sum as u16)
}

/// Returns true when `buffer` carries a correct checksum somewhere inside it,
/// i.e. the sum including the checksum field folds to 0xffff.
pub fn verify(buffer: &[u8]) -> bool {
    rfc1071_checksum(buffer) == 0
}

fn fold(sum: u32) -> u32 {
    (sum & 0xffff) + (sum >> 16)
}
