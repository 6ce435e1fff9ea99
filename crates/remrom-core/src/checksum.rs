//! Checksums: RFC 1071 internet checksum for IPv4/UDP headers, and the
//! BLAKE3 content hash that guards whole-module integrity.

/// BLAKE3 digest of a module's complete content.
pub type ContentHash = [u8; 32];

/// Hash of module content. Carried in every packet header so the receiver
/// can verify a reassembled transfer before making it visible.
pub fn content_hash(content: &[u8]) -> ContentHash {
    *blake3::hash(content).as_bytes()
}

/// Short hex form for log lines.
pub fn short_hash(hash: &ContentHash) -> String {
    hex::encode(&hash[..8])
}

// ── Internet checksum ────────────────────────────────────────────────────────

/// One's complement of the one's complement sum of `data` as 16-bit words.
pub fn internet_checksum(data: &[u8]) -> u16 {
    fold(sum_words(data, 0))
}

/// IPv4 header checksum. Returns 0 for a header whose checksum field is valid.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    internet_checksum(header)
}

/// UDP checksum over the IPv4 pseudo-header and `segment` (UDP header plus
/// payload). A computed zero is transmitted as 0xffff; zero on the wire
/// means "no checksum".
pub fn udp_checksum_ipv4(src: &[u8; 4], dst: &[u8; 4], segment: &[u8]) -> u16 {
    match pseudo_header_sum(src, dst, segment) {
        0 => 0xffff,
        c => c,
    }
}

/// True when `segment` carries no checksum or a correct one.
pub fn udp_checksum_valid(src: &[u8; 4], dst: &[u8; 4], segment: &[u8]) -> bool {
    if segment.len() < 8 || segment[6..8] == [0, 0] {
        return true;
    }
    pseudo_header_sum(src, dst, segment) == 0
}

fn pseudo_header_sum(src: &[u8; 4], dst: &[u8; 4], segment: &[u8]) -> u16 {
    let mut sum = sum_words(src, 0);
    sum = sum_words(dst, sum);
    sum += u32::from(crate::wire::IPPROTO_UDP);
    sum += segment.len() as u32;
    fold(sum_words(segment, sum))
}

fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let Some(&last) = chunks.remainder().first() {
        sum += u32::from(last) << 8;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known sample header; its checksum is 0xb861.
    const IPV4_SAMPLE: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8, 0x00,
        0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    #[test]
    fn ipv4_checksum_known_value() {
        assert_eq!(ipv4_header_checksum(&IPV4_SAMPLE), 0xb861);
        let mut hdr = IPV4_SAMPLE;
        hdr[10..12].copy_from_slice(&0xb861u16.to_be_bytes());
        assert_eq!(ipv4_header_checksum(&hdr), 0);
    }

    #[test]
    fn udp_checksum_verifies_after_insertion() {
        let src = [10, 0, 0, 1];
        let dst = [10, 0, 0, 2];
        let mut seg = vec![0xc8, 0x22, 0x23, 0x31, 0x00, 0x0d, 0x00, 0x00, b'h', b'e', b'l', b'l', b'o'];
        let c = udp_checksum_ipv4(&src, &dst, &seg);
        seg[6..8].copy_from_slice(&c.to_be_bytes());
        assert!(udp_checksum_valid(&src, &dst, &seg));
        seg[9] ^= 0x01;
        assert!(!udp_checksum_valid(&src, &dst, &seg));
    }

    #[test]
    fn zero_udp_checksum_means_unchecked() {
        let seg = [0u8, 1, 0, 2, 0, 9, 0, 0, 0xaa];
        assert!(udp_checksum_valid(&[1, 2, 3, 4], &[5, 6, 7, 8], &seg));
    }

    #[test]
    fn content_hash_is_blake3() {
        assert_eq!(content_hash(b"CAFEBABE"), *blake3::hash(b"CAFEBABE").as_bytes());
        assert_ne!(content_hash(b"CAFEBABE"), content_hash(b"CAFEBABF"));
        assert_eq!(short_hash(&[0xab; 32]), "abababababababab");
    }
}
