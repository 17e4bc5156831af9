//! `OpusHead` and `OpusTags` packet builders (RFC 7845).

use byteorder::{ByteOrder, LittleEndian};

pub const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";
pub const OPUS_TAGS_MAGIC: &[u8; 8] = b"OpusTags";

pub const VENDOR_STRING: &str = concat!("wata-core ", env!("CARGO_PKG_VERSION"));

/// Build a 19-byte `OpusHead` packet.
pub fn opus_head(channels: u8, pre_skip: u16, input_sample_rate: u32, mapping_family: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(19);
    buf.extend_from_slice(OPUS_HEAD_MAGIC);
    buf.push(1); // version
    buf.push(channels);
    let mut pre_skip_bytes = [0u8; 2];
    LittleEndian::write_u16(&mut pre_skip_bytes, pre_skip);
    buf.extend_from_slice(&pre_skip_bytes);
    let mut rate_bytes = [0u8; 4];
    LittleEndian::write_u32(&mut rate_bytes, input_sample_rate);
    buf.extend_from_slice(&rate_bytes);
    buf.extend_from_slice(&0i16.to_le_bytes()); // output gain
    buf.push(mapping_family);
    buf
}

/// Build an `OpusTags` packet with our vendor string and zero user comments.
pub fn opus_tags() -> Vec<u8> {
    let vendor = VENDOR_STRING.as_bytes();
    let mut buf = Vec::with_capacity(8 + 4 + vendor.len() + 4);
    buf.extend_from_slice(OPUS_TAGS_MAGIC);
    let mut len_bytes = [0u8; 4];
    LittleEndian::write_u32(&mut len_bytes, vendor.len() as u32);
    buf.extend_from_slice(&len_bytes);
    buf.extend_from_slice(vendor);
    buf.extend_from_slice(&0u32.to_le_bytes()); // comment count
    buf
}

pub fn is_opus_head(packet: &[u8]) -> bool {
    packet.len() >= 8 && &packet[0..8] == OPUS_HEAD_MAGIC
}

pub fn is_opus_tags(packet: &[u8]) -> bool {
    packet.len() >= 8 && &packet[0..8] == OPUS_TAGS_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opus_head_is_19_bytes() {
        let head = opus_head(1, 312, 16_000, 0);
        assert_eq!(head.len(), 19);
        assert!(is_opus_head(&head));
        assert_eq!(head[8], 1); // version
        assert_eq!(head[9], 1); // channels
        assert_eq!(LittleEndian::read_u16(&head[10..12]), 312);
        assert_eq!(LittleEndian::read_u32(&head[12..16]), 16_000);
        assert_eq!(LittleEndian::read_i16(&head[16..18]), 0);
        assert_eq!(head[18], 0);
    }

    #[test]
    fn opus_tags_round_trip_fields() {
        let tags = opus_tags();
        assert!(is_opus_tags(&tags));
        let vendor_len = LittleEndian::read_u32(&tags[8..12]) as usize;
        let vendor = std::str::from_utf8(&tags[12..12 + vendor_len]).unwrap();
        assert_eq!(vendor, VENDOR_STRING);
        let comment_count = LittleEndian::read_u32(&tags[12 + vendor_len..16 + vendor_len]);
        assert_eq!(comment_count, 0);
    }
}
