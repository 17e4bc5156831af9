//! Ogg page layout: fixed 27-byte header, segment table, and payload.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::OggError;

use super::crc;

pub const MAGIC: &[u8; 4] = b"OggS";
pub const HEADER_LEN: usize = 27;

pub const FLAG_CONTINUED: u8 = 0x01;
pub const FLAG_BOS: u8 = 0x02;
pub const FLAG_EOS: u8 = 0x04;

/// A single parsed Ogg page, borrowed from (or owning) its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub flags: u8,
    pub granule_position: u64,
    pub serial_number: u32,
    pub sequence: u32,
    pub segment_table: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Page {
    pub fn is_continued(&self) -> bool {
        self.flags & FLAG_CONTINUED != 0
    }

    pub fn is_bos(&self) -> bool {
        self.flags & FLAG_BOS != 0
    }

    pub fn is_eos(&self) -> bool {
        self.flags & FLAG_EOS != 0
    }
}

/// Split `payload_len` bytes into an Ogg segment table: repeated 255s, then
/// a final segment in `0..=254` (which is `0` when `payload_len` is a
/// multiple of 255).
pub fn segment_table_for_len(payload_len: usize) -> Vec<u8> {
    let mut table = Vec::with_capacity(payload_len / 255 + 1);
    let mut remaining = payload_len;
    while remaining >= 255 {
        table.push(255);
        remaining -= 255;
    }
    table.push(remaining as u8);
    table
}

/// Build the wire bytes for one Ogg page, computing the segment table and
/// CRC-32 internally.
pub fn create_page(
    payload: &[u8],
    granule: u64,
    serial: u32,
    sequence: u32,
    flags: u8,
) -> Vec<u8> {
    let table = segment_table_for_len(payload.len());
    let mut buf = Vec::with_capacity(HEADER_LEN + table.len() + payload.len());

    buf.extend_from_slice(MAGIC);
    buf.push(0); // version
    buf.push(flags);
    let mut granule_bytes = [0u8; 8];
    LittleEndian::write_u64(&mut granule_bytes, granule);
    buf.extend_from_slice(&granule_bytes);
    let mut serial_bytes = [0u8; 4];
    LittleEndian::write_u32(&mut serial_bytes, serial);
    buf.extend_from_slice(&serial_bytes);
    let mut seq_bytes = [0u8; 4];
    LittleEndian::write_u32(&mut seq_bytes, sequence);
    buf.extend_from_slice(&seq_bytes);
    buf.extend_from_slice(&[0u8; 4]); // CRC placeholder
    buf.push(table.len() as u8);
    buf.extend_from_slice(&table);
    buf.extend_from_slice(payload);

    let crc = crc::checksum(&buf);
    LittleEndian::write_u32(&mut buf[22..26], crc);

    buf
}

/// Rewrite the CRC and flags of an already-serialized page in place, without
/// touching its payload or segment table. Used by the muxer to retroactively
/// set `EOS` on the last audio page.
pub fn rewrite_flags_and_crc(page_bytes: &mut [u8], flags: u8) {
    page_bytes[5] = flags;
    LittleEndian::write_u32(&mut page_bytes[22..26], 0);
    let crc = crc::checksum(page_bytes);
    LittleEndian::write_u32(&mut page_bytes[22..26], crc);
}

/// Parse one page starting at `bytes[0]`. Returns the page and the number of
/// bytes it occupied.
pub fn parse_page(bytes: &[u8]) -> Result<(Page, usize), OggError> {
    if bytes.len() < HEADER_LEN {
        return Err(OggError::TruncatedPage);
    }
    if &bytes[0..4] != MAGIC {
        return Err(OggError::InvalidMagic);
    }

    let flags = bytes[5];
    let granule_position = LittleEndian::read_u64(&bytes[6..14]);
    let serial_number = LittleEndian::read_u32(&bytes[14..18]);
    let sequence = LittleEndian::read_u32(&bytes[18..22]);
    let segment_count = bytes[26] as usize;

    let table_start = HEADER_LEN;
    let table_end = table_start + segment_count;
    if bytes.len() < table_end {
        return Err(OggError::TruncatedPage);
    }
    let segment_table = bytes[table_start..table_end].to_vec();
    let payload_len: usize = segment_table.iter().map(|&b| b as usize).sum();

    let payload_start = table_end;
    let payload_end = payload_start + payload_len;
    if bytes.len() < payload_end {
        return Err(OggError::TruncatedPage);
    }
    let payload = bytes[payload_start..payload_end].to_vec();

    Ok((
        Page {
            flags,
            granule_position,
            serial_number,
            sequence,
            segment_table,
            payload,
        },
        payload_end,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_table_boundaries() {
        assert_eq!(segment_table_for_len(100), vec![100]);
        assert_eq!(segment_table_for_len(255), vec![255, 0]);
        assert_eq!(segment_table_for_len(256), vec![255, 1]);
        assert_eq!(segment_table_for_len(510), vec![255, 255, 0]);
        assert_eq!(segment_table_for_len(600), vec![255, 255, 90]);
    }

    #[test]
    fn segment_table_len_and_sum_invariant() {
        for n in [0usize, 1, 254, 255, 256, 509, 510, 511, 1000, 12345] {
            let table = segment_table_for_len(n);
            assert_eq!(table.len(), n / 255 + 1);
            assert_eq!(table.iter().map(|&b| b as usize).sum::<usize>(), n);
        }
    }

    #[test]
    fn created_page_crc_verifies() {
        let payload = vec![7u8; 500];
        let bytes = create_page(&payload, 42, 1234, 0, FLAG_BOS);
        let mut zeroed = bytes.clone();
        LittleEndian::write_u32(&mut zeroed[22..26], 0);
        let recomputed = crc::checksum(&zeroed);
        let stored = LittleEndian::read_u32(&bytes[22..26]);
        assert_eq!(recomputed, stored);
    }

    #[test]
    fn round_trips_through_parse() {
        let payload = vec![9u8; 600];
        let bytes = create_page(&payload, 99, 55, 2, 0);
        let (page, consumed) = parse_page(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(page.payload, payload);
        assert_eq!(page.granule_position, 99);
        assert_eq!(page.serial_number, 55);
        assert_eq!(page.sequence, 2);
        assert_eq!(page.segment_table, vec![255, 255, 90]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = create_page(&[1, 2, 3], 0, 0, 0, 0);
        bytes[0] = b'X';
        assert_eq!(parse_page(&bytes), Err(OggError::InvalidMagic));
    }

    #[test]
    fn rejects_truncated_header() {
        assert_eq!(parse_page(&[0u8; 10]), Err(OggError::TruncatedPage));
    }
}
