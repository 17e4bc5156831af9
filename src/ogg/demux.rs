//! Ogg demuxer: walks pages, reassembles packets across segment and page
//! boundaries, and separates the two Opus header packets from the audio
//! stream.

use crate::error::OggError;

use super::opus_headers;
use super::page;

pub struct OggDemuxer;

impl OggDemuxer {
    /// Walk `bytes` and return every packet found, in order, including the
    /// two leading Opus header packets. A page with an invalid magic at the
    /// current scan offset is logged and ends the walk (bytes already
    /// consumed are still returned).
    pub fn all_packets(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        let mut pending: Option<Vec<u8>> = None;
        let mut offset = 0;

        while offset < bytes.len() {
            let (page, consumed) = match page::parse_page(&bytes[offset..]) {
                Ok(result) => result,
                Err(err) => {
                    log::warn!("ogg demux: stopping scan at offset {offset}: {err}");
                    break;
                }
            };

            let mut seg_offset = 0usize;
            for &seg_len in &page.segment_table {
                let seg = &page.payload[seg_offset..seg_offset + seg_len as usize];
                seg_offset += seg_len as usize;

                let packet = pending.get_or_insert_with(Vec::new);
                packet.extend_from_slice(seg);

                if (seg_len as usize) < 255 {
                    let finished = pending.take().unwrap();
                    if !finished.is_empty() {
                        packets.push(finished);
                    }
                }
                // seg_len == 255 means the packet continues into the next
                // segment, possibly on the next page; `pending` stays set.
            }

            offset += consumed;
        }

        packets
    }

    /// Demux `bytes` into the audio packet stream, validating (but not
    /// rejecting on failure of) the two leading Opus header packets.
    pub fn demux(bytes: &[u8]) -> Result<Vec<Vec<u8>>, OggError> {
        let mut packets = Self::all_packets(bytes).into_iter();

        match packets.next() {
            Some(p) if opus_headers::is_opus_head(&p) => {}
            Some(_) => log::warn!("ogg demux: first packet is not OpusHead"),
            None => log::warn!("ogg demux: stream has no packets"),
        }

        match packets.next() {
            Some(p) if opus_headers::is_opus_tags(&p) => {}
            Some(_) => log::warn!("ogg demux: second packet is not OpusTags"),
            None => log::warn!("ogg demux: stream has fewer than two packets"),
        }

        Ok(packets.collect())
    }
}
