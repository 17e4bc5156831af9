//! Stateful Ogg Opus muxer: one logical stream per instance, not shareable
//! across tasks (§5).

use rand::Rng;

use super::page::{self, FLAG_BOS, FLAG_EOS};
use super::opus_headers;

/// Builds an Ogg Opus byte stream, one packet per page, with exactly one
/// `BOS` and one `EOS` page and a strictly monotonic page sequence.
pub struct OggOpusMuxer {
    input_sample_rate: u32,
    channels: u8,
    pre_skip: u16,
    serial: u32,
    sequence: u32,
    granule: u64,
    out: Vec<u8>,
    last_audio_page_range: Option<(usize, usize)>,
    headers_written: bool,
    finalized: bool,
}

impl OggOpusMuxer {
    pub fn new(input_sample_rate: u32, channels: u8, pre_skip: u16) -> Self {
        let serial = rand::thread_rng().gen();
        Self {
            input_sample_rate,
            channels,
            pre_skip,
            serial,
            sequence: 0,
            granule: 0,
            out: Vec::new(),
            last_audio_page_range: None,
            headers_written: false,
            finalized: false,
        }
    }

    pub fn with_defaults(channels: u8) -> Self {
        Self::new(16_000, channels, 312)
    }

    /// Emit the `OpusHead` (page 0, `BOS`) and `OpusTags` (page 1) pages.
    pub fn write_headers(&mut self) {
        if self.headers_written {
            return;
        }
        let head = opus_headers::opus_head(self.channels, self.pre_skip, self.input_sample_rate, 0);
        let head_page = page::create_page(&head, 0, self.serial, self.sequence, FLAG_BOS);
        self.out.extend_from_slice(&head_page);
        self.sequence += 1;

        let tags = opus_headers::opus_tags();
        let tags_page = page::create_page(&tags, 0, self.serial, self.sequence, 0);
        self.out.extend_from_slice(&tags_page);
        self.sequence += 1;

        self.headers_written = true;
    }

    fn granule_delta(&self, samples_at_input_rate: u64) -> u64 {
        ((samples_at_input_rate * 48_000) as f64 / self.input_sample_rate as f64).round() as u64
    }

    /// Add one Opus packet as its own page, advancing the granule position
    /// by the 48 kHz-equivalent sample count it represents.
    pub fn add_packet(&mut self, packet: &[u8], samples_at_input_rate: u64) {
        self.granule += self.granule_delta(samples_at_input_rate);
        let start = self.out.len();
        let page_bytes = page::create_page(packet, self.granule, self.serial, self.sequence, 0);
        self.out.extend_from_slice(&page_bytes);
        let end = self.out.len();
        self.last_audio_page_range = Some((start, end));
        self.sequence += 1;
    }

    /// Close the stream. With `last_packet`, a fresh `EOS` page is appended.
    /// Without one, the most recently emitted audio page is rewritten in
    /// place with `EOS` set (same sequence number and granule).
    pub fn finalize(&mut self, last_packet: Option<(&[u8], u64)>) {
        if self.finalized {
            return;
        }
        match last_packet {
            Some((packet, samples)) => {
                self.granule += self.granule_delta(samples);
                let page_bytes =
                    page::create_page(packet, self.granule, self.serial, self.sequence, FLAG_EOS);
                self.out.extend_from_slice(&page_bytes);
                self.sequence += 1;
            }
            None => {
                if let Some((start, end)) = self.last_audio_page_range {
                    page::rewrite_flags_and_crc(&mut self.out[start..end], FLAG_EOS);
                }
            }
        }
        self.finalized = true;
    }

    /// Convenience wrapper: write headers, add all but the last packet, then
    /// finalize with the last. `samples_per_packet` is the input-rate
    /// sample count represented by each packet (identical for every packet
    /// in the common fixed-frame-size case).
    pub fn mux_packets(packets: &[Vec<u8>], samples_per_packet: u64, input_sample_rate: u32, channels: u8, pre_skip: u16) -> Vec<u8> {
        let mut muxer = Self::new(input_sample_rate, channels, pre_skip);
        muxer.write_headers();
        if packets.is_empty() {
            muxer.finalize(None);
            return muxer.into_bytes();
        }
        for packet in &packets[..packets.len() - 1] {
            muxer.add_packet(packet, samples_per_packet);
        }
        let last = &packets[packets.len() - 1];
        muxer.finalize(Some((last, samples_per_packet)));
        muxer.into_bytes()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }
}
