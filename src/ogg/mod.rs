//! Bit-exact Ogg container codec: CRC-32, page layout, segment tables, and
//! Opus mux/demux. No dependency on an external Ogg or Opus crate — Opus
//! packets are treated as opaque byte blobs (§4.9 "Opus opacity").

pub mod crc;
pub mod demux;
pub mod mux;
pub mod opus_headers;
pub mod page;

pub use demux::OggDemuxer;
pub use mux::OggOpusMuxer;
pub use page::Page;
