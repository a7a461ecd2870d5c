//! TSM file format: `[data blocks][index blocks in schema order][footer]`
//! (spec.md §4.B, §6). `writer` builds the byte layout from a converter's
//! column builders; `reader` recovers the footer/index region and serves
//! single-block reads for the query executors.

pub mod reader;
pub mod writer;

/// 8-byte footer: `(index_offset: u32, footer_offset: u32)`, little-endian.
pub const FOOTER_SIZE: usize = 8;
