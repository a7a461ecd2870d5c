//! Column-level codecs (spec.md §4.A). Every encoded block begins with a
//! 1-byte tag identifying the scheme used; decoders switch on it. The block
//! builder in `crate::block` chooses which codec to use per block based on
//! observed statistics (SAME / BITPACKING / SIMPLE8B+ZSTD / PLAIN for
//! integers, SAME / GORILLA+ZSTD / PLAIN for floats, ZSTD / PLAIN for
//! strings).

pub mod bit;
pub mod float;
pub mod gorilla;
pub mod integer;
pub mod simple8b;
pub mod string;
pub mod zigzag;

pub const INT_SAME: u8 = 0;
pub const INT_BITPACK: u8 = 1;
pub const INT_SIMPLE8B_ZSTD: u8 = 2;
pub const INT_PLAIN: u8 = 3;

pub const FLOAT_SAME: u8 = 0;
pub const FLOAT_GORILLA_ZSTD: u8 = 1;
pub const FLOAT_PLAIN: u8 = 2;

pub const STRING_ZSTD: u8 = 0;
pub const STRING_PLAIN: u8 = 1;

/// ZSTD compression level used throughout; chosen for fast compaction over
/// maximal ratio, matching the write-heavy workload of §5.
pub const ZSTD_LEVEL: i32 = 3;
