//! Compressor options
//!
//! When the superblock has the `COMPRESSOR_OPTIONS` flag, a single uncompressed metadata block
//! directly after the superblock holds one of these records, picked by the compression id. Lzma
//! has no options and lzo is not supported.

use bitflags::bitflags;
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::{I32, U16, U32};

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Gzip {
    /// 1 to 9
    pub compression_level: U32,
    /// Log2 of the deflate window, 8 to 15
    pub window_size: U16,
    /// [`GzipStrategies`] tried by the writer, only matters when compressing
    pub strategies: U16,
}

impl Default for Gzip {
    fn default() -> Self {
        Self {
            compression_level: U32::new(9),
            window_size: U16::new(15),
            strategies: U16::new(GzipStrategies::DEFAULT.bits()),
        }
    }
}

bitflags! {
    pub struct GzipStrategies: u16 {
        const DEFAULT = 0x01;
        const FILTERED = 0x02;
        const HUFFMAN_ONLY = 0x04;
        const RUN_LENGTH_ENCODED = 0x08;
        const FIXED = 0x10;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Xz {
    /// At least 8KiB, either 2^n or 2^n + 2^(n+1)
    pub dictionary_size: U32,
    /// [`XzFilters`] for executable code
    pub executable_filters: U32,
}

impl Default for Xz {
    fn default() -> Self {
        Self {
            dictionary_size: U32::new(crate::BLOCK_SIZE_DEFAULT),
            executable_filters: U32::new(0),
        }
    }
}

bitflags! {
    /// Branch/call/jump filters, applied before compression
    pub struct XzFilters: u32 {
        const X86 = 0x01;
        const POWERPC = 0x02;
        const IA64 = 0x04;
        const ARM = 0x08;
        const ARM_THUMB = 0x10;
        const SPARC = 0x20;
    }
}

/// The only lz4 format version squashfs uses
pub const LZ4_LEGACY: i32 = 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Lz4 {
    /// Always [`LZ4_LEGACY`]
    pub version: I32,
    pub flags: U32,
}

impl Default for Lz4 {
    fn default() -> Self {
        Self {
            version: I32::new(LZ4_LEGACY),
            flags: U32::new(0),
        }
    }
}

bitflags! {
    pub struct Lz4Flags: u32 {
        /// Compressed with lz4hc, decoding is unchanged
        const HIGH_COMPRESSION = 0x01;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Zstd {
    pub compression_level: U32,
}

impl Default for Zstd {
    fn default() -> Self {
        Self {
            compression_level: U32::new(15),
        }
    }
}

assert_eq_size!(Gzip, [u8; 8]);
assert_eq_size!(Xz, [u8; 8]);
assert_eq_size!(Lz4, [u8; 8]);
assert_eq_size!(Zstd, [u8; 4]);

impl Gzip {
    /// `None` when unknown strategy bits are set
    pub fn strategies(&self) -> Option<GzipStrategies> {
        GzipStrategies::from_bits(self.strategies.get())
    }
}

impl Xz {
    pub fn filters(&self) -> Option<XzFilters> {
        XzFilters::from_bits(self.executable_filters.get())
    }
}

impl Lz4 {
    pub fn flags(&self) -> Option<Lz4Flags> {
        Lz4Flags::from_bits(self.flags.get())
    }
}
