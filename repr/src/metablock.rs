//! Metadata blocks
//!
//! Inodes, listings and lookup tables are stored in metadata blocks: a `u16` header followed by
//! at most 8KiB of data. The low 15 bits of the header give the size on disk, the high bit is set
//! when the data is stored uncompressed. Every block but the last of a table decompresses to
//! exactly 8KiB.

/// Uncompressed size of every full metadata block
pub const SIZE: usize = 8 * 1024;

/// Set in a header when the following block is stored as-is
pub const UNCOMPRESSED_FLAG: u16 = 0x8000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Header(pub u16);

impl Header {
    pub fn new(size: u16, uncompressed: bool) -> Self {
        debug_assert!(usize::from(size) <= SIZE);
        if uncompressed {
            Header(size | UNCOMPRESSED_FLAG)
        } else {
            Header(size)
        }
    }

    pub fn uncompressed(self) -> bool {
        self.0 & UNCOMPRESSED_FLAG == UNCOMPRESSED_FLAG
    }

    /// The size in bytes of the block on disk, not including the header
    pub fn size(self) -> u16 {
        self.0 & !UNCOMPRESSED_FLAG
    }
}
