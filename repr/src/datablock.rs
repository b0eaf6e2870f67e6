//! Data blocks
//!
//! File contents are split into `block_size` chunks, each compressed on its own. The inode of a
//! file lists the on-disk size of every block, the blocks themselves are stored back to back
//! starting at the inode's `blocks_start`.

use std::fmt;

/// The max size of a datablock: 1 MiB
pub const MAX_SIZE: usize = 1024 * 1024;

/// The on-disk size of a data block or fragment block
///
/// A size of zero marks a sparse block: `block_size` zero bytes which take no space on disk.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Size(pub u32);

impl Size {
    pub const UNCOMPRESSED_FLAG: u32 = 1 << 24;
    pub const ZERO: Size = Size(0);

    pub fn new(mut size: u32, uncompressed: bool) -> Self {
        debug_assert!(size <= MAX_SIZE as u32);
        if uncompressed {
            size |= Self::UNCOMPRESSED_FLAG;
        }
        Self(size)
    }

    pub fn size(self) -> u32 {
        self.0 & !Self::UNCOMPRESSED_FLAG
    }

    pub fn uncompressed(self) -> bool {
        self.0 & Self::UNCOMPRESSED_FLAG != 0
    }

    pub fn is_sparse(self) -> bool {
        self.size() == 0
    }
}

impl fmt::Debug for Size {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Size")
            .field("size", &self.size())
            .field("uncompressed", &self.uncompressed())
            .finish()
    }
}
