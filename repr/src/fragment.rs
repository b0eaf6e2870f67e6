//! Fragment table
//!
//! Tails of files shorter than a block are packed together into fragment blocks. The table
//! holds one [`Entry`] per fragment block, 512 to a metadata block, with a `u64` array of
//! metadata block offsets at `fragment_table_start`.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::{U32, U64};

pub use crate::datablock::Size;

/// Where a fragment block is stored
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Entry {
    pub start: U64,
    /// On-disk size, with the same uncompressed bit as data block sizes
    pub size: U32,
    pub _unused: U32,
}

assert_eq_size!(Entry, [u8; 16]);

impl Entry {
    pub fn size(&self) -> Size {
        Size(self.size.get())
    }
}

/// Marks a file without a fragment
pub const NO_FRAGMENT: u32 = 0xFFFF_FFFF;
