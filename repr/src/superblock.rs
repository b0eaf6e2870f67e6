use bitflags::bitflags;
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::{compression, inode, U16, U32, U64};

/// `hsqs`, read as a little endian u32
pub const MAGIC: u32 = 0x7371_7368;

pub const VERSION_MAJOR: u16 = 4;
pub const VERSION_MINOR: u16 = 0;

/// Bytes taken by the superblock at the start of the archive
pub const SIZE: u64 = 96;

/// The fixed header of an archive
///
/// Every `*_table_start` is an absolute offset from the start of the archive. Tables which are
/// absent hold `u64::MAX`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Superblock {
    pub magic: U32,
    pub inode_count: U32,
    /// Seconds since the unix epoch, unsigned
    pub modification_time: U32,
    /// A power of two from 4KiB to 1MiB
    pub block_size: U32,
    pub fragment_entry_count: U32,
    pub compression_id: U16,
    /// Must equal log2(block_size)
    pub block_log: U16,
    pub flags: U16,
    pub id_count: U16,
    pub version_major: U16,
    pub version_minor: U16,
    pub root_inode_ref: U64,
    /// Archives are usually padded, so the file can be longer than this
    pub bytes_used: U64,
    pub id_table_start: U64,
    pub xattr_id_table_start: U64,
    pub inode_table_start: U64,
    pub directory_table_start: U64,
    pub fragment_table_start: U64,
    pub export_table_start: U64,
}

assert_eq_size!(Superblock, [u8; SIZE as usize]);

impl Superblock {
    pub fn compression_id(&self) -> compression::Id {
        compression::Id(self.compression_id.get())
    }

    pub fn root_inode_ref(&self) -> inode::Ref {
        inode::Ref(self.root_inode_ref.get())
    }

    /// `None` if unknown flag bits are set
    pub fn flags(&self) -> Option<Flags> {
        Flags::from_bits(self.flags.get())
    }
}

bitflags! {
    /// Writer settings, mostly informational for a reader since every block records whether
    /// it is compressed
    pub struct Flags: u16 {
        /// Also covers the id table
        const UNCOMPRESSED_INODES     = 1;
        const UNCOMPRESSED_DATA       = 1 << 1;
        /// Unused since version 4
        const CHECK                   = 1 << 2;
        const UNCOMPRESSED_FRAGMENTS  = 1 << 3;
        /// Tails are stored in short blocks
        const NO_FRAGMENTS            = 1 << 4;
        const ALWAYS_FRAGMENTS        = 1 << 5;
        const DUPLICATES              = 1 << 6;
        /// The export table is present
        const EXPORTABLE              = 1 << 7;
        const UNCOMPRESSED_XATTRS     = 1 << 8;
        const NO_XATTRS               = 1 << 9;
        /// Compressor options follow the superblock
        const COMPRESSOR_OPTIONS      = 1 << 10;
        const UNCOMPRESSED_IDS        = 1 << 11;
    }
}
