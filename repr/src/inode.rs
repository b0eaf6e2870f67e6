//! Inode records
//!
//! Inodes are packed back to back in the metadata blocks of the inode table, each one a
//! [`Header`] followed by the record for its [`Kind`].

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::{U16, U32, U64};

/// The location of an inode: the offset of a metadata block relative to the start of the inode
/// table in the upper 48 bits, and the offset into the uncompressed block in the lower 16
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Ref(pub u64);

impl Ref {
    pub fn new(block_start: u64, start_offset: u16) -> Self {
        debug_assert!(block_start < 1 << 48);
        Ref(block_start << 16 | u64::from(start_offset))
    }

    #[inline]
    pub fn block_start(self) -> u64 {
        self.0 >> 16
    }

    #[inline]
    pub fn start_offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

/// Inode type, stored in the [`Header`]
///
/// Each kind is followed by its own record: basic and extended variants of directories, files,
/// devices and ipc objects, and a [`Symlink`] for both symlink kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Kind(pub u16);

impl Kind {
    pub const BASIC_DIR: Kind = Kind(1);
    pub const BASIC_FILE: Kind = Kind(2);
    pub const BASIC_SYMLINK: Kind = Kind(3);
    pub const BASIC_BLOCK_DEV: Kind = Kind(4);
    pub const BASIC_CHAR_DEV: Kind = Kind(5);
    pub const BASIC_FIFO: Kind = Kind(6);
    pub const BASIC_SOCKET: Kind = Kind(7);

    pub const EXT_DIR: Kind = Kind(8);
    pub const EXT_FILE: Kind = Kind(9);
    pub const EXT_SYMLINK: Kind = Kind(10);
    pub const EXT_BLOCK_DEV: Kind = Kind(11);
    pub const EXT_CHAR_DEV: Kind = Kind(12);
    pub const EXT_FIFO: Kind = Kind(13);
    pub const EXT_SOCKET: Kind = Kind(14);

    pub const MAX: Kind = Kind::EXT_SOCKET;

    pub fn is_extended(self) -> bool {
        (Kind::EXT_DIR.0..=Kind::MAX.0).contains(&self.0)
    }

    /// The basic kind for an extended kind. Directory entries always store basic kinds
    pub fn to_basic(self) -> Kind {
        if self.is_extended() {
            Kind(self.0 - 7)
        } else {
            self
        }
    }
}

/// Common to every inode
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Header {
    pub inode_type: U16,
    /// Permission bits of `mode_t`, without the file type
    pub permissions: U16,
    /// Index into the id table
    pub uid_idx: U16,
    /// Index into the id table
    pub gid_idx: U16,
    /// Seconds since the unix epoch, unsigned
    pub modified_time: U32,
    /// 1 up to the superblock inode count, shared by hard links
    pub inode_number: U32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct BasicDir {
    /// Offset of the metadata block holding the listing, from the start of the directory table
    pub block_idx: U32,
    pub hard_link_count: U32,
    /// Listing size, 3 more than the bytes actually stored
    pub file_size: U16,
    /// Offset of the listing in the uncompressed metadata block
    pub block_offset: U16,
    pub parent_inode_number: U32,
}

/// Followed by `index_count` directory index records
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct ExtendedDir {
    pub hard_link_count: U32,
    pub file_size: U32,
    pub block_idx: U32,
    pub parent_inode_number: U32,
    pub index_count: U16,
    pub block_offset: U16,
    /// `0xFFFFFFFF` without xattrs
    pub xattr_idx: U32,
}

/// Followed by a `u32` [`Size`](crate::datablock::Size) per data block
///
/// With a fragment, only full blocks are listed. Without one, the short last block is listed too.
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct BasicFile {
    /// Absolute offset of the first data block
    pub blocks_start: U32,
    /// Index into the fragment table, [`NO_FRAGMENT`](crate::fragment::NO_FRAGMENT) when the file
    /// has no tail there
    pub fragment_block_index: U32,
    /// Offset of the tail in the uncompressed fragment block
    pub block_offset: U32,
    pub file_size: U32,
}

/// Like [`BasicFile`], with wider fields
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct ExtendedFile {
    pub blocks_start: U64,
    pub file_size: U64,
    /// Bytes of all-zero blocks left out
    pub sparse: U64,
    pub hard_link_count: U32,
    pub fragment_block_index: U32,
    pub block_offset: U32,
    pub xattr_idx: U32,
}

/// Followed by `target_size` bytes of target path, then a `u32` xattr index for `EXT_SYMLINK`
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Symlink {
    pub hard_link_count: U32,
    pub target_size: U32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct BasicDevice {
    pub hard_link_count: U32,
    /// A [`DeviceNumber`]
    pub device: U32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct ExtendedDevice {
    pub hard_link_count: U32,
    pub device: U32,
    pub xattr_idx: U32,
}

/// A linux `dev_t`, encoded the way `new_encode_dev` does
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeviceNumber(pub u32);

impl DeviceNumber {
    pub fn new(major: u32, minor: u32) -> Self {
        assert!(major <= 0x0_0FFF);
        assert!(minor <= 0xF_FFFF);
        DeviceNumber(major << 8 | minor & 0xFF | (minor & !0xFF) << 12)
    }

    pub fn major(self) -> u32 {
        (self.0 & 0xfff00) >> 8
    }

    pub fn minor(self) -> u32 {
        (self.0 & 0xff) | ((self.0 >> 12) & 0xfff00)
    }
}

/// Fifos and sockets
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct BasicIpc {
    pub hard_link_count: U32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct ExtendedIpc {
    pub hard_link_count: U32,
    pub xattr_idx: U32,
}

assert_eq_size!(Header, [u8; 16]);
assert_eq_size!(BasicDir, [u8; 16]);
assert_eq_size!(ExtendedDir, [u8; 24]);
assert_eq_size!(BasicFile, [u8; 16]);
assert_eq_size!(ExtendedFile, [u8; 40]);
assert_eq_size!(Symlink, [u8; 8]);
assert_eq_size!(BasicDevice, [u8; 8]);
assert_eq_size!(ExtendedDevice, [u8; 12]);
assert_eq_size!(BasicIpc, [u8; 4]);
assert_eq_size!(ExtendedIpc, [u8; 8]);
