//! Directory Table
//!
//! The entries of every directory, stored in metadata blocks. A directory inode points at the
//! start of its listing: runs of entries, each run preceded by a header naming the inode table
//! metadata block all entries of the run live in.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::{I16, U16, U32};

/// The sizes stored in directory inodes are 3 bytes larger than the listing, for the implicit
/// `.` and `..` entries
pub const SIZE_OVERHEAD: u64 = 3;

/// A header is never followed by more entries than this
pub const MAX_ENTRIES: u32 = 256;

/// Names are at most this many bytes long
pub const MAX_NAME_LEN: usize = 256;

/// Starts a run of entries whose inodes share one metadata block
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Header {
    /// Entries in the run, minus one
    pub count: U32,
    /// Offset of the inode metadata block, from the start of the inode table
    pub start: U32,
    /// Base for the `inode_offset` of each entry
    pub inode_number: U32,
}

/// Followed by `name_size + 1` bytes of name
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Entry {
    /// Offset of the inode in its uncompressed metadata block
    pub offset: U16,
    pub inode_offset: I16,
    /// Always a basic [`Kind`](crate::inode::Kind), even for extended inodes
    pub kind: U16,
    pub name_size: U16,
}

/// Lookup aid stored after an extended directory inode, followed by `name_size + 1` bytes of the
/// first name after the header it points at
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Index {
    /// Offset of the header within the uncompressed listing
    pub index: U32,
    /// Offset of the metadata block holding the header, from the start of the directory table
    pub start: U32,
    pub name_size: U32,
}

assert_eq_size!(Header, [u8; 12]);
assert_eq_size!(Entry, [u8; 8]);
assert_eq_size!(Index, [u8; 12]);
