//! User/Group IDs
//!
//! Inodes do not store user and group ids directly, only a `u16` index into this table. Like
//! the fragment table it is stored in two levels: `ceil(id_count / 2048.0)` `u64` offsets at
//! `id_table_start`, each pointing to a metadata block holding up to 2048 ids.

use zerocopy::{AsBytes, FromBytes, Unaligned};

/// UID/GIDs are both stored as u32s. Both UIDs and GIDs are treated as IDs
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Id(pub crate::U32);

impl Id {
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// The index of an id in the uid_gid list
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Idx(pub u16);
