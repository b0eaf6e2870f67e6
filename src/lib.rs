//! Reading squashfs archives
//!
//! ```no_run
//! # fn main() -> unsquash::Result<()> {
//! let archive = unsquash::Archive::open("image.squashfs")?;
//! let root = archive.root();
//! for entry in root.entries() {
//!     println!("{}", root.stat(&entry.name)?);
//! }
//! let motd = root.read_file("etc/motd")?;
//! root.extract_to("out")?;
//! # Ok(())
//! # }
//! ```

mod archive;
pub mod compression;
mod config;
mod decompress_threads;
mod dir;
mod errors;
mod extract;
mod file;
mod fs;
mod inode;
mod metablock;
mod pattern;
mod source;
mod table;
mod thread;

pub use crate::archive::Archive;
pub use crate::config::{DirectoryEnd, ExtractOptions, Options};
pub use crate::dir::Entry;
pub use crate::errors::{Error, Result};
pub use crate::extract::ExtractReport;
pub use crate::file::FileReader;
pub use crate::fs::{Dir, Metadata, Node};
pub use crate::inode::{DirIndex, FileType, Inode};
pub use crate::source::{Positioned, SequentialSource};
pub use repr::{self, Mode};

/// Decoded inode payloads
pub mod inodes {
    pub use crate::inode::{Data, Device, Directory, File, Header, Ipc, Symlink};
}

static_assertions::assert_impl_all!(Archive<positioned_io::RandomAccessFile>: Send, Sync, Clone);
static_assertions::assert_impl_all!(Dir<positioned_io::RandomAccessFile>: Send, Sync);
static_assertions::assert_impl_all!(Node<Vec<u8>>: Send, Sync);
static_assertions::assert_impl_all!(Error: Send, Sync, std::error::Error);
