//! Builds small squashfs images in memory
//!
//! Metadata blocks (inodes and directories) are stored uncompressed, so inode and listing
//! references follow directly from offsets in the flat tables. Data blocks, fragments and the
//! fragment and id tables are zlib compressed.

#![allow(dead_code)]

use repr::datablock;
use repr::directory;
use repr::fragment::{self, NO_FRAGMENT};
use repr::inode::{self, DeviceNumber, Kind, Ref};
use repr::metablock;
use repr::superblock::{self, Superblock};
use std::io::Write;
use zerocopy::AsBytes;

pub const BLOCK_SIZE: u32 = 4096;
pub const MTIME: u32 = 1_600_000_000;

/// Something to put in an image
#[derive(Debug, Clone)]
pub enum Tree {
    File {
        data: Vec<u8>,
        /// Store the tail in a fragment instead of a short block
        fragment: bool,
        mode: u16,
    },
    Dir {
        entries: Vec<(String, Tree)>,
        mode: u16,
    },
    Symlink(String),
    CharDev(u32, u32),
    Fifo,
}

pub fn file(data: impl Into<Vec<u8>>) -> Tree {
    Tree::File {
        data: data.into(),
        fragment: true,
        mode: 0o644,
    }
}

pub fn file_without_fragment(data: impl Into<Vec<u8>>) -> Tree {
    Tree::File {
        data: data.into(),
        fragment: false,
        mode: 0o644,
    }
}

pub fn dir(entries: Vec<(&str, Tree)>) -> Tree {
    Tree::Dir {
        entries: entries
            .into_iter()
            .map(|(name, tree)| (name.to_owned(), tree))
            .collect(),
        mode: 0o755,
    }
}

pub fn symlink(target: &str) -> Tree {
    Tree::Symlink(target.to_owned())
}

/// Bytes which compress well but are not all zero
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i / 7) as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub struct ImageBuilder {
    uid: u32,
    gid: u32,
    /// Added to the declared listing size of the root directory
    root_size_slack: u32,
    /// Stored in a metadata block right after the superblock
    compressor_options: Option<Vec<u8>>,
    data: Vec<u8>,
    inodes: Vec<u8>,
    dirs: Vec<u8>,
    fragments: Vec<fragment::Entry>,
    fragment_block: Vec<u8>,
    next_inode: u32,
}

/// Where a flat offset lands in a table of uncompressed metadata blocks
fn metadata_position(offset: usize) -> (u64, u16) {
    let block = offset / metablock::SIZE;
    let block_start = block * (metablock::SIZE + 2);
    (block_start as u64, (offset % metablock::SIZE) as u16)
}

fn metadata_blocks(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in data.chunks(metablock::SIZE) {
        out.extend_from_slice(&metablock::Header::new(chunk.len() as u16, true).0.to_le_bytes());
        out.extend_from_slice(chunk);
    }
    out
}

struct Written {
    inode_ref: Ref,
    kind: Kind,
    inode_number: u32,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            uid: 0,
            gid: 0,
            root_size_slack: 0,
            compressor_options: None,
            data: Vec::new(),
            inodes: Vec::new(),
            dirs: Vec::new(),
            fragments: Vec::new(),
            fragment_block: Vec::new(),
            next_inode: 1,
        }
    }

    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn root_size_slack(mut self, slack: u32) -> Self {
        self.root_size_slack = slack;
        self
    }

    pub fn compressor_options(mut self, options: impl Into<Vec<u8>>) -> Self {
        self.compressor_options = Some(options.into());
        self
    }

    /// Where file data starts, after the superblock and the compressor options
    fn data_start(&self) -> u64 {
        let options = self
            .compressor_options
            .as_ref()
            .map_or(0, |options| options.len() + 2);
        superblock::SIZE + options as u64
    }

    pub fn build(mut self, root: &Tree) -> Vec<u8> {
        let root = self.write_tree(root, true);
        self.flush_fragment();

        let mut image = vec![0; superblock::SIZE as usize];
        let mut flags = superblock::Flags::empty();
        if let Some(options) = &self.compressor_options {
            flags |= superblock::Flags::COMPRESSOR_OPTIONS;
            image.extend(metadata_blocks(options));
        }
        debug_assert_eq!(image.len() as u64, self.data_start());
        image.extend_from_slice(&self.data);

        let inode_table_start = image.len() as u64;
        image.extend(metadata_blocks(&self.inodes));
        let directory_table_start = image.len() as u64;
        image.extend(metadata_blocks(&self.dirs));
        let fragment_table_start = write_table(&mut image, self.fragments.as_bytes());
        let ids: Vec<repr::U32> = if self.uid == self.gid {
            vec![self.uid.into()]
        } else {
            vec![self.uid.into(), self.gid.into()]
        };
        let id_table_start = write_table(&mut image, ids.as_bytes());

        let sb = Superblock {
            magic: superblock::MAGIC.into(),
            inode_count: (self.next_inode - 1).into(),
            modification_time: MTIME.into(),
            block_size: BLOCK_SIZE.into(),
            fragment_entry_count: (self.fragments.len() as u32).into(),
            compression_id: repr::compression::Id::GZIP.0.into(),
            block_log: 12u16.into(),
            flags: flags.bits().into(),
            id_count: (ids.len() as u16).into(),
            version_major: superblock::VERSION_MAJOR.into(),
            version_minor: superblock::VERSION_MINOR.into(),
            root_inode_ref: root.inode_ref.0.into(),
            bytes_used: (image.len() as u64).into(),
            id_table_start: id_table_start.into(),
            xattr_id_table_start: u64::MAX.into(),
            inode_table_start: inode_table_start.into(),
            directory_table_start: directory_table_start.into(),
            fragment_table_start: fragment_table_start.into(),
            export_table_start: u64::MAX.into(),
        };
        image[..superblock::SIZE as usize].copy_from_slice(sb.as_bytes());
        image
    }

    fn header(&mut self, kind: Kind, mode: u16) -> (inode::Header, u32) {
        let inode_number = self.next_inode;
        self.next_inode += 1;
        let header = inode::Header {
            inode_type: kind.0.into(),
            permissions: mode.into(),
            uid_idx: 0u16.into(),
            gid_idx: u16::from(self.uid != self.gid).into(),
            modified_time: MTIME.into(),
            inode_number: inode_number.into(),
        };
        (header, inode_number)
    }

    /// Append an inode to the inode table, children before their parents
    fn write_tree(&mut self, tree: &Tree, is_root: bool) -> Written {
        let start = self.inodes.len();
        let (kind, inode_number) = match tree {
            Tree::File {
                data,
                fragment,
                mode,
            } => self.write_file(data, *fragment, *mode),
            // Written after its children, so it starts further on
            Tree::Dir { entries, mode } => return self.write_dir(entries, *mode, is_root),
            Tree::Symlink(target) => {
                let (header, number) = self.header(Kind::BASIC_SYMLINK, 0o777);
                let link = inode::Symlink {
                    hard_link_count: 1u32.into(),
                    target_size: (target.len() as u32).into(),
                };
                self.inodes.extend_from_slice(header.as_bytes());
                self.inodes.extend_from_slice(link.as_bytes());
                self.inodes.extend_from_slice(target.as_bytes());
                (Kind::BASIC_SYMLINK, number)
            }
            Tree::CharDev(major, minor) => {
                let (header, number) = self.header(Kind::BASIC_CHAR_DEV, 0o600);
                let dev = inode::BasicDevice {
                    hard_link_count: 1u32.into(),
                    device: DeviceNumber::new(*major, *minor).0.into(),
                };
                self.inodes.extend_from_slice(header.as_bytes());
                self.inodes.extend_from_slice(dev.as_bytes());
                (Kind::BASIC_CHAR_DEV, number)
            }
            Tree::Fifo => {
                let (header, number) = self.header(Kind::BASIC_FIFO, 0o644);
                let ipc = inode::BasicIpc {
                    hard_link_count: 1u32.into(),
                };
                self.inodes.extend_from_slice(header.as_bytes());
                self.inodes.extend_from_slice(ipc.as_bytes());
                (Kind::BASIC_FIFO, number)
            }
        };
        let (block_start, offset) = metadata_position(start);
        Written {
            inode_ref: Ref::new(block_start, offset),
            kind,
            inode_number,
        }
    }

    fn write_file(&mut self, data: &[u8], use_fragment: bool, mode: u16) -> (Kind, u32) {
        let bs = BLOCK_SIZE as usize;
        let blocks_start = self.data_start() + self.data.len() as u64;
        let (full, tail) = if use_fragment {
            data.split_at(data.len() / bs * bs)
        } else {
            (data, &[][..])
        };

        let mut sizes = Vec::new();
        let mut sparse = 0;
        for block in full.chunks(bs) {
            if block.len() == bs && block.iter().all(|&b| b == 0) {
                sizes.push(datablock::Size::ZERO);
                sparse += bs as u64;
                continue;
            }
            let compressed = zlib(block);
            if compressed.len() < block.len() {
                sizes.push(datablock::Size::new(compressed.len() as u32, false));
                self.data.extend_from_slice(&compressed);
            } else {
                sizes.push(datablock::Size::new(block.len() as u32, true));
                self.data.extend_from_slice(block);
            }
        }

        let (fragment_index, fragment_offset) = if tail.is_empty() {
            (NO_FRAGMENT, 0)
        } else {
            if self.fragment_block.len() + tail.len() > bs {
                self.flush_fragment();
            }
            let offset = self.fragment_block.len() as u32;
            self.fragment_block.extend_from_slice(tail);
            (self.fragments.len() as u32, offset)
        };

        // Sparse files need the extended inode to record the bytes saved
        let kind = if sparse > 0 {
            Kind::EXT_FILE
        } else {
            Kind::BASIC_FILE
        };
        let (header, number) = self.header(kind, mode);
        self.inodes.extend_from_slice(header.as_bytes());
        if kind == Kind::EXT_FILE {
            let raw = inode::ExtendedFile {
                blocks_start: blocks_start.into(),
                file_size: (data.len() as u64).into(),
                sparse: sparse.into(),
                hard_link_count: 1u32.into(),
                fragment_block_index: fragment_index.into(),
                block_offset: fragment_offset.into(),
                xattr_idx: u32::MAX.into(),
            };
            self.inodes.extend_from_slice(raw.as_bytes());
        } else {
            let raw = inode::BasicFile {
                blocks_start: (blocks_start as u32).into(),
                fragment_block_index: fragment_index.into(),
                block_offset: fragment_offset.into(),
                file_size: (data.len() as u32).into(),
            };
            self.inodes.extend_from_slice(raw.as_bytes());
        }
        for size in sizes {
            self.inodes.extend_from_slice(&size.0.to_le_bytes());
        }
        (kind, number)
    }

    fn flush_fragment(&mut self) {
        if self.fragment_block.is_empty() {
            return;
        }
        let start = self.data_start() + self.data.len() as u64;
        let compressed = zlib(&self.fragment_block);
        let size = if compressed.len() < self.fragment_block.len() {
            self.data.extend_from_slice(&compressed);
            datablock::Size::new(compressed.len() as u32, false)
        } else {
            self.data.extend_from_slice(&self.fragment_block);
            datablock::Size::new(self.fragment_block.len() as u32, true)
        };
        self.fragments.push(fragment::Entry {
            start: start.into(),
            size: size.0.into(),
            _unused: 0u32.into(),
        });
        self.fragment_block.clear();
    }

    fn write_dir(&mut self, entries: &[(String, Tree)], mode: u16, is_root: bool) -> Written {
        let children: Vec<(&str, Written)> = entries
            .iter()
            .map(|(name, tree)| (name.as_str(), self.write_tree(tree, false)))
            .collect();
        let subdirs = entries
            .iter()
            .filter(|(_, tree)| matches!(tree, Tree::Dir { .. }))
            .count() as u32;

        let listing_start = self.dirs.len();
        let mut i = 0;
        while i < children.len() {
            let block = children[i].1.inode_ref.block_start();
            let base = children[i].1.inode_number;
            let run: Vec<&(&str, Written)> = children[i..]
                .iter()
                .take(directory::MAX_ENTRIES as usize)
                .take_while(|(_, w)| w.inode_ref.block_start() == block)
                .collect();
            let header = directory::Header {
                count: (run.len() as u32 - 1).into(),
                start: (block as u32).into(),
                inode_number: base.into(),
            };
            self.dirs.extend_from_slice(header.as_bytes());
            for (name, written) in &run {
                let entry = directory::Entry {
                    offset: written.inode_ref.start_offset().into(),
                    inode_offset: ((written.inode_number as i64 - base as i64) as i16).into(),
                    kind: written.kind.to_basic().0.into(),
                    name_size: (name.len() as u16 - 1).into(),
                };
                self.dirs.extend_from_slice(entry.as_bytes());
                self.dirs.extend_from_slice(name.as_bytes());
            }
            i += run.len();
        }
        let mut listing_size = (self.dirs.len() - listing_start) as u32 + 3;
        if is_root {
            listing_size += self.root_size_slack;
        }

        let (block_idx, block_offset) = metadata_position(listing_start);
        let start = self.inodes.len();
        let (header, number) = self.header(Kind::BASIC_DIR, mode);
        let raw = inode::BasicDir {
            block_idx: (block_idx as u32).into(),
            hard_link_count: (2 + subdirs).into(),
            file_size: (listing_size as u16).into(),
            block_offset: block_offset.into(),
            parent_inode_number: 0u32.into(),
        };
        self.inodes.extend_from_slice(header.as_bytes());
        self.inodes.extend_from_slice(raw.as_bytes());
        let (block_start, offset) = metadata_position(start);
        Written {
            inode_ref: Ref::new(block_start, offset),
            kind: Kind::BASIC_DIR,
            inode_number: number,
        }
    }
}

/// Write a two level lookup table, returning the offset of its block index
fn write_table(image: &mut Vec<u8>, entries: &[u8]) -> u64 {
    let mut pointers = Vec::new();
    for chunk in entries.chunks(metablock::SIZE) {
        pointers.push(image.len() as u64);
        let compressed = zlib(chunk);
        if compressed.len() < chunk.len() {
            image.extend_from_slice(&(compressed.len() as u16).to_le_bytes());
            image.extend_from_slice(&compressed);
        } else {
            image.extend_from_slice(&metablock::Header::new(chunk.len() as u16, true).0.to_le_bytes());
            image.extend_from_slice(chunk);
        }
    }
    let start = image.len() as u64;
    for pointer in pointers {
        image.extend_from_slice(&pointer.to_le_bytes());
    }
    start
}

/// The image used by most tests
///
/// ```text
/// /
/// ├── hello.txt         "hello!!!"
/// ├── docs/
/// │   ├── big.bin       3 blocks + a fragment
/// │   ├── exact.bin     2 full blocks, no fragment
/// │   ├── sparse.bin    block, hole, block
/// │   ├── tail.bin      block + short final block
/// │   └── nested/
/// │       └── deep.txt
/// ├── empty/
/// ├── link -> hello.txt
/// ├── abs -> /docs/nested/deep.txt
/// ├── dangling -> missing
/// ├── loop1 -> loop2
/// ├── loop2 -> loop1
/// ├── tty               char device 4:1
/// └── pipe              fifo
/// ```
pub fn sample_tree() -> Tree {
    let bs = BLOCK_SIZE as usize;
    let mut sparse = pattern(bs, 1);
    sparse.extend(vec![0; bs]);
    sparse.extend(pattern(bs, 2));

    dir(vec![
        ("hello.txt", file(&b"hello!!!"[..])),
        (
            "docs",
            dir(vec![
                ("big.bin", file(pattern(3 * bs + 100, 3))),
                ("exact.bin", file(pattern(2 * bs, 4))),
                ("sparse.bin", file(sparse)),
                ("tail.bin", file_without_fragment(pattern(bs + 10, 5))),
                ("nested", dir(vec![("deep.txt", file(&b"deep"[..]))])),
            ]),
        ),
        ("empty", dir(vec![])),
        ("link", symlink("hello.txt")),
        ("abs", symlink("/docs/nested/deep.txt")),
        ("dangling", symlink("missing")),
        ("loop1", symlink("loop2")),
        ("loop2", symlink("loop1")),
        ("tty", Tree::CharDev(4, 1)),
        ("pipe", Tree::Fifo),
    ])
}

pub fn sample_image() -> Vec<u8> {
    ImageBuilder::new().build(&sample_tree())
}

pub fn quiet_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
