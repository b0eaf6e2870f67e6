use bstr::BString;
use repr::datablock;
use repr::fragment::NO_FRAGMENT;
use repr::inode::{DeviceNumber, Kind};
use repr::Mode;
use std::io::{self, Read};

use crate::errors::{Error, Result};

/// The type of a filesystem object, regardless of basic or extended encoding
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FileType {
    Directory,
    File,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileType {
    pub fn from_kind(kind: Kind) -> Option<FileType> {
        let file_type = match kind.to_basic() {
            Kind::BASIC_DIR => FileType::Directory,
            Kind::BASIC_FILE => FileType::File,
            Kind::BASIC_SYMLINK => FileType::Symlink,
            Kind::BASIC_BLOCK_DEV => FileType::BlockDevice,
            Kind::BASIC_CHAR_DEV => FileType::CharDevice,
            Kind::BASIC_FIFO => FileType::Fifo,
            Kind::BASIC_SOCKET => FileType::Socket,
            _ => return None,
        };
        Some(file_type)
    }

    pub fn basic_kind(self) -> Kind {
        match self {
            FileType::Directory => Kind::BASIC_DIR,
            FileType::File => Kind::BASIC_FILE,
            FileType::Symlink => Kind::BASIC_SYMLINK,
            FileType::BlockDevice => Kind::BASIC_BLOCK_DEV,
            FileType::CharDevice => Kind::BASIC_CHAR_DEV,
            FileType::Fifo => Kind::BASIC_FIFO,
            FileType::Socket => Kind::BASIC_SOCKET,
        }
    }
}

/// Fields shared by every inode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kind: Kind,
    /// Permission bits only, the type bits come from `kind`
    pub permissions: u16,
    pub uid_idx: u16,
    pub gid_idx: u16,
    pub modified_time: u32,
    pub inode_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub header: Header,
    pub data: Data,
}

/// One variant per on-disk inode type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    BasicDir(Directory),
    BasicFile(File),
    BasicSymlink(Symlink),
    BasicBlockDev(Device),
    BasicCharDev(Device),
    BasicFifo(Ipc),
    BasicSocket(Ipc),
    ExtDir(Directory),
    ExtFile(File),
    ExtSymlink(Symlink),
    ExtBlockDev(Device),
    ExtCharDev(Device),
    ExtFifo(Ipc),
    ExtSocket(Ipc),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    /// Offset of the first metadata block, relative to the directory table
    pub block_start: u32,
    pub block_offset: u16,
    /// Size of the listing, including 3 bytes never actually stored
    pub file_size: u32,
    pub hard_link_count: u32,
    pub parent_inode_number: u32,
    pub xattr_idx: Option<u32>,
    pub index: Vec<DirIndex>,
}

/// Lookup aid stored in extended directories, one per metadata block of the listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirIndex {
    pub index: u32,
    pub start: u32,
    pub name: BString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub blocks_start: u64,
    pub file_size: u64,
    pub sparse: u64,
    pub hard_link_count: u32,
    pub fragment_block_index: u32,
    pub fragment_offset: u32,
    pub xattr_idx: Option<u32>,
    pub block_sizes: Vec<datablock::Size>,
}

impl File {
    pub fn has_fragment(&self) -> bool {
        self.fragment_block_index != NO_FRAGMENT
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symlink {
    pub hard_link_count: u32,
    pub target: BString,
    pub xattr_idx: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub hard_link_count: u32,
    pub device: DeviceNumber,
    pub xattr_idx: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipc {
    pub hard_link_count: u32,
    pub xattr_idx: Option<u32>,
}

impl Inode {
    pub fn kind(&self) -> Kind {
        self.header.kind
    }

    pub fn file_type(&self) -> FileType {
        match self.data {
            Data::BasicDir(_) | Data::ExtDir(_) => FileType::Directory,
            Data::BasicFile(_) | Data::ExtFile(_) => FileType::File,
            Data::BasicSymlink(_) | Data::ExtSymlink(_) => FileType::Symlink,
            Data::BasicBlockDev(_) | Data::ExtBlockDev(_) => FileType::BlockDevice,
            Data::BasicCharDev(_) | Data::ExtCharDev(_) => FileType::CharDevice,
            Data::BasicFifo(_) | Data::ExtFifo(_) => FileType::Fifo,
            Data::BasicSocket(_) | Data::ExtSocket(_) => FileType::Socket,
        }
    }

    /// Permission and file type bits
    pub fn mode(&self) -> Mode {
        Mode::for_kind(self.header.kind)
            | Mode::from_bits_truncate(self.header.permissions) & Mode::PERM_MASK
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match &self.data {
            Data::BasicDir(dir) | Data::ExtDir(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match &self.data {
            Data::BasicFile(file) | Data::ExtFile(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_symlink(&self) -> Option<&Symlink> {
        match &self.data {
            Data::BasicSymlink(link) | Data::ExtSymlink(link) => Some(link),
            _ => None,
        }
    }

    pub fn device(&self) -> Option<DeviceNumber> {
        match &self.data {
            Data::BasicBlockDev(dev)
            | Data::BasicCharDev(dev)
            | Data::ExtBlockDev(dev)
            | Data::ExtCharDev(dev) => Some(dev.device),
            _ => None,
        }
    }

    /// Size of regular file contents, `None` for everything else
    pub fn file_size(&self) -> Option<u64> {
        self.as_file().map(|file| file.file_size)
    }

    pub fn hard_link_count(&self) -> u32 {
        match &self.data {
            Data::BasicDir(dir) | Data::ExtDir(dir) => dir.hard_link_count,
            Data::BasicFile(file) | Data::ExtFile(file) => file.hard_link_count,
            Data::BasicSymlink(link) | Data::ExtSymlink(link) => link.hard_link_count,
            Data::BasicBlockDev(dev)
            | Data::BasicCharDev(dev)
            | Data::ExtBlockDev(dev)
            | Data::ExtCharDev(dev) => dev.hard_link_count,
            Data::BasicFifo(ipc)
            | Data::BasicSocket(ipc)
            | Data::ExtFifo(ipc)
            | Data::ExtSocket(ipc) => ipc.hard_link_count,
        }
    }

    pub fn xattr_idx(&self) -> Option<u32> {
        match &self.data {
            Data::BasicDir(dir) | Data::ExtDir(dir) => dir.xattr_idx,
            Data::BasicFile(file) | Data::ExtFile(file) => file.xattr_idx,
            Data::BasicSymlink(link) | Data::ExtSymlink(link) => link.xattr_idx,
            Data::BasicBlockDev(dev)
            | Data::BasicCharDev(dev)
            | Data::ExtBlockDev(dev)
            | Data::ExtCharDev(dev) => dev.xattr_idx,
            Data::BasicFifo(ipc)
            | Data::BasicSocket(ipc)
            | Data::ExtFifo(ipc)
            | Data::ExtSocket(ipc) => ipc.xattr_idx,
        }
    }
}

/// Number of entries in the block list of a file
pub(crate) fn block_count(file_size: u64, block_size: u32, fragment_block_index: u32) -> u64 {
    let block_size = u64::from(block_size);
    if fragment_block_index == NO_FRAGMENT {
        file_size / block_size + u64::from(file_size % block_size != 0)
    } else {
        file_size / block_size
    }
}

/// Decode a single inode from the start of `reader`
pub(crate) fn read_inode<R: Read>(mut reader: R, block_size: u32) -> Result<Inode> {
    let raw: repr::inode::Header = repr::read_from(&mut reader)?;
    let header = Header {
        kind: Kind(raw.inode_type.get()),
        permissions: raw.permissions.get(),
        uid_idx: raw.uid_idx.get(),
        gid_idx: raw.gid_idx.get(),
        modified_time: raw.modified_time.get(),
        inode_number: raw.inode_number.get(),
    };

    let data = match header.kind {
        Kind::BASIC_DIR => {
            let raw: repr::inode::BasicDir = repr::read_from(&mut reader)?;
            Data::BasicDir(Directory {
                block_start: raw.block_idx.get(),
                block_offset: raw.block_offset.get(),
                file_size: raw.file_size.get().into(),
                hard_link_count: raw.hard_link_count.get(),
                parent_inode_number: raw.parent_inode_number.get(),
                xattr_idx: None,
                index: Vec::new(),
            })
        }
        Kind::EXT_DIR => {
            let raw: repr::inode::ExtendedDir = repr::read_from(&mut reader)?;
            let index = read_dir_index(&mut reader, raw.index_count.get())?;
            Data::ExtDir(Directory {
                block_start: raw.block_idx.get(),
                block_offset: raw.block_offset.get(),
                file_size: raw.file_size.get(),
                hard_link_count: raw.hard_link_count.get(),
                parent_inode_number: raw.parent_inode_number.get(),
                xattr_idx: Some(raw.xattr_idx.get()),
                index,
            })
        }
        Kind::BASIC_FILE => {
            let raw: repr::inode::BasicFile = repr::read_from(&mut reader)?;
            let mut file = File {
                blocks_start: raw.blocks_start.get().into(),
                file_size: raw.file_size.get().into(),
                sparse: 0,
                hard_link_count: 1,
                fragment_block_index: raw.fragment_block_index.get(),
                fragment_offset: raw.block_offset.get(),
                xattr_idx: None,
                block_sizes: Vec::new(),
            };
            read_block_sizes(&mut reader, &mut file, block_size)?;
            Data::BasicFile(file)
        }
        Kind::EXT_FILE => {
            let raw: repr::inode::ExtendedFile = repr::read_from(&mut reader)?;
            let mut file = File {
                blocks_start: raw.blocks_start.get(),
                file_size: raw.file_size.get(),
                sparse: raw.sparse.get(),
                hard_link_count: raw.hard_link_count.get(),
                fragment_block_index: raw.fragment_block_index.get(),
                fragment_offset: raw.block_offset.get(),
                xattr_idx: Some(raw.xattr_idx.get()),
                block_sizes: Vec::new(),
            };
            read_block_sizes(&mut reader, &mut file, block_size)?;
            Data::ExtFile(file)
        }
        Kind::BASIC_SYMLINK => Data::BasicSymlink(read_symlink(&mut reader, false)?),
        Kind::EXT_SYMLINK => Data::ExtSymlink(read_symlink(&mut reader, true)?),
        Kind::BASIC_BLOCK_DEV => Data::BasicBlockDev(read_basic_device(&mut reader)?),
        Kind::BASIC_CHAR_DEV => Data::BasicCharDev(read_basic_device(&mut reader)?),
        Kind::EXT_BLOCK_DEV => Data::ExtBlockDev(read_ext_device(&mut reader)?),
        Kind::EXT_CHAR_DEV => Data::ExtCharDev(read_ext_device(&mut reader)?),
        Kind::BASIC_FIFO => Data::BasicFifo(read_basic_ipc(&mut reader)?),
        Kind::BASIC_SOCKET => Data::BasicSocket(read_basic_ipc(&mut reader)?),
        Kind::EXT_FIFO => Data::ExtFifo(read_ext_ipc(&mut reader)?),
        Kind::EXT_SOCKET => Data::ExtSocket(read_ext_ipc(&mut reader)?),
        Kind(kind) => return Err(Error::UnsupportedInodeType { kind }),
    };
    Ok(Inode { header, data })
}

fn read_dir_index<R: Read>(reader: &mut R, count: u16) -> Result<Vec<DirIndex>> {
    let mut index = Vec::with_capacity(count.into());
    for _ in 0..count {
        let raw: repr::directory::Index = repr::read_from(&mut *reader)?;
        let name_len = raw.name_size.get() as usize + 1;
        if name_len > repr::directory::MAX_NAME_LEN {
            return Err(Error::invalid(format!(
                "directory index name of {} bytes",
                name_len
            )));
        }
        let mut name = vec![0; name_len];
        reader.read_exact(&mut name)?;
        index.push(DirIndex {
            index: raw.index.get(),
            start: raw.start.get(),
            name: name.into(),
        });
    }
    Ok(index)
}

fn read_block_sizes<R: Read>(reader: &mut R, file: &mut File, block_size: u32) -> Result<()> {
    let count = block_count(file.file_size, block_size, file.fragment_block_index);
    // A corrupt size could claim an absurd number of blocks, so grow as entries actually arrive
    file.block_sizes.reserve(count.min(1024) as usize);
    for _ in 0..count {
        let mut word = [0; 4];
        reader.read_exact(&mut word)?;
        file.block_sizes
            .push(datablock::Size(u32::from_le_bytes(word)));
    }
    Ok(())
}

fn read_symlink<R: Read>(reader: &mut R, extended: bool) -> Result<Symlink> {
    let raw: repr::inode::Symlink = repr::read_from(&mut *reader)?;
    let target_size = u64::from(raw.target_size.get());
    let mut target = Vec::new();
    reader.by_ref().take(target_size).read_to_end(&mut target)?;
    if target.len() as u64 != target_size {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    let xattr_idx = if extended {
        Some(repr::read_from::<repr::U32, _>(&mut *reader)?.get())
    } else {
        None
    };
    Ok(Symlink {
        hard_link_count: raw.hard_link_count.get(),
        target: target.into(),
        xattr_idx,
    })
}

fn read_basic_device<R: Read>(reader: &mut R) -> Result<Device> {
    let raw: repr::inode::BasicDevice = repr::read_from(reader)?;
    Ok(Device {
        hard_link_count: raw.hard_link_count.get(),
        device: DeviceNumber(raw.device.get()),
        xattr_idx: None,
    })
}

fn read_ext_device<R: Read>(reader: &mut R) -> Result<Device> {
    let raw: repr::inode::ExtendedDevice = repr::read_from(reader)?;
    Ok(Device {
        hard_link_count: raw.hard_link_count.get(),
        device: DeviceNumber(raw.device.get()),
        xattr_idx: Some(raw.xattr_idx.get()),
    })
}

fn read_basic_ipc<R: Read>(reader: &mut R) -> Result<Ipc> {
    let raw: repr::inode::BasicIpc = repr::read_from(reader)?;
    Ok(Ipc {
        hard_link_count: raw.hard_link_count.get(),
        xattr_idx: None,
    })
}

fn read_ext_ipc<R: Read>(reader: &mut R) -> Result<Ipc> {
    let raw: repr::inode::ExtendedIpc = repr::read_from(reader)?;
    Ok(Ipc {
        hard_link_count: raw.hard_link_count.get(),
        xattr_idx: Some(raw.xattr_idx.get()),
    })
}
