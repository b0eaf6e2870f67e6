//! A squashfs filesystem consists of a maximum of nine parts, packed together on a byte alignment:
//!
//! * [Superblock](superblock/index.html)
//! * [Compression Options](compression/options/index.html)
//! * [Datablocks & Fragments](datablock/index.html)
//! * [Inode Table](inode/index.html)
//! * [Directory Table](directory/index.html)
//! * [Fragment Table](fragment/index.html)
//! * [Export Table]
//! * [UID/GID Lookup Table](uid_gid/index.html)
//! * [Xattr Table]
//!
//! The export and xattr tables are not described here, readers can ignore them.

use bitflags::bitflags;
use zerocopy::byteorder::{self, LittleEndian};
use zerocopy::{FromBytes, LayoutVerified, Unaligned};

use std::fmt::Write;
use std::{fmt, io, mem};

pub mod compression;
pub mod datablock;
pub mod directory;
pub mod fragment;
pub mod inode;
pub mod metablock;
pub mod superblock;
pub mod uid_gid;

pub const BLOCK_LOG_MIN: u16 = 12;
pub const BLOCK_LOG_MAX: u16 = 20;
pub const BLOCK_LOG_DEFAULT: u16 = 17;

pub const BLOCK_SIZE_MIN: u32 = 1 << BLOCK_LOG_MIN as u32;
pub const BLOCK_SIZE_MAX: u32 = 1 << BLOCK_LOG_MAX as u32;
pub const BLOCK_SIZE_DEFAULT: u32 = 1 << BLOCK_LOG_DEFAULT as u32;

/// Little endian integers, as every integer in the archive is stored
pub type U16 = byteorder::U16<LittleEndian>;
pub type I16 = byteorder::I16<LittleEndian>;
pub type U32 = byteorder::U32<LittleEndian>;
pub type I32 = byteorder::I32<LittleEndian>;
pub type U64 = byteorder::U64<LittleEndian>;

/// The largest fixed size record in an archive (the superblock)
const MAX_RECORD_SIZE: usize = 96;

/// Interpret the start of `data` as a `T`
pub fn read<T: FromBytes + Unaligned + Copy>(data: &[u8]) -> io::Result<T> {
    match LayoutVerified::<_, T>::new_unaligned_from_prefix(data) {
        Some((value, _)) => Ok(*value),
        None => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "expected at least {} bytes, got {}",
                mem::size_of::<T>(),
                data.len()
            ),
        )),
    }
}

/// Read exactly one `T` from `reader`
pub fn read_from<T, R>(mut reader: R) -> io::Result<T>
where
    T: FromBytes + Unaligned + Copy,
    R: io::Read,
{
    let mut buf = [0; MAX_RECORD_SIZE];
    let buf = buf.get_mut(..mem::size_of::<T>()).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "record larger than a superblock")
    })?;
    reader.read_exact(buf)?;
    read(buf)
}

bitflags! {
    /// Permission and file type bits, laid out like `mode_t`
    #[derive(Default)]
    pub struct Mode: u16 {
        const OTHER_EXEC =  0o000_001;
        const OTHER_WRITE = 0o000_002;
        const OTHER_READ =  0o000_004;
        const GROUP_EXEC =  0o000_010;
        const GROUP_WRITE = 0o000_020;
        const GROUP_READ =  0o000_040;
        const USER_EXEC =   0o000_100;
        const USER_WRITE =  0o000_200;
        const USER_READ =   0o000_400;
        const BIT_STICKY =  0o001_000;
        const BIT_SGID =    0o002_000;
        const BIT_SUID =    0o004_000;

        const TYPE_FIFO =   0o010_000;
        const TYPE_CHAR =   0o020_000;
        const TYPE_DIR  =   0o040_000;
        const TYPE_BLOCK =  0o060_000;
        const TYPE_FILE =   0o100_000;
        const TYPE_LINK =   0o120_000;
        const TYPE_SOCKET = 0o140_000;

    }
}

impl Mode {
    pub const O777: Mode = Mode { bits: 0o000_777 };
    pub const PERM_MASK: Mode = Mode { bits: 0o007_777 };
    pub const TYPE_MASK: Mode = Mode { bits: 0o170_000 };
    pub const NONE: Mode = Mode { bits: 0 };
}

/// `ls -l` style, e.g. `drwxr-xr-x`
impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let type_char = match *self & Mode::TYPE_MASK {
            Mode::TYPE_DIR => 'd',
            Mode::TYPE_CHAR => 'c',
            Mode::TYPE_BLOCK => 'b',
            Mode::TYPE_FILE => '-',
            Mode::TYPE_LINK => 'l',
            Mode::TYPE_SOCKET => 's',
            Mode::TYPE_FIFO => 'p',
            _ => '?',
        };
        f.write_char(type_char)?;

        // (read, write, exec, special bit, special char with exec, without exec)
        let classes = [
            (Mode::USER_READ, Mode::USER_WRITE, Mode::USER_EXEC, Mode::BIT_SUID, 's', 'S'),
            (Mode::GROUP_READ, Mode::GROUP_WRITE, Mode::GROUP_EXEC, Mode::BIT_SGID, 's', 'S'),
            (Mode::OTHER_READ, Mode::OTHER_WRITE, Mode::OTHER_EXEC, Mode::BIT_STICKY, 't', 'T'),
        ];
        for &(read, write, exec, special, with_exec, without_exec) in &classes {
            f.write_char(if self.contains(read) { 'r' } else { '-' })?;
            f.write_char(if self.contains(write) { 'w' } else { '-' })?;
            let exec_char = match (self.contains(exec), self.contains(special)) {
                (false, false) => '-',
                (true, false) => 'x',
                (true, true) => with_exec,
                (false, true) => without_exec,
            };
            f.write_char(exec_char)?;
        }
        Ok(())
    }
}

impl Mode {
    /// The file type bits matching an inode kind
    pub fn for_kind(kind: inode::Kind) -> Mode {
        match kind.to_basic() {
            inode::Kind::BASIC_DIR => Mode::TYPE_DIR,
            inode::Kind::BASIC_FILE => Mode::TYPE_FILE,
            inode::Kind::BASIC_SYMLINK => Mode::TYPE_LINK,
            inode::Kind::BASIC_BLOCK_DEV => Mode::TYPE_BLOCK,
            inode::Kind::BASIC_CHAR_DEV => Mode::TYPE_CHAR,
            inode::Kind::BASIC_FIFO => Mode::TYPE_FIFO,
            inode::Kind::BASIC_SOCKET => Mode::TYPE_SOCKET,
            _ => Mode::NONE,
        }
    }
}

#[test]
fn mode_tests() {
    let mode = Mode { bits: 0o754 } | Mode::TYPE_FILE;
    assert_eq!(&format!("{}", mode), "-rwxr-xr--");
    let mode = mode | Mode::BIT_STICKY;
    assert_eq!(&format!("{}", mode), "-rwxr-xr-T");
    let mode = Mode { bits: 0o6755 } | Mode::TYPE_DIR;
    assert_eq!(&format!("{}", mode), "drwsr-sr-x");
}

#[test]
fn mode_for_kind() {
    let mode = Mode::for_kind(inode::Kind::EXT_SYMLINK) | Mode::O777;
    assert_eq!(&format!("{}", mode), "lrwxrwxrwx");
    assert_eq!(Mode::for_kind(inode::Kind(99)), Mode::NONE);
}

#[test]
fn read_short_input() {
    let err = read::<U32>(&[1, 2, 3]).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    assert_eq!(read::<U32>(&[1, 0, 0, 0, 9]).unwrap().get(), 1);
}
