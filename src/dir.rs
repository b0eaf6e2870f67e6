use bstr::BString;
use repr::directory::{MAX_ENTRIES, MAX_NAME_LEN, SIZE_OVERHEAD};
use repr::inode::{Kind, Ref};
use slog::Logger;
use std::io::{self, Read};
use std::mem;

use crate::config::DirectoryEnd;
use crate::errors::{Error, Result};
use crate::inode::FileType;

/// A single directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: BString,
    pub file_type: FileType,
    pub inode_ref: Ref,
    pub inode_number: u32,
}

/// Decode the listing of a directory of declared `size`
///
/// Entries are returned in on-disk order.
pub(crate) fn read_entries<R: Read>(
    mut reader: R,
    size: u64,
    end: DirectoryEnd,
    logger: &Logger,
) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut consumed = SIZE_OVERHEAD;
    while consumed < size {
        let header: repr::directory::Header = match read_record(&mut reader)? {
            Some(header) => header,
            None => return stopped_early(entries, size, consumed, end, logger),
        };
        consumed += mem::size_of::<repr::directory::Header>() as u64;

        let count = header.count.get().saturating_add(1);
        if count > MAX_ENTRIES {
            return Err(Error::invalid(format!(
                "directory run of {} entries",
                count
            )));
        }
        let start = u64::from(header.start.get());
        let base = header.inode_number.get();

        for _ in 0..count {
            let raw: repr::directory::Entry = match read_record(&mut reader)? {
                Some(raw) => raw,
                None => return stopped_early(entries, size, consumed, end, logger),
            };
            let name_len = usize::from(raw.name_size.get()) + 1;
            if name_len > MAX_NAME_LEN {
                return Err(Error::invalid(format!(
                    "directory entry name of {} bytes",
                    name_len
                )));
            }
            let mut name = vec![0; name_len];
            if !read_exact_or_eof(&mut reader, &mut name)? {
                return stopped_early(entries, size, consumed, end, logger);
            }
            consumed += (mem::size_of::<repr::directory::Entry>() + name_len) as u64;

            let kind = Kind(raw.kind.get());
            let file_type =
                FileType::from_kind(kind).ok_or(Error::UnsupportedInodeType { kind: kind.0 })?;
            entries.push(Entry {
                name: name.into(),
                file_type,
                inode_ref: Ref::new(start, raw.offset.get()),
                inode_number: base.wrapping_add(raw.inode_offset.get() as u32),
            });
        }
    }
    Ok(entries)
}

fn stopped_early(
    entries: Vec<Entry>,
    size: u64,
    consumed: u64,
    end: DirectoryEnd,
    logger: &Logger,
) -> Result<Vec<Entry>> {
    match end {
        DirectoryEnd::Lenient => {
            slog::debug!(logger, "Directory listing ended early";
                "entries" => entries.len(),
                "declared_size" => size,
                "consumed" => consumed
            );
            Ok(entries)
        }
        DirectoryEnd::Strict => Err(Error::invalid(format!(
            "directory listing ended after {} of {} bytes ({} entries)",
            consumed,
            size,
            entries.len()
        ))),
    }
}

fn read_record<T, R>(reader: &mut R) -> Result<Option<T>>
where
    T: zerocopy::FromBytes + zerocopy::Unaligned + Copy,
    R: Read,
{
    let mut buf = [0; 12];
    let buf = &mut buf[..mem::size_of::<T>()];
    if !read_exact_or_eof(reader, buf)? {
        return Ok(None);
    }
    Ok(Some(repr::read(buf)?))
}

/// Like `read_exact`, but returns false when the data runs out
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
