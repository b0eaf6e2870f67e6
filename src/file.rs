use positioned_io::ReadAt;
use repr::{datablock, fragment};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::archive::Archive;
use crate::config;
use crate::decompress_threads::{self, Expect, ParallelDecompressor};
use crate::errors::{Error, Result};
use crate::inode;

/// A piece of file contents, in file order
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Chunk {
    Block {
        start: u64,
        size: datablock::Size,
        len: usize,
    },
    Sparse {
        len: usize,
    },
    Fragment {
        start: u64,
        size: datablock::Size,
        offset: usize,
        len: usize,
    },
}

/// Locate every chunk of `file`
pub(crate) fn layout(
    file: &inode::File,
    block_size: u32,
    fragments: &[fragment::Entry],
) -> Result<Vec<Chunk>> {
    let bs = u64::from(block_size);
    let mut chunks = Vec::with_capacity(file.block_sizes.len() + 1);
    let mut start = file.blocks_start;
    let mut remaining = file.file_size;
    for &size in &file.block_sizes {
        let len = remaining.min(bs) as usize;
        remaining -= len as u64;
        if size.is_sparse() {
            chunks.push(Chunk::Sparse { len });
            continue;
        }
        if size.size() > block_size {
            return Err(Error::invalid(format!(
                "data block at {} stored in {} bytes, larger than a block",
                start,
                size.size()
            )));
        }
        chunks.push(Chunk::Block { start, size, len });
        start += u64::from(size.size());
    }

    if file.has_fragment() {
        let entry = fragments
            .get(file.fragment_block_index as usize)
            .ok_or_else(|| {
                Error::invalid(format!(
                    "fragment index {} out of range ({} fragments)",
                    file.fragment_block_index,
                    fragments.len()
                ))
            })?;
        if remaining >= bs || entry.size().size() > block_size {
            return Err(Error::invalid(format!(
                "fragment {} does not fit in a block",
                file.fragment_block_index
            )));
        }
        if remaining > 0 {
            chunks.push(Chunk::Fragment {
                start: entry.start.get(),
                size: entry.size(),
                offset: file.fragment_offset as usize,
                len: remaining as usize,
            });
        }
    } else if remaining > 0 {
        return Err(Error::invalid(format!(
            "{} bytes of file not covered by its blocks",
            remaining
        )));
    }
    Ok(chunks)
}

impl Chunk {
    fn len(&self) -> usize {
        match *self {
            Chunk::Block { len, .. } | Chunk::Sparse { len } | Chunk::Fragment { len, .. } => len,
        }
    }

    /// Read the stored bytes, `None` for sparse blocks which are not stored at all
    fn read_raw<R: ReadAt + ?Sized>(&self, reader: &R) -> Result<Option<(Vec<u8>, bool, Expect)>> {
        let (start, size, expect) = match *self {
            Chunk::Sparse { .. } => return Ok(None),
            Chunk::Block { start, size, len } => (start, size, Expect::Exact(len)),
            Chunk::Fragment {
                start,
                size,
                offset,
                len,
            } => (start, size, Expect::Slice { offset, len }),
        };
        let mut raw = vec![0; size.size() as usize];
        reader.read_exact_at(start, &mut raw).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::invalid(format!(
                "data block at {} of {} bytes is past the end of the archive",
                start,
                raw.len()
            )),
            _ => e.into(),
        })?;
        Ok(Some((raw, size.uncompressed(), expect)))
    }
}

/// Reads the contents of a regular file
///
/// Data blocks are decoded one at a time as reading reaches them. [`FileReader::write_to`]
/// decodes the rest of the file on several threads instead.
#[derive(Debug)]
pub struct FileReader<R> {
    archive: Archive<R>,
    chunks: Vec<Chunk>,
    next: usize,
    current: Vec<u8>,
    pos: usize,
    len: u64,
}

impl<R: ReadAt> FileReader<R> {
    pub(crate) fn new(archive: Archive<R>, file: &inode::File) -> Result<Self> {
        let chunks = layout(file, archive.block_size(), archive.fragments())?;
        Ok(Self {
            archive,
            chunks,
            next: 0,
            current: Vec::new(),
            pos: 0,
            len: file.file_size,
        })
    }

    /// Size of the whole file
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn load(&self, chunk: &Chunk) -> Result<Vec<u8>> {
        match chunk.read_raw(self.archive.reader())? {
            Some((raw, uncompressed, expect)) => decompress_threads::decode(
                self.archive.codec(),
                raw,
                uncompressed,
                expect,
                self.archive.block_size() as usize,
            ),
            None => Ok(vec![0; chunk.len()]),
        }
    }

    /// Copy the rest of the file to `w`, returning the number of bytes written
    ///
    /// On error, everything before the failing chunk has already been written.
    pub fn write_to<W: Write + ?Sized>(&mut self, w: &mut W) -> Result<u64> {
        let mut written = 0;
        if self.pos < self.current.len() {
            w.write_all(&self.current[self.pos..])?;
            written += (self.current.len() - self.pos) as u64;
        }
        self.current.clear();
        self.pos = 0;

        let remaining = self.chunks.len() - self.next;
        let threads = config::thread_count(self.archive.options().threads).min(remaining);
        if threads <= 1 {
            while self.next < self.chunks.len() {
                let data = self.load(&self.chunks[self.next])?;
                w.write_all(&data)?;
                written += data.len() as u64;
                self.next += 1;
            }
            return Ok(written);
        }

        let pool = ParallelDecompressor::with_threads(
            Arc::clone(self.archive.shared_codec()),
            self.archive.block_size() as usize,
            threads,
        )?;
        let window = pool.threads() * 2;
        let end = self.chunks.len();
        let mut submitted = self.next;
        let mut in_flight = 0;
        let mut ready = BTreeMap::new();
        loop {
            while submitted < end && submitted - self.next < window {
                let chunk = &self.chunks[submitted];
                match chunk.read_raw(self.archive.reader())? {
                    Some((raw, uncompressed, expect)) => {
                        pool.submit(submitted, raw, uncompressed, expect);
                        in_flight += 1;
                    }
                    None => {
                        ready.insert(submitted, vec![0; chunk.len()]);
                    }
                }
                submitted += 1;
            }

            while let Some(data) = ready.remove(&self.next) {
                w.write_all(&data)?;
                written += data.len() as u64;
                self.next += 1;
            }
            if self.next == end {
                return Ok(written);
            }
            if in_flight == 0 {
                continue;
            }

            let response = pool.recv()?;
            in_flight -= 1;
            ready.insert(response.index, response.result?);
        }
    }
}

impl<R: ReadAt> Read for FileReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.current.len() {
            if self.next == self.chunks.len() {
                return Ok(0);
            }
            self.current = self.load(&self.chunks[self.next])?;
            self.pos = 0;
            self.next += 1;
        }
        let available = &self.current[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repr::fragment::NO_FRAGMENT;

    fn file(file_size: u64, fragment: u32, block_sizes: &[u32]) -> inode::File {
        inode::File {
            blocks_start: 1000,
            file_size,
            sparse: 0,
            hard_link_count: 1,
            fragment_block_index: fragment,
            fragment_offset: 20,
            xattr_idx: None,
            block_sizes: block_sizes.iter().map(|&s| datablock::Size(s)).collect(),
        }
    }

    fn fragment_entry(start: u64, size: u32) -> fragment::Entry {
        fragment::Entry {
            start: start.into(),
            size: size.into(),
            _unused: 0u32.into(),
        }
    }

    #[test]
    fn blocks_without_fragment() {
        let compressed = datablock::Size(100);
        let stored = datablock::Size::new(4096, true);
        let chunks = layout(&file(9000, NO_FRAGMENT, &[100, stored.0, 0]), 4096, &[]).unwrap();
        assert_eq!(
            chunks,
            [
                Chunk::Block {
                    start: 1000,
                    size: compressed,
                    len: 4096
                },
                Chunk::Block {
                    start: 1100,
                    size: stored,
                    len: 4096
                },
                Chunk::Sparse { len: 808 },
            ]
        );
    }

    #[test]
    fn blocks_and_fragment() {
        let fragments = [fragment_entry(0, 50), fragment_entry(5000, 300)];
        let chunks = layout(&file(4196, 1, &[200]), 4096, &fragments).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[1],
            Chunk::Fragment {
                start: 5000,
                size: datablock::Size(300),
                offset: 20,
                len: 100
            }
        );
    }

    #[test]
    fn sentinel_skips_fragment_table() {
        let chunks = layout(&file(4096, NO_FRAGMENT, &[10]), 4096, &[]).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn fragment_out_of_range() {
        let err = layout(&file(10, 3, &[]), 4096, &[fragment_entry(0, 50)]).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata(_)), "{:?}", err);
    }

    #[test]
    fn oversized_block() {
        let err = layout(&file(4096, NO_FRAGMENT, &[4097]), 4096, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata(_)), "{:?}", err);
    }
}
