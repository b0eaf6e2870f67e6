//! Reading the chain of metadata blocks behind the inode, directory and lookup tables

use positioned_io::ReadAt;
use repr::metablock::{Header, SIZE};
use std::io;

use crate::compression::LocalCodec;
use crate::errors::{Error, Result};

/// Read and decode the metadata block starting at `offset` into `dst`
///
/// Returns the decoded size and the offset of the following block, or `None` when the source
/// ends before a block header.
pub(crate) fn read_metablock<R: ReadAt + ?Sized>(
    reader: &R,
    codec: Option<&LocalCodec>,
    offset: u64,
    dst: &mut Vec<u8>,
) -> Result<Option<u64>> {
    let mut header = [0; 2];
    match reader.read_exact_at(offset, &mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = Header(u16::from_le_bytes(header));
    let size = usize::from(header.size());
    if size > SIZE {
        return Err(Error::invalid(format!(
            "metadata block at {} is {} bytes on disk",
            offset, size
        )));
    }

    let mut raw = [0; SIZE];
    let raw = &mut raw[..size];
    reader
        .read_exact_at(offset + 2, raw)
        .map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::invalid(format!(
                "metadata block at {} is truncated, expected {} bytes",
                offset, size
            )),
            _ => e.into(),
        })?;

    dst.clear();
    if header.uncompressed() {
        dst.extend_from_slice(raw);
    } else {
        let codec = codec.ok_or(Error::MissingCompressor)?;
        dst.resize(SIZE, 0);
        let decoded = codec.decompress(raw, dst)?;
        dst.truncate(decoded);
    }
    Ok(Some(offset + 2 + size as u64))
}

/// A reader over the decoded contents of a chain of metadata blocks
///
/// Blocks are fetched lazily, a read crossing the end of a block continues in the next one.
#[derive(Debug)]
pub(crate) struct MetablockReader<'a, R: ?Sized> {
    reader: &'a R,
    codec: Option<&'a LocalCodec>,
    next_block: u64,
    end: u64,
    block: Vec<u8>,
    pos: usize,
}

impl<'a, R: ReadAt + ?Sized> MetablockReader<'a, R> {
    /// Start reading at the block at `start`, skipping `offset` decoded bytes
    pub(crate) fn new(
        reader: &'a R,
        codec: Option<&'a LocalCodec>,
        start: u64,
        offset: usize,
    ) -> Result<Self> {
        Self::with_end(reader, codec, start, offset, u64::MAX)
    }

    /// Like `new`, but no block starting at or after `end` is read
    pub(crate) fn with_end(
        reader: &'a R,
        codec: Option<&'a LocalCodec>,
        start: u64,
        offset: usize,
        end: u64,
    ) -> Result<Self> {
        let mut result = Self {
            reader,
            codec,
            next_block: start,
            end,
            block: Vec::with_capacity(SIZE),
            pos: 0,
        };
        let mut skip = offset;
        while skip > 0 {
            if !result.fetch()? {
                return Err(Error::invalid(format!(
                    "offset {} is past the end of the metadata starting at {}",
                    offset, start
                )));
            }
            let available = result.block.len();
            result.pos = skip.min(available);
            skip -= result.pos;
        }
        Ok(result)
    }

    /// Fetch the next block, returns false at the end of the chain
    fn fetch(&mut self) -> Result<bool> {
        if self.next_block >= self.end {
            return Ok(false);
        }
        match read_metablock(self.reader, self.codec, self.next_block, &mut self.block)? {
            Some(next) => {
                self.next_block = next;
                self.pos = 0;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<R: ReadAt + ?Sized> io::Read for MetablockReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.block.len() {
            if !self.fetch()? {
                return Ok(0);
            }
        }
        let available = &self.block[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(all(test, feature = "gzip"))]
pub(crate) mod tests {
    use super::*;
    use crate::compression::{AnyCodec, Kind};
    use std::io::Read;

    /// Encode `data` as a chain of metadata blocks, compressing every block for which
    /// `compress(index)` returns true
    pub(crate) fn encode(data: &[u8], compress: impl Fn(usize) -> bool) -> Vec<u8> {
        use std::io::Write;

        let mut out = Vec::new();
        for (i, chunk) in data.chunks(SIZE).enumerate() {
            if compress(i) {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(chunk).unwrap();
                let compressed = encoder.finish().unwrap();
                out.extend_from_slice(&(compressed.len() as u16).to_le_bytes());
                out.extend_from_slice(&compressed);
            } else {
                out.extend_from_slice(&Header::new(chunk.len() as u16, true).0.to_le_bytes());
                out.extend_from_slice(chunk);
            }
        }
        out
    }

    fn gzip() -> LocalCodec {
        LocalCodec::new(AnyCodec::new(Kind::ZLib).unwrap(), None)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn read_all(encoded: &Vec<u8>, codec: Option<&LocalCodec>, offset: usize) -> Vec<u8> {
        let mut reader = MetablockReader::new(encoded, codec, 0, offset).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn round_trip_sizes() {
        let codec = gzip();
        for &len in &[0, 1, SIZE - 1, SIZE, SIZE + 1, 3 * SIZE + 17] {
            let data = pattern(len);
            let encoded = encode(&data, |i| i % 2 == 0);
            assert_eq!(read_all(&encoded, Some(&codec), 0), data, "len {}", len);

            let encoded = encode(&data, |_| false);
            assert_eq!(read_all(&encoded, None, 0), data, "len {}", len);
        }
    }

    #[test]
    fn offset_skips_blocks() {
        let codec = gzip();
        let data = pattern(2 * SIZE + 100);
        let encoded = encode(&data, |_| true);
        for &offset in &[5, SIZE, SIZE + 7, 2 * SIZE + 99] {
            assert_eq!(read_all(&encoded, Some(&codec), offset), &data[offset..]);
        }
    }

    #[test]
    fn read_past_end() {
        let data = pattern(10);
        let encoded = encode(&data, |_| false);
        let mut reader = MetablockReader::new(&encoded, None, 0, 0).unwrap();
        let mut buf = [0; 11];
        let err = reader.read_exact(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        MetablockReader::new(&encoded, None, 0, 11).unwrap_err();
    }

    #[test]
    fn end_bounds_the_chain() {
        let data = pattern(SIZE + 10);
        let encoded = encode(&data, |_| false);
        let first_block_len = (2 + SIZE) as u64;
        let mut reader =
            MetablockReader::with_end(&encoded, None, 0, 0, first_block_len).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, &data[..SIZE]);
    }

    #[test]
    fn compressed_without_codec() {
        let encoded = encode(&pattern(100), |_| true);
        let mut reader = MetablockReader::new(&encoded, None, 0, 0).unwrap();
        let err = Error::from(reader.read(&mut [0; 4]).unwrap_err());
        assert!(matches!(err, Error::MissingCompressor), "{:?}", err);
    }

    #[test]
    fn truncated_payload() {
        let mut encoded = encode(&pattern(100), |_| false);
        encoded.truncate(50);
        let mut reader = MetablockReader::new(&encoded, None, 0, 0).unwrap();
        let err = Error::from(reader.read(&mut [0; 4]).unwrap_err());
        assert!(matches!(err, Error::InvalidMetadata(_)), "{:?}", err);
    }
}
