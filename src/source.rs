use parking_lot::Mutex;
use positioned_io::ReadAt;
use std::convert::TryFrom;
use std::io;

/// A sequential reader over a `ReadAt`, starting at a fixed position
#[derive(Debug)]
pub struct Positioned<'a, R: ?Sized> {
    reader: &'a R,
    position: u64,
}

impl<'a, R: ReadAt + ?Sized> Positioned<'a, R> {
    pub fn new(reader: &'a R) -> Self {
        Self::with_position(reader, 0)
    }

    pub fn with_position(reader: &'a R, position: u64) -> Self {
        Self { reader, position }
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<R: ReadAt + ?Sized> io::Read for Positioned<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let res = self.reader.read_at(self.position, buf)?;
        self.position += res as u64;
        Ok(res)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact_at(self.position, buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }
}

const CHUNK_SIZE: usize = 64 * 1024;

/// Random access over a reader which can only go forward
///
/// Everything read from the inner reader is kept, so reading at an offset never needs to go
/// back. Memory use grows with the largest offset read so far.
#[derive(Debug)]
pub struct SequentialSource<R> {
    inner: Mutex<Buffered<R>>,
}

#[derive(Debug)]
struct Buffered<R> {
    reader: R,
    data: Vec<u8>,
    eof: bool,
}

impl<R: io::Read> Buffered<R> {
    fn fill_to(&mut self, end: u64) -> io::Result<()> {
        while !self.eof && (self.data.len() as u64) < end {
            let old_len = self.data.len();
            self.data.resize(old_len + CHUNK_SIZE, 0);
            let n = match self.reader.read(&mut self.data[old_len..]) {
                Ok(0) => {
                    self.eof = true;
                    0
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
                Err(e) => {
                    self.data.truncate(old_len);
                    return Err(e);
                }
            };
            self.data.truncate(old_len + n);
        }
        Ok(())
    }
}

impl<R: io::Read> SequentialSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: Mutex::new(Buffered {
                reader,
                data: Vec::new(),
                eof: false,
            }),
        }
    }

    /// The number of bytes read from the inner reader so far
    pub fn buffered_len(&self) -> usize {
        self.inner.lock().data.len()
    }
}

impl<R: io::Read> ReadAt for SequentialSource<R> {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        inner.fill_to(pos.saturating_add(buf.len() as u64))?;
        let available = match usize::try_from(pos) {
            Ok(start) if start < inner.data.len() => &inner.data[start..],
            _ => return Ok(0),
        };
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }
}
