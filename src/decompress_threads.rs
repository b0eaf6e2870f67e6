use std::fmt;
use std::sync::Arc;

use crate::compression::LocalCodec;
use crate::errors::{Error, Result};
use crate::thread::Joiner;

/// The decoded length a data chunk must have
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Expect {
    /// A whole data block of exactly this length
    Exact(usize),
    /// A range inside a fragment block
    Slice { offset: usize, len: usize },
}

/// Decode a raw data chunk, checking the result has the expected length
pub(crate) fn decode(
    codec: &LocalCodec,
    raw: Vec<u8>,
    uncompressed: bool,
    expect: Expect,
    block_size: usize,
) -> Result<Vec<u8>> {
    let mut data = if uncompressed {
        raw
    } else {
        let mut dst = vec![0; block_size];
        let n = codec.decompress(&raw, &mut dst)?;
        dst.truncate(n);
        dst
    };

    match expect {
        Expect::Exact(len) if data.len() == len => Ok(data),
        Expect::Exact(len) => Err(Error::invalid(format!(
            "data block decoded to {} bytes, expected {}",
            data.len(),
            len
        ))),
        Expect::Slice { offset, len } => {
            if offset.checked_add(len).map_or(true, |end| end > data.len()) {
                return Err(Error::invalid(format!(
                    "fragment range {}+{} outside a block of {} bytes",
                    offset,
                    len,
                    data.len()
                )));
            }
            data.truncate(offset + len);
            data.drain(..offset);
            Ok(data)
        }
    }
}

struct Request {
    index: usize,
    raw: Vec<u8>,
    uncompressed: bool,
    expect: Expect,
}

#[derive(Debug)]
pub(crate) struct Response {
    pub index: usize,
    pub result: Result<Vec<u8>>,
}

/// A pool of threads decoding data chunks
///
/// Responses come back in completion order, tagged with the index they were submitted with.
pub(crate) struct ParallelDecompressor {
    // Destructors are run in top-down order, so this closes the sender before joining
    sender: flume::Sender<Request>,
    receiver: flume::Receiver<Response>,
    threads: Joiner<()>,
}

impl ParallelDecompressor {
    pub(crate) fn with_threads(
        codec: Arc<LocalCodec>,
        block_size: usize,
        threads: usize,
    ) -> Result<Self> {
        debug_assert!(threads > 0);

        let (tx, rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();
        let threads = Joiner::new("unsquash-decode", threads, || {
            thread_fn(
                rx.clone(),
                response_tx.clone(),
                Arc::clone(&codec),
                block_size,
            )
        })?;

        Ok(Self {
            sender: tx,
            receiver: response_rx,
            threads,
        })
    }

    pub(crate) fn threads(&self) -> usize {
        self.threads.len()
    }

    pub(crate) fn submit(&self, index: usize, raw: Vec<u8>, uncompressed: bool, expect: Expect) {
        let request = Request {
            index,
            raw,
            uncompressed,
            expect,
        };
        // Workers only exit once the sender is gone
        let _ = self.sender.send(request);
    }

    /// Wait for the next finished chunk
    pub(crate) fn recv(&self) -> Result<Response> {
        self.receiver
            .recv()
            .map_err(|_| Error::invalid("decoder threads exited early"))
    }
}

fn thread_fn(
    rx: flume::Receiver<Request>,
    tx: flume::Sender<Response>,
    codec: Arc<LocalCodec>,
    block_size: usize,
) -> impl FnOnce() {
    move || {
        for request in rx {
            let result = decode(
                &codec,
                request.raw,
                request.uncompressed,
                request.expect,
                block_size,
            );
            let response = Response {
                index: request.index,
                result,
            };
            if tx.send(response).is_err() {
                break;
            }
        }
    }
}

impl fmt::Debug for ParallelDecompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelDecompressor")
            .field("threads", &self.threads.len())
            .finish_non_exhaustive()
    }
}
