use bstr::BString;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::compression;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "Magic mismatch: expected {:#x}, got {:#x}",
        repr::superblock::MAGIC,
        .magic
    )]
    BadMagic { magic: u32 },
    #[error("Invalid archive version {major}.{minor}: only version 4.0 is supported")]
    BadVersion { major: u16, minor: u16 },
    #[error("Block size {block_size} does not agree with block log {block_log}")]
    CorruptBlockSizes { block_log: u16, block_size: u32 },
    #[error("Unknown compression type: {id}")]
    UnknownCompression { id: u16 },
    #[error("unsquash built without support for {kind}")]
    DisabledCompression { kind: compression::Kind },
    #[error("Unsupported option: {0}")]
    UnsupportedOption(String),
    #[error("Unsupported inode type {kind}")]
    UnsupportedInodeType { kind: u16 },
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("Compressed metadata block, but no decompressor is available")]
    MissingCompressor,

    #[error("{kind} decompression failed: {source}")]
    Codec {
        kind: compression::Kind,
        #[source]
        source: io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[source] io::Error),
    #[error("Unable to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} not found")]
    NotFound { path: BString },
    #[error("Cannot go to the parent of the root directory")]
    NoParent,
    #[error("{path} is not a directory")]
    NotADirectory { path: BString },
    #[error("{path} is not a regular file")]
    NotAFile { path: BString },
    #[error("Invalid pattern {pattern:?}: {reason}")]
    BadPattern { pattern: BString, reason: &'static str },

    #[error("Extracting {}: {source}", .path.display())]
    Extract {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Too many levels of symbolic links at {path}")]
    SymlinkLoop { path: BString },
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidMetadata(msg.into())
    }

    pub(crate) fn extract(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Extract {
            path: path.into(),
            source,
        }
    }

    /// True for lookups of names which do not exist, as opposed to failures reading the archive
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Error::Io(e) | Error::Open { source: e, .. } | Error::Extract { source: e, .. } => {
                e.kind()
            }
            Error::NotFound { .. } => io::ErrorKind::NotFound,
            Error::NotADirectory { .. } | Error::NotAFile { .. } | Error::BadPattern { .. } => {
                io::ErrorKind::InvalidInput
            }
            _ => io::ErrorKind::InvalidData,
        }
    }
}

// Readers in this crate implement `io::Read`, so our errors travel inside an `io::Error` and
// get unwrapped again on the way out.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.get_ref().map_or(false, |inner| inner.is::<Error>()) {
            let kind = e.kind();
            return match e.into_inner().map(|inner| inner.downcast::<Error>()) {
                Some(Ok(err)) => *err,
                Some(Err(inner)) => Error::Io(io::Error::new(kind, inner)),
                None => Error::Io(kind.into()),
            };
        }
        Error::Io(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            e => io::Error::new(e.io_kind(), e),
        }
    }
}
