use repr::compression::Id as CompressionId;
use std::cell::RefCell;
use std::convert::TryFrom;
use std::{fmt, io};
use thread_local::ThreadLocal;

use crate::errors::{Error, Result};

#[cfg(feature = "gzip")]
pub mod gzip;

#[cfg(feature = "lz4")]
pub mod lz4;

#[cfg(any(feature = "xz", feature = "lzma"))]
pub mod xz;

#[cfg(feature = "zstd")]
pub mod zstd;

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    ZLib = CompressionId::GZIP.0,
    Lzma = CompressionId::LZMA.0,
    Lzo = CompressionId::LZO.0,
    Xz = CompressionId::XZ.0,
    Lz4 = CompressionId::LZ4.0,
    Zstd = CompressionId::ZSTD.0,
    Unknown = 0,
}

#[derive(Debug)]
pub struct Codec<C: CodecImpl> {
    config: C::Config,
    decomp: C::Decompressor,
}

impl<C: CodecImpl> Codec<C> {
    fn new() -> Self {
        Self::with_config(Default::default())
    }

    fn configured(data: &[u8]) -> io::Result<Self> {
        let config = C::read_config(data)?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: C::Config) -> Self {
        Self {
            decomp: C::decompressor(config.clone()),
            config,
        }
    }
}

impl<C: CodecImpl> Decompressor for Codec<C> {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        self.decomp.decompress(src, dst)
    }
}

impl<C: CodecImpl> Clone for Codec<C> {
    fn clone(&self) -> Self {
        Self::with_config(self.config.clone())
    }
}

#[derive(Debug, Clone)]
pub enum AnyCodec {
    #[cfg(feature = "gzip")]
    Gzip(Codec<gzip::Gzip>),
    #[cfg(feature = "lzma")]
    Lzma(Codec<xz::Lzma>),
    #[cfg(feature = "xz")]
    Xz(Codec<xz::Xz>),
    #[cfg(feature = "lz4")]
    Lz4(Codec<lz4::Lz4>),
    #[cfg(feature = "zstd")]
    Zstd(Codec<zstd::Zstd>),
}

impl AnyCodec {
    pub fn new(kind: Kind) -> Result<AnyCodec> {
        let codec = match kind {
            #[cfg(feature = "gzip")]
            Kind::ZLib => AnyCodec::Gzip(Codec::new()),
            #[cfg(feature = "lzma")]
            Kind::Lzma => AnyCodec::Lzma(Codec::new()),
            #[cfg(feature = "xz")]
            Kind::Xz => AnyCodec::Xz(Codec::new()),
            #[cfg(feature = "lz4")]
            Kind::Lz4 => AnyCodec::Lz4(Codec::new()),
            #[cfg(feature = "zstd")]
            Kind::Zstd => AnyCodec::Zstd(Codec::new()),
            _ => return Err(Error::DisabledCompression { kind }),
        };
        Ok(codec)
    }

    /// Build a codec from the compressor options stored after the superblock
    pub fn configured(kind: Kind, data: &[u8]) -> Result<Self> {
        let result = match kind {
            #[cfg(feature = "gzip")]
            Kind::ZLib => Codec::configured(data).map(AnyCodec::Gzip),
            #[cfg(feature = "lzma")]
            Kind::Lzma => Codec::configured(data).map(AnyCodec::Lzma),
            #[cfg(feature = "xz")]
            Kind::Xz => Codec::configured(data).map(AnyCodec::Xz),
            #[cfg(feature = "lz4")]
            Kind::Lz4 => Codec::configured(data).map(AnyCodec::Lz4),
            #[cfg(feature = "zstd")]
            Kind::Zstd => Codec::configured(data).map(AnyCodec::Zstd),
            _ => return Err(Error::DisabledCompression { kind }),
        };
        result.map_err(|e| Error::UnsupportedOption(format!("{} options: {}", kind, e)))
    }

    pub fn config(&self) -> &dyn fmt::Debug {
        match self {
            #[cfg(feature = "gzip")]
            AnyCodec::Gzip(codec) => &codec.config,
            #[cfg(feature = "lzma")]
            AnyCodec::Lzma(codec) => &codec.config,
            #[cfg(feature = "xz")]
            AnyCodec::Xz(codec) => &codec.config,
            #[cfg(feature = "lz4")]
            AnyCodec::Lz4(codec) => &codec.config,
            #[cfg(feature = "zstd")]
            AnyCodec::Zstd(codec) => &codec.config,
        }
    }

    pub fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        match self {
            #[cfg(feature = "gzip")]
            AnyCodec::Gzip(gzip) => gzip.decompress(src, dst),
            #[cfg(feature = "lzma")]
            AnyCodec::Lzma(lzma) => lzma.decompress(src, dst),
            #[cfg(feature = "xz")]
            AnyCodec::Xz(xz) => xz.decompress(src, dst),
            #[cfg(feature = "lz4")]
            AnyCodec::Lz4(lz4) => lz4.decompress(src, dst),
            #[cfg(feature = "zstd")]
            AnyCodec::Zstd(zstd) => zstd.decompress(src, dst),
        }
    }

    pub fn kind(&self) -> Kind {
        match *self {
            #[cfg(feature = "gzip")]
            AnyCodec::Gzip(_) => Kind::ZLib,
            #[cfg(feature = "lzma")]
            AnyCodec::Lzma(_) => Kind::Lzma,
            #[cfg(feature = "xz")]
            AnyCodec::Xz(_) => Kind::Xz,
            #[cfg(feature = "lz4")]
            AnyCodec::Lz4(_) => Kind::Lz4,
            #[cfg(feature = "zstd")]
            AnyCodec::Zstd(_) => Kind::Zstd,
        }
    }
}

/// A codec usable from many threads at once
///
/// Every thread decompresses with its own codec, built from the compressor options on first
/// use, so no lock is held while decompressing. Decoder contexts never cross threads.
pub struct LocalCodec {
    kind: Kind,
    /// Raw compressor options record, when the archive stores one
    options: Option<Vec<u8>>,
    local: ThreadLocal<RefCell<AnyCodec>>,
}

impl LocalCodec {
    /// Share `codec`, which was built from `options`, with other threads
    pub fn new(codec: AnyCodec, options: Option<Vec<u8>>) -> Self {
        let local = ThreadLocal::new();
        let kind = codec.kind();
        local.get_or(|| RefCell::new(codec));
        Self {
            kind,
            options,
            local,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    fn build(&self) -> Result<AnyCodec> {
        match &self.options {
            Some(options) => AnyCodec::configured(self.kind, options),
            None => AnyCodec::new(self.kind),
        }
    }

    /// Decompress `src` into `dst`, returning the decompressed size
    pub fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let codec = self.local.get_or_try(|| self.build().map(RefCell::new))?;
        codec
            .borrow_mut()
            .decompress(src, dst)
            .map_err(|source| Error::Codec {
                kind: self.kind,
                source,
            })
    }
}

impl fmt::Debug for LocalCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCodec")
            .field("kind", &self.kind)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Kind {
    pub fn from_id(id: CompressionId) -> Kind {
        match id {
            CompressionId::GZIP => Kind::ZLib,
            CompressionId::LZMA => Kind::Lzma,
            CompressionId::LZO => Kind::Lzo,
            CompressionId::XZ => Kind::Xz,
            CompressionId::LZ4 => Kind::Lz4,
            CompressionId::ZSTD => Kind::Zstd,
            _ => Kind::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::ZLib => "gzip",
            Kind::Lzma => "lzma",
            Kind::Lzo => "lzo",
            Kind::Xz => "xz",
            Kind::Lz4 => "lz4",
            Kind::Zstd => "zstd",
            Kind::Unknown => "unknown",
        }
    }

    /// Whether this build can decompress archives using this kind
    pub fn supported(self) -> bool {
        match self {
            Kind::ZLib => cfg!(feature = "gzip"),
            Kind::Lzma => cfg!(feature = "lzma"),
            Kind::Xz => cfg!(feature = "xz"),
            Kind::Lz4 => cfg!(feature = "lz4"),
            Kind::Zstd => cfg!(feature = "zstd"),
            // No lzo decoder is available
            Kind::Lzo | Kind::Unknown => false,
        }
    }
}

static_assertions::assert_impl_all!(LocalCodec: Send, Sync);

pub trait Decompressor {
    /// Decompress all of `src` into `dst`, returning the number of bytes written.
    ///
    /// Output which does not fit in `dst` is an error.
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize>;
}

pub trait Config: fmt::Debug + Default + Clone {}

pub trait CodecImpl {
    type Decompressor: Decompressor;
    type Config: Config;

    fn read_config(data: &[u8]) -> io::Result<Self::Config>;
    fn decompressor(config: Self::Config) -> Self::Decompressor;
}

/// A stream position, clamped to the length of the buffer it indexes
fn min_mem(pos: u64, len: usize) -> usize {
    usize::try_from(pos).map_or(len, |pos| pos.min(len))
}

fn invalid_data<E>(error: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, error)
}
