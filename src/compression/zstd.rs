use crate::compression::CodecImpl;
use std::fmt::Formatter;
use std::{fmt, io};
use zstd::bulk as zbulk;

use super::invalid_data;

pub type Config = repr::compression::options::Zstd;

#[derive(Debug)]
pub struct Zstd;

/// The zstd context is created on first use, creating one can fail
pub struct ZstdDecompressor(Option<zbulk::Decompressor<'static>>);

impl super::Decompressor for ZstdDecompressor {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        let mut decompressor = match self.0.take() {
            Some(decompressor) => decompressor,
            None => zbulk::Decompressor::new()?,
        };
        let result = decompressor.decompress_to_buffer(src, dst);
        self.0 = Some(decompressor);
        result
    }
}

impl super::Config for Config {}

impl CodecImpl for Zstd {
    type Decompressor = ZstdDecompressor;
    type Config = Config;

    fn read_config(data: &[u8]) -> io::Result<Self::Config> {
        let config: Config = repr::read(data)?;
        let compression_level = config.compression_level.get();
        if !(1..=22).contains(&compression_level) {
            return Err(invalid_data(format!(
                "Invalid compression level ({})",
                compression_level
            )));
        }
        Ok(config)
    }

    fn decompressor(_config: Self::Config) -> Self::Decompressor {
        ZstdDecompressor(None)
    }
}

impl fmt::Debug for ZstdDecompressor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ZstdDecompressor").finish()
    }
}
