use repr::compression::options::LZ4_LEGACY;
use std::io;

use super::{invalid_data, CodecImpl};

pub type Config = repr::compression::options::Lz4;

#[derive(Debug)]
pub struct Lz4;

/// squashfs stores raw lz4 blocks, without the frame format
#[derive(Debug)]
pub struct Lz4Decompressor;

impl super::Decompressor for Lz4Decompressor {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        lz4_flex::block::decompress_into(src, dst).map_err(invalid_data)
    }
}

impl super::Config for Config {}

impl CodecImpl for Lz4 {
    type Decompressor = Lz4Decompressor;
    type Config = Config;

    fn read_config(data: &[u8]) -> io::Result<Self::Config> {
        let config: Config = repr::read(data)?;
        let version = config.version.get();
        if version != LZ4_LEGACY {
            return Err(invalid_data(format!(
                "Unsupported lz4 version ({})",
                version
            )));
        }
        if config.flags().is_none() {
            return Err(invalid_data(format!(
                "Unknown lz4 flags ({:#x})",
                config.flags.get()
            )));
        }
        Ok(config)
    }

    fn decompressor(_config: Self::Config) -> Self::Decompressor {
        Lz4Decompressor
    }
}
