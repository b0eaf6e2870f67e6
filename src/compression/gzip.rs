use flate2::FlushDecompress;
use repr::compression::options::GzipStrategies;
use std::{fmt, io};

use super::{invalid_data, min_mem, CodecImpl};

pub type Config = repr::compression::options::Gzip;

#[derive(Debug)]
pub struct Gzip;

pub struct GzipDecompressor(flate2::Decompress);

impl super::Decompressor for GzipDecompressor {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        let decompressor = &mut self.0;
        decompressor.reset(true);
        loop {
            let in_offset = min_mem(decompressor.total_in(), src.len());
            let input = &src[in_offset..];

            let out_offset = min_mem(decompressor.total_out(), dst.len());
            let output = &mut dst[out_offset..];

            let status = decompressor
                .decompress(input, output, FlushDecompress::Finish)
                .map_err(invalid_data)?;
            let progressed = decompressor.total_in() as usize != in_offset
                || decompressor.total_out() as usize != out_offset;
            match status {
                flate2::Status::StreamEnd => break,
                flate2::Status::Ok if progressed => continue,
                flate2::Status::Ok | flate2::Status::BufError => {
                    return Err(invalid_data(format!(
                        "gzip stream did not end after {} bytes in, {} bytes out",
                        decompressor.total_in(),
                        decompressor.total_out()
                    )));
                }
            }
        }
        Ok(decompressor.total_out() as usize)
    }
}

impl super::Config for Config {}

impl CodecImpl for Gzip {
    type Decompressor = GzipDecompressor;
    type Config = Config;

    fn read_config(data: &[u8]) -> io::Result<Self::Config> {
        let config: Config = repr::read(data)?;
        let compression_level = config.compression_level.get();
        if !(1..=9).contains(&compression_level) {
            return Err(invalid_data(format!(
                "Invalid compression level ({})",
                compression_level
            )));
        }
        let window_size = config.window_size.get();
        if !(8..=15).contains(&window_size) {
            return Err(invalid_data(format!(
                "Invalid window size ({})",
                window_size
            )));
        }
        if config.strategies().is_none() {
            return Err(invalid_data(format!(
                "Unknown strategies ({:#x}), expected a subset of {:#x}",
                config.strategies.get(),
                GzipStrategies::all().bits()
            )));
        }
        Ok(config)
    }

    fn decompressor(_config: Self::Config) -> Self::Decompressor {
        GzipDecompressor(flate2::Decompress::new(true))
    }
}

impl fmt::Debug for GzipDecompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GzipDecompressor").finish()
    }
}
