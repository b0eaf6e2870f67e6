//! xz and the legacy lzma format, both decoded by liblzma

use std::{fmt, io};
use xz2::stream::{Action, Status, Stream};

use super::{invalid_data, min_mem, CodecImpl};

pub type Config = repr::compression::options::Xz;

/// Lzma archives never store compressor options
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct LzmaConfig;

#[derive(Debug)]
pub struct Xz;

#[derive(Debug)]
pub struct Lzma;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Format {
    Xz,
    Lzma,
}

/// liblzma streams cannot be reset, a fresh one is set up for every block
pub struct XzDecompressor(Format);

impl super::Decompressor for XzDecompressor {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        let mut stream = match self.0 {
            Format::Xz => Stream::new_stream_decoder(u64::MAX, 0),
            Format::Lzma => Stream::new_lzma_decoder(u64::MAX),
        }
        .map_err(invalid_data)?;

        loop {
            let in_offset = min_mem(stream.total_in(), src.len());
            let out_offset = min_mem(stream.total_out(), dst.len());

            let status = stream
                .process(&src[in_offset..], &mut dst[out_offset..], Action::Finish)
                .map_err(invalid_data)?;
            let progressed = stream.total_in() as usize != in_offset
                || stream.total_out() as usize != out_offset;
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::GetCheck if progressed => continue,
                _ => {
                    return Err(invalid_data(format!(
                        "{:?} stream did not end after {} bytes in, {} bytes out",
                        self.0,
                        stream.total_in(),
                        stream.total_out()
                    )));
                }
            }
        }
        Ok(stream.total_out() as usize)
    }
}

impl super::Config for Config {}

impl super::Config for LzmaConfig {}

impl CodecImpl for Xz {
    type Decompressor = XzDecompressor;
    type Config = Config;

    fn read_config(data: &[u8]) -> io::Result<Self::Config> {
        let config: Config = repr::read(data)?;
        let dictionary_size = config.dictionary_size.get();
        // Either 2^n or 2^n + 2^(n+1)
        let valid_size = dictionary_size.is_power_of_two()
            || (dictionary_size % 3 == 0 && (dictionary_size / 3).is_power_of_two());
        if dictionary_size < 8 * 1024 || !valid_size {
            return Err(invalid_data(format!(
                "Invalid dictionary size ({})",
                dictionary_size
            )));
        }
        if config.filters().is_none() {
            return Err(invalid_data(format!(
                "Unknown filters ({:#x})",
                config.executable_filters.get()
            )));
        }
        Ok(config)
    }

    fn decompressor(_config: Self::Config) -> Self::Decompressor {
        XzDecompressor(Format::Xz)
    }
}

impl CodecImpl for Lzma {
    type Decompressor = XzDecompressor;
    type Config = LzmaConfig;

    fn read_config(_data: &[u8]) -> io::Result<Self::Config> {
        Err(invalid_data("lzma does not take compressor options"))
    }

    fn decompressor(_config: Self::Config) -> Self::Decompressor {
        XzDecompressor(Format::Lzma)
    }
}

impl fmt::Debug for XzDecompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("XzDecompressor").field(&self.0).finish()
    }
}
