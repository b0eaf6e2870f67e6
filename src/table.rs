//! Two level lookup tables (fragments and ids)
//!
//! The table starts with a raw array of u64 offsets, one per metadata block holding entries.

use positioned_io::ReadAt;
use repr::metablock;
use std::mem;
use zerocopy::{FromBytes, Unaligned};

use crate::compression::LocalCodec;
use crate::errors::{Error, Result};
use crate::metablock::read_metablock;

#[derive(Debug)]
pub(crate) struct Table<T> {
    pub entries: Vec<T>,
    /// Offset of the first metadata block, where the table really begins
    pub blocks_start: Option<u64>,
}

/// Read `count` entries of a table indexed at `start`
pub(crate) fn read_table<T, R>(
    reader: &R,
    codec: Option<&LocalCodec>,
    start: u64,
    count: usize,
) -> Result<Table<T>>
where
    T: FromBytes + Unaligned + Copy,
    R: ReadAt + ?Sized,
{
    let entry_size = mem::size_of::<T>();
    let per_block = metablock::SIZE / entry_size;
    debug_assert_eq!(metablock::SIZE % entry_size, 0);

    let block_count = (count + per_block - 1) / per_block;
    // `count` comes from the superblock, grow as entries are actually read
    let mut result = Vec::with_capacity(count.min(per_block));
    let mut blocks_start = None;
    let mut block = Vec::with_capacity(metablock::SIZE);
    for i in 0..block_count {
        let mut pointer = [0; mem::size_of::<u64>()];
        reader.read_exact_at(start + (i * pointer.len()) as u64, &mut pointer)?;
        let pointer = u64::from_le_bytes(pointer);
        blocks_start.get_or_insert(pointer);
        let in_block = per_block.min(count - i * per_block);

        if read_metablock(reader, codec, pointer, &mut block)?.is_none() {
            return Err(Error::invalid(format!(
                "table block {} at {} is past the end of the archive",
                i, pointer
            )));
        }
        let entries = block.get(..in_block * entry_size).ok_or_else(|| {
            Error::invalid(format!(
                "table block {} at {} holds {} bytes, expected {} entries",
                i,
                pointer,
                block.len(),
                in_block
            ))
        })?;
        for entry in entries.chunks_exact(entry_size) {
            result.push(repr::read(entry)?);
        }
    }
    Ok(Table {
        entries: result,
        blocks_start,
    })
}
