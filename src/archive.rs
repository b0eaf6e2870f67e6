use positioned_io::{RandomAccessFile, ReadAt, Slice};
use repr::superblock::{Flags, Superblock};
use repr::{fragment, metablock, uid_gid};
use slog::{Drain, Logger};
use std::io::{self, Write};
use std::path::Path;
use std::fmt;
use std::sync::Arc;

use crate::compression::{self, AnyCodec, LocalCodec};
use crate::config::Options;
use crate::dir::{self, Entry};
use crate::errors::{Error, Result};
use crate::file::FileReader;
use crate::fs::Dir;
use crate::inode::{self, Inode};
use crate::metablock::{read_metablock, MetablockReader};
use crate::source::{Positioned, SequentialSource};
use crate::table::{read_table, Table};

/// An open squashfs archive
///
/// Cloning is cheap, clones share the underlying source and tables.
pub struct Archive<R> {
    inner: Arc<ArchiveInner<R>>,
    root: Arc<Root>,
}

#[derive(Debug)]
struct Root {
    inode: Inode,
    entries: Arc<[Entry]>,
}

struct ArchiveInner<R> {
    reader: R,
    superblock: Superblock,
    flags: Flags,
    codec: Arc<LocalCodec>,
    fragments: Vec<fragment::Entry>,
    ids: Vec<uid_gid::Id>,
    /// Where the directory table ends, as far as the other tables tell
    directory_end: u64,
    options: Options,
    logger: Logger,
}

pub(crate) fn default_logger() -> Logger {
    slog::Logger::root(slog_stdlog::StdLog.fuse(), slog::o!())
}

impl Archive<RandomAccessFile> {
    pub fn open<P: AsRef<Path>>(p: P) -> Result<Self> {
        Archive::open_with_logger(p, default_logger())
    }

    pub fn open_with_logger<P: AsRef<Path>>(p: P, logger: Logger) -> Result<Self> {
        let (file, logger) = open_file(p.as_ref(), logger)?;
        Self::with_logger(file, logger)
    }
}

impl Archive<Slice<RandomAccessFile>> {
    /// Open an archive stored at `offset` inside a larger file
    pub fn open_at<P: AsRef<Path>>(p: P, offset: u64) -> Result<Self> {
        let (file, logger) = open_file(p.as_ref(), default_logger())?;
        let logger = logger.new(slog::o!("offset" => offset));
        Self::with_logger(Slice::new(file, offset, None), logger)
    }
}

fn open_file(path: &Path, logger: Logger) -> Result<(RandomAccessFile, Logger)> {
    let path_str = path.display().to_string();
    let logger = logger.new(slog::o!("file" => path_str));
    let file = RandomAccessFile::open(path).map_err(|source| Error::Open {
        path: path.to_owned(),
        source,
    })?;
    Ok((file, logger))
}

impl<R: io::Read> Archive<SequentialSource<R>> {
    /// Open an archive from a reader which can only be read front to back
    ///
    /// Everything read is kept in memory, see [`SequentialSource`].
    pub fn from_reader(reader: R) -> Result<Self> {
        Self::new(SequentialSource::new(reader))
    }
}

impl<R: ReadAt> Archive<R> {
    pub fn new(reader: R) -> Result<Self> {
        Self::with_options(reader, Options::default())
    }

    pub fn with_logger(reader: R, logger: Logger) -> Result<Self> {
        Self::with_options(
            reader,
            Options {
                logger: Some(logger),
                ..Options::default()
            },
        )
    }

    pub fn with_options(reader: R, mut options: Options) -> Result<Self> {
        let logger = options.logger.take().unwrap_or_else(default_logger);

        let superblock: Superblock = repr::read_from(Positioned::new(&reader))?;
        log_superblock(&logger, &superblock);

        let kind = validate_superblock(&superblock)?;
        let flags = superblock.flags().ok_or_else(|| {
            Error::UnsupportedOption(format!(
                "Unknown superblock flags in {:#x}",
                superblock.flags.get()
            ))
        })?;

        let raw_options = if flags.contains(Flags::COMPRESSOR_OPTIONS) {
            let mut raw_options = Vec::with_capacity(metablock::SIZE);
            read_metablock(&reader, None, repr::superblock::SIZE, &mut raw_options)?
                .ok_or_else(|| Error::invalid("compressor options missing"))?;
            Some(raw_options)
        } else {
            None
        };
        let codec = match &raw_options {
            Some(raw_options) => AnyCodec::configured(kind, raw_options)?,
            None => AnyCodec::new(kind)?,
        };
        slog::info!(logger, "Loaded compressor {:?}", codec.config(); "compression_kind" => %codec.kind());
        let codec = Arc::new(LocalCodec::new(codec, raw_options));

        let fragments: Table<fragment::Entry> = read_table(
            &reader,
            Some(&*codec),
            superblock.fragment_table_start.get(),
            superblock.fragment_entry_count.get() as usize,
        )?;
        let ids: Table<uid_gid::Id> = read_table(
            &reader,
            Some(&*codec),
            superblock.id_table_start.get(),
            superblock.id_count.get().into(),
        )?;
        slog::debug!(logger, "Loaded tables";
            "fragments" => fragments.entries.len(),
            "ids" => ids.entries.len()
        );
        let directory_end = directory_table_end(
            &superblock,
            &[fragments.blocks_start, ids.blocks_start],
        );

        let inner = ArchiveInner {
            reader,
            superblock,
            flags,
            codec,
            fragments: fragments.entries,
            ids: ids.entries,
            directory_end,
            options,
            logger,
        };
        let inode = inner.inode(superblock.root_inode_ref())?;
        let entries: Arc<[Entry]> = match inode.as_directory() {
            Some(dir) => inner.read_dir(dir)?.into(),
            None => {
                return Err(Error::invalid(format!(
                    "root inode is a {:?}, not a directory",
                    inode.file_type()
                )))
            }
        };

        Ok(Self {
            inner: Arc::new(inner),
            root: Arc::new(Root { inode, entries }),
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.inner.superblock
    }

    pub fn flags(&self) -> Flags {
        self.inner.flags
    }

    pub fn block_size(&self) -> u32 {
        self.inner.superblock.block_size.get()
    }

    pub fn compression(&self) -> compression::Kind {
        self.inner.codec.kind()
    }

    /// Look up a uid or gid by its index in the id table
    pub fn id(&self, idx: u16) -> Result<u32> {
        self.inner
            .ids
            .get(usize::from(idx))
            .map(|id| id.get())
            .ok_or_else(|| {
                Error::invalid(format!(
                    "id index {} out of range ({} ids)",
                    idx,
                    self.inner.ids.len()
                ))
            })
    }

    pub fn fragment(&self, idx: u32) -> Result<fragment::Entry> {
        self.inner.fragments.get(idx as usize).copied().ok_or_else(|| {
            Error::invalid(format!(
                "fragment index {} out of range ({} fragments)",
                idx,
                self.inner.fragments.len()
            ))
        })
    }

    /// Decode the inode at `inode_ref`
    pub fn inode(&self, inode_ref: repr::inode::Ref) -> Result<Inode> {
        self.inner.inode(inode_ref)
    }

    /// Decode the entries of a directory
    pub fn read_dir(&self, dir: &inode::Directory) -> Result<Vec<Entry>> {
        self.inner.read_dir(dir)
    }

    pub fn file_reader(&self, file: &inode::File) -> Result<FileReader<R>> {
        FileReader::new(self.clone(), file)
    }

    /// Copy the contents of `file` to `w`, decoding blocks in parallel
    pub fn write_file<W: Write + ?Sized>(&self, file: &inode::File, w: &mut W) -> Result<u64> {
        self.file_reader(file)?.write_to(w)
    }

    /// The root directory of the archive
    pub fn root(&self) -> Dir<R> {
        let root = &*self.root;
        let entry = Entry {
            name: Default::default(),
            file_type: inode::FileType::Directory,
            inode_ref: self.inner.superblock.root_inode_ref(),
            inode_number: root.inode.header.inode_number,
        };
        Dir::new(
            self.clone(),
            entry,
            root.inode.clone(),
            Arc::clone(&root.entries),
            None,
        )
    }

    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }

    pub(crate) fn reader(&self) -> &R {
        &self.inner.reader
    }

    pub(crate) fn codec(&self) -> &LocalCodec {
        &self.inner.codec
    }

    pub(crate) fn shared_codec(&self) -> &Arc<LocalCodec> {
        &self.inner.codec
    }

    pub(crate) fn fragments(&self) -> &[fragment::Entry] {
        &self.inner.fragments
    }

    pub(crate) fn options(&self) -> &Options {
        &self.inner.options
    }
}

impl<R: ReadAt> ArchiveInner<R> {
    fn inode(&self, inode_ref: repr::inode::Ref) -> Result<Inode> {
        let start = self.superblock.inode_table_start.get() + inode_ref.block_start();
        let reader = MetablockReader::with_end(
            &self.reader,
            Some(&*self.codec),
            start,
            usize::from(inode_ref.start_offset()),
            self.superblock.directory_table_start.get(),
        )?;
        inode::read_inode(reader, self.superblock.block_size.get())
    }

    fn read_dir(&self, dir: &inode::Directory) -> Result<Vec<Entry>> {
        let table_start = self.superblock.directory_table_start.get();
        let reader = MetablockReader::with_end(
            &self.reader,
            Some(&*self.codec),
            table_start + u64::from(dir.block_start),
            usize::from(dir.block_offset),
            self.directory_end,
        )?;
        dir::read_entries(
            reader,
            dir.file_size.into(),
            self.options.directory_end,
            &self.logger,
        )
    }
}

impl<R> Clone for Archive<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            root: Arc::clone(&self.root),
        }
    }
}

impl<R> fmt::Debug for Archive<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("superblock", &self.inner.superblock)
            .field("compression", &self.inner.codec.kind())
            .finish_non_exhaustive()
    }
}

/// The start of the first table stored after the directory table
///
/// Two level tables store their metadata blocks before the index the superblock points at, so
/// their first block is used when known.
fn directory_table_end(sb: &Superblock, table_blocks: &[Option<u64>]) -> u64 {
    let start = sb.directory_table_start.get();
    [
        sb.fragment_table_start.get(),
        sb.export_table_start.get(),
        sb.id_table_start.get(),
        sb.xattr_id_table_start.get(),
        sb.bytes_used.get(),
    ]
    .iter()
    .copied()
    .chain(table_blocks.iter().flatten().copied())
    .filter(|&table| table > start)
    .min()
    .unwrap_or(u64::MAX)
}

fn validate_superblock(superblock: &Superblock) -> Result<compression::Kind> {
    let magic = superblock.magic.get();
    if magic != repr::superblock::MAGIC {
        return Err(Error::BadMagic { magic });
    }
    let (major, minor) = (
        superblock.version_major.get(),
        superblock.version_minor.get(),
    );
    if major != repr::superblock::VERSION_MAJOR || minor != repr::superblock::VERSION_MINOR {
        return Err(Error::BadVersion { major, minor });
    }

    let block_log = superblock.block_log.get();
    let block_size = superblock.block_size.get();
    if !(repr::BLOCK_LOG_MIN..=repr::BLOCK_LOG_MAX).contains(&block_log)
        || block_size != 1 << block_log
    {
        return Err(Error::CorruptBlockSizes {
            block_log,
            block_size,
        });
    }

    let kind = compression::Kind::from_id(superblock.compression_id());
    if kind == compression::Kind::Unknown {
        return Err(Error::UnknownCompression {
            id: superblock.compression_id.get(),
        });
    }
    if !kind.supported() {
        return Err(Error::DisabledCompression { kind });
    }
    Ok(kind)
}

fn log_superblock(logger: &Logger, superblock: &Superblock) {
    slog::debug!(logger, "Read superblock";
        "magic" => superblock.magic.get(),
        "inode_count" => superblock.inode_count.get(),
        "modification_time" => superblock.modification_time.get(),
        "block_size" => superblock.block_size.get(),
        "fragment_entry_count" => superblock.fragment_entry_count.get(),
        "compression_id" => superblock.compression_id.get(),
        "block_log" => superblock.block_log.get(),
        "flags" => superblock.flags.get(),
        "id_count" => superblock.id_count.get(),
        "version_major" => superblock.version_major.get(),
        "version_minor" => superblock.version_minor.get(),
        "root_inode_ref" => superblock.root_inode_ref.get(),
        "bytes_used" => superblock.bytes_used.get(),
        "id_table_start" => superblock.id_table_start.get(),
        "xattr_id_table_start" => superblock.xattr_id_table_start.get(),
        "inode_table_start" => superblock.inode_table_start.get(),
        "directory_table_start" => superblock.directory_table_start.get(),
        "fragment_table_start" => superblock.fragment_table_start.get(),
        "export_table_start" => superblock.export_table_start.get()
    )
}
