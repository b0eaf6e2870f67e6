//! Path based navigation of an archive

use bstr::{BStr, BString, ByteSlice};
use chrono::{DateTime, TimeZone, Utc};
use positioned_io::ReadAt;
use repr::inode::DeviceNumber;
use repr::Mode;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use crate::archive::Archive;
use crate::config::ExtractOptions;
use crate::dir::Entry;
use crate::errors::{Error, Result};
use crate::extract::{self, ExtractReport};
use crate::file::FileReader;
use crate::inode::{FileType, Inode};
use crate::pattern::Pattern;

/// Symlinks followed while resolving a single link
pub(crate) const MAX_SYMLINKS: u32 = 40;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Matching {
    /// Segments are wildcard patterns
    Pattern,
    /// Segments are names, as in symlink targets
    Exact,
}

/// A directory with its listing loaded
///
/// Directories remember the directory they were reached from, which is what `..` resolves to.
pub struct Dir<R> {
    archive: Archive<R>,
    entry: Entry,
    inode: Inode,
    entries: Arc<[Entry]>,
    parent: Option<Arc<Dir<R>>>,
}

/// Any object in the archive, reached through a directory entry
pub struct Node<R> {
    archive: Archive<R>,
    entry: Entry,
    inode: Inode,
    parent: Option<Arc<Dir<R>>>,
}

impl<R: ReadAt> Dir<R> {
    pub(crate) fn new(
        archive: Archive<R>,
        entry: Entry,
        inode: Inode,
        entries: Arc<[Entry]>,
        parent: Option<Arc<Dir<R>>>,
    ) -> Self {
        Self {
            archive,
            entry,
            inode,
            entries,
            parent,
        }
    }

    /// Name of the directory, empty for the root
    pub fn name(&self) -> &BStr {
        self.entry.name.as_bstr()
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// The listing, in on-disk order
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn parent(&self) -> Option<&Dir<R>> {
        self.parent.as_deref()
    }

    pub fn archive(&self) -> &Archive<R> {
        &self.archive
    }

    /// This directory as a plain node
    pub fn node(&self) -> Node<R> {
        Node {
            archive: self.archive.clone(),
            entry: self.entry.clone(),
            inode: self.inode.clone(),
            parent: self.parent.clone(),
        }
    }

    /// Find the object at `path`, relative to this directory
    ///
    /// Segments are separated by `/`. Empty and `.` segments are skipped, `..` goes to the parent
    /// directory. Any other segment is a wildcard pattern: the first entry it matches is used.
    pub fn lookup<P: AsRef<[u8]>>(&self, path: P) -> Result<Node<R>> {
        self.walk(path.as_ref(), Matching::Pattern)
    }

    pub fn stat<P: AsRef<[u8]>>(&self, path: P) -> Result<Metadata> {
        self.lookup(path)?.metadata()
    }

    /// The listing of the directory at `path`
    pub fn read_dir<P: AsRef<[u8]>>(&self, path: P) -> Result<Vec<Entry>> {
        Ok(self.sub(path)?.entries().to_vec())
    }

    /// The directory at `path`
    pub fn sub<P: AsRef<[u8]>>(&self, path: P) -> Result<Dir<R>> {
        self.lookup(path)?.as_dir()
    }

    pub fn open<P: AsRef<[u8]>>(&self, path: P) -> Result<FileReader<R>> {
        self.lookup(path)?.open()
    }

    /// The whole contents of the regular file at `path`
    pub fn read_file<P: AsRef<[u8]>>(&self, path: P) -> Result<Vec<u8>> {
        let mut reader = self.open(path)?;
        let mut data = Vec::new();
        reader.write_to(&mut data)?;
        Ok(data)
    }

    pub(crate) fn child(self: &Arc<Self>, entry: Entry) -> Result<Node<R>> {
        let inode = self.archive.inode(entry.inode_ref)?;
        if inode.file_type() != entry.file_type {
            return Err(Error::invalid(format!(
                "entry {} is listed as {:?}, but its inode is {:?}",
                entry.name,
                entry.file_type,
                inode.file_type()
            )));
        }
        Ok(Node {
            archive: self.archive.clone(),
            entry,
            inode,
            parent: Some(Arc::clone(self)),
        })
    }

    fn find(&self, segment: &[u8], matching: Matching) -> Result<Option<&Entry>> {
        let found = match matching {
            Matching::Exact => self.entries.iter().find(|e| e.name.as_slice() == segment),
            Matching::Pattern => {
                let pattern = Pattern::new(segment)?;
                match pattern.literal() {
                    Some(name) => self
                        .entries
                        .iter()
                        .find(|e| e.name.as_slice() == name.as_slice()),
                    None => self.entries.iter().find(|e| pattern.matches(&e.name)),
                }
            }
        };
        Ok(found)
    }

    fn walk(&self, path: &[u8], matching: Matching) -> Result<Node<R>> {
        let mut segments = path
            .split(|&b| b == b'/')
            .filter(|s| !s.is_empty() && *s != b".")
            .peekable();
        let mut walked = BString::from(Vec::new());
        let mut current = self.clone();
        while let Some(segment) = segments.next() {
            if !walked.is_empty() {
                walked.push(b'/');
            }
            walked.extend_from_slice(segment);

            if segment == b".." {
                current = match &current.parent {
                    Some(parent) => Dir::clone(parent),
                    None => return Err(Error::NoParent),
                };
                continue;
            }

            let entry = current
                .find(segment, matching)?
                .cloned()
                .ok_or_else(|| Error::NotFound {
                    path: walked.clone(),
                })?;
            let node = Arc::new(current).child(entry)?;
            if segments.peek().is_none() {
                return Ok(node);
            }
            if !node.is_dir() {
                return Err(Error::NotADirectory { path: walked });
            }
            current = node.as_dir()?;
        }
        Ok(current.node())
    }
}

impl<R: ReadAt + Send + Sync + 'static> Dir<R> {
    /// Extract everything in this directory into `dest`, see [`Dir::extract_with_options`]
    pub fn extract_to<P: AsRef<Path>>(&self, dest: P) -> Result<ExtractReport> {
        self.extract_with_options(dest, &ExtractOptions::default())
    }

    /// Extract everything in this directory into `dest`
    ///
    /// `dest` is created when missing. An existing directory is only used when it is empty. The
    /// stored permissions and owner of this directory are applied to `dest` once everything
    /// below it is extracted.
    pub fn extract_with_options<P: AsRef<Path>>(
        &self,
        dest: P,
        options: &ExtractOptions,
    ) -> Result<ExtractReport> {
        let dest = dest.as_ref();
        extract::extract(self.node(), dest.to_owned(), dest, options)
    }
}

impl<R: ReadAt> Node<R> {
    pub fn archive(&self) -> &Archive<R> {
        &self.archive
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn name(&self) -> &BStr {
        self.entry.name.as_bstr()
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// The directory holding this node, `None` for the root
    pub fn parent(&self) -> Option<&Dir<R>> {
        self.parent.as_deref()
    }

    pub fn file_type(&self) -> FileType {
        self.inode.file_type()
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == FileType::Symlink
    }

    pub fn symlink_target(&self) -> Option<&BStr> {
        self.inode.as_symlink().map(|link| link.target.as_bstr())
    }

    /// Follow symlinks until reaching something else
    ///
    /// Relative targets are resolved from the directory holding the link, absolute ones from the
    /// root of the archive.
    pub fn resolve_symlink(&self) -> Result<Node<R>> {
        let mut node = self.clone();
        let mut hops = 0;
        while let Some(target) = node.symlink_target().map(|t| t.to_vec()) {
            if hops == MAX_SYMLINKS {
                return Err(Error::SymlinkLoop {
                    path: self.entry.name.clone(),
                });
            }
            hops += 1;
            let base = match &node.parent {
                Some(parent) if !target.starts_with(b"/") => Dir::clone(parent),
                _ => node.archive.root(),
            };
            node = base.walk(&target, Matching::Exact)?;
        }
        Ok(node)
    }

    pub fn as_dir(&self) -> Result<Dir<R>> {
        let dir = self
            .inode
            .as_directory()
            .ok_or_else(|| Error::NotADirectory {
                path: self.entry.name.clone(),
            })?;
        let entries = self.archive.read_dir(dir)?;
        Ok(Dir::new(
            self.archive.clone(),
            self.entry.clone(),
            self.inode.clone(),
            entries.into(),
            self.parent.clone(),
        ))
    }

    /// A reader over the contents of a regular file
    pub fn open(&self) -> Result<FileReader<R>> {
        let file = self.inode.as_file().ok_or_else(|| Error::NotAFile {
            path: self.entry.name.clone(),
        })?;
        self.archive.file_reader(file)
    }

    pub fn metadata(&self) -> Result<Metadata> {
        let header = &self.inode.header;
        Ok(Metadata {
            name: self.entry.name.clone(),
            file_type: self.file_type(),
            size: self.inode.file_size().unwrap_or(0),
            mode: self.inode.mode(),
            uid: self.archive.id(header.uid_idx)?,
            gid: self.archive.id(header.gid_idx)?,
            modified: timestamp(header.modified_time),
            inode_number: header.inode_number,
            hard_link_count: self.inode.hard_link_count(),
            symlink_target: self.symlink_target().map(|t| BString::from(t.to_vec())),
            device: self.inode.device(),
        })
    }
}

impl<R: ReadAt + Send + Sync + 'static> Node<R> {
    /// Extract this node to `dest/<name>`, see [`Node::extract_with_options`]
    pub fn extract_to<P: AsRef<Path>>(&self, dest: P) -> Result<ExtractReport> {
        self.extract_with_options(dest, &ExtractOptions::default())
    }

    /// Extract this node to `dest/<name>`, creating `dest` when missing
    ///
    /// The root has no name, it is extracted to `dest` itself.
    pub fn extract_with_options<P: AsRef<Path>>(
        &self,
        dest: P,
        options: &ExtractOptions,
    ) -> Result<ExtractReport> {
        let dest = dest.as_ref();
        let target = if self.entry.name.is_empty() {
            dest.to_owned()
        } else {
            dest.join(extract::entry_path(&self.entry.name)?)
        };
        extract::extract(self.clone(), target, dest, options)
    }
}

fn timestamp(secs: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(i64::from(secs), 0)
        .single()
        .unwrap_or_else(|| UNIX_EPOCH.into())
}

/// Information about a single object, as returned by [`Node::metadata`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: BString,
    pub file_type: FileType,
    /// Size of the contents of regular files, 0 for everything else
    pub size: u64,
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
    pub modified: DateTime<Utc>,
    pub inode_number: u32,
    pub hard_link_count: u32,
    pub symlink_target: Option<BString>,
    pub device: Option<DeviceNumber>,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// A single `ls -l` style line
impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>5}/{:<5} {:>10} {} {}",
            self.mode,
            self.uid,
            self.gid,
            self.size,
            self.modified.format("%Y-%m-%d %H:%M"),
            self.name
        )?;
        match (&self.symlink_target, self.device) {
            (Some(target), _) => write!(f, " -> {}", target),
            (None, Some(dev)) => write!(f, " ({}, {})", dev.major(), dev.minor()),
            (None, None) => Ok(()),
        }
    }
}

impl<R> Clone for Dir<R> {
    fn clone(&self) -> Self {
        Self {
            archive: self.archive.clone(),
            entry: self.entry.clone(),
            inode: self.inode.clone(),
            entries: Arc::clone(&self.entries),
            parent: self.parent.clone(),
        }
    }
}

impl<R> Clone for Node<R> {
    fn clone(&self) -> Self {
        Self {
            archive: self.archive.clone(),
            entry: self.entry.clone(),
            inode: self.inode.clone(),
            parent: self.parent.clone(),
        }
    }
}

impl<R> fmt::Debug for Dir<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dir")
            .field("name", &self.entry.name)
            .field("inode_number", &self.entry.inode_number)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<R> fmt::Debug for Node<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("entry", &self.entry)
            .field("inode", &self.inode)
            .finish()
    }
}
