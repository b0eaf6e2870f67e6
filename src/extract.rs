//! Writing archive contents to disk
//!
//! Extraction is spread over a pool of worker threads. The calling thread hands out jobs and
//! collects their results: a directory job creates the directory and answers with one job per
//! entry, other jobs answer with nothing (or with a job extracting a symlink target). The mode
//! and owner of a directory are applied once every job below it is done, so directories stored
//! read-only can still be filled.

use bstr::BString;
use positioned_io::ReadAt;
use repr::Mode;
use slog::Logger;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{self as unix_fs, DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::archive::Archive;
use crate::config::{self, ExtractOptions};
use crate::dir::Entry;
use crate::errors::{Error, Result};
use crate::fs::{Dir, Node, MAX_SYMLINKS};
use crate::inode::FileType;
use crate::thread::Joiner;

/// Problems which did not stop an extraction
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Modes or owners which could not be applied
    pub metadata_errors: Vec<Error>,
    /// Failures skipped because of [`ExtractOptions::allow_errors`]
    pub errors: Vec<Error>,
}

impl ExtractReport {
    pub fn is_clean(&self) -> bool {
        self.metadata_errors.is_empty() && self.errors.is_empty()
    }
}

/// The path component for a directory entry
///
/// Names which would leave the directory they are listed in are rejected.
pub(crate) fn entry_path(name: &[u8]) -> Result<&Path> {
    if name.is_empty() || name == b"." || name == b".." || name.contains(&b'/') {
        return Err(Error::invalid(format!(
            "directory entry named {:?}",
            BString::from(name)
        )));
    }
    Ok(Path::new(OsStr::from_bytes(name)))
}

/// Extract `node` to `target`, which is `root` or somewhere inside it
pub(crate) fn extract<R: ReadAt + Send + Sync + 'static>(
    node: Node<R>,
    target: PathBuf,
    root: &Path,
    options: &ExtractOptions,
) -> Result<ExtractReport> {
    if target != root {
        fs::create_dir_all(root).map_err(|e| Error::extract(root, e))?;
    }
    let archive = node.archive().clone();
    let logger = archive
        .logger()
        .new(slog::o!("dest" => root.display().to_string()));
    let context = Arc::new(Context {
        archive,
        root: root.to_owned(),
        normalized_root: normalize(root).unwrap_or_else(|| root.to_owned()),
        options: options.clone(),
        logger,
    });

    let threads = config::thread_count(options.threads);
    slog::debug!(context.logger, "Starting extraction"; "threads" => threads);
    let (job_tx, job_rx) = flume::unbounded::<Job<R>>();
    let (done_tx, done_rx) = flume::unbounded::<Done<R>>();
    let workers = Joiner::new("unsquash-extract", threads, || {
        worker(Arc::clone(&context), job_rx.clone(), done_tx.clone())
    })?;
    drop(done_tx);

    // Workers only stop once `job_tx` is dropped
    let _ = job_tx.send(Job {
        item: Item::Node(node),
        target,
        parent: None,
        links: 0,
    });
    let mut outstanding = 1_usize;
    let mut report = ExtractReport::default();
    let mut first_error = None;
    while outstanding > 0 {
        let done = match done_rx.recv() {
            Ok(done) => done,
            Err(_) => {
                first_error
                    .get_or_insert_with(|| Error::invalid("extraction threads exited early"));
                break;
            }
        };
        outstanding -= 1;
        report.metadata_errors.extend(done.metadata_errors);
        match done.result {
            Ok(jobs) => {
                // After a failure, only wait for jobs already started
                if first_error.is_some() {
                    continue;
                }
                for job in jobs {
                    outstanding += 1;
                    let _ = job_tx.send(job);
                }
            }
            Err(e) if options.allow_errors => {
                slog::warn!(context.logger, "Unable to extract, skipping";
                    "path" => %done.target.display(),
                    "error" => %e
                );
                report.errors.push(e);
            }
            Err(e) => {
                slog::debug!(context.logger, "Unable to extract, stopping";
                    "path" => %done.target.display(),
                    "error" => %e
                );
                first_error.get_or_insert(e);
            }
        }
    }
    drop(job_tx);
    workers.finish();

    match first_error {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

struct Context<R> {
    archive: Archive<R>,
    root: PathBuf,
    normalized_root: PathBuf,
    options: ExtractOptions,
    logger: Logger,
}

enum Item<R> {
    Node(Node<R>),
    /// An entry of a directory, its inode not read yet
    Entry { dir: Arc<Dir<R>>, entry: Entry },
}

struct Job<R> {
    item: Item<R>,
    target: PathBuf,
    /// The directory job waiting for this one
    parent: Option<Arc<PendingDir>>,
    /// Symlinks dereferenced on the way to this job
    links: u32,
}

struct Done<R> {
    target: PathBuf,
    result: Result<Vec<Job<R>>>,
    metadata_errors: Vec<Error>,
}

/// A created directory, waiting for its entries before its mode and owner are applied
struct PendingDir {
    path: PathBuf,
    owner: Owner,
    remaining: AtomicUsize,
    parent: Option<Arc<PendingDir>>,
}

#[derive(Debug, Copy, Clone)]
struct Owner {
    mode: u32,
    uid: Option<u32>,
    gid: Option<u32>,
}

impl Owner {
    /// Apply the owner, then the mode, since changing owners may clear setuid bits
    fn apply(self, path: &Path, symlink: bool, errors: &mut Vec<Error>) {
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            let current = fs::symlink_metadata(path);
            let unchanged = current.map_or(false, |m| m.uid() == uid && m.gid() == gid);
            if !unchanged {
                let res = if symlink {
                    unix_fs::lchown(path, Some(uid), Some(gid))
                } else {
                    unix_fs::chown(path, Some(uid), Some(gid))
                };
                if let Err(e) = res {
                    errors.push(Error::extract(path, e));
                }
            }
        }
        // Symlink modes cannot be changed on linux
        if !symlink {
            if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(self.mode)) {
                errors.push(Error::extract(path, e));
            }
        }
    }
}

fn finish(pending: &Arc<PendingDir>, errors: &mut Vec<Error>) {
    if pending.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        complete(pending, errors);
    }
}

fn complete(pending: &PendingDir, errors: &mut Vec<Error>) {
    pending.owner.apply(&pending.path, false, errors);
    if let Some(parent) = &pending.parent {
        finish(parent, errors);
    }
}

fn worker<R: ReadAt + Send + Sync + 'static>(
    context: Arc<Context<R>>,
    jobs: flume::Receiver<Job<R>>,
    done: flume::Sender<Done<R>>,
) -> impl FnOnce() {
    move || {
        for job in jobs {
            let target = job.target.clone();
            let mut metadata_errors = Vec::new();
            let result = context.run(job, &mut metadata_errors);
            let done_msg = Done {
                target,
                result,
                metadata_errors,
            };
            if done.send(done_msg).is_err() {
                break;
            }
        }
    }
}

impl<R: ReadAt> Context<R> {
    fn run(&self, job: Job<R>, errors: &mut Vec<Error>) -> Result<Vec<Job<R>>> {
        let Job {
            item,
            target,
            mut parent,
            links,
        } = job;
        let node = match item {
            Item::Node(node) => Ok(node),
            Item::Entry { dir, entry } => dir.child(entry),
        };
        let result =
            node.and_then(|node| self.extract_node(node, &target, &mut parent, links, errors));
        // Directories which were created take over their parent
        if let Some(parent) = parent {
            finish(&parent, errors);
        }
        result
    }

    fn extract_node(
        &self,
        node: Node<R>,
        target: &Path,
        parent: &mut Option<Arc<PendingDir>>,
        links: u32,
        errors: &mut Vec<Error>,
    ) -> Result<Vec<Job<R>>> {
        match node.file_type() {
            FileType::Directory => self.extract_dir(node, target, parent, links, errors),
            FileType::File => {
                self.extract_file(&node, target, errors)?;
                Ok(Vec::new())
            }
            FileType::Symlink => self.extract_symlink(node, target, parent, links, errors),
            other => {
                slog::debug!(self.logger, "Skipping special file";
                    "path" => %target.display(),
                    "file_type" => ?other
                );
                Ok(Vec::new())
            }
        }
    }

    fn extract_dir(
        &self,
        node: Node<R>,
        target: &Path,
        parent: &mut Option<Arc<PendingDir>>,
        links: u32,
        errors: &mut Vec<Error>,
    ) -> Result<Vec<Job<R>>> {
        let dir = Arc::new(node.as_dir()?);
        let targets = dir
            .entries()
            .iter()
            .map(|entry| Ok(target.join(entry_path(&entry.name)?)))
            .collect::<Result<Vec<_>>>()?;
        self.create_dir(target)?;
        self.log_created(target);

        let pending = Arc::new(PendingDir {
            path: target.to_owned(),
            owner: self.owner(&node, errors),
            remaining: AtomicUsize::new(targets.len()),
            parent: parent.take(),
        });
        if targets.is_empty() {
            complete(&pending, errors);
            return Ok(Vec::new());
        }
        let jobs = dir
            .entries()
            .iter()
            .zip(targets)
            .map(|(entry, target)| Job {
                item: Item::Entry {
                    dir: Arc::clone(&dir),
                    entry: entry.clone(),
                },
                target,
                parent: Some(Arc::clone(&pending)),
                links,
            })
            .collect();
        Ok(jobs)
    }

    fn create_dir(&self, target: &Path) -> Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.mode(self.options.folder_permissions);
        if target == self.root {
            match fs::read_dir(target) {
                Ok(mut listing) => {
                    if listing.next().is_none() {
                        return Ok(());
                    }
                    let e = io::Error::new(io::ErrorKind::AlreadyExists, "directory is not empty");
                    return Err(Error::extract(target, e));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    builder.recursive(true);
                }
                Err(e) => return Err(Error::extract(target, e)),
            }
        }
        match builder.create(target) {
            Ok(()) => Ok(()),
            // Left behind by a symlink target extracted early
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                match fs::symlink_metadata(target) {
                    Ok(m) if m.is_dir() => Ok(()),
                    _ => Err(Error::extract(target, e)),
                }
            }
            Err(e) => Err(Error::extract(target, e)),
        }
    }

    fn extract_file(&self, node: &Node<R>, target: &Path, errors: &mut Vec<Error>) -> Result<()> {
        let mut reader = node.open()?;
        remove_existing(target)?;
        let mut file = fs::File::create(target).map_err(|e| Error::extract(target, e))?;
        reader.write_to(&mut file).map_err(|e| match e {
            Error::Io(e) => Error::extract(target, e),
            e => e,
        })?;
        self.log_created(target);
        self.owner(node, errors).apply(target, false, errors);
        Ok(())
    }

    fn extract_symlink(
        &self,
        node: Node<R>,
        target: &Path,
        parent: &mut Option<Arc<PendingDir>>,
        links: u32,
        errors: &mut Vec<Error>,
    ) -> Result<Vec<Job<R>>> {
        if self.options.dereference {
            match node.resolve_symlink() {
                Ok(resolved) => {
                    if links >= MAX_SYMLINKS {
                        return Err(Error::SymlinkLoop {
                            path: BString::from(target.as_os_str().as_bytes()),
                        });
                    }
                    return self.extract_node(resolved, target, parent, links + 1, errors);
                }
                Err(e) => {
                    slog::debug!(self.logger, "Unable to dereference symlink, keeping the link";
                        "path" => %target.display(),
                        "error" => %e
                    );
                }
            }
        }

        let link_target = match node.symlink_target() {
            Some(t) => t.to_vec(),
            None => return Err(Error::invalid("symlink without a target")),
        };
        remove_existing(target)?;
        unix_fs::symlink(OsStr::from_bytes(&link_target), target)
            .map_err(|e| Error::extract(target, e))?;
        self.log_created(target);
        self.owner(&node, errors).apply(target, true, errors);

        if self.options.unbreak && !self.options.dereference {
            return Ok(self.unbreak(&node, target, &link_target, links).into_iter().collect());
        }
        Ok(Vec::new())
    }

    /// A job extracting the target of a symlink where the link points, when nothing is there
    fn unbreak(&self, node: &Node<R>, link: &Path, link_target: &[u8], links: u32) -> Option<Job<R>> {
        let link_target = Path::new(OsStr::from_bytes(link_target));
        let path = match link_target.strip_prefix("/") {
            Ok(relative) => self.root.join(relative),
            Err(_) => link.parent()?.join(link_target),
        };
        let path = match normalize(&path) {
            Some(path) if path.starts_with(&self.normalized_root) && path != self.normalized_root => {
                path
            }
            _ => {
                slog::debug!(self.logger, "Symlink points outside the extraction";
                    "path" => %link.display()
                );
                return None;
            }
        };
        match fs::symlink_metadata(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            _ => return None,
        }
        let resolved = match node.resolve_symlink() {
            Ok(resolved) if links < MAX_SYMLINKS => resolved,
            Ok(_) => return None,
            Err(e) => {
                slog::debug!(self.logger, "Symlink target is not in the archive";
                    "path" => %link.display(),
                    "error" => %e
                );
                return None;
            }
        };
        if let Some(dir) = path.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                slog::debug!(self.logger, "Unable to create directory for symlink target";
                    "path" => %dir.display(),
                    "error" => %e
                );
                return None;
            }
        }
        Some(Job {
            item: Item::Node(resolved),
            target: path,
            parent: None,
            links: links + 1,
        })
    }

    fn owner(&self, node: &Node<R>, errors: &mut Vec<Error>) -> Owner {
        let header = &node.inode().header;
        let mut id = |idx| match self.archive.id(idx) {
            Ok(id) => Some(id),
            Err(e) => {
                errors.push(e);
                None
            }
        };
        let uid = id(header.uid_idx);
        let gid = id(header.gid_idx);
        Owner {
            mode: u32::from((node.inode().mode() & Mode::PERM_MASK).bits()),
            uid,
            gid,
        }
    }

    fn log_created(&self, path: &Path) {
        if self.options.verbose {
            slog::info!(self.logger, "Extracted"; "path" => %path.display());
        } else {
            slog::debug!(self.logger, "Extracted"; "path" => %path.display());
        }
    }
}

fn remove_existing(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(m) if !m.is_dir() => fs::remove_file(path).map_err(|e| Error::extract(path, e)),
        _ => Ok(()),
    }
}

/// Resolve `.` and `..` without touching the filesystem, `None` when `..` goes above the start
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_paths() {
        assert_eq!(entry_path(b"file.txt").unwrap(), Path::new("file.txt"));
        for bad in &[&b""[..], b".", b"..", b"a/b", b"/"] {
            let err = entry_path(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidMetadata(_)), "{:?}", err);
        }
    }

    #[test]
    fn normalizes_paths() {
        assert_eq!(normalize(Path::new("out/a/../b/./c")), Some(PathBuf::from("out/b/c")));
        assert_eq!(normalize(Path::new("/x/../y")), Some(PathBuf::from("/y")));
        assert_eq!(normalize(Path::new("out/../..")), None);
        assert_eq!(normalize(Path::new("/..")), None);
    }

    #[test]
    fn pending_dirs_complete_bottom_up() {
        let tmp = tempfile::tempdir().unwrap();
        let outer = tmp.path().join("outer");
        let inner = outer.join("inner");
        fs::create_dir_all(&inner).unwrap();
        let owner = |mode| Owner {
            mode,
            uid: None,
            gid: None,
        };

        let outer_pending = Arc::new(PendingDir {
            path: outer.clone(),
            owner: owner(0o700),
            remaining: AtomicUsize::new(2),
            parent: None,
        });
        let inner_pending = Arc::new(PendingDir {
            path: inner.clone(),
            owner: owner(0o750),
            remaining: AtomicUsize::new(1),
            parent: Some(Arc::clone(&outer_pending)),
        });
        let mut errors = Vec::new();
        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o7777;

        finish(&outer_pending, &mut errors);
        assert_eq!(outer_pending.remaining.load(Ordering::SeqCst), 1);
        finish(&inner_pending, &mut errors);
        assert_eq!(mode(&inner), 0o750);
        assert_eq!(mode(&outer), 0o700);
        assert!(errors.is_empty(), "{:?}", errors);
    }
}
