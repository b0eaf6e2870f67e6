use slog::Logger;

/// What to do when a directory listing ends before its declared size
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DirectoryEnd {
    /// Keep the entries decoded so far
    ///
    /// Some writers declare listing sizes slightly larger than what they store, so the
    /// listing simply stops at the end of the metadata.
    Lenient,
    /// Report the truncated listing as invalid metadata
    Strict,
}

impl Default for DirectoryEnd {
    fn default() -> Self {
        DirectoryEnd::Lenient
    }
}

/// Settings used while opening and reading an archive
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Logger for the archive, log records are forwarded to the `log` crate when unset
    pub logger: Option<Logger>,
    pub directory_end: DirectoryEnd,
    /// Threads decompressing file data in bulk copies, 0 uses one per cpu
    pub threads: usize,
}

/// Settings for extracting a tree to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Extract the target of a symlink under the name of the link
    pub dereference: bool,
    /// Also extract the target of a symlink when the path it points to is missing
    pub unbreak: bool,
    /// Log every extracted path at info level
    pub verbose: bool,
    /// Log and record failures instead of stopping at the first one
    pub allow_errors: bool,
    /// Mode of directories created while extracting, before their stored mode is applied
    pub folder_permissions: u32,
    /// Worker threads, 0 uses one per cpu
    pub threads: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            dereference: false,
            unbreak: false,
            verbose: false,
            allow_errors: false,
            folder_permissions: 0o777,
            threads: 0,
        }
    }
}

pub(crate) fn thread_count(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().max(1)
    } else {
        requested
    }
}
