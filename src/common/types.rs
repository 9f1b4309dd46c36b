use std::fmt;
use std::io::{self, Write};
use std::time::SystemTime;

use crate::common::error::{FsError, FsResult, Operation};
use crate::common::path::FilesystemPath;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Directory => write!(f, "directory"),
            EntryKind::Symlink => write!(f, "symlink"),
        }
    }
}

/// Attribute bits in the Windows `FILE_ATTRIBUTE_*` encoding. POSIX backends
/// fill in the subset they can express.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct FileAttributes(pub u32);

impl FileAttributes {
    pub const READONLY: u32 = 0x0001;
    pub const HIDDEN: u32 = 0x0002;
    pub const SYSTEM: u32 = 0x0004;
    pub const DIRECTORY: u32 = 0x0010;
    pub const ARCHIVE: u32 = 0x0020;
    pub const NORMAL: u32 = 0x0080;
    pub const REPARSE_POINT: u32 = 0x0400;
    pub const COMPRESSED: u32 = 0x0800;
    pub const ENCRYPTED: u32 = 0x4000;

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub fn is_readonly(self) -> bool {
        self.contains(Self::READONLY)
    }

    pub fn is_reparse_point(self) -> bool {
        self.contains(Self::REPARSE_POINT)
    }
}

/// Metadata returned by a backend for an entry that exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryStat {
    pub kind: EntryKind,
    pub len: u64,
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub attributes: FileAttributes,
}

impl EntryStat {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Directories that are really links (junctions, symlinked dirs) must be
    /// removed as links, never descended into.
    pub fn is_link_like(&self) -> bool {
        self.kind == EntryKind::Symlink || self.attributes.is_reparse_point()
    }
}

/// Point-in-time view of an entry. Never updates itself.
#[derive(Clone, Debug)]
pub struct EntrySnapshot {
    pub stat: Option<EntryStat>,
    pub generation: u64,
    pub taken_at: SystemTime,
}

impl EntrySnapshot {
    pub fn exists(&self) -> bool {
        self.stat.is_some()
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CreateMode {
    /// Succeed when an entry of the same kind is already present.
    #[default]
    OpenOrCreate,
    /// Fail with `AlreadyExists` when anything is present at the path.
    CreateNew,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MoveOptions {
    /// Fall back to copy + delete when the rename would cross volumes.
    pub allow_copy: bool,
    pub replace_existing: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamInfo {
    pub name: String,
    pub size: u64,
}

/// Write side of a freshly created file. Dropping or closing it leaves the
/// entry in place.
pub struct EntryWriter {
    path: FilesystemPath,
    inner: Box<dyn Write + Send>,
}

impl EntryWriter {
    pub fn new(path: FilesystemPath, inner: Box<dyn Write + Send>) -> Self {
        Self { path, inner }
    }

    pub fn path(&self) -> &FilesystemPath {
        &self.path
    }

    pub fn close(mut self) -> FsResult<()> {
        self.inner.flush().map_err(|source| FsError::NativeOperation {
            operation: Operation::CreateFile,
            path: self.path.to_string(),
            source,
        })
    }
}

impl Write for EntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl fmt::Debug for EntryWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryWriter").field("path", &self.path).finish()
    }
}
