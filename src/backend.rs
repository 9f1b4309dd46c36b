use crate::acl::posix::PosixDescriptor;
use crate::acl::{AccessSections, Principal};
use crate::common::error::FsResult;
use crate::common::path::FilesystemPath;
use crate::common::types::{EntryStat, EntryWriter, StreamInfo};

/// Binary layout a backend stores security descriptors in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFamily {
    Windows,
    Posix,
}

/// A security descriptor in its platform-native form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeDescriptor {
    /// Self-relative `SECURITY_DESCRIPTOR` bytes.
    Windows(Vec<u8>),
    Posix(PosixDescriptor),
}

impl NativeDescriptor {
    pub fn family(&self) -> DescriptorFamily {
        match self {
            NativeDescriptor::Windows(_) => DescriptorFamily::Windows,
            NativeDescriptor::Posix(_) => DescriptorFamily::Posix,
        }
    }
}

/// Native filesystem calls, one per primitive. Each call either succeeds or
/// returns a typed error; no error state outlives the call.
///
/// Implementations that cannot open UNC paths directly translate them to
/// local paths through their own [`crate::RootMapping`].
pub trait Backend: Send + Sync {
    fn descriptor_family(&self) -> DescriptorFamily;

    /// Metadata without following a final symlink. `Ok(None)` when nothing
    /// exists at `path`.
    fn query(&self, path: &FilesystemPath) -> FsResult<Option<EntryStat>>;

    /// Creates one directory. The parent must exist; any existing entry at
    /// `path` is `AlreadyExists`.
    fn create_dir(&self, path: &FilesystemPath) -> FsResult<()>;

    /// Creates or truncates a file. With `exclusive`, an existing entry is
    /// `AlreadyExists`.
    fn create_file(&self, path: &FilesystemPath, exclusive: bool) -> FsResult<EntryWriter>;

    fn remove_file(&self, path: &FilesystemPath) -> FsResult<()>;

    /// Removes an empty directory, or a directory link without touching its
    /// target.
    fn remove_dir(&self, path: &FilesystemPath) -> FsResult<()>;

    /// Child names, excluding `.` and `..`. A name the platform cannot
    /// express as UTF-8 is listed as an `InvalidPath` error so callers can
    /// report it instead of silently passing over it.
    fn read_dir(&self, path: &FilesystemPath) -> FsResult<Vec<FsResult<String>>>;

    /// Atomic rename. Fails with `CrossVolume` when source and destination
    /// live on different volumes.
    fn rename(&self, from: &FilesystemPath, to: &FilesystemPath, replace: bool) -> FsResult<()>;

    fn copy_file(&self, from: &FilesystemPath, to: &FilesystemPath, overwrite: bool) -> FsResult<u64>;

    fn read_file(&self, path: &FilesystemPath) -> FsResult<Vec<u8>>;

    fn read_security(&self, path: &FilesystemPath, sections: AccessSections) -> FsResult<NativeDescriptor>;

    fn write_security(
        &self,
        path: &FilesystemPath,
        descriptor: &NativeDescriptor,
        sections: AccessSections,
    ) -> FsResult<()>;

    /// Account name for a principal, if the platform can resolve it.
    fn account_name(&self, principal: &Principal) -> Option<String>;

    fn list_streams(&self, path: &FilesystemPath) -> FsResult<Vec<StreamInfo>>;

    fn read_stream(&self, path: &FilesystemPath, name: &str) -> FsResult<Vec<u8>>;

    fn write_stream(&self, path: &FilesystemPath, name: &str, data: &[u8]) -> FsResult<()>;

    fn remove_stream(&self, path: &FilesystemPath, name: &str) -> FsResult<()>;
}
