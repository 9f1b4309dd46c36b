use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use super::sys;
use crate::acl::posix::{PosixDescriptor, XATTR_ACCESS, XATTR_DEFAULT};
use crate::acl::{AccessSections, Principal};
use crate::backend::{Backend, DescriptorFamily, NativeDescriptor};
use crate::common::error::{FsError, FsResult, Operation, PathProblem};
use crate::common::path::{FilesystemPath, RootKind};
use crate::common::types::{EntryKind, EntryStat, EntryWriter, FileAttributes, StreamInfo};
use crate::resolver::RootMapping;

const STREAM_PREFIX: &str = "user.";

fn trace(msg: &str) {
    log::trace!(target: "entryfs::linux", "{msg}");
}

pub(crate) fn map_io_error(err: io::Error, operation: Operation, path: &FilesystemPath) -> FsError {
    use io::ErrorKind;
    let path = path.to_string();
    match err.raw_os_error() {
        Some(libc::ENOTEMPTY) => return FsError::DirectoryNotEmpty { path },
        Some(libc::ENOTDIR) => return FsError::NotADirectory { path },
        Some(libc::EISDIR) => return FsError::IsADirectory { path },
        Some(libc::EPERM) if operation.changes_permissions() => return FsError::Permission { path },
        Some(libc::EPERM) => return FsError::AccessDenied { path },
        _ => {}
    }
    match err.kind() {
        ErrorKind::NotFound => FsError::PathNotFound { path },
        ErrorKind::PermissionDenied if operation.changes_permissions() => FsError::Permission { path },
        ErrorKind::PermissionDenied => FsError::AccessDenied { path },
        ErrorKind::AlreadyExists => FsError::AlreadyExists { path },
        _ => FsError::NativeOperation {
            operation,
            path,
            source: err,
        },
    }
}

/// Native backend over `std::fs` and extended attributes. UNC paths are
/// translated through the root mapping; drive-letter paths are rejected.
pub struct LinuxBackend {
    mapping: RootMapping,
}

impl Default for LinuxBackend {
    fn default() -> Self {
        Self::new(RootMapping::empty())
    }
}

impl LinuxBackend {
    pub fn new(mapping: RootMapping) -> Self {
        Self { mapping }
    }

    fn local_path(&self, path: &FilesystemPath) -> FsResult<PathBuf> {
        let local = self.mapping.to_local(path)?;
        if let RootKind::Drive(_) = local.root() {
            return Err(FsError::UnsupportedConversion {
                path: path.to_string(),
                reason: "drive-letter paths have no Linux equivalent".to_string(),
            });
        }
        Ok(local.to_path_buf())
    }

    fn exists(&self, native: &Path) -> bool {
        fs::symlink_metadata(native).is_ok()
    }
}

fn stat_from_metadata(meta: &fs::Metadata, name: Option<&str>) -> EntryStat {
    let file_type = meta.file_type();
    let kind = if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    let mut attributes = 0;
    if file_type.is_dir() {
        attributes |= FileAttributes::DIRECTORY;
    }
    if file_type.is_symlink() {
        attributes |= FileAttributes::REPARSE_POINT;
    }
    if meta.permissions().readonly() {
        attributes |= FileAttributes::READONLY;
    }
    if name.is_some_and(|name| name.starts_with('.')) {
        attributes |= FileAttributes::HIDDEN;
    }
    if attributes == 0 {
        attributes = FileAttributes::NORMAL;
    }
    EntryStat {
        kind,
        len: meta.len(),
        created: meta.created().ok(),
        modified: meta.modified().ok(),
        accessed: meta.accessed().ok(),
        attributes: FileAttributes(attributes),
    }
}

impl Backend for LinuxBackend {
    fn descriptor_family(&self) -> DescriptorFamily {
        DescriptorFamily::Posix
    }

    fn query(&self, path: &FilesystemPath) -> FsResult<Option<EntryStat>> {
        let native = self.local_path(path)?;
        match fs::symlink_metadata(&native) {
            Ok(meta) => Ok(Some(stat_from_metadata(&meta, path.file_name()))),
            Err(err)
                if err.kind() == io::ErrorKind::NotFound
                    || err.raw_os_error() == Some(libc::ENOTDIR) =>
            {
                trace(&format!("query: {} does not exist", native.display()));
                Ok(None)
            }
            Err(err) => Err(map_io_error(err, Operation::Query, path)),
        }
    }

    fn create_dir(&self, path: &FilesystemPath) -> FsResult<()> {
        let native = self.local_path(path)?;
        fs::create_dir(&native).map_err(|err| map_io_error(err, Operation::CreateDirectory, path))
    }

    fn create_file(&self, path: &FilesystemPath, exclusive: bool) -> FsResult<EntryWriter> {
        let native = self.local_path(path)?;
        let mut options = OpenOptions::new();
        options.write(true);
        if exclusive {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        let file = options
            .open(&native)
            .map_err(|err| map_io_error(err, Operation::CreateFile, path))?;
        Ok(EntryWriter::new(path.clone(), Box::new(file)))
    }

    fn remove_file(&self, path: &FilesystemPath) -> FsResult<()> {
        let native = self.local_path(path)?;
        fs::remove_file(&native).map_err(|err| map_io_error(err, Operation::RemoveFile, path))
    }

    fn remove_dir(&self, path: &FilesystemPath) -> FsResult<()> {
        let native = self.local_path(path)?;
        fs::remove_dir(&native).map_err(|err| map_io_error(err, Operation::RemoveDirectory, path))
    }

    fn read_dir(&self, path: &FilesystemPath) -> FsResult<Vec<FsResult<String>>> {
        let native = self.local_path(path)?;
        let map = |err| map_io_error(err, Operation::ReadDirectory, path);
        let mut names = Vec::new();
        for entry in fs::read_dir(&native).map_err(map)? {
            let entry = entry.map_err(map)?;
            names.push(entry.file_name().into_string().map_err(|raw| {
                log::warn!("non UTF-8 entry {:?} in {}", raw, native.display());
                FsError::invalid_path(native.join(&raw).display().to_string(), PathProblem::NotUtf8)
            }));
        }
        Ok(names)
    }

    fn rename(&self, from: &FilesystemPath, to: &FilesystemPath, replace: bool) -> FsResult<()> {
        let source = self.local_path(from)?;
        let target = self.local_path(to)?;
        let result = if replace {
            fs::rename(&source, &target)
        } else {
            match sys::rename_noreplace(&source, &target) {
                // Kernel or filesystem without RENAME_NOREPLACE.
                Err(err) if matches!(err.raw_os_error(), Some(libc::EINVAL) | Some(libc::ENOSYS)) => {
                    trace(&format!("rename: no RENAME_NOREPLACE for {}", target.display()));
                    if self.exists(&target) {
                        return Err(FsError::AlreadyExists {
                            path: to.to_string(),
                        });
                    }
                    fs::rename(&source, &target)
                }
                other => other,
            }
        };
        result.map_err(|err| match err.raw_os_error() {
            Some(libc::EXDEV) => FsError::CrossVolume {
                from: from.to_string(),
                to: to.to_string(),
            },
            Some(libc::EEXIST) => FsError::AlreadyExists {
                path: to.to_string(),
            },
            _ => map_io_error(err, Operation::Rename, from),
        })
    }

    fn copy_file(&self, from: &FilesystemPath, to: &FilesystemPath, overwrite: bool) -> FsResult<u64> {
        let source = self.local_path(from)?;
        let target = self.local_path(to)?;
        if overwrite {
            return fs::copy(&source, &target).map_err(|err| map_io_error(err, Operation::Copy, from));
        }

        let mut reader = File::open(&source).map_err(|err| map_io_error(err, Operation::Copy, from))?;
        let permissions = reader
            .metadata()
            .map_err(|err| map_io_error(err, Operation::Copy, from))?
            .permissions();
        let mut writer = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|err| map_io_error(err, Operation::Copy, to))?;
        let copied = match io::copy(&mut reader, &mut writer) {
            Ok(copied) => copied,
            Err(err) => {
                drop(writer);
                if let Err(cleanup) = fs::remove_file(&target) {
                    log::warn!("could not remove partial copy {}: {cleanup}", target.display());
                }
                return Err(map_io_error(err, Operation::Copy, from));
            }
        };
        writer
            .set_permissions(permissions)
            .map_err(|err| map_io_error(err, Operation::Copy, to))?;
        Ok(copied)
    }

    fn read_file(&self, path: &FilesystemPath) -> FsResult<Vec<u8>> {
        let native = self.local_path(path)?;
        fs::read(&native).map_err(|err| map_io_error(err, Operation::Read, path))
    }

    fn read_security(&self, path: &FilesystemPath, sections: AccessSections) -> FsResult<NativeDescriptor> {
        let native = self.local_path(path)?;
        let map = |err| map_io_error(err, Operation::ReadSecurity, path);
        let meta = fs::metadata(&native).map_err(map)?;
        let mut descriptor = PosixDescriptor {
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
            is_dir: meta.is_dir(),
            access_acl: None,
            default_acl: None,
        };
        if sections.contains(AccessSections::ACCESS) {
            descriptor.access_acl = sys::get_xattr(&native, XATTR_ACCESS).map_err(map)?;
            if descriptor.is_dir {
                descriptor.default_acl = sys::get_xattr(&native, XATTR_DEFAULT).map_err(map)?;
            }
        }
        Ok(NativeDescriptor::Posix(descriptor))
    }

    fn write_security(
        &self,
        path: &FilesystemPath,
        descriptor: &NativeDescriptor,
        sections: AccessSections,
    ) -> FsResult<()> {
        let NativeDescriptor::Posix(descriptor) = descriptor else {
            return Err(FsError::invalid_descriptor(
                "Windows descriptors cannot be applied on Linux",
            ));
        };
        let native = self.local_path(path)?;
        let map = |err| map_io_error(err, Operation::WriteSecurity, path);
        let meta = fs::metadata(&native).map_err(map)?;

        let uid = sections.contains(AccessSections::OWNER).then_some(descriptor.uid);
        let gid = sections.contains(AccessSections::GROUP).then_some(descriptor.gid);
        if uid.is_some_and(|uid| uid != meta.uid()) || gid.is_some_and(|gid| gid != meta.gid()) {
            std::os::unix::fs::chown(&native, uid, gid).map_err(map)?;
        }

        if sections.contains(AccessSections::ACCESS) {
            match &descriptor.access_acl {
                Some(acl) => sys::set_xattr(&native, XATTR_ACCESS, acl).map_err(map)?,
                None => {
                    sys::remove_xattr(&native, XATTR_ACCESS).map_err(map)?;
                    let permissions = fs::Permissions::from_mode(descriptor.mode & 0o7777);
                    fs::set_permissions(&native, permissions).map_err(map)?;
                }
            }
            if meta.is_dir() {
                match &descriptor.default_acl {
                    Some(acl) => sys::set_xattr(&native, XATTR_DEFAULT, acl).map_err(map)?,
                    None => {
                        sys::remove_xattr(&native, XATTR_DEFAULT).map_err(map)?;
                    }
                }
            }
        }
        trace(&format!("wrote security of {}", native.display()));
        Ok(())
    }

    fn account_name(&self, principal: &Principal) -> Option<String> {
        match principal {
            Principal::User(uid) => sys::user_name(*uid),
            Principal::Group(gid) => sys::group_name(*gid),
            Principal::Sid(sid) => sid.well_known_name().map(str::to_string),
            _ => None,
        }
    }

    fn list_streams(&self, path: &FilesystemPath) -> FsResult<Vec<StreamInfo>> {
        let native = self.local_path(path)?;
        let map = |err| map_io_error(err, Operation::Streams, path);
        let mut streams = Vec::new();
        for attr in sys::list_xattrs(&native).map_err(map)? {
            let Some(name) = attr.strip_prefix(STREAM_PREFIX) else {
                continue;
            };
            let size = sys::get_xattr(&native, &attr)
                .map_err(map)?
                .map_or(0, |data| data.len() as u64);
            streams.push(StreamInfo {
                name: name.to_string(),
                size,
            });
        }
        streams.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(streams)
    }

    fn read_stream(&self, path: &FilesystemPath, name: &str) -> FsResult<Vec<u8>> {
        let native = self.local_path(path)?;
        sys::get_xattr(&native, &format!("{STREAM_PREFIX}{name}"))
            .map_err(|err| map_io_error(err, Operation::Streams, path))?
            .ok_or_else(|| FsError::PathNotFound {
                path: format!("{path}:{name}"),
            })
    }

    fn write_stream(&self, path: &FilesystemPath, name: &str, data: &[u8]) -> FsResult<()> {
        let native = self.local_path(path)?;
        sys::set_xattr(&native, &format!("{STREAM_PREFIX}{name}"), data)
            .map_err(|err| map_io_error(err, Operation::Streams, path))
    }

    fn remove_stream(&self, path: &FilesystemPath, name: &str) -> FsResult<()> {
        let native = self.local_path(path)?;
        let removed = sys::remove_xattr(&native, &format!("{STREAM_PREFIX}{name}"))
            .map_err(|err| map_io_error(err, Operation::Streams, path))?;
        if !removed {
            return Err(FsError::PathNotFound {
                path: format!("{path}:{name}"),
            });
        }
        Ok(())
    }
}
