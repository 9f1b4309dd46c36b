use std::fs::{self, OpenOptions};

use windows_sys::Win32::Foundation::{ERROR_NOT_SAME_DEVICE, ERROR_FILE_NOT_FOUND, ERROR_PATH_NOT_FOUND};
use windows_sys::Win32::Security::{
    DACL_SECURITY_INFORMATION, GROUP_SECURITY_INFORMATION, OWNER_SECURITY_INFORMATION,
    PROTECTED_DACL_SECURITY_INFORMATION, SACL_SECURITY_INFORMATION,
    UNPROTECTED_DACL_SECURITY_INFORMATION,
};
use windows_sys::Win32::Storage::FileSystem::{
    FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_REPARSE_POINT, MOVEFILE_REPLACE_EXISTING,
};

use super::win32::{self, map_win32_error};
use crate::acl::ntsd::{self, SE_DACL_PROTECTED};
use crate::acl::{AccessSections, Principal};
use crate::backend::{Backend, DescriptorFamily, NativeDescriptor};
use crate::common::error::{FsError, FsResult, Operation, PathProblem};
use crate::common::path::{FilesystemPath, RootKind};
use crate::common::types::{EntryKind, EntryStat, EntryWriter, FileAttributes, StreamInfo};
use crate::resolver::RootMapping;

fn trace(msg: &str) {
    log::trace!(target: "entryfs::windows", "{msg}");
}

fn security_information(sections: AccessSections) -> u32 {
    let mut information = 0;
    if sections.contains(AccessSections::OWNER) {
        information |= OWNER_SECURITY_INFORMATION;
    }
    if sections.contains(AccessSections::GROUP) {
        information |= GROUP_SECURITY_INFORMATION;
    }
    if sections.contains(AccessSections::ACCESS) {
        information |= DACL_SECURITY_INFORMATION;
    }
    if sections.contains(AccessSections::AUDIT) {
        information |= SACL_SECURITY_INFORMATION;
    }
    information
}

/// Native backend over Win32. Drive and UNC paths are opened through their
/// `\\?\` forms; shares mapped to a local root are opened locally.
pub struct WindowsBackend {
    mapping: RootMapping,
}

impl Default for WindowsBackend {
    fn default() -> Self {
        Self::new(RootMapping::default())
    }
}

impl WindowsBackend {
    pub fn new(mapping: RootMapping) -> Self {
        Self { mapping }
    }

    fn native_name(&self, path: &FilesystemPath) -> FsResult<String> {
        let local = self.mapping.to_local(path).unwrap_or_else(|_| path.clone());
        match local.root() {
            RootKind::Drive(_) | RootKind::Unc { .. } => Ok(local.to_extended()),
            _ => Err(FsError::UnsupportedConversion {
                path: path.to_string(),
                reason: "POSIX paths have no Windows equivalent".to_string(),
            }),
        }
    }

    fn stream_name(&self, path: &FilesystemPath, name: &str) -> FsResult<String> {
        Ok(format!("{}:{name}", self.native_name(path)?))
    }

    fn exists(&self, name: &str) -> bool {
        win32::get_attribute_data(name).is_ok()
    }
}

impl Backend for WindowsBackend {
    fn descriptor_family(&self) -> DescriptorFamily {
        DescriptorFamily::Windows
    }

    fn query(&self, path: &FilesystemPath) -> FsResult<Option<EntryStat>> {
        let name = self.native_name(path)?;
        let data = match win32::get_attribute_data(&name) {
            Ok(data) => data,
            Err(ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND) => {
                trace(&format!("query: {name} does not exist"));
                return Ok(None);
            }
            Err(code) => return Err(map_win32_error(code, Operation::Query, path)),
        };
        let kind = if data.attributes & FILE_ATTRIBUTE_DIRECTORY != 0 {
            EntryKind::Directory
        } else if data.attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
            EntryKind::Symlink
        } else {
            EntryKind::File
        };
        Ok(Some(EntryStat {
            kind,
            len: data.len,
            created: data.created,
            modified: data.modified,
            accessed: data.accessed,
            attributes: FileAttributes(data.attributes),
        }))
    }

    fn create_dir(&self, path: &FilesystemPath) -> FsResult<()> {
        let name = self.native_name(path)?;
        win32::create_directory(&name).map_err(|code| map_win32_error(code, Operation::CreateDirectory, path))
    }

    fn create_file(&self, path: &FilesystemPath, exclusive: bool) -> FsResult<EntryWriter> {
        let name = self.native_name(path)?;
        let mut options = OpenOptions::new();
        options.write(true);
        if exclusive {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        let file = options.open(&name).map_err(|err| match err.raw_os_error() {
            Some(code) => map_win32_error(code as u32, Operation::CreateFile, path),
            None => FsError::NativeOperation {
                operation: Operation::CreateFile,
                path: path.to_string(),
                source: err,
            },
        })?;
        Ok(EntryWriter::new(path.clone(), Box::new(file)))
    }

    fn remove_file(&self, path: &FilesystemPath) -> FsResult<()> {
        let name = self.native_name(path)?;
        win32::delete_file(&name).map_err(|code| map_win32_error(code, Operation::RemoveFile, path))
    }

    fn remove_dir(&self, path: &FilesystemPath) -> FsResult<()> {
        let name = self.native_name(path)?;
        win32::remove_directory(&name).map_err(|code| map_win32_error(code, Operation::RemoveDirectory, path))
    }

    fn read_dir(&self, path: &FilesystemPath) -> FsResult<Vec<FsResult<String>>> {
        let name = self.native_name(path)?;
        let map = |err: std::io::Error| match err.raw_os_error() {
            Some(code) => map_win32_error(code as u32, Operation::ReadDirectory, path),
            None => FsError::NativeOperation {
                operation: Operation::ReadDirectory,
                path: path.to_string(),
                source: err,
            },
        };
        let mut names = Vec::new();
        for entry in fs::read_dir(&name).map_err(map)? {
            let entry = entry.map_err(map)?;
            names.push(entry.file_name().into_string().map_err(|raw| {
                log::warn!("unpaired surrogate in name {raw:?} in {name}");
                FsError::invalid_path(format!("{path}\\{}", raw.to_string_lossy()), PathProblem::NotUtf8)
            }));
        }
        Ok(names)
    }

    fn rename(&self, from: &FilesystemPath, to: &FilesystemPath, replace: bool) -> FsResult<()> {
        let source = self.native_name(from)?;
        let target = self.native_name(to)?;
        let flags = if replace { MOVEFILE_REPLACE_EXISTING } else { 0 };
        win32::move_file(&source, &target, flags).map_err(|code| {
            if code == ERROR_NOT_SAME_DEVICE {
                FsError::CrossVolume {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            } else {
                map_win32_error(code, Operation::Rename, from)
            }
        })
    }

    fn copy_file(&self, from: &FilesystemPath, to: &FilesystemPath, overwrite: bool) -> FsResult<u64> {
        let source = self.native_name(from)?;
        let target = self.native_name(to)?;
        if !overwrite && self.exists(&target) {
            return Err(FsError::AlreadyExists {
                path: to.to_string(),
            });
        }
        win32::copy_file(&source, &target, !overwrite)
            .map_err(|code| map_win32_error(code, Operation::Copy, from))?;
        let data = win32::get_attribute_data(&target).map_err(|code| map_win32_error(code, Operation::Copy, to))?;
        Ok(data.len)
    }

    fn read_file(&self, path: &FilesystemPath) -> FsResult<Vec<u8>> {
        let name = self.native_name(path)?;
        fs::read(&name).map_err(|err| match err.raw_os_error() {
            Some(code) => map_win32_error(code as u32, Operation::Read, path),
            None => FsError::NativeOperation {
                operation: Operation::Read,
                path: path.to_string(),
                source: err,
            },
        })
    }

    fn read_security(&self, path: &FilesystemPath, sections: AccessSections) -> FsResult<NativeDescriptor> {
        let name = self.native_name(path)?;
        let bytes = win32::get_file_security(&name, security_information(sections))
            .map_err(|code| map_win32_error(code, Operation::ReadSecurity, path))?;
        Ok(NativeDescriptor::Windows(bytes))
    }

    fn write_security(
        &self,
        path: &FilesystemPath,
        descriptor: &NativeDescriptor,
        sections: AccessSections,
    ) -> FsResult<()> {
        let NativeDescriptor::Windows(bytes) = descriptor else {
            return Err(FsError::invalid_descriptor(
                "POSIX descriptors cannot be applied on Windows",
            ));
        };
        let name = self.native_name(path)?;
        let layout = ntsd::layout(bytes)?;
        let part = |offset: Option<usize>| offset.map_or(std::ptr::null(), |at| bytes[at..].as_ptr());

        let mut information = 0;
        if sections.contains(AccessSections::OWNER) && layout.owner.is_some() {
            information |= OWNER_SECURITY_INFORMATION;
        }
        if sections.contains(AccessSections::GROUP) && layout.group.is_some() {
            information |= GROUP_SECURITY_INFORMATION;
        }
        if sections.contains(AccessSections::ACCESS) {
            information |= DACL_SECURITY_INFORMATION;
            information |= if layout.control & SE_DACL_PROTECTED != 0 {
                PROTECTED_DACL_SECURITY_INFORMATION
            } else {
                UNPROTECTED_DACL_SECURITY_INFORMATION
            };
        }
        if sections.contains(AccessSections::AUDIT) {
            information |= SACL_SECURITY_INFORMATION;
        }

        trace(&format!("SetNamedSecurityInfoW({name}, {information:#x})"));
        win32::set_named_security(
            &name,
            information,
            part(layout.owner),
            part(layout.group),
            part(layout.dacl),
            part(layout.sacl),
        )
        .map_err(|code| map_win32_error(code, Operation::WriteSecurity, path))
    }

    fn account_name(&self, principal: &Principal) -> Option<String> {
        let sid = match principal {
            Principal::Sid(sid) => sid.clone(),
            _ => return None,
        };
        win32::lookup_account_sid(&sid.to_bytes()).or_else(|| sid.well_known_name().map(str::to_string))
    }

    fn list_streams(&self, path: &FilesystemPath) -> FsResult<Vec<StreamInfo>> {
        let name = self.native_name(path)?;
        let mut streams: Vec<StreamInfo> = win32::find_streams(&name)
            .map_err(|code| map_win32_error(code, Operation::Streams, path))?
            .into_iter()
            .map(|(name, size)| StreamInfo { name, size })
            .collect();
        streams.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(streams)
    }

    fn read_stream(&self, path: &FilesystemPath, name: &str) -> FsResult<Vec<u8>> {
        let stream = self.stream_name(path, name)?;
        fs::read(&stream).map_err(|err| match err.raw_os_error() {
            Some(code) => map_win32_error(code as u32, Operation::Streams, path),
            None => FsError::NativeOperation {
                operation: Operation::Streams,
                path: path.to_string(),
                source: err,
            },
        })
    }

    fn write_stream(&self, path: &FilesystemPath, name: &str, data: &[u8]) -> FsResult<()> {
        if self.query(path)?.is_none() {
            return Err(FsError::PathNotFound {
                path: path.to_string(),
            });
        }
        let stream = self.stream_name(path, name)?;
        fs::write(&stream, data).map_err(|err| match err.raw_os_error() {
            Some(code) => map_win32_error(code as u32, Operation::Streams, path),
            None => FsError::NativeOperation {
                operation: Operation::Streams,
                path: path.to_string(),
                source: err,
            },
        })
    }

    fn remove_stream(&self, path: &FilesystemPath, name: &str) -> FsResult<()> {
        let stream = self.stream_name(path, name)?;
        win32::delete_file(&stream).map_err(|code| map_win32_error(code, Operation::Streams, path))
    }
}
