use super::{ntsd, posix, AccessSections, SecurityDescriptor};
use crate::backend::{Backend, DescriptorFamily, NativeDescriptor};
use crate::common::error::{FsError, FsResult};
use crate::common::path::FilesystemPath;

/// Reads the selected sections of `path`'s descriptor. Sections not asked
/// for stay empty.
pub fn read<B: Backend + ?Sized>(
    backend: &B,
    path: &FilesystemPath,
    sections: AccessSections,
) -> FsResult<SecurityDescriptor> {
    let native = backend.read_security(path, sections)?;
    log::trace!("read {:?} descriptor of {path}", native.family());
    match native {
        NativeDescriptor::Windows(bytes) => ntsd::decode(&bytes, sections),
        NativeDescriptor::Posix(native) => posix::to_descriptor(&native, sections),
    }
}

/// Writes the selected sections of `descriptor` to `path`.
pub fn write<B: Backend + ?Sized>(
    backend: &B,
    path: &FilesystemPath,
    descriptor: &SecurityDescriptor,
    sections: AccessSections,
) -> FsResult<()> {
    let native = match backend.descriptor_family() {
        DescriptorFamily::Windows => NativeDescriptor::Windows(ntsd::encode(descriptor, sections)?),
        DescriptorFamily::Posix => {
            // POSIX keeps owner, group and mode bits together, so the
            // untouched parts come from the entry's current state.
            let current = match backend.read_security(path, AccessSections::default())? {
                NativeDescriptor::Posix(current) => current,
                NativeDescriptor::Windows(_) => {
                    return Err(FsError::invalid_descriptor(
                        "backend returned a Windows descriptor for a POSIX entry",
                    ))
                }
            };
            NativeDescriptor::Posix(posix::from_descriptor(descriptor, &current, sections)?)
        }
    };
    log::debug!(
        "writing sections {:#x} of {path} ({} access rules, protected={})",
        sections.bits(),
        descriptor.access_rules.len(),
        descriptor.are_access_rules_protected()
    );
    backend.write_security(path, &native, sections)
}
