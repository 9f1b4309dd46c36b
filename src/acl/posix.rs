//! `system.posix_acl_access` / `system.posix_acl_default` xattr layout and
//! its mapping onto the rule model.
//!
//! An entry's `rwx` bits become `Read`/`Write`/`Execute` rights. Default ACL
//! entries surface as container+object inheritable, inherit-only rules. POSIX
//! has no deny entries and no inherited markers.

use std::collections::BTreeMap;

use super::{
    AccessKind, AccessRule, AccessSections, FileRights, InheritanceFlags, Principal,
    PropagationFlags, SecurityDescriptor, Sid,
};
use crate::common::error::{FsError, FsResult};

pub const XATTR_ACCESS: &str = "system.posix_acl_access";
pub const XATTR_DEFAULT: &str = "system.posix_acl_default";

const ACL_XATTR_VERSION: u32 = 2;
const ENTRY_LEN: usize = 8;
const UNDEFINED_ID: u32 = u32::MAX;

pub const TAG_USER_OBJ: u16 = 0x01;
pub const TAG_USER: u16 = 0x02;
pub const TAG_GROUP_OBJ: u16 = 0x04;
pub const TAG_GROUP: u16 = 0x08;
pub const TAG_MASK: u16 = 0x10;
pub const TAG_OTHER: u16 = 0x20;

const PERM_READ: u16 = 0x4;
const PERM_WRITE: u16 = 0x2;
const PERM_EXECUTE: u16 = 0x1;

/// Native security state of one POSIX entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PosixDescriptor {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub is_dir: bool,
    /// `None` when the entry only has mode bits.
    pub access_acl: Option<Vec<u8>>,
    pub default_acl: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PosixAclEntry {
    pub tag: u16,
    pub id: u32,
    pub perm: u16,
}

impl PosixAclEntry {
    fn new(tag: u16, id: u32, perm: u16) -> Self {
        Self { tag, id, perm }
    }

    fn principal(&self) -> FsResult<Principal> {
        Ok(match self.tag {
            TAG_USER_OBJ => Principal::FileOwner,
            TAG_USER => Principal::User(self.id),
            TAG_GROUP_OBJ => Principal::FileGroup,
            TAG_GROUP => Principal::Group(self.id),
            TAG_MASK => Principal::Mask,
            TAG_OTHER => Principal::Others,
            other => {
                return Err(FsError::invalid_descriptor(format!(
                    "unknown POSIX ACL tag 0x{other:x}"
                )))
            }
        })
    }
}

pub fn decode_entries(bytes: &[u8]) -> FsResult<Vec<PosixAclEntry>> {
    if bytes.len() < 4 || (bytes.len() - 4) % ENTRY_LEN != 0 {
        return Err(FsError::invalid_descriptor("POSIX ACL xattr has a bad length"));
    }
    let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if version != ACL_XATTR_VERSION {
        return Err(FsError::invalid_descriptor(format!(
            "unsupported POSIX ACL version {version}"
        )));
    }
    Ok(bytes[4..]
        .chunks_exact(ENTRY_LEN)
        .map(|chunk| PosixAclEntry {
            tag: u16::from_le_bytes([chunk[0], chunk[1]]),
            perm: u16::from_le_bytes([chunk[2], chunk[3]]),
            id: u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
        })
        .collect())
}

/// Encodes entries in the order the kernel expects.
pub fn encode_entries(entries: &[PosixAclEntry]) -> Vec<u8> {
    let mut sorted = entries.to_vec();
    sorted.sort();
    let mut out = Vec::with_capacity(4 + ENTRY_LEN * sorted.len());
    out.extend_from_slice(&ACL_XATTR_VERSION.to_le_bytes());
    for entry in sorted {
        out.extend_from_slice(&entry.tag.to_le_bytes());
        out.extend_from_slice(&entry.perm.to_le_bytes());
        out.extend_from_slice(&entry.id.to_le_bytes());
    }
    out
}

/// The three-entry ACL equivalent to a mode.
pub fn entries_from_mode(mode: u32) -> Vec<PosixAclEntry> {
    vec![
        PosixAclEntry::new(TAG_USER_OBJ, UNDEFINED_ID, ((mode >> 6) & 0o7) as u16),
        PosixAclEntry::new(TAG_GROUP_OBJ, UNDEFINED_ID, ((mode >> 3) & 0o7) as u16),
        PosixAclEntry::new(TAG_OTHER, UNDEFINED_ID, (mode & 0o7) as u16),
    ]
}

fn rights_from_perm(perm: u16) -> FileRights {
    let mut rights = FileRights::default();
    if perm & PERM_READ != 0 {
        rights |= FileRights::READ;
    }
    if perm & PERM_WRITE != 0 {
        rights |= FileRights::WRITE;
    }
    if perm & PERM_EXECUTE != 0 {
        rights |= FileRights::EXECUTE;
    }
    rights
}

fn perm_from_rights(rights: FileRights) -> u16 {
    let mut perm = 0;
    if rights.intersects(FileRights::READ_DATA) {
        perm |= PERM_READ;
    }
    if rights.intersects(FileRights::WRITE_DATA | FileRights::APPEND_DATA) {
        perm |= PERM_WRITE;
    }
    if rights.intersects(FileRights::EXECUTE) {
        perm |= PERM_EXECUTE;
    }
    perm
}

pub fn to_descriptor(native: &PosixDescriptor, sections: AccessSections) -> FsResult<SecurityDescriptor> {
    let mut descriptor = SecurityDescriptor {
        sections,
        ..SecurityDescriptor::default()
    };
    if sections.contains(AccessSections::OWNER) {
        descriptor.owner = Some(Principal::User(native.uid));
    }
    if sections.contains(AccessSections::GROUP) {
        descriptor.group = Some(Principal::Group(native.gid));
    }
    if !sections.contains(AccessSections::ACCESS) {
        return Ok(descriptor);
    }

    let access = match &native.access_acl {
        Some(bytes) => decode_entries(bytes)?,
        None => entries_from_mode(native.mode),
    };
    for entry in access {
        descriptor
            .access_rules
            .push(AccessRule::allow(entry.principal()?, rights_from_perm(entry.perm)));
    }
    if let Some(bytes) = &native.default_acl {
        for entry in decode_entries(bytes)? {
            descriptor.access_rules.push(
                AccessRule::allow(entry.principal()?, rights_from_perm(entry.perm))
                    .with_inheritance(InheritanceFlags::BOTH)
                    .with_propagation(PropagationFlags::INHERIT_ONLY),
            );
        }
    }
    Ok(descriptor)
}

fn entry_key(principal: &Principal) -> FsResult<(u16, u32)> {
    Ok(match principal {
        Principal::FileOwner => (TAG_USER_OBJ, UNDEFINED_ID),
        Principal::User(uid) => (TAG_USER, *uid),
        Principal::FileGroup => (TAG_GROUP_OBJ, UNDEFINED_ID),
        Principal::Group(gid) => (TAG_GROUP, *gid),
        Principal::Mask => (TAG_MASK, UNDEFINED_ID),
        Principal::Others => (TAG_OTHER, UNDEFINED_ID),
        Principal::Sid(sid) if *sid == Sid::creator_owner() => (TAG_USER_OBJ, UNDEFINED_ID),
        Principal::Sid(sid) if *sid == Sid::creator_group() => (TAG_GROUP_OBJ, UNDEFINED_ID),
        Principal::Sid(sid) if *sid == Sid::everyone() => (TAG_OTHER, UNDEFINED_ID),
        Principal::Sid(sid) => {
            return Err(FsError::invalid_descriptor(format!(
                "{sid} cannot appear in a POSIX ACL"
            )))
        }
    })
}

/// Fills in the required base entries and, when named entries are present,
/// a mask covering them.
fn complete(entries: &mut BTreeMap<(u16, u32), u16>, base: &[PosixAclEntry]) {
    for entry in base {
        entries.entry((entry.tag, entry.id)).or_insert(entry.perm);
    }
    let named = entries
        .iter()
        .filter(|((tag, _), _)| matches!(*tag, TAG_USER | TAG_GROUP | TAG_GROUP_OBJ))
        .fold(0u16, |acc, (_, perm)| acc | perm);
    let has_named = entries.keys().any(|(tag, _)| matches!(*tag, TAG_USER | TAG_GROUP));
    if has_named {
        entries.entry((TAG_MASK, UNDEFINED_ID)).or_insert(named);
    }
}

fn collect(entries: &BTreeMap<(u16, u32), u16>) -> Vec<PosixAclEntry> {
    entries
        .iter()
        .map(|(&(tag, id), &perm)| PosixAclEntry::new(tag, id, perm))
        .collect()
}

fn is_minimal(entries: &BTreeMap<(u16, u32), u16>) -> bool {
    entries
        .keys()
        .all(|(tag, _)| matches!(*tag, TAG_USER_OBJ | TAG_GROUP_OBJ | TAG_OTHER))
}

/// Builds the native state for the selected sections of `descriptor`,
/// starting from `current`.
pub fn from_descriptor(
    descriptor: &SecurityDescriptor,
    current: &PosixDescriptor,
    sections: AccessSections,
) -> FsResult<PosixDescriptor> {
    let mut next = current.clone();

    if sections.contains(AccessSections::OWNER) {
        match &descriptor.owner {
            Some(Principal::User(uid)) => next.uid = *uid,
            Some(other) => {
                return Err(FsError::invalid_descriptor(format!(
                    "owner {other} is not a POSIX user"
                )))
            }
            None => {}
        }
    }
    if sections.contains(AccessSections::GROUP) {
        match &descriptor.group {
            Some(Principal::Group(gid)) => next.gid = *gid,
            Some(other) => {
                return Err(FsError::invalid_descriptor(format!(
                    "group {other} is not a POSIX group"
                )))
            }
            None => {}
        }
    }
    if sections.contains(AccessSections::AUDIT) && !descriptor.audit_rules.is_empty() {
        return Err(FsError::invalid_descriptor("POSIX ACLs have no audit entries"));
    }
    if !sections.contains(AccessSections::ACCESS) {
        return Ok(next);
    }

    let mut access = BTreeMap::new();
    let mut defaults = BTreeMap::new();
    for rule in &descriptor.access_rules {
        if rule.kind == AccessKind::Deny {
            return Err(FsError::invalid_descriptor("POSIX ACLs cannot express deny rules"));
        }
        let key = entry_key(&rule.principal)?;
        let perm = perm_from_rights(rule.rights);
        if !rule.inheritance.is_none() {
            *defaults.entry(key).or_insert(0) |= perm;
        }
        if !rule.propagation.inherit_only {
            *access.entry(key).or_insert(0) |= perm;
        }
    }

    let from_mode = entries_from_mode(current.mode);
    complete(&mut access, &from_mode);
    let perms = |tag: u16| {
        access
            .get(&(tag, UNDEFINED_ID))
            .copied()
            .unwrap_or(0) as u32
    };
    let group_class = if is_minimal(&access) {
        perms(TAG_GROUP_OBJ)
    } else {
        perms(TAG_MASK)
    };
    next.mode = (current.mode & !0o777) | (perms(TAG_USER_OBJ) << 6) | (group_class << 3) | perms(TAG_OTHER);
    next.access_acl = if is_minimal(&access) {
        None
    } else {
        Some(encode_entries(&collect(&access)))
    };

    if defaults.is_empty() {
        next.default_acl = None;
    } else {
        if !current.is_dir {
            return Err(FsError::invalid_descriptor(
                "only directories carry inheritable POSIX entries",
            ));
        }
        let base: Vec<PosixAclEntry> = collect(&access)
            .into_iter()
            .filter(|entry| matches!(entry.tag, TAG_USER_OBJ | TAG_GROUP_OBJ | TAG_OTHER))
            .collect();
        complete(&mut defaults, &base);
        next.default_acl = Some(encode_entries(&collect(&defaults)));
    }
    Ok(next)
}
