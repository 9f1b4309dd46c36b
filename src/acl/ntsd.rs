//! Self-relative `SECURITY_DESCRIPTOR` layout as returned by
//! `GetFileSecurityW`.

use super::{
    AccessKind, AccessRule, AccessRuleProtection, AccessSections, AuditRule, FileRights,
    InheritanceFlags, Principal, PropagationFlags, SecurityDescriptor, Sid,
};
use crate::common::error::{FsError, FsResult};

const HEADER_LEN: usize = 20;
const ACL_HEADER_LEN: usize = 8;
const ACE_HEADER_LEN: usize = 4;
const SD_REVISION: u8 = 1;
const ACL_REVISION: u8 = 2;

pub const SE_DACL_PRESENT: u16 = 0x0004;
pub const SE_SACL_PRESENT: u16 = 0x0010;
pub const SE_DACL_AUTO_INHERITED: u16 = 0x0400;
pub const SE_DACL_PROTECTED: u16 = 0x1000;
pub const SE_SACL_PROTECTED: u16 = 0x2000;
pub const SE_SELF_RELATIVE: u16 = 0x8000;

const ACCESS_ALLOWED_ACE_TYPE: u8 = 0;
const ACCESS_DENIED_ACE_TYPE: u8 = 1;
const SYSTEM_AUDIT_ACE_TYPE: u8 = 2;

const OBJECT_INHERIT_ACE: u8 = 0x01;
const CONTAINER_INHERIT_ACE: u8 = 0x02;
const NO_PROPAGATE_INHERIT_ACE: u8 = 0x04;
const INHERIT_ONLY_ACE: u8 = 0x08;
const INHERITED_ACE: u8 = 0x10;
const SUCCESSFUL_ACCESS_ACE_FLAG: u8 = 0x40;
const FAILED_ACCESS_ACE_FLAG: u8 = 0x80;

const GENERIC_READ: u32 = 0x8000_0000;
const GENERIC_WRITE: u32 = 0x4000_0000;
const GENERIC_EXECUTE: u32 = 0x2000_0000;
const GENERIC_ALL: u32 = 0x1000_0000;

/// Offsets of each part inside an encoded descriptor, for callers that hand
/// the pieces to APIs taking separate owner/group/ACL pointers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout {
    pub control: u16,
    pub owner: Option<usize>,
    pub group: Option<usize>,
    pub sacl: Option<usize>,
    pub dacl: Option<usize>,
}

pub fn layout(bytes: &[u8]) -> FsResult<Layout> {
    if bytes.len() < HEADER_LEN {
        return Err(FsError::invalid_descriptor("descriptor header is truncated"));
    }
    if bytes[0] != SD_REVISION {
        return Err(FsError::invalid_descriptor(format!(
            "unsupported descriptor revision {}",
            bytes[0]
        )));
    }
    let control = read_u16(bytes, 2);
    if control & SE_SELF_RELATIVE == 0 {
        return Err(FsError::invalid_descriptor("descriptor is not self-relative"));
    }
    let offset = |at: usize| -> FsResult<Option<usize>> {
        let value = read_u32(bytes, at) as usize;
        if value == 0 {
            return Ok(None);
        }
        if value >= bytes.len() {
            return Err(FsError::invalid_descriptor("descriptor offset out of range"));
        }
        Ok(Some(value))
    };
    Ok(Layout {
        control,
        owner: offset(4)?,
        group: offset(8)?,
        sacl: offset(12)?,
        dacl: offset(16)?,
    })
}

pub fn decode(bytes: &[u8], sections: AccessSections) -> FsResult<SecurityDescriptor> {
    let layout = layout(bytes)?;
    let mut descriptor = SecurityDescriptor {
        sections,
        ..SecurityDescriptor::default()
    };

    if sections.contains(AccessSections::OWNER) {
        if let Some(at) = layout.owner {
            descriptor.owner = Some(Principal::Sid(Sid::from_bytes(&bytes[at..])?));
        }
    }
    if sections.contains(AccessSections::GROUP) {
        if let Some(at) = layout.group {
            descriptor.group = Some(Principal::Sid(Sid::from_bytes(&bytes[at..])?));
        }
    }
    if sections.contains(AccessSections::ACCESS) && layout.control & SE_DACL_PRESENT != 0 {
        descriptor.protection = AccessRuleProtection {
            inheritance_blocked: layout.control & SE_DACL_PROTECTED != 0,
            preserve_inherited: false,
        };
        match layout.dacl {
            Some(at) => {
                for ace in decode_acl(&bytes[at..])? {
                    match ace.kind {
                        AceKind::Allow => descriptor.access_rules.push(ace.into_access(AccessKind::Allow)),
                        AceKind::Deny => descriptor.access_rules.push(ace.into_access(AccessKind::Deny)),
                        AceKind::Audit => {
                            log::warn!("audit ACE found in a DACL; skipping");
                        }
                    }
                }
            }
            // A present but null DACL grants everything to everyone.
            None => descriptor.access_rules.push(AccessRule::allow(
                Principal::Sid(Sid::everyone()),
                FileRights::FULL_CONTROL,
            )),
        }
    }
    if sections.contains(AccessSections::AUDIT) && layout.control & SE_SACL_PRESENT != 0 {
        if let Some(at) = layout.sacl {
            for ace in decode_acl(&bytes[at..])? {
                if let AceKind::Audit = ace.kind {
                    descriptor.audit_rules.push(ace.into_audit());
                }
            }
        }
    }
    Ok(descriptor)
}

/// Encodes the selected sections. Principals must be expressible as SIDs.
pub fn encode(descriptor: &SecurityDescriptor, sections: AccessSections) -> FsResult<Vec<u8>> {
    let mut out = vec![0u8; HEADER_LEN];
    out[0] = SD_REVISION;
    let mut control = SE_SELF_RELATIVE;

    if sections.contains(AccessSections::OWNER) {
        if let Some(owner) = &descriptor.owner {
            let at = out.len();
            principal_sid(owner)?.encode_into(&mut out);
            write_u32(&mut out, 4, at as u32);
        }
    }
    if sections.contains(AccessSections::GROUP) {
        if let Some(group) = &descriptor.group {
            let at = out.len();
            principal_sid(group)?.encode_into(&mut out);
            write_u32(&mut out, 8, at as u32);
        }
    }
    if sections.contains(AccessSections::AUDIT) {
        let aces = descriptor
            .audit_rules
            .iter()
            .map(encode_audit_ace)
            .collect::<FsResult<Vec<_>>>()?;
        let at = out.len();
        encode_acl(&mut out, &aces);
        write_u32(&mut out, 12, at as u32);
        control |= SE_SACL_PRESENT;
    }
    if sections.contains(AccessSections::ACCESS) {
        let aces = descriptor
            .access_rules
            .iter()
            .map(encode_access_ace)
            .collect::<FsResult<Vec<_>>>()?;
        let at = out.len();
        encode_acl(&mut out, &aces);
        write_u32(&mut out, 16, at as u32);
        control |= SE_DACL_PRESENT | SE_DACL_AUTO_INHERITED;
        if descriptor.protection.inheritance_blocked {
            control |= SE_DACL_PROTECTED;
        }
    }
    write_u16(&mut out, 2, control);
    Ok(out)
}

fn principal_sid(principal: &Principal) -> FsResult<Sid> {
    match principal {
        Principal::Sid(sid) => Ok(sid.clone()),
        Principal::FileOwner => Ok(Sid::creator_owner()),
        Principal::FileGroup => Ok(Sid::creator_group()),
        Principal::Others => Ok(Sid::everyone()),
        other => Err(FsError::invalid_descriptor(format!(
            "{other} has no Windows security identifier"
        ))),
    }
}

enum AceKind {
    Allow,
    Deny,
    Audit,
}

struct Ace {
    kind: AceKind,
    flags: u8,
    mask: u32,
    sid: Sid,
}

impl Ace {
    fn inheritance(&self) -> InheritanceFlags {
        InheritanceFlags {
            container: self.flags & CONTAINER_INHERIT_ACE != 0,
            object: self.flags & OBJECT_INHERIT_ACE != 0,
        }
    }

    fn propagation(&self) -> PropagationFlags {
        PropagationFlags {
            no_propagate: self.flags & NO_PROPAGATE_INHERIT_ACE != 0,
            inherit_only: self.flags & INHERIT_ONLY_ACE != 0,
        }
    }

    fn into_access(self, kind: AccessKind) -> AccessRule {
        AccessRule {
            inheritance: self.inheritance(),
            propagation: self.propagation(),
            is_inherited: self.flags & INHERITED_ACE != 0,
            rights: FileRights(map_generic(self.mask)),
            kind,
            principal: Principal::Sid(self.sid),
        }
    }

    fn into_audit(self) -> AuditRule {
        AuditRule {
            inheritance: self.inheritance(),
            propagation: self.propagation(),
            is_inherited: self.flags & INHERITED_ACE != 0,
            success: self.flags & SUCCESSFUL_ACCESS_ACE_FLAG != 0,
            failure: self.flags & FAILED_ACCESS_ACE_FLAG != 0,
            rights: FileRights(map_generic(self.mask)),
            principal: Principal::Sid(self.sid),
        }
    }
}

/// Folds generic rights into the file-specific bits they stand for.
fn map_generic(mask: u32) -> u32 {
    let mut out = mask & !(GENERIC_READ | GENERIC_WRITE | GENERIC_EXECUTE | GENERIC_ALL);
    if mask & GENERIC_ALL != 0 {
        out |= FileRights::FULL_CONTROL.bits();
    }
    if mask & GENERIC_READ != 0 {
        out |= (FileRights::READ | FileRights::SYNCHRONIZE).bits();
    }
    if mask & GENERIC_WRITE != 0 {
        out |= (FileRights::WRITE | FileRights::READ_PERMISSIONS | FileRights::SYNCHRONIZE).bits();
    }
    if mask & GENERIC_EXECUTE != 0 {
        out |= (FileRights::EXECUTE
            | FileRights::READ_ATTRIBUTES
            | FileRights::READ_PERMISSIONS
            | FileRights::SYNCHRONIZE)
            .bits();
    }
    out
}

fn decode_acl(bytes: &[u8]) -> FsResult<Vec<Ace>> {
    if bytes.len() < ACL_HEADER_LEN {
        return Err(FsError::invalid_descriptor("ACL header is truncated"));
    }
    let size = read_u16(bytes, 2) as usize;
    let count = read_u16(bytes, 4) as usize;
    if size < ACL_HEADER_LEN || size > bytes.len() {
        return Err(FsError::invalid_descriptor("ACL size out of range"));
    }
    let acl = &bytes[..size];
    let mut aces = Vec::with_capacity(count);
    let mut at = ACL_HEADER_LEN;
    for _ in 0..count {
        if at + ACE_HEADER_LEN > acl.len() {
            return Err(FsError::invalid_descriptor("ACE header is truncated"));
        }
        let ace_type = acl[at];
        let flags = acl[at + 1];
        let ace_size = read_u16(acl, at + 2) as usize;
        if ace_size < ACE_HEADER_LEN || at + ace_size > acl.len() {
            return Err(FsError::invalid_descriptor("ACE size out of range"));
        }
        let body = &acl[at + ACE_HEADER_LEN..at + ace_size];
        let kind = match ace_type {
            ACCESS_ALLOWED_ACE_TYPE => Some(AceKind::Allow),
            ACCESS_DENIED_ACE_TYPE => Some(AceKind::Deny),
            SYSTEM_AUDIT_ACE_TYPE => Some(AceKind::Audit),
            other => {
                log::warn!("skipping ACE of unsupported type {other}");
                None
            }
        };
        if let Some(kind) = kind {
            if body.len() < 4 {
                return Err(FsError::invalid_descriptor("ACE body is truncated"));
            }
            aces.push(Ace {
                kind,
                flags,
                mask: read_u32(body, 0),
                sid: Sid::from_bytes(&body[4..])?,
            });
        }
        at += ace_size;
    }
    Ok(aces)
}

fn encode_acl(out: &mut Vec<u8>, aces: &[Vec<u8>]) {
    let size = ACL_HEADER_LEN + aces.iter().map(Vec::len).sum::<usize>();
    out.push(ACL_REVISION);
    out.push(0);
    out.extend_from_slice(&(size as u16).to_le_bytes());
    out.extend_from_slice(&(aces.len() as u16).to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    for ace in aces {
        out.extend_from_slice(ace);
    }
}

fn inheritance_bits(
    inheritance: InheritanceFlags,
    propagation: PropagationFlags,
    is_inherited: bool,
) -> u8 {
    let mut flags = 0;
    if inheritance.object {
        flags |= OBJECT_INHERIT_ACE;
    }
    if inheritance.container {
        flags |= CONTAINER_INHERIT_ACE;
    }
    if propagation.no_propagate {
        flags |= NO_PROPAGATE_INHERIT_ACE;
    }
    if propagation.inherit_only {
        flags |= INHERIT_ONLY_ACE;
    }
    if is_inherited {
        flags |= INHERITED_ACE;
    }
    flags
}

fn encode_ace(ace_type: u8, flags: u8, mask: u32, sid: &Sid) -> Vec<u8> {
    let size = ACE_HEADER_LEN + 4 + sid.encoded_len();
    let mut ace = Vec::with_capacity(size);
    ace.push(ace_type);
    ace.push(flags);
    ace.extend_from_slice(&(size as u16).to_le_bytes());
    ace.extend_from_slice(&mask.to_le_bytes());
    sid.encode_into(&mut ace);
    ace
}

fn encode_access_ace(rule: &AccessRule) -> FsResult<Vec<u8>> {
    let ace_type = match rule.kind {
        AccessKind::Allow => ACCESS_ALLOWED_ACE_TYPE,
        AccessKind::Deny => ACCESS_DENIED_ACE_TYPE,
    };
    let flags = inheritance_bits(rule.inheritance, rule.propagation, rule.is_inherited);
    Ok(encode_ace(ace_type, flags, rule.rights.bits(), &principal_sid(&rule.principal)?))
}

fn encode_audit_ace(rule: &AuditRule) -> FsResult<Vec<u8>> {
    let mut flags = inheritance_bits(rule.inheritance, rule.propagation, rule.is_inherited);
    if rule.success {
        flags |= SUCCESSFUL_ACCESS_ACE_FLAG;
    }
    if rule.failure {
        flags |= FAILED_ACCESS_ACE_FLAG;
    }
    Ok(encode_ace(
        SYSTEM_AUDIT_ACE_TYPE,
        flags,
        rule.rights.bits(),
        &principal_sid(&rule.principal)?,
    ))
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn write_u16(out: &mut [u8], at: usize, value: u16) {
    out[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Principal {
        Principal::Sid(Sid::builtin_users())
    }

    #[test]
    fn dacl_with_protection_and_inheritance() {
        let mut sd = SecurityDescriptor::new();
        sd.owner = Some(Principal::Sid(Sid::builtin_administrators()));
        sd.group = Some(Principal::Sid(Sid::local_system()));
        sd.add_access_rule(AccessRule::deny(users(), FileRights::DELETE));
        sd.add_access_rule(
            AccessRule::allow(users(), FileRights::READ_AND_EXECUTE)
                .with_inheritance(InheritanceFlags::BOTH)
                .with_propagation(PropagationFlags::INHERIT_ONLY)
                .inherited(),
        );
        sd.set_protection(true, true);

        let bytes = encode(&sd, AccessSections::default()).unwrap();
        let decoded = decode(&bytes, AccessSections::default()).unwrap();
        assert_eq!(decoded.owner, sd.owner);
        assert_eq!(decoded.group, sd.group);
        assert_eq!(decoded.access_rules, sd.access_rules);
        assert!(decoded.are_access_rules_protected());
        let control = layout(&bytes).unwrap().control;
        assert_ne!(control & SE_DACL_PROTECTED, 0);
    }

    #[test]
    fn only_requested_sections_materialize() {
        let mut sd = SecurityDescriptor::new();
        sd.owner = Some(Principal::Sid(Sid::builtin_administrators()));
        sd.add_access_rule(AccessRule::allow(users(), FileRights::READ));
        sd.audit_rules.push(AuditRule::new(users(), FileRights::DELETE, false, true));
        let bytes = encode(&sd, AccessSections::ALL).unwrap();

        let owner_only = decode(&bytes, AccessSections::OWNER).unwrap();
        assert!(owner_only.owner.is_some());
        assert!(owner_only.access_rules.is_empty());
        assert!(owner_only.audit_rules.is_empty());

        let audit = decode(&bytes, AccessSections::AUDIT).unwrap();
        assert_eq!(audit.audit_rules, sd.audit_rules);
        assert!(audit.owner.is_none());
    }

    #[test]
    fn null_dacl_grants_everyone() {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0] = SD_REVISION;
        write_u16(&mut bytes, 2, SE_SELF_RELATIVE | SE_DACL_PRESENT);
        let sd = decode(&bytes, AccessSections::ACCESS).unwrap();
        assert_eq!(
            sd.access_rules,
            vec![AccessRule::allow(
                Principal::Sid(Sid::everyone()),
                FileRights::FULL_CONTROL
            )]
        );
    }

    #[test]
    fn unknown_ace_types_are_skipped() {
        let known = encode_ace(ACCESS_ALLOWED_ACE_TYPE, 0, FileRights::READ.bits(), &Sid::everyone());
        let mut unknown = known.clone();
        unknown[0] = 0x11;
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0] = SD_REVISION;
        write_u16(&mut bytes, 2, SE_SELF_RELATIVE | SE_DACL_PRESENT);
        write_u32(&mut bytes, 16, HEADER_LEN as u32);
        encode_acl(&mut bytes, &[unknown, known]);

        let sd = decode(&bytes, AccessSections::ACCESS).unwrap();
        assert_eq!(sd.access_rules.len(), 1);
        assert_eq!(sd.access_rules[0].rights, FileRights::READ);
    }

    #[test]
    fn generic_rights_are_folded() {
        assert_eq!(map_generic(GENERIC_ALL), FileRights::FULL_CONTROL.bits());
        assert!(FileRights(map_generic(GENERIC_READ)).contains(FileRights::READ));
    }

    #[test]
    fn posix_only_principals_are_rejected() {
        let mut sd = SecurityDescriptor::new();
        sd.add_access_rule(AccessRule::allow(Principal::User(1000), FileRights::READ));
        assert!(matches!(
            encode(&sd, AccessSections::ACCESS),
            Err(FsError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(decode(&[1, 0, 0], AccessSections::ALL).is_err());
    }
}
