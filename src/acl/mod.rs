//! OS-neutral access-control model plus the codecs and routing that move it
//! to and from native descriptors.

pub mod ntsd;
pub mod posix;
mod sid;
pub mod translator;

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

pub use sid::Sid;

/// Who a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Principal {
    Sid(Sid),
    User(u32),
    Group(u32),
    FileOwner,
    FileGroup,
    Others,
    /// Upper bound on named-user and group entries of a POSIX ACL.
    Mask,
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Sid(sid) => write!(f, "{sid}"),
            Principal::User(uid) => write!(f, "uid:{uid}"),
            Principal::Group(gid) => write!(f, "gid:{gid}"),
            Principal::FileOwner => write!(f, "OWNER@"),
            Principal::FileGroup => write!(f, "GROUP@"),
            Principal::Others => write!(f, "EVERYONE@"),
            Principal::Mask => write!(f, "MASK@"),
        }
    }
}

/// File access rights in the Windows access-mask encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileRights(pub u32);

impl FileRights {
    pub const READ_DATA: FileRights = FileRights(0x0001);
    pub const WRITE_DATA: FileRights = FileRights(0x0002);
    pub const APPEND_DATA: FileRights = FileRights(0x0004);
    pub const READ_EXTENDED_ATTRIBUTES: FileRights = FileRights(0x0008);
    pub const WRITE_EXTENDED_ATTRIBUTES: FileRights = FileRights(0x0010);
    pub const EXECUTE: FileRights = FileRights(0x0020);
    pub const DELETE_SUBDIRECTORIES_AND_FILES: FileRights = FileRights(0x0040);
    pub const READ_ATTRIBUTES: FileRights = FileRights(0x0080);
    pub const WRITE_ATTRIBUTES: FileRights = FileRights(0x0100);
    pub const DELETE: FileRights = FileRights(0x0001_0000);
    pub const READ_PERMISSIONS: FileRights = FileRights(0x0002_0000);
    pub const CHANGE_PERMISSIONS: FileRights = FileRights(0x0004_0000);
    pub const TAKE_OWNERSHIP: FileRights = FileRights(0x0008_0000);
    pub const SYNCHRONIZE: FileRights = FileRights(0x0010_0000);

    pub const READ: FileRights = FileRights(0x0002_0089);
    pub const WRITE: FileRights = FileRights(0x0000_0116);
    pub const READ_AND_EXECUTE: FileRights = FileRights(0x0002_00A9);
    pub const MODIFY: FileRights = FileRights(0x0003_01BF);
    pub const FULL_CONTROL: FileRights = FileRights(0x001F_01FF);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: FileRights) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: FileRights) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FileRights {
    type Output = FileRights;

    fn bitor(self, rhs: FileRights) -> FileRights {
        FileRights(self.0 | rhs.0)
    }
}

impl BitOrAssign for FileRights {
    fn bitor_assign(&mut self, rhs: FileRights) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FileRights {
    type Output = FileRights;

    fn bitand(self, rhs: FileRights) -> FileRights {
        FileRights(self.0 & rhs.0)
    }
}

impl fmt::Display for FileRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let named = [
            (FileRights::FULL_CONTROL, "FullControl"),
            (FileRights::MODIFY, "Modify"),
            (FileRights::READ_AND_EXECUTE, "ReadAndExecute"),
            (FileRights::READ, "Read"),
            (FileRights::WRITE, "Write"),
        ];
        match named.iter().find(|(rights, _)| rights == self) {
            Some((_, name)) => f.write_str(name),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessKind {
    Allow,
    Deny,
}

/// Which kinds of children inherit a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InheritanceFlags {
    pub container: bool,
    pub object: bool,
}

impl InheritanceFlags {
    pub const NONE: InheritanceFlags = InheritanceFlags {
        container: false,
        object: false,
    };
    pub const BOTH: InheritanceFlags = InheritanceFlags {
        container: true,
        object: true,
    };

    pub fn is_none(self) -> bool {
        !self.container && !self.object
    }
}

/// How far an inheritable rule travels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropagationFlags {
    pub no_propagate: bool,
    pub inherit_only: bool,
}

impl PropagationFlags {
    pub const NONE: PropagationFlags = PropagationFlags {
        no_propagate: false,
        inherit_only: false,
    };
    pub const INHERIT_ONLY: PropagationFlags = PropagationFlags {
        no_propagate: false,
        inherit_only: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessRule {
    pub principal: Principal,
    pub rights: FileRights,
    pub kind: AccessKind,
    pub inheritance: InheritanceFlags,
    pub propagation: PropagationFlags,
    pub is_inherited: bool,
}

impl AccessRule {
    pub fn allow(principal: Principal, rights: FileRights) -> Self {
        Self::new(principal, rights, AccessKind::Allow)
    }

    pub fn deny(principal: Principal, rights: FileRights) -> Self {
        Self::new(principal, rights, AccessKind::Deny)
    }

    fn new(principal: Principal, rights: FileRights, kind: AccessKind) -> Self {
        Self {
            principal,
            rights,
            kind,
            inheritance: InheritanceFlags::NONE,
            propagation: PropagationFlags::NONE,
            is_inherited: false,
        }
    }

    pub fn with_inheritance(mut self, inheritance: InheritanceFlags) -> Self {
        self.inheritance = inheritance;
        self
    }

    pub fn with_propagation(mut self, propagation: PropagationFlags) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn inherited(mut self) -> Self {
        self.is_inherited = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuditRule {
    pub principal: Principal,
    pub rights: FileRights,
    pub success: bool,
    pub failure: bool,
    pub inheritance: InheritanceFlags,
    pub propagation: PropagationFlags,
    pub is_inherited: bool,
}

impl AuditRule {
    pub fn new(principal: Principal, rights: FileRights, success: bool, failure: bool) -> Self {
        Self {
            principal,
            rights,
            success,
            failure,
            inheritance: InheritanceFlags::NONE,
            propagation: PropagationFlags::NONE,
            is_inherited: false,
        }
    }
}

/// Parts of a descriptor to read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessSections(u8);

impl AccessSections {
    pub const NONE: AccessSections = AccessSections(0);
    pub const OWNER: AccessSections = AccessSections(0x1);
    pub const GROUP: AccessSections = AccessSections(0x2);
    pub const ACCESS: AccessSections = AccessSections(0x4);
    pub const AUDIT: AccessSections = AccessSections(0x8);
    pub const ALL: AccessSections = AccessSections(0xF);

    pub const fn contains(self, other: AccessSections) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Owner, group and access rules. Audit rules need a privilege most
/// callers lack, so they are opt-in.
impl Default for AccessSections {
    fn default() -> Self {
        AccessSections(0x7)
    }
}

impl BitOr for AccessSections {
    type Output = AccessSections;

    fn bitor(self, rhs: AccessSections) -> AccessSections {
        AccessSections(self.0 | rhs.0)
    }
}

impl BitAnd for AccessSections {
    type Output = AccessSections;

    fn bitand(self, rhs: AccessSections) -> AccessSections {
        AccessSections(self.0 & rhs.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessRuleProtection {
    pub inheritance_blocked: bool,
    pub preserve_inherited: bool,
}

/// An entry's owner, group and rule lists, independent of how the platform
/// stores them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityDescriptor {
    pub owner: Option<Principal>,
    pub group: Option<Principal>,
    pub access_rules: Vec<AccessRule>,
    pub audit_rules: Vec<AuditRule>,
    pub protection: AccessRuleProtection,
    pub sections: AccessSections,
}

impl SecurityDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn are_access_rules_protected(&self) -> bool {
        self.protection.inheritance_blocked
    }

    pub fn inherited_rule_count(&self) -> usize {
        self.access_rules.iter().filter(|rule| rule.is_inherited).count()
    }

    pub fn explicit_rule_count(&self) -> usize {
        self.access_rules.len() - self.inherited_rule_count()
    }

    pub fn add_access_rule(&mut self, rule: AccessRule) {
        self.access_rules.push(rule);
    }

    /// Removes every explicit rule for `principal`; returns how many went.
    pub fn purge_access_rules(&mut self, principal: &Principal) -> usize {
        let before = self.access_rules.len();
        self.access_rules
            .retain(|rule| rule.is_inherited || &rule.principal != principal);
        before - self.access_rules.len()
    }

    /// Changes inheritance protection in memory only.
    ///
    /// Blocking drops inherited rules unless `preserve_inherited` is set, in
    /// which case they become explicit. Unblocking leaves the rules alone; the
    /// native store re-applies the parent's rules on the next write.
    pub fn set_protection(&mut self, inheritance_blocked: bool, preserve_inherited: bool) {
        if inheritance_blocked {
            if preserve_inherited {
                for rule in &mut self.access_rules {
                    rule.is_inherited = false;
                }
            } else {
                self.access_rules.retain(|rule| !rule.is_inherited);
            }
        }
        self.protection = AccessRuleProtection {
            inheritance_blocked,
            preserve_inherited,
        };
    }

    /// Compares owner, group and access rules, resolving principals to
    /// account names through `names` and falling back to their raw form.
    /// Rule order and duplicates do not matter.
    pub fn equivalent<F>(&self, other: &SecurityDescriptor, names: F) -> bool
    where
        F: Fn(&Principal) -> Option<String>,
    {
        let name = |principal: &Principal| {
            names(principal)
                .map(|n| n.to_uppercase())
                .unwrap_or_else(|| principal.to_string())
        };
        let owner = |d: &SecurityDescriptor| d.owner.as_ref().map(&name);
        let group = |d: &SecurityDescriptor| d.group.as_ref().map(&name);
        let rules = |d: &SecurityDescriptor| {
            d.access_rules
                .iter()
                .map(|rule| {
                    (
                        name(&rule.principal),
                        rule.rights,
                        rule.kind,
                        rule.inheritance,
                        rule.propagation,
                        rule.is_inherited,
                    )
                })
                .collect::<BTreeSet<_>>()
        };
        owner(self) == owner(other) && group(self) == group(other) && rules(self) == rules(other)
    }
}
