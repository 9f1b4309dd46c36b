use entryfs::{
    AccessRule, AccessSections, AuditRule, EntryManager, FileRights, FilesystemPath, FsError,
    InheritanceFlags, ManagerConfig, MemoryBackend, Principal, Sid,
};

fn manager() -> EntryManager<MemoryBackend> {
    EntryManager::new(MemoryBackend::new(), ManagerConfig::default())
}

fn path(raw: &str) -> FilesystemPath {
    FilesystemPath::parse(raw).unwrap()
}

fn users() -> Principal {
    Principal::Sid(Sid::builtin_users())
}

#[test]
fn new_entries_report_inherited_rules() {
    let mgr = manager();
    mgr.create_dir(&path("C:\\secure")).unwrap();
    let sd = mgr
        .get_access_control(&path("C:\\secure"), AccessSections::default())
        .unwrap();
    assert!(!sd.are_access_rules_protected());
    assert_eq!(sd.explicit_rule_count(), 0);
    assert_eq!(sd.inherited_rule_count(), 4);
    assert_eq!(sd.owner, Some(Principal::Sid(Sid::builtin_administrators())));
}

#[test]
fn explicit_rule_round_trips() {
    let mgr = manager();
    let file = path("C:\\acl.txt");
    mgr.create_file(&file).unwrap().close().unwrap();

    let mut sd = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    sd.add_access_rule(AccessRule::deny(users(), FileRights::WRITE));
    mgr.set_access_control(&file, &sd, AccessSections::ACCESS).unwrap();

    let read_back = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    assert_eq!(read_back.explicit_rule_count(), 1);
    assert!(mgr.equivalent(&sd, &read_back));

    assert_eq!(sd.purge_access_rules(&users()), 1);
    mgr.set_access_control(&file, &sd, AccessSections::ACCESS).unwrap();
    let purged = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    assert_eq!(purged.explicit_rule_count(), 0);
    assert_eq!(purged.inherited_rule_count(), 4);
}

#[test]
fn blocking_and_restoring_inheritance() {
    let mgr = manager();
    let dir = path("C:\\protected");
    mgr.create_dir(&dir).unwrap();

    let mut sd = mgr.get_access_control(&dir, AccessSections::default()).unwrap();
    sd.add_access_rule(
        AccessRule::allow(users(), FileRights::MODIFY).with_inheritance(InheritanceFlags::BOTH),
    );
    mgr.set_access_control(&dir, &sd, AccessSections::ACCESS).unwrap();

    // Block and drop what was inherited.
    let original = mgr.get_access_control(&dir, AccessSections::default()).unwrap();
    let mut sd = original.clone();
    sd.set_protection(true, false);
    mgr.set_access_control(&dir, &sd, AccessSections::ACCESS).unwrap();
    let blocked = mgr.get_access_control(&dir, AccessSections::default()).unwrap();
    assert!(blocked.are_access_rules_protected());
    assert_eq!(blocked.inherited_rule_count(), 0);
    assert_eq!(blocked.explicit_rule_count(), 1);

    // Unblock; the parent's rules come back.
    let mut sd = blocked;
    sd.set_protection(false, true);
    mgr.set_access_control(&dir, &sd, AccessSections::ACCESS).unwrap();
    let restored = mgr.get_access_control(&dir, AccessSections::default()).unwrap();
    assert!(!restored.are_access_rules_protected());
    assert_eq!(restored.inherited_rule_count(), 4);
    assert_eq!(restored.explicit_rule_count(), 1);
    assert!(mgr.equivalent(&original, &restored));

    // Block again, keeping inherited rules as explicit copies.
    let mut sd = restored;
    sd.set_protection(true, true);
    mgr.set_access_control(&dir, &sd, AccessSections::ACCESS).unwrap();
    let preserved = mgr.get_access_control(&dir, AccessSections::default()).unwrap();
    assert!(preserved.are_access_rules_protected());
    assert_eq!(preserved.inherited_rule_count(), 0);
    assert_eq!(preserved.explicit_rule_count(), 5);
}

#[test]
fn directory_rules_propagate_to_children() {
    let mgr = manager();
    let dir = path("C:\\parent");
    let child = path("C:\\parent\\child.txt");
    mgr.create_dir(&dir).unwrap();
    mgr.create_file(&child).unwrap().close().unwrap();

    let mut sd = mgr.get_access_control(&dir, AccessSections::default()).unwrap();
    sd.add_access_rule(
        AccessRule::allow(Principal::Sid(Sid::everyone()), FileRights::READ)
            .with_inheritance(InheritanceFlags::BOTH),
    );
    mgr.set_access_control(&dir, &sd, AccessSections::ACCESS).unwrap();

    let child_sd = mgr.get_access_control(&child, AccessSections::default()).unwrap();
    assert_eq!(child_sd.inherited_rule_count(), 5);
    assert!(child_sd
        .access_rules
        .iter()
        .any(|rule| rule.is_inherited && rule.principal == Principal::Sid(Sid::everyone())));
}

#[test]
fn owner_change_only_touches_owner() {
    let mgr = manager();
    let file = path("C:\\owned.txt");
    mgr.create_file(&file).unwrap().close().unwrap();

    let mut sd = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    let rules_before = sd.access_rules.clone();
    sd.owner = Some(Principal::Sid(Sid::local_system()));
    sd.access_rules.clear();
    mgr.set_access_control(&file, &sd, AccessSections::OWNER).unwrap();

    let after = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    assert_eq!(after.owner, Some(Principal::Sid(Sid::local_system())));
    assert_eq!(after.access_rules, rules_before);
}

#[test]
fn audit_rules_need_the_audit_section() {
    let mgr = manager();
    let file = path("C:\\audited.txt");
    mgr.create_file(&file).unwrap().close().unwrap();

    let mut sd = mgr.get_access_control(&file, AccessSections::ALL).unwrap();
    sd.audit_rules.push(AuditRule::new(
        Principal::Sid(Sid::everyone()),
        FileRights::DELETE,
        true,
        true,
    ));
    mgr.set_access_control(&file, &sd, AccessSections::AUDIT).unwrap();

    let without = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    assert!(without.audit_rules.is_empty());
    let with = mgr.get_access_control(&file, AccessSections::ALL).unwrap();
    assert_eq!(with.audit_rules.len(), 1);
}

#[test]
fn denied_acl_write_is_a_permission_error() {
    let mgr = manager();
    let file = path("C:\\locked-down.txt");
    mgr.create_file(&file).unwrap().close().unwrap();
    mgr.backend().deny_acl_write(&file).unwrap();

    let sd = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    assert!(matches!(
        mgr.set_access_control(&file, &sd, AccessSections::ACCESS),
        Err(FsError::Permission { .. })
    ));
}

#[test]
fn missing_entries_have_no_descriptor() {
    let mgr = manager();
    assert!(matches!(
        mgr.get_access_control(&path("C:\\nowhere"), AccessSections::default()),
        Err(FsError::PathNotFound { .. })
    ));
}

#[test]
fn posix_only_principals_are_rejected_by_windows_stores() {
    let mgr = manager();
    let file = path("C:\\uid.txt");
    mgr.create_file(&file).unwrap().close().unwrap();
    let mut sd = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    sd.add_access_rule(AccessRule::allow(Principal::User(1000), FileRights::READ));
    assert!(matches!(
        mgr.set_access_control(&file, &sd, AccessSections::ACCESS),
        Err(FsError::InvalidDescriptor { .. })
    ));
}
