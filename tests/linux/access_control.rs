use std::os::unix::fs::PermissionsExt;

use entryfs::{
    AccessKind, AccessRule, AccessSections, EntryManager, FileRights, FilesystemPath, FsError,
    ManagerConfig, Principal, Sid,
};

fn setup() -> (tempfile::TempDir, EntryManager<entryfs::LinuxBackend>, FilesystemPath) {
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let file = FilesystemPath::parse(temp.path().join("acl.txt").to_str().unwrap()).unwrap();
    mgr.create_file(&file).unwrap().close().unwrap();
    (temp, mgr, file)
}

fn mode_of(temp: &tempfile::TempDir) -> u32 {
    std::fs::metadata(temp.path().join("acl.txt"))
        .unwrap()
        .permissions()
        .mode()
        & 0o777
}

#[test]
fn mode_bits_read_as_owner_group_other_rules() {
    let (temp, mgr, file) = setup();
    std::fs::set_permissions(temp.path().join("acl.txt"), std::fs::Permissions::from_mode(0o640)).unwrap();

    let sd = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    assert!(matches!(sd.owner, Some(Principal::User(_))));
    assert!(matches!(sd.group, Some(Principal::Group(_))));
    let rights = |who: Principal| {
        sd.access_rules
            .iter()
            .find(|rule| rule.principal == who)
            .map(|rule| rule.rights)
            .unwrap()
    };
    assert!(rights(Principal::FileOwner).contains(FileRights::READ_DATA | FileRights::WRITE_DATA));
    assert!(rights(Principal::FileGroup).contains(FileRights::READ_DATA));
    assert!(!rights(Principal::FileGroup).intersects(FileRights::WRITE_DATA));
    assert!(rights(Principal::Others).is_empty());
    assert!(sd.access_rules.iter().all(|rule| rule.kind == AccessKind::Allow));
}

#[test]
fn narrowing_others_rewrites_mode() {
    let (temp, mgr, file) = setup();
    std::fs::set_permissions(temp.path().join("acl.txt"), std::fs::Permissions::from_mode(0o644)).unwrap();

    let mut sd = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    for rule in &mut sd.access_rules {
        if rule.principal == Principal::Others {
            rule.rights = FileRights(0);
        }
    }
    mgr.set_access_control(&file, &sd, AccessSections::ACCESS).unwrap();
    assert_eq!(mode_of(&temp), 0o640);

    let read_back = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    assert!(mgr.equivalent(&sd, &read_back));
}

#[test]
fn deny_rules_cannot_be_expressed() {
    let (temp, mgr, file) = setup();
    let before = mode_of(&temp);
    let mut sd = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    sd.add_access_rule(AccessRule::deny(Principal::Others, FileRights::WRITE));
    assert!(matches!(
        mgr.set_access_control(&file, &sd, AccessSections::ACCESS),
        Err(FsError::InvalidDescriptor { .. })
    ));
    assert_eq!(mode_of(&temp), before);
}

#[test]
fn windows_only_principals_are_rejected() {
    let (_temp, mgr, file) = setup();
    let mut sd = mgr.get_access_control(&file, AccessSections::default()).unwrap();
    sd.add_access_rule(AccessRule::allow(
        Principal::Sid(Sid::builtin_administrators()),
        FileRights::FULL_CONTROL,
    ));
    assert!(matches!(
        mgr.set_access_control(&file, &sd, AccessSections::ACCESS),
        Err(FsError::InvalidDescriptor { .. })
    ));
}

#[test]
fn missing_entry_is_not_found() {
    let (temp, mgr, _file) = setup();
    let ghost = FilesystemPath::parse(temp.path().join("ghost").to_str().unwrap()).unwrap();
    assert!(matches!(
        mgr.get_access_control(&ghost, AccessSections::default()),
        Err(FsError::PathNotFound { .. })
    ));
}
