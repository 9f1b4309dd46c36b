use std::io::Write;
use std::os::windows::fs::OpenOptionsExt;

use entryfs::{
    AccessRule, AccessSections, EntryManager, FileRights, FilesystemPath, FsError,
    InheritanceFlags, ManagerConfig, Principal, Sid,
};

fn root_of(dir: &tempfile::TempDir) -> FilesystemPath {
    FilesystemPath::parse(dir.path().to_str().unwrap()).unwrap()
}

#[test]
fn refresh_tracks_create_and_delete_local_and_unc() {
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let local = root_of(&temp).join("created.txt").unwrap();
    let unc = mgr.resolve(&local.to_string(), true).unwrap();

    for path in [&local, &unc] {
        let mut handle = mgr.open(path).unwrap();
        assert!(!handle.exists());
        let mut writer = mgr.create_file(path).unwrap();
        writer.write_all(b"x").unwrap();
        assert!(!handle.exists());
        handle.refresh(mgr.backend()).unwrap();
        assert!(handle.exists());
        writer.close().unwrap();

        mgr.delete(path, false).unwrap();
        assert!(handle.exists());
        handle.refresh(mgr.backend()).unwrap();
        assert!(!handle.exists());
    }
}

#[test]
fn open_file_blocks_one_child_of_recursive_delete() {
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let dir = root_of(&temp).join("batch").unwrap();
    mgr.create_dir(&dir).unwrap();
    for i in 0..4 {
        mgr.create_file(&dir.join(&format!("f{i}")).unwrap()).unwrap().close().unwrap();
    }

    // No sharing at all keeps the file in place until the handle closes.
    let held = std::fs::OpenOptions::new()
        .read(true)
        .share_mode(0)
        .open(temp.path().join("batch").join("f2"))
        .unwrap();
    let err = mgr.delete(&dir, true).unwrap_err();
    assert!(matches!(err, FsError::DeleteIncomplete { ref failures, .. } if failures.len() == 1));
    drop(held);

    mgr.delete(&dir, true).unwrap();
    assert!(!temp.path().join("batch").exists());
}

#[test]
fn inheritance_block_and_restore() {
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let dir = root_of(&temp).join("secured").unwrap();
    mgr.create_dir(&dir).unwrap();

    let mut sd = mgr.get_access_control(&dir, AccessSections::default()).unwrap();
    let inherited = sd.inherited_rule_count();
    assert!(inherited > 0);
    sd.add_access_rule(
        AccessRule::allow(Principal::Sid(Sid::builtin_users()), FileRights::READ)
            .with_inheritance(InheritanceFlags::BOTH),
    );
    sd.set_protection(true, false);
    mgr.set_access_control(&dir, &sd, AccessSections::ACCESS).unwrap();

    let blocked = mgr.get_access_control(&dir, AccessSections::default()).unwrap();
    assert!(blocked.are_access_rules_protected());
    assert_eq!(blocked.inherited_rule_count(), 0);

    let mut sd = blocked;
    sd.set_protection(false, false);
    mgr.set_access_control(&dir, &sd, AccessSections::ACCESS).unwrap();
    let restored = mgr.get_access_control(&dir, AccessSections::default()).unwrap();
    assert!(!restored.are_access_rules_protected());
    assert_eq!(restored.inherited_rule_count(), inherited);
}

#[test]
fn alternate_data_streams() {
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let file = root_of(&temp).join("tagged.txt").unwrap();
    mgr.create_file(&file).unwrap().close().unwrap();

    mgr.write_stream(&file, "origin", b"download").unwrap();
    let streams = mgr.list_streams(&file).unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].name, "origin");
    assert_eq!(streams[0].size, 8);
    assert_eq!(mgr.read_stream(&file, "origin").unwrap(), b"download");
    mgr.remove_stream(&file, "origin").unwrap();
    assert!(mgr.list_streams(&file).unwrap().is_empty());
}
