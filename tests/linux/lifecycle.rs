use std::ffi::OsStr;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;

use entryfs::{
    EntryManager, FilesystemPath, FsError, LinuxBackend, ManagerConfig, PathProblem, RootMapping,
};

fn root_of(dir: &tempfile::TempDir) -> FilesystemPath {
    FilesystemPath::parse(dir.path().to_str().unwrap()).unwrap()
}

#[test]
fn refresh_tracks_create_and_delete() {
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let file = root_of(&temp).join("created.txt").unwrap();

    let mut handle = mgr.open(&file).unwrap();
    assert!(!handle.exists());

    let mut writer = mgr.create_file(&file).unwrap();
    writer.write_all(b"hello").unwrap();
    assert!(!handle.exists());
    handle.refresh(mgr.backend()).unwrap();
    assert!(handle.exists());
    writer.close().unwrap();
    assert!(handle.exists());

    mgr.delete(&file, false).unwrap();
    assert!(handle.exists());
    handle.refresh(mgr.backend()).unwrap();
    assert!(!handle.exists());
}

#[test]
fn recursive_delete_removes_tree() {
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let top = root_of(&temp).join("top").unwrap();
    let deep = top.join("a/b/c").unwrap();
    mgr.create_dir(&deep).unwrap();
    for name in ["one", "two"] {
        mgr.create_file(&deep.join(name).unwrap()).unwrap().close().unwrap();
    }

    assert!(matches!(
        mgr.delete(&top, false),
        Err(FsError::DirectoryNotEmpty { .. })
    ));
    mgr.delete(&top, true).unwrap();
    assert!(!temp.path().join("top").exists());
}

#[test]
fn backslash_names_stay_inside_the_deleted_tree() {
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let tree = root_of(&temp).join("a/tree").unwrap();
    mgr.create_dir(&tree).unwrap();
    std::fs::write(temp.path().join("victim"), b"outside").unwrap();
    std::fs::write(temp.path().join("a/tree").join("..\\..\\victim"), b"inside").unwrap();

    let listed = mgr.read_dir(&tree).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].parent().unwrap(), tree);

    mgr.delete(&tree, true).unwrap();
    assert!(!temp.path().join("a/tree").exists());
    assert_eq!(std::fs::read(temp.path().join("victim")).unwrap(), b"outside");
}

#[test]
fn undecodable_names_are_reported_and_siblings_removed() {
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let dir = root_of(&temp).join("mixed").unwrap();
    mgr.create_dir(&dir).unwrap();
    for name in ["one.txt", "two.txt"] {
        mgr.create_file(&dir.join(name).unwrap()).unwrap().close().unwrap();
    }
    let raw = temp.path().join("mixed").join(OsStr::from_bytes(b"bad\xff"));
    if std::fs::write(&raw, b"x").is_err() {
        // Filesystem insists on UTF-8 names.
        return;
    }

    let err = mgr.delete(&dir, true).unwrap_err();
    let FsError::DeleteIncomplete { failures, .. } = &err else {
        panic!("expected DeleteIncomplete, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].path, dir);
    assert!(matches!(
        failures[0].error,
        FsError::InvalidPath {
            problem: PathProblem::NotUtf8,
            ..
        }
    ));
    assert!(raw.exists());
    assert!(!temp.path().join("mixed/one.txt").exists());
    assert!(!temp.path().join("mixed/two.txt").exists());
}

#[test]
fn recursive_delete_continues_past_read_only_directory() {
    // Root ignores directory permissions.
    if unsafe { libc::geteuid() } == 0 {
        return;
    }
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let batch = root_of(&temp).join("batch").unwrap();
    let locked = batch.join("locked").unwrap();
    mgr.create_dir(&locked).unwrap();
    mgr.create_file(&locked.join("inner.txt").unwrap()).unwrap().close().unwrap();
    for i in 0..4 {
        mgr.create_file(&batch.join(&format!("f{i}")).unwrap()).unwrap().close().unwrap();
    }
    let locked_native = temp.path().join("batch/locked");
    std::fs::set_permissions(&locked_native, std::fs::Permissions::from_mode(0o500)).unwrap();

    let result = mgr.delete(&batch, true);
    std::fs::set_permissions(&locked_native, std::fs::Permissions::from_mode(0o700)).unwrap();

    let err = result.unwrap_err();
    let FsError::DeleteIncomplete { failures, .. } = &err else {
        panic!("expected DeleteIncomplete, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(err.first_failure().unwrap().path, locked.join("inner.txt").unwrap());
    assert!(matches!(failures[0].error, FsError::AccessDenied { .. }));
    for i in 0..4 {
        assert!(!temp.path().join(format!("batch/f{i}")).exists());
    }
    assert!(locked_native.join("inner.txt").exists());
}

#[test]
fn symlinked_directories_are_not_followed() {
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let root = root_of(&temp);
    let target = root.join("target").unwrap();
    mgr.create_dir(&target).unwrap();
    mgr.create_file(&target.join("keep.txt").unwrap()).unwrap().close().unwrap();
    std::os::unix::fs::symlink(temp.path().join("target"), temp.path().join("link")).unwrap();

    mgr.delete(&root.join("link").unwrap(), true).unwrap();
    assert!(temp.path().join("target/keep.txt").exists());
}

#[test]
fn unc_paths_go_through_the_mapping() {
    let temp = tempfile::tempdir().unwrap();
    let local = temp.path().to_str().unwrap();
    let mapping = RootMapping::empty().with_entry(local, "\\\\fileserver\\scratch").unwrap();
    let mgr = EntryManager::new(LinuxBackend::new(mapping.clone()), ManagerConfig::default().with_root_mapping(mapping));

    let unc = mgr.resolve(&format!("{local}/shared.txt"), true).unwrap();
    assert_eq!(unc.to_string(), "\\\\fileserver\\scratch\\shared.txt");
    let mut local_handle = mgr.open(&root_of(&temp).join("shared.txt").unwrap()).unwrap();

    mgr.create_file(&unc).unwrap().close().unwrap();
    assert!(temp.path().join("shared.txt").exists());
    assert!(local_handle.is_stale());
    mgr.refresh(&mut local_handle).unwrap();
    assert!(local_handle.exists());
}

#[test]
fn move_and_copy() {
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let root = root_of(&temp);
    let a = root.join("a.txt").unwrap();
    let b = root.join("b.txt").unwrap();
    let mut writer = mgr.create_file(&a).unwrap();
    writer.write_all(b"abc").unwrap();
    writer.close().unwrap();

    assert_eq!(mgr.copy_file(&a, &b, false).unwrap(), 3);
    assert!(matches!(mgr.copy_file(&a, &b, false), Err(FsError::AlreadyExists { .. })));
    assert!(matches!(mgr.move_entry(&a, &b), Err(FsError::AlreadyExists { .. })));
    assert_eq!(mgr.read_file(&a).unwrap(), b"abc");
    mgr.delete(&b, false).unwrap();
    mgr.move_entry(&a, &b).unwrap();
    assert_eq!(mgr.read_file(&b).unwrap(), b"abc");
    assert_eq!(mgr.read_dir(&root).unwrap(), vec![b]);
}

#[test]
fn streams_use_user_attributes() {
    let temp = tempfile::tempdir().unwrap();
    let mgr = EntryManager::native(ManagerConfig::default());
    let file = root_of(&temp).join("tagged").unwrap();
    mgr.create_file(&file).unwrap().close().unwrap();

    match mgr.write_stream(&file, "origin", b"download") {
        Ok(()) => {}
        // Filesystems without user xattrs.
        Err(FsError::NativeOperation { .. }) => return,
        Err(err) => panic!("unexpected error: {err}"),
    }
    let streams = mgr.list_streams(&file).unwrap();
    assert!(streams.iter().any(|s| s.name == "origin" && s.size == 8));
    assert_eq!(mgr.read_stream(&file, "origin").unwrap(), b"download");
    mgr.remove_stream(&file, "origin").unwrap();
    assert!(matches!(
        mgr.remove_stream(&file, "origin"),
        Err(FsError::PathNotFound { .. })
    ));
}
