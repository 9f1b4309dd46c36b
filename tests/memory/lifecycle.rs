use std::io::Write;

use entryfs::{
    Backend, CreateMode, EntryManager, FilesystemPath, FsError, ManagerConfig, MemoryBackend,
    MoveOptions, PathProblem,
};

fn manager() -> EntryManager<MemoryBackend> {
    EntryManager::new(MemoryBackend::new(), ManagerConfig::default())
}

fn path(raw: &str) -> FilesystemPath {
    FilesystemPath::parse(raw).unwrap()
}

fn write_file(mgr: &EntryManager<MemoryBackend>, file: &FilesystemPath, data: &[u8]) {
    let mut writer = mgr.create_file(file).unwrap();
    writer.write_all(data).unwrap();
    writer.close().unwrap();
}

#[test]
fn create_dir_builds_missing_ancestors() {
    let mgr = manager();
    let deep = path("C:\\a\\b\\c");
    mgr.create_dir(&deep).unwrap();
    for dir in ["C:\\a", "C:\\a\\b", "C:\\a\\b\\c"] {
        assert!(mgr.backend().query(&path(dir)).unwrap().unwrap().is_dir());
    }
    // Opening an existing directory is fine by default.
    mgr.create_dir(&deep).unwrap();
    assert!(matches!(
        mgr.create_dir_with(&deep, CreateMode::CreateNew),
        Err(FsError::AlreadyExists { .. })
    ));
}

#[test]
fn create_dir_through_a_file_fails() {
    let mgr = manager();
    write_file(&mgr, &path("C:\\plain"), b"x");
    assert!(matches!(
        mgr.create_dir(&path("C:\\plain\\sub")),
        Err(FsError::NotADirectory { .. })
    ));
    assert!(matches!(
        mgr.create_dir(&path("C:\\plain")),
        Err(FsError::AlreadyExists { .. })
    ));
}

#[test]
fn create_file_respects_mode() {
    let mgr = manager();
    let file = path("C:\\notes.txt");
    write_file(&mgr, &file, b"first");
    write_file(&mgr, &file, b"second");
    assert_eq!(mgr.read_file(&file).unwrap(), b"second");

    assert!(matches!(
        mgr.create_file_with(&file, CreateMode::CreateNew),
        Err(FsError::AlreadyExists { .. })
    ));
    assert!(matches!(
        mgr.create_file(&path("C:\\missing\\notes.txt")),
        Err(FsError::PathNotFound { .. })
    ));
}

#[test]
fn delete_missing_entry() {
    let mgr = manager();
    let ghost = path("C:\\ghost");
    assert!(matches!(mgr.delete(&ghost, false), Err(FsError::PathNotFound { .. })));
    assert!(!mgr.delete_if_exists(&ghost, true).unwrap());

    write_file(&mgr, &ghost, b"boo");
    assert!(mgr.delete_if_exists(&ghost, false).unwrap());
}

#[test]
fn non_recursive_delete_of_populated_directory() {
    let mgr = manager();
    mgr.create_dir(&path("C:\\full")).unwrap();
    write_file(&mgr, &path("C:\\full\\f"), b"");
    assert!(matches!(
        mgr.delete(&path("C:\\full"), false),
        Err(FsError::DirectoryNotEmpty { .. })
    ));
    mgr.delete(&path("C:\\full"), true).unwrap();
    assert!(mgr.backend().query(&path("C:\\full")).unwrap().is_none());
}

#[test]
fn recursive_delete_continues_past_locked_child() {
    let mgr = manager();
    let dir = path("C:\\batch");
    mgr.create_dir(&dir).unwrap();
    mgr.create_dir(&path("C:\\batch\\nested")).unwrap();
    for i in 0..5 {
        write_file(&mgr, &dir.join(&format!("file{i}.txt")).unwrap(), b"data");
    }
    write_file(&mgr, &path("C:\\batch\\nested\\inner.txt"), b"data");

    let locked = path("C:\\batch\\file3.txt");
    mgr.backend().lock(&locked).unwrap();

    let err = mgr.delete(&dir, true).unwrap_err();
    let FsError::DeleteIncomplete { failures, .. } = &err else {
        panic!("expected DeleteIncomplete, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(err.first_failure().unwrap().path, locked);
    assert!(matches!(failures[0].error, FsError::AccessDenied { .. }));

    // Everything but the locked file and its parent is gone.
    let remaining = mgr.read_dir(&dir).unwrap();
    assert_eq!(remaining, vec![locked.clone()]);

    mgr.backend().unlock(&locked).unwrap();
    mgr.delete(&dir, true).unwrap();
    assert!(mgr.backend().query(&dir).unwrap().is_none());
}

#[test]
fn move_within_a_volume_renames_subtree() {
    let mgr = manager();
    mgr.create_dir(&path("C:\\src\\deep")).unwrap();
    write_file(&mgr, &path("C:\\src\\deep\\f.txt"), b"moved");

    mgr.move_entry(&path("C:\\src"), &path("C:\\dst")).unwrap();
    assert!(mgr.backend().query(&path("C:\\src")).unwrap().is_none());
    assert_eq!(mgr.read_file(&path("C:\\dst\\deep\\f.txt")).unwrap(), b"moved");
}

#[test]
fn move_across_volumes_needs_copy_permission() {
    let mgr = manager();
    let from = path("C:\\payload");
    let to = path("D:\\payload");
    mgr.create_dir(&from).unwrap();
    write_file(&mgr, &path("C:\\payload\\a.bin"), b"abc");

    assert!(matches!(
        mgr.move_entry(&from, &to),
        Err(FsError::CrossVolume { .. })
    ));
    assert!(mgr.backend().query(&from).unwrap().is_some());

    let options = MoveOptions {
        allow_copy: true,
        ..MoveOptions::default()
    };
    mgr.move_entry_with(&from, &to, options).unwrap();
    assert!(mgr.backend().query(&from).unwrap().is_none());
    assert_eq!(mgr.read_file(&path("D:\\payload\\a.bin")).unwrap(), b"abc");
}

#[test]
fn move_onto_existing_file_needs_replace() {
    let mgr = manager();
    let a = path("C:\\a.txt");
    let b = path("C:\\b.txt");
    write_file(&mgr, &a, b"a");
    write_file(&mgr, &b, b"b");
    assert!(matches!(mgr.move_entry(&a, &b), Err(FsError::AlreadyExists { .. })));

    let options = MoveOptions {
        replace_existing: true,
        ..MoveOptions::default()
    };
    mgr.move_entry_with(&a, &b, options).unwrap();
    assert_eq!(mgr.read_file(&b).unwrap(), b"a");
}

#[test]
fn copy_file_reports_bytes() {
    let mgr = manager();
    write_file(&mgr, &path("C:\\orig"), b"12345");
    assert_eq!(mgr.copy_file(&path("C:\\orig"), &path("C:\\copy"), false).unwrap(), 5);
    assert!(matches!(
        mgr.copy_file(&path("C:\\orig"), &path("C:\\copy"), false),
        Err(FsError::AlreadyExists { .. })
    ));
}

#[test]
fn streams_live_alongside_the_entry() {
    let mgr = manager();
    let file = path("C:\\tagged.txt");
    write_file(&mgr, &file, b"main");

    mgr.write_stream(&file, "Zone.Identifier", b"[ZoneTransfer]").unwrap();
    mgr.write_stream(&file, "meta", b"{}").unwrap();
    let streams = mgr.list_streams(&file).unwrap();
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[0].name, "Zone.Identifier");
    assert_eq!(streams[0].size, 14);
    assert_eq!(mgr.read_stream(&file, "meta").unwrap(), b"{}");
    assert_eq!(mgr.read_file(&file).unwrap(), b"main");

    mgr.remove_stream(&file, "meta").unwrap();
    assert!(matches!(
        mgr.read_stream(&file, "meta"),
        Err(FsError::PathNotFound { .. })
    ));
    assert!(matches!(
        mgr.write_stream(&file, "bad:name", b""),
        Err(FsError::InvalidPath {
            problem: PathProblem::InvalidCharacter(':'),
            ..
        })
    ));
}
