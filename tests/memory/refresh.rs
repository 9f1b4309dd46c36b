use std::io::Write;

use entryfs::{EntryManager, FilesystemPath, ManagerConfig, MemoryBackend};

fn manager() -> EntryManager<MemoryBackend> {
    EntryManager::new(MemoryBackend::new(), ManagerConfig::default())
}

fn path(raw: &str) -> FilesystemPath {
    FilesystemPath::parse(raw).unwrap()
}

/// Runs the same scenario against the local and the admin-share form.
fn for_both_forms(local: &str, check: impl Fn(&EntryManager<MemoryBackend>, FilesystemPath)) {
    let mgr = manager();
    check(&mgr, path(local));

    let mgr = manager();
    let unc = mgr.resolve(local, true).unwrap();
    assert!(unc.is_network());
    check(&mgr, unc);
}

#[test]
fn exists_is_stale_until_refresh_after_create() {
    for_both_forms("C:\\work\\created.txt", |mgr, file| {
        mgr.create_dir(&file.parent().unwrap()).unwrap();
        let mut handle = mgr.open(&file).unwrap();
        assert!(!handle.exists());

        let writer = mgr.create_file(&file).unwrap();
        assert!(!handle.exists(), "handle must not re-query on its own");
        assert!(handle.is_stale());

        handle.refresh(mgr.backend()).unwrap();
        assert!(handle.exists());
        assert!(!handle.is_stale());

        writer.close().unwrap();
        assert!(handle.exists(), "closing the writer keeps the entry");
    });
}

#[test]
fn exists_stays_true_after_delete_until_refresh() {
    for_both_forms("C:\\work\\doomed.txt", |mgr, file| {
        mgr.create_dir(&file.parent().unwrap()).unwrap();
        let mut writer = mgr.create_file(&file).unwrap();
        writer.write_all(b"payload").unwrap();
        writer.close().unwrap();

        let mut handle = mgr.open(&file).unwrap();
        assert!(handle.exists());
        assert_eq!(handle.stat().unwrap().len, 7);

        mgr.delete(&file, false).unwrap();
        assert!(handle.exists());
        assert!(handle.is_stale());

        mgr.refresh(&mut handle).unwrap();
        assert!(!handle.exists());
    });
}

#[test]
fn local_and_network_handles_share_invalidations() {
    let mgr = manager();
    let local = path("C:\\share\\doc.txt");
    let unc = mgr.resolve("C:\\share\\doc.txt", true).unwrap();
    mgr.create_dir(&local.parent().unwrap()).unwrap();

    let unc_handle = mgr.open(&unc).unwrap();
    mgr.create_file(&local).unwrap().close().unwrap();
    assert!(unc_handle.is_stale());

    let mut local_handle = mgr.open(&local).unwrap();
    mgr.delete(&unc, false).unwrap();
    assert!(local_handle.is_stale());
    local_handle.refresh(mgr.backend()).unwrap();
    assert!(!local_handle.exists());
}

#[test]
fn deleting_a_directory_stales_handles_below_it() {
    let mgr = manager();
    let dir = path("C:\\tree");
    let leaf = path("C:\\tree\\a\\leaf.txt");
    mgr.create_dir(&leaf.parent().unwrap()).unwrap();
    mgr.create_file(&leaf).unwrap().close().unwrap();

    let mut handle = mgr.open(&leaf).unwrap();
    assert!(!handle.is_stale());
    mgr.delete(&dir, true).unwrap();
    assert!(handle.is_stale());
    assert!(handle.exists());
    handle.refresh(mgr.backend()).unwrap();
    assert!(!handle.exists());
}

#[test]
fn failed_refresh_keeps_previous_snapshot() {
    let mgr = manager();
    let file = path("C:\\guarded.txt");
    mgr.create_file(&file).unwrap().close().unwrap();
    let mut handle = mgr.open(&file).unwrap();
    let generation = handle.snapshot().generation;

    mgr.backend().deny_query(&file).unwrap();
    assert!(handle.refresh(mgr.backend()).is_err());
    assert!(handle.exists());
    assert_eq!(handle.snapshot().generation, generation);

    mgr.backend().clear_faults();
    handle.refresh(mgr.backend()).unwrap();
    assert!(handle.exists());
}
