use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use entryfs::{
    log_disable, log_set_callback, log_set_level, EntryManager, FilesystemPath, LogLevel,
    ManagerConfig, MemoryBackend,
};

static LOG_MUTEX: Mutex<()> = Mutex::new(());
const TARGET: &str = "entryfs::logging_test";

fn counting_callback(level: LogLevel) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    log_set_callback(
        move |record| {
            if record.target == TARGET {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        },
        level,
    )
    .unwrap();
    count
}

#[test]
fn logging_callback_receives_records() {
    let _guard = LOG_MUTEX.lock().unwrap();
    log_disable();

    let count = counting_callback(LogLevel::Info);
    log::info!(target: TARGET, "logging smoke test");
    log::debug!(target: TARGET, "debug should be filtered");
    assert_eq!(count.load(Ordering::SeqCst), 1);

    log_set_level(LogLevel::Debug);
    log::debug!(target: TARGET, "now visible");
    assert_eq!(count.load(Ordering::SeqCst), 2);

    log_disable();
}

#[test]
fn logging_level_off_suppresses_records() {
    let _guard = LOG_MUTEX.lock().unwrap();
    log_disable();

    let count = counting_callback(LogLevel::Off);
    log::error!(target: TARGET, "should not be seen");
    assert_eq!(count.load(Ordering::SeqCst), 0);

    log_disable();
}

#[test]
fn manager_operations_are_logged() {
    let _guard = LOG_MUTEX.lock().unwrap();
    log_disable();

    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    log_set_callback(
        move |record| {
            if record.target.starts_with("entryfs::manager") {
                sink.lock().unwrap().push(record.message.to_string());
            }
        },
        LogLevel::Debug,
    )
    .unwrap();

    let mgr = EntryManager::new(MemoryBackend::new(), ManagerConfig::default());
    mgr.create_dir(&FilesystemPath::parse("C:\\logged").unwrap()).unwrap();
    log_disable();

    let lines = lines.lock().unwrap();
    assert!(lines.iter().any(|line| line.contains("creating directory C:\\logged")));
}
