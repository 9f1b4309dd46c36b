use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::backend::Backend;
use crate::common::error::FsResult;
use crate::common::path::FilesystemPath;
use crate::common::types::{EntrySnapshot, EntryStat};

pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;

/// Records when each path was last invalidated.
///
/// Generations only grow. A snapshot taken at generation `g` is stale once
/// its path or any ancestor has been invalidated after `g`. Forgetting an
/// entry raises `floor`, so evicted history reads as "stale" rather than
/// "fresh".
pub struct EntryCache {
    generation: AtomicU64,
    floor: AtomicU64,
    invalidated: RwLock<HashMap<String, u64>>,
    max_entries: usize,
}

impl EntryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            generation: AtomicU64::new(0),
            floor: AtomicU64::new(0),
            invalidated: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.invalidated
            .read()
            .expect("invalidated lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks `path` and everything below it as changed.
    pub fn invalidate(&self, path: &FilesystemPath) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut invalidated = self.invalidated.write().expect("invalidated lock poisoned");
        invalidated.insert(path.cache_key(), generation);
        self.evict_if_needed(&mut invalidated);
        log::trace!("invalidated {path} at generation {generation}");
        generation
    }

    pub fn invalidate_all<'a, I>(&self, paths: I)
    where
        I: IntoIterator<Item = &'a FilesystemPath>,
    {
        for path in paths {
            self.invalidate(path);
        }
    }

    pub fn is_stale(&self, path: &FilesystemPath, since: u64) -> bool {
        if self.floor.load(Ordering::SeqCst) > since {
            return true;
        }
        let invalidated = self.invalidated.read().expect("invalidated lock poisoned");
        path.ancestors().any(|ancestor| {
            invalidated
                .get(&ancestor.cache_key())
                .is_some_and(|generation| *generation > since)
        })
    }

    fn evict_if_needed(&self, invalidated: &mut HashMap<String, u64>) {
        while invalidated.len() > self.max_entries {
            let Some((key, generation)) = invalidated
                .iter()
                .min_by_key(|(_, generation)| **generation)
                .map(|(key, generation)| (key.clone(), *generation))
            else {
                return;
            };
            invalidated.remove(&key);
            self.floor.fetch_max(generation, Ordering::SeqCst);
        }
    }
}

impl Default for EntryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_MAX_ENTRIES)
    }
}

/// Explicit, possibly stale view of one entry.
///
/// `exists()` and `snapshot()` never touch the filesystem; only
/// `refresh()` does.
pub struct EntryHandle {
    path: FilesystemPath,
    cache_path: FilesystemPath,
    snapshot: EntrySnapshot,
    cache: Arc<EntryCache>,
}

impl EntryHandle {
    pub(crate) fn capture<B: Backend + ?Sized>(
        backend: &B,
        path: FilesystemPath,
        cache_path: FilesystemPath,
        cache: Arc<EntryCache>,
    ) -> FsResult<Self> {
        let snapshot = take_snapshot(backend, &path, &cache)?;
        Ok(Self {
            path,
            cache_path,
            snapshot,
            cache,
        })
    }

    pub fn path(&self) -> &FilesystemPath {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.snapshot.exists()
    }

    pub fn snapshot(&self) -> &EntrySnapshot {
        &self.snapshot
    }

    pub fn stat(&self) -> Option<&EntryStat> {
        self.snapshot.stat.as_ref()
    }

    /// True once anything invalidated this entry or an ancestor after the
    /// snapshot was taken.
    pub fn is_stale(&self) -> bool {
        self.cache.is_stale(&self.cache_path, self.snapshot.generation)
    }

    /// Re-queries the entry. On error the previous snapshot is kept.
    pub fn refresh<B: Backend + ?Sized>(&mut self, backend: &B) -> FsResult<()> {
        self.snapshot = take_snapshot(backend, &self.path, &self.cache)?;
        Ok(())
    }
}

impl std::fmt::Debug for EntryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryHandle")
            .field("path", &self.path)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

fn take_snapshot<B: Backend + ?Sized>(
    backend: &B,
    path: &FilesystemPath,
    cache: &EntryCache,
) -> FsResult<EntrySnapshot> {
    // Read the generation first so an invalidation racing the query leaves
    // the new snapshot stale.
    let generation = cache.current_generation();
    let stat = backend.query(path)?;
    Ok(EntrySnapshot {
        stat,
        generation,
        taken_at: SystemTime::now(),
    })
}
