use std::sync::Arc;

use crate::acl::{translator, AccessSections, SecurityDescriptor};
use crate::backend::Backend;
use crate::cache::{EntryCache, EntryHandle};
use crate::common::error::{DeleteFailure, FsError, FsResult, PathProblem};
use crate::common::path::FilesystemPath;
use crate::common::types::{CreateMode, EntryStat, EntryWriter, MoveOptions, StreamInfo};
use crate::config::ManagerConfig;
use crate::resolver::PathResolver;

/// Creates, deletes, moves and secures entries on top of a [`Backend`],
/// keeping cached handles informed of every change it makes.
pub struct EntryManager<B: Backend> {
    backend: B,
    resolver: PathResolver,
    cache: Arc<EntryCache>,
    config: ManagerConfig,
}

impl<B: Backend> EntryManager<B> {
    pub fn new(backend: B, config: ManagerConfig) -> Self {
        Self {
            backend,
            resolver: PathResolver::new(config.root_mapping.clone()),
            cache: Arc::new(EntryCache::new(config.cache_max_entries)),
            config,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<EntryCache> {
        &self.cache
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn resolve(&self, raw: &str, is_network: bool) -> FsResult<FilesystemPath> {
        self.resolver.resolve(raw, is_network)
    }

    /// Captures a handle. A missing entry is not an error.
    pub fn open(&self, path: &FilesystemPath) -> FsResult<EntryHandle> {
        EntryHandle::capture(
            &self.backend,
            path.clone(),
            self.resolver.cache_path(path),
            Arc::clone(&self.cache),
        )
    }

    pub fn refresh(&self, handle: &mut EntryHandle) -> FsResult<()> {
        handle.refresh(&self.backend)
    }

    pub fn create_dir(&self, path: &FilesystemPath) -> FsResult<()> {
        self.create_dir_with(path, self.config.create_mode)
    }

    /// Creates `path` and any missing ancestors.
    pub fn create_dir_with(&self, path: &FilesystemPath, mode: CreateMode) -> FsResult<()> {
        if let Some(stat) = self.backend.query(path)? {
            if stat.is_dir() && mode == CreateMode::OpenOrCreate {
                return Ok(());
            }
            return Err(FsError::AlreadyExists {
                path: path.to_string(),
            });
        }

        let mut missing = vec![path.clone()];
        let mut cursor = path.parent();
        while let Some(dir) = cursor {
            match self.backend.query(&dir)? {
                Some(stat) if stat.is_dir() => break,
                Some(_) => {
                    return Err(FsError::NotADirectory {
                        path: dir.to_string(),
                    })
                }
                None => {
                    cursor = dir.parent();
                    missing.push(dir);
                }
            }
        }

        for dir in missing.iter().rev() {
            log::debug!("creating directory {dir}");
            match self.backend.create_dir(dir) {
                Ok(()) => {}
                // Someone else created an ancestor in the meantime.
                Err(FsError::AlreadyExists { .. }) if dir != path => {}
                Err(err) => return Err(err),
            }
            self.invalidate(dir);
        }
        Ok(())
    }

    pub fn create_file(&self, path: &FilesystemPath) -> FsResult<EntryWriter> {
        self.create_file_with(path, self.config.create_mode)
    }

    /// Creates or truncates a file and returns a writer for it. The parent
    /// directory must exist.
    pub fn create_file_with(&self, path: &FilesystemPath, mode: CreateMode) -> FsResult<EntryWriter> {
        if let Some(stat) = self.backend.query(path)? {
            if stat.is_dir() || mode == CreateMode::CreateNew {
                return Err(FsError::AlreadyExists {
                    path: path.to_string(),
                });
            }
        }
        log::debug!("creating file {path} ({mode:?})");
        let writer = self.backend.create_file(path, mode == CreateMode::CreateNew)?;
        self.invalidate(path);
        Ok(writer)
    }

    /// Deletes a file or directory. A recursive delete keeps going past
    /// children it cannot remove and reports all of them in
    /// [`FsError::DeleteIncomplete`].
    pub fn delete(&self, path: &FilesystemPath, recursive: bool) -> FsResult<()> {
        let stat = self.backend.query(path)?.ok_or_else(|| FsError::PathNotFound {
            path: path.to_string(),
        })?;
        let result = if stat.is_dir() && !stat.is_link_like() && recursive {
            let mut failures = Vec::new();
            match self.delete_tree(path, &mut failures) {
                Ok(()) if failures.is_empty() => Ok(()),
                Ok(()) => Err(FsError::DeleteIncomplete {
                    path: path.to_string(),
                    failures,
                }),
                Err(err) => Err(err),
            }
        } else {
            self.remove_one(path, &stat)
        };
        self.invalidate(path);
        result
    }

    /// Like [`Self::delete`], but a missing target counts as success.
    /// Returns whether anything was removed.
    pub fn delete_if_exists(&self, path: &FilesystemPath, recursive: bool) -> FsResult<bool> {
        match self.delete(path, recursive) {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn remove_one(&self, path: &FilesystemPath, stat: &EntryStat) -> FsResult<()> {
        if stat.is_dir() {
            log::trace!("removing directory {path}");
            self.backend.remove_dir(path)
        } else {
            log::trace!("removing file {path}");
            self.backend.remove_file(path)
        }
    }

    fn delete_tree(&self, dir: &FilesystemPath, failures: &mut Vec<DeleteFailure>) -> FsResult<()> {
        let before = failures.len();
        for entry in self.backend.read_dir(dir)? {
            // An entry that cannot be named cannot be removed; the directory
            // stays and the entry is reported against it.
            let child = match entry.and_then(|name| dir.child(&name)) {
                Ok(child) => child,
                Err(err) => {
                    log::warn!("could not delete an entry of {dir}: {err}");
                    failures.push(DeleteFailure {
                        path: dir.clone(),
                        error: err,
                    });
                    continue;
                }
            };
            match self.delete_child(&child, failures) {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {
                    log::trace!("{child} vanished during delete");
                }
                Err(err) if err.is_recoverable() => {
                    log::warn!("could not delete {child}: {err}");
                    failures.push(DeleteFailure { path: child, error: err });
                }
                Err(err) => return Err(err),
            }
        }
        if failures.len() > before {
            return Ok(());
        }
        self.backend.remove_dir(dir)
    }

    fn delete_child(&self, child: &FilesystemPath, failures: &mut Vec<DeleteFailure>) -> FsResult<()> {
        let Some(stat) = self.backend.query(child)? else {
            return Ok(());
        };
        if stat.is_dir() && !stat.is_link_like() {
            self.delete_tree(child, failures)
        } else {
            self.remove_one(child, &stat)
        }
    }

    pub fn move_entry(&self, from: &FilesystemPath, to: &FilesystemPath) -> FsResult<()> {
        self.move_entry_with(from, to, self.config.move_options)
    }

    /// Renames `from` to `to`. Across volumes this fails with
    /// [`FsError::CrossVolume`] unless `allow_copy` is set.
    pub fn move_entry_with(
        &self,
        from: &FilesystemPath,
        to: &FilesystemPath,
        options: MoveOptions,
    ) -> FsResult<()> {
        let stat = self.backend.query(from)?.ok_or_else(|| FsError::PathNotFound {
            path: from.to_string(),
        })?;
        log::debug!("moving {from} to {to}");
        let result = match self.backend.rename(from, to, options.replace_existing) {
            Err(FsError::CrossVolume { .. }) if options.allow_copy => {
                log::debug!("{from} and {to} are on different volumes; copying");
                self.copy_tree(from, to, &stat, options.replace_existing)
                    .and_then(|()| self.delete(from, true))
            }
            other => other,
        };
        self.invalidate(from);
        self.invalidate(to);
        result
    }

    fn copy_tree(
        &self,
        from: &FilesystemPath,
        to: &FilesystemPath,
        stat: &EntryStat,
        overwrite: bool,
    ) -> FsResult<()> {
        if !stat.is_dir() {
            self.backend.copy_file(from, to, overwrite)?;
            return Ok(());
        }
        let mode = if overwrite {
            CreateMode::OpenOrCreate
        } else {
            CreateMode::CreateNew
        };
        self.create_dir_with(to, mode)?;
        for entry in self.backend.read_dir(from)? {
            let name = entry?;
            let child = from.child(&name)?;
            let Some(child_stat) = self.backend.query(&child)? else {
                continue;
            };
            self.copy_tree(&child, &to.child(&name)?, &child_stat, overwrite)?;
        }
        Ok(())
    }

    /// Copies a file and returns the number of bytes copied.
    pub fn copy_file(&self, from: &FilesystemPath, to: &FilesystemPath, overwrite: bool) -> FsResult<u64> {
        let copied = self.backend.copy_file(from, to, overwrite)?;
        self.invalidate(to);
        Ok(copied)
    }

    /// Children of `path`, sorted.
    pub fn read_dir(&self, path: &FilesystemPath) -> FsResult<Vec<FilesystemPath>> {
        let mut children = self
            .backend
            .read_dir(path)?
            .into_iter()
            .map(|entry| entry.and_then(|name| path.child(&name)))
            .collect::<FsResult<Vec<_>>>()?;
        children.sort();
        Ok(children)
    }

    pub fn read_file(&self, path: &FilesystemPath) -> FsResult<Vec<u8>> {
        self.backend.read_file(path)
    }

    pub fn get_access_control(
        &self,
        path: &FilesystemPath,
        sections: AccessSections,
    ) -> FsResult<SecurityDescriptor> {
        translator::read(&self.backend, path, sections)
    }

    pub fn set_access_control(
        &self,
        path: &FilesystemPath,
        descriptor: &SecurityDescriptor,
        sections: AccessSections,
    ) -> FsResult<()> {
        let result = translator::write(&self.backend, path, descriptor, sections);
        self.invalidate(path);
        result
    }

    /// Compares two descriptors with principals resolved to account names.
    pub fn equivalent(&self, a: &SecurityDescriptor, b: &SecurityDescriptor) -> bool {
        a.equivalent(b, |principal| self.backend.account_name(principal))
    }

    pub fn list_streams(&self, path: &FilesystemPath) -> FsResult<Vec<StreamInfo>> {
        self.backend.list_streams(path)
    }

    pub fn read_stream(&self, path: &FilesystemPath, name: &str) -> FsResult<Vec<u8>> {
        validate_stream_name(name)?;
        self.backend.read_stream(path, name)
    }

    pub fn write_stream(&self, path: &FilesystemPath, name: &str, data: &[u8]) -> FsResult<()> {
        validate_stream_name(name)?;
        let result = self.backend.write_stream(path, name, data);
        self.invalidate(path);
        result
    }

    pub fn remove_stream(&self, path: &FilesystemPath, name: &str) -> FsResult<()> {
        validate_stream_name(name)?;
        let result = self.backend.remove_stream(path, name);
        self.invalidate(path);
        result
    }

    fn invalidate(&self, path: &FilesystemPath) {
        self.cache.invalidate(&self.resolver.cache_path(path));
    }
}

#[cfg(any(target_os = "linux", target_os = "windows"))]
impl EntryManager<crate::PlatformBackend> {
    /// A manager over the native filesystem of the current platform.
    pub fn native(config: ManagerConfig) -> Self {
        let backend = crate::PlatformBackend::new(config.root_mapping.clone());
        Self::new(backend, config)
    }
}

fn validate_stream_name(name: &str) -> FsResult<()> {
    if name.is_empty() {
        return Err(FsError::invalid_path(name, PathProblem::Empty));
    }
    if name.len() > 255 {
        return Err(FsError::invalid_path(name, PathProblem::ComponentTooLong));
    }
    if let Some(ch) = name
        .chars()
        .find(|ch| matches!(ch, ':' | '/' | '\\' | '\0'))
    {
        return Err(FsError::invalid_path(name, PathProblem::InvalidCharacter(ch)));
    }
    Ok(())
}
