//! Filesystem entries with cached existence, lifecycle operations and
//! portable access control, over Windows and Linux.

pub mod acl;
pub mod backend;
mod cache;
mod common;
mod config;
mod logging;
mod manager;
mod memory;
mod resolver;

#[cfg(target_os = "windows")]
mod windows_native;
#[cfg(target_os = "windows")]
pub use windows_native::WindowsBackend;
#[cfg(target_os = "windows")]
pub type PlatformBackend = WindowsBackend;

#[cfg(target_os = "linux")]
mod linux_native;
#[cfg(target_os = "linux")]
pub use linux_native::LinuxBackend;
#[cfg(target_os = "linux")]
pub type PlatformBackend = LinuxBackend;

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
compile_error!("entryfs only supports Windows and Linux targets.");

pub use crate::acl::{
    AccessKind, AccessRule, AccessRuleProtection, AccessSections, AuditRule, FileRights,
    InheritanceFlags, Principal, PropagationFlags, SecurityDescriptor, Sid,
};
pub use crate::backend::{Backend, DescriptorFamily, NativeDescriptor};
pub use crate::cache::{EntryCache, EntryHandle, DEFAULT_CACHE_MAX_ENTRIES};
pub use crate::common::error::{DeleteFailure, FsError, FsResult, Operation, PathProblem};
pub use crate::common::path::{FilesystemPath, RootKind};
pub use crate::common::types::*;
pub use crate::config::ManagerConfig;
pub use crate::logging::{
    log_disable, log_set_callback, log_set_level, log_set_stderr, LogCallback, LogInstallError,
    LogRecord,
};
pub use crate::manager::EntryManager;
pub use crate::memory::MemoryBackend;
pub use crate::resolver::{PathResolver, RootMapping, UncShare};
