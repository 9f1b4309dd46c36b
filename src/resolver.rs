use std::path::Path;

use crate::common::error::{FsError, FsResult, Operation, PathProblem};
use crate::common::path::{parse_path_str, FilesystemPath, RootKind};

/// A `\\server\share` pair. Names compare case-insensitively.
#[derive(Debug, Clone)]
pub struct UncShare {
    server: String,
    share: String,
}

impl UncShare {
    pub fn parse(raw: &str) -> FsResult<Self> {
        let path = FilesystemPath::parse(raw)?;
        match path.root() {
            RootKind::Unc { server, share } if path.is_root() => Ok(Self {
                server: server.clone(),
                share: share.clone(),
            }),
            _ => Err(FsError::invalid_path(raw, PathProblem::MalformedUnc)),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn share(&self) -> &str {
        &self.share
    }

    fn matches(&self, server: &str, share: &str) -> bool {
        self.server.eq_ignore_ascii_case(server) && self.share.eq_ignore_ascii_case(share)
    }

    fn root(&self) -> RootKind {
        RootKind::Unc {
            server: self.server.clone(),
            share: self.share.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct MappingEntry {
    local: FilesystemPath,
    unc: UncShare,
}

/// Translates between local roots and the UNC shares that expose them.
///
/// Explicit entries map a drive root or a POSIX directory to a share; the
/// longest matching local prefix wins. An admin-share host additionally maps
/// every drive `X:` to `\\host\X$`.
#[derive(Debug, Clone)]
pub struct RootMapping {
    entries: Vec<MappingEntry>,
    admin_share_host: Option<String>,
}

impl Default for RootMapping {
    fn default() -> Self {
        Self::admin_shares("localhost")
    }
}

impl RootMapping {
    /// A mapping with no entries. Every conversion fails.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            admin_share_host: None,
        }
    }

    pub fn admin_shares(host: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            admin_share_host: Some(host.into()),
        }
    }

    pub fn with_admin_share_host(mut self, host: impl Into<String>) -> Self {
        self.admin_share_host = Some(host.into());
        self
    }

    /// Maps `local` (a drive root such as `D:\` or an absolute directory)
    /// to `unc` (`\\server\share`).
    pub fn with_entry(mut self, local: &str, unc: &str) -> FsResult<Self> {
        let local = FilesystemPath::parse(local)?;
        if local.is_network() {
            return Err(FsError::UnsupportedConversion {
                path: local.to_string(),
                reason: "mapping source must be a local path".to_string(),
            });
        }
        let unc = UncShare::parse(unc)?;
        self.entries.retain(|entry| entry.local.cache_key() != local.cache_key());
        self.entries.push(MappingEntry { local, unc });
        Ok(self)
    }

    pub fn to_unc(&self, path: &FilesystemPath) -> FsResult<FilesystemPath> {
        if path.is_network() {
            return Ok(path.clone());
        }
        if path.components().iter().any(|component| component.contains('\\')) {
            return Err(FsError::UnsupportedConversion {
                path: path.to_string(),
                reason: "a component contains `\\`, which separates UNC components".to_string(),
            });
        }

        let best = self
            .entries
            .iter()
            .filter(|entry| prefix_matches(path, &entry.local))
            .max_by_key(|entry| entry.local.components().len());
        if let Some(entry) = best {
            let rest = path.components()[entry.local.components().len()..].to_vec();
            return Ok(FilesystemPath::from_parts(entry.unc.root(), rest));
        }

        if let (RootKind::Drive(drive), Some(host)) = (path.root(), &self.admin_share_host) {
            let root = RootKind::Unc {
                server: host.clone(),
                share: format!("{drive}$"),
            };
            return Ok(FilesystemPath::from_parts(root, path.components().to_vec()));
        }

        Err(FsError::UnsupportedConversion {
            path: path.to_string(),
            reason: "no share is mapped for this root".to_string(),
        })
    }

    pub fn to_local(&self, path: &FilesystemPath) -> FsResult<FilesystemPath> {
        let RootKind::Unc { server, share } = path.root() else {
            return Ok(path.clone());
        };

        if let Some(entry) = self.entries.iter().find(|entry| entry.unc.matches(server, share)) {
            let mut components = entry.local.components().to_vec();
            components.extend_from_slice(path.components());
            return Ok(FilesystemPath::from_parts(entry.local.root().clone(), components));
        }

        if let Some(host) = &self.admin_share_host {
            if host.eq_ignore_ascii_case(server) {
                if let Some(drive) = admin_share_drive(share) {
                    return Ok(FilesystemPath::from_parts(
                        RootKind::Drive(drive),
                        path.components().to_vec(),
                    ));
                }
            }
        }

        Err(FsError::UnsupportedConversion {
            path: path.to_string(),
            reason: "share is not mapped to a local root".to_string(),
        })
    }
}

fn admin_share_drive(share: &str) -> Option<char> {
    let bytes = share.as_bytes();
    if bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b'$' {
        return Some((bytes[0] as char).to_ascii_uppercase());
    }
    None
}

fn prefix_matches(path: &FilesystemPath, prefix: &FilesystemPath) -> bool {
    if path.root() != prefix.root() || path.components().len() < prefix.components().len() {
        return false;
    }
    let fold = matches!(path.root(), RootKind::Drive(_));
    path.components()
        .iter()
        .zip(prefix.components())
        .all(|(a, b)| if fold { a.eq_ignore_ascii_case(b) } else { a == b })
}

/// Turns raw strings into validated absolute paths, optionally in their
/// network form.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    mapping: RootMapping,
}

impl PathResolver {
    pub fn new(mapping: RootMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &RootMapping {
        &self.mapping
    }

    pub fn resolve(&self, raw: &str, is_network: bool) -> FsResult<FilesystemPath> {
        if raw.trim().is_empty() {
            return Err(FsError::invalid_path(raw, PathProblem::Empty));
        }
        let parsed = parse_path_str(raw)?;
        let local = if matches!(parsed.root, RootKind::Relative) {
            let absolute = std::path::absolute(raw).map_err(|source| FsError::NativeOperation {
                operation: Operation::Query,
                path: raw.to_string(),
                source,
            })?;
            let absolute = absolute
                .to_str()
                .ok_or_else(|| FsError::invalid_path(raw, PathProblem::NotUtf8))?;
            FilesystemPath::parse(absolute)?
        } else {
            FilesystemPath::from_parsed(raw, parsed)?
        };

        if is_network {
            self.mapping.to_unc(&local)
        } else {
            Ok(local)
        }
    }

    pub fn resolve_os(&self, path: &Path, is_network: bool) -> FsResult<FilesystemPath> {
        let raw = path.to_str().ok_or_else(|| {
            FsError::invalid_path(path.to_string_lossy().into_owned(), PathProblem::NotUtf8)
        })?;
        self.resolve(raw, is_network)
    }

    /// The local form used to key cache invalidations, so a UNC handle and a
    /// local handle for the same entry observe the same events.
    pub fn cache_path(&self, path: &FilesystemPath) -> FilesystemPath {
        self.mapping
            .to_local(path)
            .unwrap_or_else(|_| path.clone())
    }
}
