//! An in-memory filesystem with NTFS-like security: every volume root gets a
//! default DACL, new entries inherit from their parent, and rewriting a
//! directory's DACL re-propagates inherited rules through its subtree.
//!
//! Faults can be injected per path: locked entries refuse removal and
//! renames, denied queries fail with `AccessDenied`, and denied ACL writes
//! fail with `Permission`.

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use crate::acl::{
    ntsd, AccessRule, AccessSections, FileRights, InheritanceFlags, Principal, PropagationFlags,
    SecurityDescriptor, Sid,
};
use crate::backend::{Backend, DescriptorFamily, NativeDescriptor};
use crate::common::error::{FsError, FsResult, Operation};
use crate::common::path::FilesystemPath;
use crate::common::types::{EntryKind, EntryStat, EntryWriter, FileAttributes, StreamInfo};
use crate::resolver::RootMapping;

type Content = Arc<Mutex<Vec<u8>>>;

enum NodeData {
    File(Content),
    Directory,
}

struct Node {
    path: FilesystemPath,
    data: NodeData,
    created: SystemTime,
    modified: SystemTime,
    security: Vec<u8>,
    streams: BTreeMap<String, Vec<u8>>,
}

impl Node {
    fn is_dir(&self) -> bool {
        matches!(self.data, NodeData::Directory)
    }

    fn stat(&self) -> EntryStat {
        let (kind, len, attributes) = match &self.data {
            NodeData::File(content) => (
                EntryKind::File,
                content.lock().expect("content lock poisoned").len() as u64,
                FileAttributes::ARCHIVE,
            ),
            NodeData::Directory => (EntryKind::Directory, 0, FileAttributes::DIRECTORY),
        };
        EntryStat {
            kind,
            len,
            created: Some(self.created),
            modified: Some(self.modified),
            accessed: Some(self.modified),
            attributes: FileAttributes(attributes),
        }
    }

    fn descriptor(&self) -> FsResult<SecurityDescriptor> {
        ntsd::decode(&self.security, AccessSections::ALL)
    }
}

#[derive(Default)]
struct MemoryState {
    nodes: BTreeMap<String, Node>,
    locked: HashSet<String>,
    denied_queries: HashSet<String>,
    denied_acl_writes: HashSet<String>,
}

impl MemoryState {
    fn ensure_root(&mut self, path: &FilesystemPath) -> FsResult<()> {
        let root = path.volume();
        let key = root.cache_key();
        if !self.nodes.contains_key(&key) {
            let now = SystemTime::now();
            let security = ntsd::encode(&default_root_descriptor(), AccessSections::ALL)?;
            self.nodes.insert(
                key,
                Node {
                    path: root,
                    data: NodeData::Directory,
                    created: now,
                    modified: now,
                    security,
                    streams: BTreeMap::new(),
                },
            );
        }
        Ok(())
    }

    fn node(&self, path: &FilesystemPath) -> FsResult<&Node> {
        self.nodes
            .get(&path.cache_key())
            .ok_or_else(|| not_found(path))
    }

    fn node_mut(&mut self, path: &FilesystemPath) -> FsResult<&mut Node> {
        self.nodes
            .get_mut(&path.cache_key())
            .ok_or_else(|| not_found(path))
    }

    fn parent_dir(&self, path: &FilesystemPath) -> FsResult<&Node> {
        let parent = path.parent().ok_or_else(|| FsError::AccessDenied {
            path: path.to_string(),
        })?;
        let node = self.node(&parent)?;
        if !node.is_dir() {
            return Err(FsError::NotADirectory {
                path: parent.to_string(),
            });
        }
        Ok(node)
    }

    fn has_children(&self, dir: &FilesystemPath) -> bool {
        let key = dir.cache_key();
        self.nodes
            .values()
            .any(|node| node.path.parent().is_some_and(|p| p.cache_key() == key))
    }

    fn subtree_keys(&self, dir: &FilesystemPath) -> Vec<String> {
        let dir_key = dir.cache_key();
        self.nodes
            .keys()
            .filter(|key| key_within(key, &dir_key))
            .cloned()
            .collect()
    }

    fn check_unlocked(&self, path: &FilesystemPath) -> FsResult<()> {
        let locked = self
            .subtree_keys(path)
            .iter()
            .any(|key| self.locked.contains(key));
        if locked {
            return Err(FsError::AccessDenied {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Builds a new entry whose security is inherited from its parent.
    fn new_node(&self, path: &FilesystemPath, data: NodeData) -> FsResult<Node> {
        let parent = self.parent_dir(path)?.descriptor()?;
        let is_dir = matches!(data, NodeData::Directory);
        let descriptor = SecurityDescriptor {
            owner: Some(Principal::Sid(Sid::builtin_administrators())),
            group: parent.group.clone(),
            access_rules: inherited_rules(&parent, is_dir),
            ..SecurityDescriptor::default()
        };
        let now = SystemTime::now();
        Ok(Node {
            path: path.clone(),
            data,
            created: now,
            modified: now,
            security: ntsd::encode(&descriptor, AccessSections::ALL)?,
            streams: BTreeMap::new(),
        })
    }

    /// Recomputes inherited rules for everything below `dir`. Parents sort
    /// before their children, so one ordered pass suffices.
    fn propagate(&mut self, dir: &FilesystemPath) -> FsResult<()> {
        let dir_key = dir.cache_key();
        let mut ordered: Vec<(usize, String)> = self
            .subtree_keys(dir)
            .into_iter()
            .filter(|key| *key != dir_key)
            .filter_map(|key| {
                let depth = self.nodes.get(&key)?.path.components().len();
                Some((depth, key))
            })
            .collect();
        ordered.sort();
        for (_, key) in ordered {
            let Some(node) = self.nodes.get(&key) else {
                continue;
            };
            let Some(parent_path) = node.path.parent() else {
                continue;
            };
            let parent = self.node(&parent_path)?.descriptor()?;
            let mut current = node.descriptor()?;
            let is_dir = node.is_dir();
            current.access_rules.retain(|rule| !rule.is_inherited);
            if !current.are_access_rules_protected() {
                current.access_rules.extend(inherited_rules(&parent, is_dir));
            }
            let security = ntsd::encode(&current, AccessSections::ALL)?;
            if let Some(node) = self.nodes.get_mut(&key) {
                node.security = security;
            }
        }
        Ok(())
    }
}

/// Whether `key` names `dir_key` itself or something below it.
fn key_within(key: &str, dir_key: &str) -> bool {
    match key.strip_prefix(dir_key) {
        Some("") => true,
        Some(rest) => dir_key.ends_with(['/', '\\']) || rest.starts_with(['/', '\\']),
        None => false,
    }
}

fn not_found(path: &FilesystemPath) -> FsError {
    FsError::PathNotFound {
        path: path.to_string(),
    }
}

fn default_root_descriptor() -> SecurityDescriptor {
    let rule = |sid: Sid, rights: FileRights| {
        AccessRule::allow(Principal::Sid(sid), rights).with_inheritance(InheritanceFlags::BOTH)
    };
    SecurityDescriptor {
        owner: Some(Principal::Sid(Sid::builtin_administrators())),
        group: Some(Principal::Sid(Sid::local_system())),
        access_rules: vec![
            rule(Sid::builtin_administrators(), FileRights::FULL_CONTROL),
            rule(Sid::local_system(), FileRights::FULL_CONTROL),
            rule(Sid::builtin_users(), FileRights::READ_AND_EXECUTE),
            rule(Sid::authenticated_users(), FileRights::MODIFY),
        ],
        ..SecurityDescriptor::default()
    }
}

/// The rules a new child receives from `parent`, following NTFS
/// propagation.
fn inherited_rules(parent: &SecurityDescriptor, child_is_dir: bool) -> Vec<AccessRule> {
    let mut rules = Vec::new();
    for rule in &parent.access_rules {
        let (inheritance, propagation) = if child_is_dir {
            if rule.inheritance.container {
                if rule.propagation.no_propagate {
                    (InheritanceFlags::NONE, PropagationFlags::NONE)
                } else {
                    (rule.inheritance, PropagationFlags::NONE)
                }
            } else if rule.inheritance.object && !rule.propagation.no_propagate {
                (
                    InheritanceFlags {
                        container: false,
                        object: true,
                    },
                    PropagationFlags::INHERIT_ONLY,
                )
            } else {
                continue;
            }
        } else if rule.inheritance.object {
            (InheritanceFlags::NONE, PropagationFlags::NONE)
        } else {
            continue;
        };
        rules.push(AccessRule {
            principal: rule.principal.clone(),
            rights: rule.rights,
            kind: rule.kind,
            inheritance,
            propagation,
            is_inherited: true,
        });
    }
    rules
}

struct MemoryWriter {
    content: Content,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut content = self
            .content
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "content lock poisoned"))?;
        content.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A hermetic [`Backend`] holding everything in memory. Descriptors are kept
/// in the Windows self-relative layout.
pub struct MemoryBackend {
    mapping: RootMapping,
    state: Mutex<MemoryState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_mapping(RootMapping::default())
    }

    /// `mapping` translates UNC paths to the local paths nodes are stored
    /// under.
    pub fn with_mapping(mapping: RootMapping) -> Self {
        Self {
            mapping,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory state lock poisoned")
    }

    fn local(&self, path: &FilesystemPath) -> FsResult<FilesystemPath> {
        self.mapping.to_local(path)
    }

    /// Makes removal and renames of `path` fail with `AccessDenied`, as an
    /// open handle would.
    pub fn lock(&self, path: &FilesystemPath) -> FsResult<()> {
        let key = self.local(path)?.cache_key();
        self.state().locked.insert(key);
        Ok(())
    }

    pub fn unlock(&self, path: &FilesystemPath) -> FsResult<()> {
        let key = self.local(path)?.cache_key();
        self.state().locked.remove(&key);
        Ok(())
    }

    pub fn deny_query(&self, path: &FilesystemPath) -> FsResult<()> {
        let key = self.local(path)?.cache_key();
        self.state().denied_queries.insert(key);
        Ok(())
    }

    pub fn deny_acl_write(&self, path: &FilesystemPath) -> FsResult<()> {
        let key = self.local(path)?.cache_key();
        self.state().denied_acl_writes.insert(key);
        Ok(())
    }

    /// Clears every injected fault.
    pub fn clear_faults(&self) {
        let mut state = self.state();
        state.locked.clear();
        state.denied_queries.clear();
        state.denied_acl_writes.clear();
    }

    /// Number of entries, volume roots included.
    pub fn entry_count(&self) -> usize {
        self.state().nodes.len()
    }
}

impl Backend for MemoryBackend {
    fn descriptor_family(&self) -> DescriptorFamily {
        DescriptorFamily::Windows
    }

    fn query(&self, path: &FilesystemPath) -> FsResult<Option<EntryStat>> {
        let path = self.local(path)?;
        let mut state = self.state();
        if state.denied_queries.contains(&path.cache_key()) {
            return Err(FsError::AccessDenied {
                path: path.to_string(),
            });
        }
        state.ensure_root(&path)?;
        Ok(state.nodes.get(&path.cache_key()).map(Node::stat))
    }

    fn create_dir(&self, path: &FilesystemPath) -> FsResult<()> {
        let path = self.local(path)?;
        let mut state = self.state();
        state.ensure_root(&path)?;
        if state.nodes.contains_key(&path.cache_key()) {
            return Err(FsError::AlreadyExists {
                path: path.to_string(),
            });
        }
        let node = state.new_node(&path, NodeData::Directory)?;
        state.nodes.insert(path.cache_key(), node);
        Ok(())
    }

    fn create_file(&self, path: &FilesystemPath, exclusive: bool) -> FsResult<EntryWriter> {
        let original = path.clone();
        let path = self.local(path)?;
        let mut state = self.state();
        state.ensure_root(&path)?;
        let key = path.cache_key();
        let locked = state.locked.contains(&key);
        if let Some(node) = state.nodes.get_mut(&key) {
            let content = match &node.data {
                NodeData::Directory => {
                    return Err(FsError::IsADirectory {
                        path: path.to_string(),
                    })
                }
                _ if exclusive => {
                    return Err(FsError::AlreadyExists {
                        path: path.to_string(),
                    })
                }
                _ if locked => {
                    return Err(FsError::AccessDenied {
                        path: path.to_string(),
                    })
                }
                NodeData::File(content) => Arc::clone(content),
            };
            content.lock().expect("content lock poisoned").clear();
            node.modified = SystemTime::now();
            return Ok(EntryWriter::new(original, Box::new(MemoryWriter { content })));
        }

        let content: Content = Arc::new(Mutex::new(Vec::new()));
        let node = state.new_node(&path, NodeData::File(Arc::clone(&content)))?;
        state.nodes.insert(key, node);
        Ok(EntryWriter::new(original, Box::new(MemoryWriter { content })))
    }

    fn remove_file(&self, path: &FilesystemPath) -> FsResult<()> {
        let path = self.local(path)?;
        let mut state = self.state();
        let key = path.cache_key();
        if state.node(&path)?.is_dir() {
            return Err(FsError::IsADirectory {
                path: path.to_string(),
            });
        }
        if state.locked.contains(&key) {
            return Err(FsError::AccessDenied {
                path: path.to_string(),
            });
        }
        state.nodes.remove(&key);
        Ok(())
    }

    fn remove_dir(&self, path: &FilesystemPath) -> FsResult<()> {
        let path = self.local(path)?;
        let mut state = self.state();
        let key = path.cache_key();
        if !state.node(&path)?.is_dir() {
            return Err(FsError::NotADirectory {
                path: path.to_string(),
            });
        }
        if path.is_root() || state.locked.contains(&key) {
            return Err(FsError::AccessDenied {
                path: path.to_string(),
            });
        }
        if state.has_children(&path) {
            return Err(FsError::DirectoryNotEmpty {
                path: path.to_string(),
            });
        }
        state.nodes.remove(&key);
        Ok(())
    }

    fn read_dir(&self, path: &FilesystemPath) -> FsResult<Vec<FsResult<String>>> {
        let path = self.local(path)?;
        let mut state = self.state();
        state.ensure_root(&path)?;
        if !state.node(&path)?.is_dir() {
            return Err(FsError::NotADirectory {
                path: path.to_string(),
            });
        }
        let key = path.cache_key();
        Ok(state
            .nodes
            .values()
            .filter(|node| node.path.parent().is_some_and(|p| p.cache_key() == key))
            .filter_map(|node| node.path.file_name().map(|name| Ok(name.to_string())))
            .collect())
    }

    fn rename(&self, from: &FilesystemPath, to: &FilesystemPath, replace: bool) -> FsResult<()> {
        let from = self.local(from)?;
        let to = self.local(to)?;
        let mut state = self.state();
        state.ensure_root(&to)?;
        let source_is_dir = state.node(&from)?.is_dir();
        if from.volume().cache_key() != to.volume().cache_key() {
            return Err(FsError::CrossVolume {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let from_key = from.cache_key();
        if from.is_root() || (key_within(&to.cache_key(), &from_key) && to.cache_key() != from_key) {
            return Err(FsError::AccessDenied {
                path: from.to_string(),
            });
        }
        state.check_unlocked(&from)?;
        state.parent_dir(&to)?;

        let target_key = to.cache_key();
        if target_key != from_key {
            if let Some(target) = state.nodes.get(&target_key) {
                if !replace || target.is_dir() || source_is_dir {
                    return Err(FsError::AlreadyExists {
                        path: to.to_string(),
                    });
                }
                if state.locked.contains(&target_key) {
                    return Err(FsError::AccessDenied {
                        path: to.to_string(),
                    });
                }
                state.nodes.remove(&target_key);
            }
        }

        for key in state.subtree_keys(&from) {
            let Some(mut node) = state.nodes.remove(&key) else {
                continue;
            };
            let mut components = to.components().to_vec();
            components.extend_from_slice(&node.path.components()[from.components().len()..]);
            node.path = FilesystemPath::from_parts(to.root().clone(), components);
            state.nodes.insert(node.path.cache_key(), node);
        }
        Ok(())
    }

    fn copy_file(&self, from: &FilesystemPath, to: &FilesystemPath, overwrite: bool) -> FsResult<u64> {
        let from = self.local(from)?;
        let to = self.local(to)?;
        let data = self.read_file(&from)?;
        let mut writer = self.create_file(&to, !overwrite)?;
        writer.write_all(&data).map_err(|source| FsError::NativeOperation {
            operation: Operation::Copy,
            path: to.to_string(),
            source,
        })?;
        writer.close()?;
        Ok(data.len() as u64)
    }

    fn read_file(&self, path: &FilesystemPath) -> FsResult<Vec<u8>> {
        let path = self.local(path)?;
        let state = self.state();
        match &state.node(&path)?.data {
            NodeData::File(content) => Ok(content.lock().expect("content lock poisoned").clone()),
            NodeData::Directory => Err(FsError::IsADirectory {
                path: path.to_string(),
            }),
        }
    }

    fn read_security(&self, path: &FilesystemPath, _sections: AccessSections) -> FsResult<NativeDescriptor> {
        let path = self.local(path)?;
        let mut state = self.state();
        state.ensure_root(&path)?;
        Ok(NativeDescriptor::Windows(state.node(&path)?.security.clone()))
    }

    fn write_security(
        &self,
        path: &FilesystemPath,
        descriptor: &NativeDescriptor,
        sections: AccessSections,
    ) -> FsResult<()> {
        let path = self.local(path)?;
        let NativeDescriptor::Windows(bytes) = descriptor else {
            return Err(FsError::invalid_descriptor(
                "memory backend stores Windows descriptors only",
            ));
        };
        let incoming = ntsd::decode(bytes, sections)?;
        let mut state = self.state();
        state.ensure_root(&path)?;
        let mut current = state.node(&path)?.descriptor()?;
        if state.denied_acl_writes.contains(&path.cache_key()) {
            return Err(FsError::Permission {
                path: path.to_string(),
            });
        }

        if sections.contains(AccessSections::OWNER) && incoming.owner.is_some() {
            current.owner = incoming.owner;
        }
        if sections.contains(AccessSections::GROUP) && incoming.group.is_some() {
            current.group = incoming.group;
        }
        if sections.contains(AccessSections::AUDIT) {
            current.audit_rules = incoming.audit_rules;
        }
        if sections.contains(AccessSections::ACCESS) {
            current.access_rules = incoming
                .access_rules
                .into_iter()
                .filter(|rule| !rule.is_inherited)
                .collect();
            current.protection.inheritance_blocked = incoming.protection.inheritance_blocked;
            if !current.are_access_rules_protected() {
                if let Some(parent) = path.parent() {
                    let parent = state.node(&parent)?.descriptor()?;
                    let is_dir = state.node(&path)?.is_dir();
                    current.access_rules.extend(inherited_rules(&parent, is_dir));
                }
            }
        }

        let encoded = ntsd::encode(&current, AccessSections::ALL)?;
        state.node_mut(&path)?.security = encoded;
        if sections.contains(AccessSections::ACCESS) {
            state.propagate(&path)?;
        }
        Ok(())
    }

    fn account_name(&self, principal: &Principal) -> Option<String> {
        match principal {
            Principal::Sid(sid) => sid.well_known_name().map(str::to_string),
            _ => None,
        }
    }

    fn list_streams(&self, path: &FilesystemPath) -> FsResult<Vec<StreamInfo>> {
        let path = self.local(path)?;
        let state = self.state();
        Ok(state
            .node(&path)?
            .streams
            .iter()
            .map(|(name, data)| StreamInfo {
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect())
    }

    fn read_stream(&self, path: &FilesystemPath, name: &str) -> FsResult<Vec<u8>> {
        let path = self.local(path)?;
        let state = self.state();
        state
            .node(&path)?
            .streams
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::PathNotFound {
                path: format!("{path}:{name}"),
            })
    }

    fn write_stream(&self, path: &FilesystemPath, name: &str, data: &[u8]) -> FsResult<()> {
        let path = self.local(path)?;
        let mut state = self.state();
        let node = state.node_mut(&path)?;
        node.streams.insert(name.to_string(), data.to_vec());
        node.modified = SystemTime::now();
        Ok(())
    }

    fn remove_stream(&self, path: &FilesystemPath, name: &str) -> FsResult<()> {
        let path = self.local(path)?;
        let mut state = self.state();
        state
            .node_mut(&path)?
            .streams
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| FsError::PathNotFound {
                path: format!("{path}:{name}"),
            })
    }
}
