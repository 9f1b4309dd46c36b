use std::fmt;
use std::path::PathBuf;

use crate::common::error::{FsError, FsResult, PathProblem};

const MAX_INPUT_PATH_BYTES: usize = 32 * 1024;
const MAX_COMPONENTS: usize = 4096;
const MAX_COMPONENT_BYTES: usize = 255;
const WINDOWS_RESERVED: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RootKind {
    Relative,
    PosixRoot,
    Drive(char),
    Unc { server: String, share: String },
}

impl RootKind {
    fn is_absolute(&self) -> bool {
        !matches!(self, RootKind::Relative)
    }

    /// Drive and UNC roots follow Windows naming rules.
    fn windows_rules(&self) -> bool {
        matches!(self, RootKind::Drive(_) | RootKind::Unc { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub root: RootKind,
    pub components: Vec<String>,
}

/// A single leading `/` marks a POSIX path, where `\` is an ordinary
/// filename character.
fn is_posix_rooted(input: &str) -> bool {
    let mut chars = input.chars();
    chars.next() == Some('/') && !matches!(chars.next(), Some('/') | Some('\\'))
}

pub fn parse_path_str(input: &str) -> FsResult<ParsedPath> {
    if input.len() > MAX_INPUT_PATH_BYTES {
        return Err(FsError::invalid_path(truncate(input), PathProblem::TooLong));
    }
    if input.contains('\0') {
        return Err(FsError::invalid_path(input, PathProblem::InvalidCharacter('\0')));
    }
    if is_posix_rooted(input) {
        let components = parse_components(input, input.split('/'), &RootKind::PosixRoot)?;
        return Ok(ParsedPath {
            root: RootKind::PosixRoot,
            components,
        });
    }

    let normalized = input.replace('\\', "/");
    let mut body = normalized.as_str();
    if body.starts_with("//./") {
        return Err(FsError::invalid_path(input, PathProblem::DeviceNamespace));
    }
    if let Some(rest) = body.strip_prefix("//?/") {
        if rest.len() >= 4 && rest[..4].eq_ignore_ascii_case("UNC/") {
            let (root, remainder) = parse_unc_root(input, &rest[4..])?;
            let components = parse_components(input, remainder.split('/'), &root)?;
            return Ok(ParsedPath { root, components });
        }
        body = rest;
        if !starts_with_drive(body) {
            return Err(FsError::invalid_path(input, PathProblem::MalformedDrive));
        }
    }

    if let Some(rest) = body.strip_prefix("//") {
        let (root, remainder) = parse_unc_root(input, rest)?;
        let components = parse_components(input, remainder.split('/'), &root)?;
        return Ok(ParsedPath { root, components });
    }

    let (root, remainder) = parse_root(input, body)?;
    let components = parse_components(input, remainder.split('/'), &root)?;
    Ok(ParsedPath { root, components })
}

fn truncate(input: &str) -> String {
    input.chars().take(64).collect()
}

fn starts_with_drive(input: &str) -> bool {
    let bytes = input.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

fn parse_unc_root<'a>(raw: &str, rest: &'a str) -> FsResult<(RootKind, &'a str)> {
    let mut parts = rest.splitn(3, '/');
    let server = parts.next().unwrap_or("");
    let share = parts.next().unwrap_or("");
    if server.is_empty() || share.is_empty() {
        return Err(FsError::invalid_path(raw, PathProblem::MalformedUnc));
    }
    for name in [server, share] {
        if let Some(ch) = name.chars().find(|ch| is_reserved(*ch)) {
            return Err(FsError::invalid_path(raw, PathProblem::InvalidCharacter(ch)));
        }
    }
    let remainder = parts.next().unwrap_or("");
    Ok((
        RootKind::Unc {
            server: server.to_string(),
            share: share.to_string(),
        },
        remainder,
    ))
}

fn parse_root<'a>(raw: &str, input: &'a str) -> FsResult<(RootKind, &'a str)> {
    if starts_with_drive(input) {
        let bytes = input.as_bytes();
        if bytes.len() == 2 || bytes[2] != b'/' {
            return Err(FsError::invalid_path(raw, PathProblem::MalformedDrive));
        }
        let drive = (bytes[0] as char).to_ascii_uppercase();
        return Ok((RootKind::Drive(drive), &input[3..]));
    }

    if input.starts_with('/') {
        return Ok((RootKind::PosixRoot, input.trim_start_matches('/')));
    }

    Ok((RootKind::Relative, input))
}

fn is_reserved(ch: char) -> bool {
    WINDOWS_RESERVED.contains(&ch) || (ch as u32) < 0x20
}

fn push_component(
    raw: &str,
    components: &mut Vec<String>,
    part: &str,
    windows_rules: bool,
) -> FsResult<()> {
    if part.is_empty() || part == "." {
        return Ok(());
    }
    if part == ".." {
        if components.pop().is_none() {
            return Err(FsError::invalid_path(raw, PathProblem::EscapesRoot));
        }
        return Ok(());
    }
    if part.len() > MAX_COMPONENT_BYTES {
        return Err(FsError::invalid_path(raw, PathProblem::ComponentTooLong));
    }
    if windows_rules {
        if let Some(ch) = part.chars().find(|ch| is_reserved(*ch)) {
            return Err(FsError::invalid_path(raw, PathProblem::InvalidCharacter(ch)));
        }
    }
    components.push(part.to_string());
    if components.len() > MAX_COMPONENTS {
        return Err(FsError::invalid_path(raw, PathProblem::TooManyComponents));
    }
    Ok(())
}

fn parse_components<'a, I>(raw: &str, iter: I, root: &RootKind) -> FsResult<Vec<String>>
where
    I: Iterator<Item = &'a str>,
{
    let windows_rules = root.windows_rules();
    let mut components: Vec<String> = Vec::new();
    for part in iter {
        push_component(raw, &mut components, part, windows_rules)?;
    }
    Ok(components)
}

/// An absolute, normalized and validated path.
///
/// Only the parser and [`crate::PathResolver`] construct these, so every
/// value respects the length limits above and never carries `.`/`..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilesystemPath {
    root: RootKind,
    components: Vec<String>,
}

impl FilesystemPath {
    /// Parses an absolute path. Relative input is rejected; use the resolver
    /// to anchor it at the current directory.
    pub fn parse(raw: &str) -> FsResult<Self> {
        let parsed = parse_path_str(raw)?;
        Self::from_parsed(raw, parsed)
    }

    pub(crate) fn from_parsed(raw: &str, parsed: ParsedPath) -> FsResult<Self> {
        if !parsed.root.is_absolute() {
            let problem = if raw.is_empty() {
                PathProblem::Empty
            } else {
                PathProblem::Relative
            };
            return Err(FsError::invalid_path(raw, problem));
        }
        Ok(Self {
            root: parsed.root,
            components: parsed.components,
        })
    }

    pub(crate) fn from_parts(root: RootKind, components: Vec<String>) -> Self {
        debug_assert!(root.is_absolute());
        Self { root, components }
    }

    pub fn root(&self) -> &RootKind {
        &self.root
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn is_network(&self) -> bool {
        matches!(self.root, RootKind::Unc { .. })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// The root of the volume this path lives on.
    pub fn volume(&self) -> FilesystemPath {
        Self::from_parts(self.root.clone(), Vec::new())
    }

    pub fn parent(&self) -> Option<FilesystemPath> {
        if self.components.is_empty() {
            return None;
        }
        let mut components = self.components.clone();
        components.pop();
        Some(Self::from_parts(self.root.clone(), components))
    }

    pub fn file_name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Appends a relative path (one or more components). `\\` separates
    /// components only under drive and UNC roots.
    pub fn join(&self, relative: &str) -> FsResult<FilesystemPath> {
        let raw = format!("{self}/{relative}");
        if raw.len() > MAX_INPUT_PATH_BYTES {
            return Err(FsError::invalid_path(truncate(&raw), PathProblem::TooLong));
        }
        let mut components = self.components.clone();
        let windows_rules = self.root.windows_rules();
        let separators: &[char] = if windows_rules { &['/', '\\'] } else { &['/'] };
        for part in relative.split(separators) {
            push_component(&raw, &mut components, part, windows_rules)?;
        }
        Ok(Self::from_parts(self.root.clone(), components))
    }

    /// Appends exactly one component, as returned by a directory listing.
    /// Names that would add more than one level, or move up, are rejected.
    pub fn child(&self, name: &str) -> FsResult<FilesystemPath> {
        let raw = format!("{self}/{name}");
        if raw.len() > MAX_INPUT_PATH_BYTES {
            return Err(FsError::invalid_path(truncate(&raw), PathProblem::TooLong));
        }
        if name.is_empty() {
            return Err(FsError::invalid_path(raw, PathProblem::Empty));
        }
        if name == "." || name == ".." {
            return Err(FsError::invalid_path(raw, PathProblem::EscapesRoot));
        }
        let windows_rules = self.root.windows_rules();
        if let Some(ch) = name
            .chars()
            .find(|ch| *ch == '/' || *ch == '\0' || (windows_rules && *ch == '\\'))
        {
            return Err(FsError::invalid_path(raw, PathProblem::InvalidCharacter(ch)));
        }
        let mut components = self.components.clone();
        push_component(&raw, &mut components, name, windows_rules)?;
        Ok(Self::from_parts(self.root.clone(), components))
    }

    pub fn starts_with(&self, base: &FilesystemPath) -> bool {
        self.root == base.root
            && self.components.len() >= base.components.len()
            && self.components[..base.components.len()] == base.components[..]
    }

    /// Replaces the `from` prefix of this path with `to`.
    pub fn rebase(&self, from: &FilesystemPath, to: &FilesystemPath) -> Option<FilesystemPath> {
        if !self.starts_with(from) {
            return None;
        }
        let mut components = to.components.clone();
        components.extend_from_slice(&self.components[from.components.len()..]);
        Some(Self::from_parts(to.root.clone(), components))
    }

    /// This path followed by each of its ancestors up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = FilesystemPath> + '_ {
        (0..=self.components.len())
            .rev()
            .map(move |len| Self::from_parts(self.root.clone(), self.components[..len].to_vec()))
    }

    /// The `\\?\` form that bypasses the legacy `MAX_PATH` limit on Windows.
    /// POSIX paths have no extended form and are returned unchanged.
    pub fn to_extended(&self) -> String {
        match &self.root {
            RootKind::Drive(drive) => {
                format!("\\\\?\\{drive}:\\{}", self.components.join("\\"))
            }
            RootKind::Unc { server, share } => {
                let mut out = format!("\\\\?\\UNC\\{server}\\{share}");
                for component in &self.components {
                    out.push('\\');
                    out.push_str(component);
                }
                out
            }
            _ => self.to_string(),
        }
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(self.to_string())
    }

    /// Key used for invalidation bookkeeping. Windows-style roots are
    /// case-insensitive, so their keys are uppercased.
    pub fn cache_key(&self) -> String {
        if self.root.windows_rules() {
            self.to_string().to_uppercase()
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for FilesystemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            RootKind::PosixRoot | RootKind::Relative => {
                if matches!(self.root, RootKind::PosixRoot) {
                    f.write_str("/")?;
                }
                f.write_str(&self.components.join("/"))
            }
            RootKind::Drive(drive) => write!(f, "{drive}:\\{}", self.components.join("\\")),
            RootKind::Unc { server, share } => {
                write!(f, "\\\\{server}\\{share}")?;
                for component in &self.components {
                    write!(f, "\\{component}")?;
                }
                Ok(())
            }
        }
    }
}
