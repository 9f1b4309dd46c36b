use std::fmt;
use std::io;

use crate::common::path::FilesystemPath;

/// Why a raw path was rejected by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathProblem {
    Empty,
    Relative,
    TooLong,
    ComponentTooLong,
    TooManyComponents,
    EscapesRoot,
    InvalidCharacter(char),
    MalformedDrive,
    MalformedUnc,
    DeviceNamespace,
    NotUtf8,
}

impl fmt::Display for PathProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathProblem::Empty => write!(f, "path is empty"),
            PathProblem::Relative => write!(f, "path is not absolute"),
            PathProblem::TooLong => write!(f, "path exceeds the maximum length"),
            PathProblem::ComponentTooLong => write!(f, "a path component exceeds 255 bytes"),
            PathProblem::TooManyComponents => write!(f, "path has too many components"),
            PathProblem::EscapesRoot => write!(f, "`..` escapes the root"),
            PathProblem::InvalidCharacter(ch) => write!(f, "invalid character {ch:?}"),
            PathProblem::MalformedDrive => write!(f, "malformed drive root"),
            PathProblem::MalformedUnc => write!(f, "malformed UNC root"),
            PathProblem::DeviceNamespace => write!(f, "device namespace paths are not supported"),
            PathProblem::NotUtf8 => write!(f, "path is not valid UTF-8"),
        }
    }
}

/// Native operation that produced an error, used to pick the error variant
/// and to label `NativeOperation` failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Query,
    CreateDirectory,
    CreateFile,
    RemoveFile,
    RemoveDirectory,
    ReadDirectory,
    Rename,
    Copy,
    Read,
    ReadSecurity,
    WriteSecurity,
    Streams,
}

impl Operation {
    /// Security writes report missing rights as `Permission`; everything
    /// else reports them as `AccessDenied`.
    pub fn changes_permissions(self) -> bool {
        matches!(self, Operation::WriteSecurity)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Query => "query metadata",
            Operation::CreateDirectory => "create directory",
            Operation::CreateFile => "create file",
            Operation::RemoveFile => "remove file",
            Operation::RemoveDirectory => "remove directory",
            Operation::ReadDirectory => "read directory",
            Operation::Rename => "rename",
            Operation::Copy => "copy",
            Operation::Read => "read file",
            Operation::ReadSecurity => "read security descriptor",
            Operation::WriteSecurity => "write security descriptor",
            Operation::Streams => "access data stream",
        };
        f.write_str(name)
    }
}

/// One child that could not be removed during a recursive delete.
#[derive(Debug)]
pub struct DeleteFailure {
    pub path: FilesystemPath,
    pub error: FsError,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FsError {
    #[error("invalid path `{path}`: {problem}")]
    InvalidPath { path: String, problem: PathProblem },

    #[error("cannot convert `{path}`: {reason}")]
    UnsupportedConversion { path: String, reason: String },

    #[error("access denied: `{path}`")]
    AccessDenied { path: String },

    #[error("missing the right to change permissions on `{path}`")]
    Permission { path: String },

    #[error("path not found: `{path}`")]
    PathNotFound { path: String },

    #[error("already exists: `{path}`")]
    AlreadyExists { path: String },

    #[error("directory not empty: `{path}`")]
    DirectoryNotEmpty { path: String },

    #[error("not a directory: `{path}`")]
    NotADirectory { path: String },

    #[error("is a directory: `{path}`")]
    IsADirectory { path: String },

    #[error("cannot move `{from}` to `{to}` atomically across volumes")]
    CrossVolume { from: String, to: String },

    #[error("security descriptor cannot be used: {reason}")]
    InvalidDescriptor { reason: String },

    #[error("recursive delete of `{path}` failed for {} entries", .failures.len())]
    DeleteIncomplete {
        path: String,
        failures: Vec<DeleteFailure>,
    },

    #[error("{operation} failed for `{path}`: {source}")]
    NativeOperation {
        operation: Operation,
        path: String,
        #[source]
        source: io::Error,
    },
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    pub fn invalid_path(path: impl Into<String>, problem: PathProblem) -> Self {
        FsError::InvalidPath {
            path: path.into(),
            problem,
        }
    }

    pub fn invalid_descriptor(reason: impl Into<String>) -> Self {
        FsError::InvalidDescriptor {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::PathNotFound { .. })
    }

    /// Errors a recursive delete may step over for one child and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FsError::AccessDenied { .. }
                | FsError::Permission { .. }
                | FsError::DirectoryNotEmpty { .. }
                | FsError::NativeOperation { .. }
                | FsError::DeleteIncomplete { .. }
        )
    }

    /// First failure recorded by a recursive delete, if any.
    pub fn first_failure(&self) -> Option<&DeleteFailure> {
        match self {
            FsError::DeleteIncomplete { failures, .. } => failures.first(),
            _ => None,
        }
    }
}
