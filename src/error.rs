use std::fmt;
use std::path::PathBuf;

use crate::sync::ActionKind;

/// Typed error surface for the repository engine (see spec §7).
///
/// Every failure path produces one of these instead of a bare string, so
/// callers can match on the kind while still getting a human message and,
/// where useful, a secondary diagnostic field (OS error, url, file).
#[derive(Debug)]
pub enum RepoError {
    InvalidPath { path: String, reason: String },
    BadPattern { patterns: String, reason: String },
    NotFound { path: String },
    ShapeConflict { path: String },
    Busy { path: String, kind: ActionKind },
    NotSupported { op: &'static str },
    MissingIdentity,
    ReasonRequired,
    Network { detail: String },
    Http { status: u16, detail: String },
    RemoteDenied { message: String },
    MalformedCatalog { detail: String },
    CorruptMetadata { file: PathBuf, detail: String },
    InstallFailed { detail: String },
    Io { detail: String },
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoError::InvalidPath { path, reason } => {
                write!(f, "invalid path '{path}': {reason}")
            }
            RepoError::BadPattern { patterns, reason } => {
                write!(f, "bad ignore pattern '{patterns}': {reason}")
            }
            RepoError::NotFound { path } => write!(f, "not found: {path}"),
            RepoError::ShapeConflict { path } => {
                write!(f, "shape conflict (file vs directory) at {path}")
            }
            RepoError::Busy { path, kind } => {
                write!(f, "{path} is busy with a {kind:?} in progress")
            }
            RepoError::NotSupported { op } => write!(f, "{op} is not supported for directories"),
            RepoError::MissingIdentity => write!(f, "author and email are required"),
            RepoError::ReasonRequired => write!(f, "a non-empty comment is required"),
            RepoError::Network { detail } => write!(f, "network error: {detail}"),
            RepoError::Http { status, detail } => write!(f, "http error {status}: {detail}"),
            RepoError::RemoteDenied { message } => write!(f, "remote denied: {message}"),
            RepoError::MalformedCatalog { detail } => {
                write!(f, "malformed catalog: {detail}")
            }
            RepoError::CorruptMetadata { file, detail } => {
                write!(f, "corrupt metadata {}: {detail}", file.display())
            }
            RepoError::InstallFailed { detail } => write!(f, "install failed: {detail}"),
            RepoError::Io { detail } => write!(f, "io error: {detail}"),
        }
    }
}

impl std::error::Error for RepoError {}

impl From<std::io::Error> for RepoError {
    fn from(err: std::io::Error) -> Self {
        RepoError::Io {
            detail: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RepoError>;
