//! Error taxonomy for subfont-core.
//!
//! Each failure class gets its own type so callers can tell a bad font file
//! (skip it, keep scanning) from a bad index artifact (abort the load) from a
//! misbehaving client (drop the connection). A lookup that finds nothing is
//! not an error at all; see [`crate::matcher::MatchResult::NotFound`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A font file or one of its faces could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is not a font container: {reason}")]
    Container { path: PathBuf, reason: String },

    #[error("face {index} of {path}: {reason}")]
    Face {
        path: PathBuf,
        index: u32,
        reason: String,
    },
}

/// A directory entry could not be read while walking a root.
#[derive(Debug, Error)]
#[error("cannot read {}: {reason}", path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<unknown>".to_string()))]
pub struct EnumerationError {
    pub path: Option<PathBuf>,
    pub reason: String,
}

impl From<walkdir::Error> for EnumerationError {
    fn from(err: walkdir::Error) -> Self {
        let reason = if err.loop_ancestor().is_some() {
            "symlink cycle".to_string()
        } else {
            err.to_string()
        };
        Self {
            path: err.path().map(|p| p.to_path_buf()),
            reason,
        }
    }
}

/// A persisted index artifact is unreadable or malformed. No partial index is
/// ever returned alongside one of these.
#[derive(Debug, Error)]
pub enum IndexLoadError {
    #[error("reading index {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("index is not valid JSON: {0}")]
    Syntax(#[source] serde_json::Error),

    #[error("unsupported index format version {found} (expected {expected})")]
    UnsupportedVersion { found: u64, expected: u64 },

    #[error("index document has no `faces` array")]
    MissingFaces,

    #[error("face entry {entry} is missing required field `{field}`")]
    MissingField { entry: usize, field: &'static str },

    #[error("face entry {entry} is malformed: {source}")]
    Malformed {
        entry: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// A client sent something the query protocol does not accept. Fatal to that
/// connection only.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection i/o: {0}")]
    Io(#[from] io::Error),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
}

/// Umbrella error for operations that can fail in more than one way.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Enumeration(#[from] EnumerationError),

    #[error(transparent)]
    IndexLoad(#[from] IndexLoadError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("writing index {path}: {source}")]
    IndexSave {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("building worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("i/o: {0}")]
    Io(#[from] io::Error),

    #[error("configuration: {reason}")]
    Config { reason: String },

    #[error("scan session has already run")]
    SessionConsumed,
}

pub type Result<T> = std::result::Result<T, Error>;
