#![forbid(unsafe_code)]

//! Error taxonomy shared by every harvesting component.
//!
//! Errors are grouped by blast radius: catalog and window errors skip a
//! target, checkpoint and discovery errors stop a target, stage errors only
//! stop the remaining stages of one item.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Problems with the target catalog or the id selection passed to it.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("reading catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("catalog {path} has a missing or empty credential (`llave`)")]
    MissingCredential { path: PathBuf },
    #[error("cannot mix 'All' with explicit target ids ({ids})")]
    MixedSelection { ids: String },
    #[error("empty target selection")]
    EmptySelection,
}

/// Contradictory or unparsable date input for one target.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("both a date range and a single date were supplied")]
    Contradictory,
    #[error("date range is incomplete: {missing} is missing")]
    Incomplete { missing: &'static str },
    #[error("cannot parse {field} value {value:?} as an ISO 8601 timestamp")]
    Unparsable { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("reading checkpoint {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("checkpoint {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Failures reported by (or while talking to) the remote video API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("API error: {message} (Reason: {reason}, status {status})")]
    Status {
        status: u16,
        message: String,
        reason: String,
    },
    #[error("API transport failure calling {endpoint}: {detail}")]
    Transport { endpoint: String, detail: String },
    #[error("API response from {endpoint} could not be decoded: {detail}")]
    Decode { endpoint: String, detail: String },
}

/// The three per-item pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    SubtitleFetch,
    SubtitleNormalize,
    CommentFetch,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::SubtitleFetch => "subtitle-fetch",
            Stage::SubtitleNormalize => "subtitle-normalize",
            Stage::CommentFetch => "comment-fetch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single stage failed.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("no metadata found for the item")]
    MissingMetadata,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("subtitle download failed: {0}")]
    Download(String),
    #[error("expected exactly one raw subtitle file in {dir}, found {found}")]
    AmbiguousRaw { dir: PathBuf, found: usize },
    #[error("parsing {path}: {detail}")]
    Markup { path: PathBuf, detail: String },
    #[error("malformed publication timestamp {0:?}")]
    Timestamp(String),
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A stage failure with the item and target it happened on.
#[derive(Debug, Error)]
#[error("target {target}: item {item_id}: {stage} failed: {failure}")]
pub struct StageError {
    pub target: String,
    pub item_id: String,
    pub stage: Stage,
    #[source]
    pub failure: StageFailure,
}

/// Target-level failures. Everything here ends the harvest of one target and
/// nothing else.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("target {target}: invalid date input: {source}")]
    Window {
        target: String,
        #[source]
        source: WindowError,
    },
    #[error("target {target}: {source}")]
    Checkpoint {
        target: String,
        #[source]
        source: CheckpointError,
    },
    #[error("target {target}: discovery page fetch failed: {source}")]
    Discovery {
        target: String,
        #[source]
        source: ApiError,
    },
    #[error("target {target}: discovery returned an unparsable publishedAt {value:?}")]
    DiscoveryTimestamp { target: String, value: String },
    #[error("target {target}: resolving collection metadata failed: {source}")]
    Collection {
        target: String,
        #[source]
        source: ApiError,
    },
    #[error("target {target}: no {kind} metadata found")]
    CollectionNotFound { target: String, kind: &'static str },
    #[error("target {target}: worker pool failure: {detail}")]
    Worker { target: String, detail: String },
}
