use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MirrorError {
    #[error("invalid dataset identifier: {0}")]
    InvalidDsid(String),

    #[error("dataset identifier carries a CDAG marker: {0}")]
    CdagInDsid(String),

    #[error("invalid time interval: {0}")]
    InvalidTimeInterval(String),

    #[error("unparseable dataset filename: {0}")]
    InvalidFilename(String),

    #[error("invalid item identifier: {0}")]
    InvalidItemId(String),

    #[error("missing config file solo-mirror.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {}", .0.display())]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("archive request failed: {0}")]
    ArchiveHttp(String),

    #[error("archive returned status {status}: {message}")]
    ArchiveStatus { status: u16, message: String },

    #[error("item not found in archive: {0}")]
    ItemNotFound(String),

    #[error("archive protocol error: {0}")]
    Protocol(String),

    #[error("downloaded file name {actual} disagrees with listing name {expected}")]
    NameMismatch { expected: String, actual: String },

    #[error("downloaded file size {actual} disagrees with listing size {expected}")]
    SizeMismatch { expected: i64, actual: i64 },

    #[error("archive listing is empty")]
    EmptyArchiveListing,

    #[error("reference subset is empty; refusing to wipe the local mirror")]
    EmptyReferenceSubset,

    #[error(
        "deletion failsafe tripped: {deletions} deletions vs {downloads} downloads \
         exceeds threshold {threshold}\nfirst files that would have been deleted:\n{sample}"
    )]
    DeletionThresholdExceeded {
        deletions: usize,
        downloads: usize,
        threshold: usize,
        sample: String,
    },

    #[error("two archive rows share item id and version: {0}")]
    DuplicateItemVersion(String),

    #[error("no placement rule for dataset: {0}")]
    PlacementUnsupported(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("remove command failed: {0}")]
    RemoveCommand(String),
}

impl MirrorError {
    /// The three fatal sync pre-conditions of the reconciliation run.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            MirrorError::EmptyArchiveListing
                | MirrorError::EmptyReferenceSubset
                | MirrorError::DeletionThresholdExceeded { .. }
        )
    }
}
