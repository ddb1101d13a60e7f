//! Crate-wide error taxonomy. See spec.md §7 for the five error
//! categories this models: per-item recoverable, encryption-required,
//! transient I/O, scan-fatal, worker-fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("release component '{component}' out of range: {value} (max {max})")]
    ReleaseComponentOutOfRange { component: &'static str, value: u32, max: u32 },

    #[error("invalid release string '{input}'")]
    InvalidReleaseString { input: String },

    #[error("invalid release component '{component}' in '{input}'")]
    InvalidReleaseComponent { component: &'static str, input: String },

    #[error("invalid content hash '{input}'")]
    InvalidContentHash { input: String },

    #[error("invalid tile coordinate '{input}'")]
    InvalidTileCoord { input: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Per-item failure collected during a parallel loop (spec.md §7 category
/// 1). Never propagated directly; aggregated at a stage boundary.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct ItemError {
    pub message: String,
}

impl ItemError {
    pub fn new(message: impl Into<String>) -> Self {
        ItemError { message: message.into() }
    }
}

/// The terminal classification of a build scan (spec.md §4.2, §4.3 step
/// 9). A tagged enum, not an exception type, per REDESIGN FLAG (d) in
/// spec.md §9.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    FullDecrypt,
    EncryptedBuild { key_name: String },
    EncryptedMapDatabase { key_name: String },
    PartialDecrypt { encrypted_maps: std::collections::BTreeMap<String, Vec<i32>> },
    Exception { message: String },
}

impl ScanOutcome {
    pub fn state_name(&self) -> &'static str {
        match self {
            ScanOutcome::FullDecrypt => "full_decrypt",
            ScanOutcome::EncryptedBuild { .. } => "encrypted_build",
            ScanOutcome::EncryptedMapDatabase { .. } => "encrypted_map_database",
            ScanOutcome::PartialDecrypt { .. } => "partial_decrypt",
            ScanOutcome::Exception { .. } => "exception",
        }
    }
}

/// Errors that can abort a scan outright (spec.md §7 category 4). Held
/// distinct from [`ScanOutcome::Exception`] so call sites can choose
/// whether to record-and-continue (dispatcher) or propagate (debug mode,
/// per spec.md §4.2 "on uncaught exception when exception-capture is
/// disabled").
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan aborted: {0}")]
    Fatal(String),

    #[error("tile materialisation failed for {failed} of {attempted} tiles")]
    TileMaterialisationFailed { failed: usize, attempted: usize, causes: Vec<ItemError> },

    #[error("lod tile hash collision at hash {hash}: component lists differ")]
    LodHashCollision { hash: String },

    #[error("database error: {0}")]
    Database(String),
}

/// Worker-fatal errors (spec.md §7 category 5): configuration invalid or
/// database unreachable at startup. The binary logs and exits non-zero
/// on these; see spec.md §6 exit codes.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),
}
