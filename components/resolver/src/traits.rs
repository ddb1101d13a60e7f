//! The content resolver surface (spec.md §6): a narrow collaborator
//! interface this crate defines and consumes, but does not provide a
//! real TACT/CASC/BLTE implementation of (spec.md §1 Non-goals — "the
//! virtual-filesystem / archive-decryption library"). Classification is a
//! tagged result variant (spec.md §9 REDESIGN FLAG), not exception-driven
//! control flow.

use async_trait::async_trait;
use mapscan_core::ContentHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("not found")]
    NotFound,
}

/// The outcome of asking the resolver for something that might be gated
/// behind a missing decryption key, per REDESIGN FLAG (d): `Ok` for
/// success, `KeyRequired` for the expected/actionable "we don't have this
/// key yet" case, `Other` for anything else.
#[derive(Debug)]
pub enum Resolved<T> {
    Ok(T),
    KeyRequired { key_name: String },
    Other(ResolverError),
}

impl<T> Resolved<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        match self {
            Resolved::Ok(v) => Resolved::Ok(f(v)),
            Resolved::KeyRequired { key_name } => Resolved::KeyRequired { key_name },
            Resolved::Other(e) => Resolved::Other(e),
        }
    }
}

/// A file id as used in the game's virtual filesystem.
pub type FileId = u32;

/// A descriptor for one physical location of a `file_id` (a file id may
/// resolve to several locale-specific variants; spec.md §6
/// `open_file_id`).
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub file_id: FileId,
    pub encoding_key: Vec<u8>,
    pub locale: u32,
}

/// An opened, decompressed byte stream for one file.
#[derive(Debug)]
pub struct OpenStream {
    pub bytes: Vec<u8>,
}

/// The per-release virtual filesystem, resolved from a `(product_name,
/// build_config, cdn_config, product_config)` tuple (spec.md §6).
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// `filesystem.content_key_for_file_id` (spec.md §6).
    async fn content_key_for_file_id(&self, file_id: FileId) -> Result<Option<ContentHash>, ResolverError>;

    /// `filesystem.open_file_id` (spec.md §6). May return several
    /// descriptors (locale variants); the caller picks the one it wants.
    async fn open_file_id(&self, file_id: FileId, locale: u32) -> Result<Vec<FileDescriptor>, ResolverError>;

    /// `resolve.open_stream`, gated by a possibly-missing key (spec.md
    /// §6). `validate` requests integrity validation of the decoded
    /// BLTE frame.
    async fn open_stream(&self, descriptor: &FileDescriptor, validate: bool) -> Resolved<OpenStream>;

    /// `filesystem.compression_spec` — the BLTE framing spec for a given
    /// encoding key (spec.md §6), used to decode chunked/possibly-
    /// encrypted payloads before image decoding.
    fn compression_spec(&self, encoding_key: &[u8]) -> Option<CompressionSpec>;
}

#[derive(Debug, Clone)]
pub struct CompressionSpec {
    pub chunk_count: u32,
}

/// The top-level collaborator (spec.md §6
/// `resolve_filesystem(product_name, build_config, cdn_config,
/// product_config) -> Filesystem`).
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve_filesystem(
        &self,
        product_name: &str,
        config_build: &str,
        config_cdn: &str,
        config_product: &str,
    ) -> Resolved<std::sync::Arc<dyn Filesystem>>;

    /// Open the canonical map database table (spec.md §4.3 step 3).
    /// `KeyRequired` here classifies as `encrypted_map_database`.
    async fn open_map_database(
        &self,
        filesystem: &dyn Filesystem,
    ) -> Resolved<Vec<MapCatalogueRow>>;

    /// Install a decryption key into the resolver's key service (spec.md
    /// §4.3 step 1, §9 REDESIGN FLAG: an explicit call rather than
    /// reaching into global state). Process-global and idempotent — keys
    /// are installed once at scan start and never removed (spec.md §5
    /// "Resource lifetimes").
    fn install_key(&self, key_name: &str, key_value: &[u8]);
}

/// One row of the map catalogue (spec.md §4.3 step 3): `id, name,
/// directory`, plus a verbatim JSON rendering of the entire source row
/// (spec.md §9 "typed façade over row-shaped records").
#[derive(Debug, Clone)]
pub struct MapCatalogueRow {
    pub id: i32,
    pub name: String,
    pub directory: String,
    pub json: serde_json::Value,
}
