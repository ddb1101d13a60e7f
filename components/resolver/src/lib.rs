//! External interfaces to the upstream release system (spec.md §6): a
//! version oracle HTTP client, a TACT key store, a listfile cache, and a
//! rate-limited/retrying wrapper, plus the [`ContentResolver`]/
//! [`Filesystem`] collaborator pair that the pipeline crate scans
//! against. No TACT/CASC/BLTE parser lives here — spec.md §1 names that
//! library as a Non-goal. Callers bring their own implementation of
//! [`ContentResolver`]; this crate ships a `fake` one for tests.

pub mod fake;
pub mod keystore;
pub mod listfile;
pub mod oracle;
pub mod ratelimit;
pub mod traits;

pub use keystore::KeyStore;
pub use listfile::ListfileCache;
pub use oracle::{ProductSummary, VersionOracle, VersionRow};
pub use ratelimit::RateLimited;
pub use traits::{
    CompressionSpec, ContentResolver, FileDescriptor, FileId, Filesystem, MapCatalogueRow, OpenStream, Resolved,
    ResolverError,
};
