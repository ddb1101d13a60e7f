pub mod config;
pub mod content_hash;
pub mod error;
pub mod release;
pub mod tile_coord;

pub use config::Settings;
pub use content_hash::ContentHash;
pub use error::{CoreError, ItemError, ScanError, ScanOutcome, WorkerError};
pub use release::ReleaseId;
pub use tile_coord::TileCoord;
