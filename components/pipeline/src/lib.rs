//! The scan pipeline (spec.md §4): turns a discovered product release
//! into materialised minimap tiles and published compositions. `poller`
//! is C1/C2's upstream feed (spec.md §4.1), `dispatcher` is the claim
//! loop (§4.2), `scanner` is the per-release orchestrator (§4.3), and
//! `materializer`/`lodsynth` are the tile/LOD production stages (§4.4,
//! §4.5).

pub mod composition;
pub mod dispatcher;
pub mod events;
pub mod lod;
pub mod lodsynth;
pub mod materializer;
pub mod poller;
pub mod scanner;
pub mod wdt;
pub mod workerpool;

pub use dispatcher::run_once as dispatch_once;
pub use events::{Event, EventLog, Recorded};
pub use poller::{poll_once, PollDeps};
pub use scanner::{run_scan, ScanDeps, ScanInputs};
pub use workerpool::WorkerPool;
