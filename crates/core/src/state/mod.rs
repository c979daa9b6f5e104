pub mod db;
pub mod io;
pub mod snapshot;
pub mod transcript;

pub use db::{RunStatus, RunStore, RunSummary, StoredRun};
pub use snapshot::Snapshot;
