//! Batch query scheduler
//!
//! - `probe`: concurrent info + player query against one address
//! - `sweep`: bounded-concurrency batches, persistence and classification
//! - `scheduler`: full and hot sweep timers with overlap guards

pub mod probe;
pub mod scheduler;
pub mod sweep;

pub use probe::{probe, ProbeResult};
pub use scheduler::{ScanScheduler, ScanStats, SweepKind};
pub use sweep::{SweepStats, Sweeper};
