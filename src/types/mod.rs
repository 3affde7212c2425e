//! Shared data structures for server discovery and classification
//!
//! - `server`: ServerRecord, ServerObservation, Snapshot
//! - `player`: PlayerId, PlayerRecord
//! - `prediction`: GameMode, Label, Prediction, Feedback

mod server;
mod player;
mod prediction;

pub use server::*;
pub use player::*;
pub use prediction::*;
