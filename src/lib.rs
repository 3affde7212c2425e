//! server-scout: game server discovery and intelligence
//!
//! Finds game servers through the master server directory and the web
//! listing API, probes them over UDP, classifies each one by game mode and
//! regional affinity, and enriches player profiles through a rate-limited
//! API client.
//!
//! ## Architecture
//!
//! - **Protocol**: pure codecs for the directory, info and player queries
//! - **Discovery**: master server and HTTP listing sources
//! - **Scanner**: batched probes, persistence, full and hot sweep timers
//! - **Classifier**: rule + learned ensemble with feedback retraining
//! - **Enrichment**: prioritised work list, sliding-window limiter, TTL cache
//! - **Storage**: `PersistenceGateway` over sled or memory

pub mod app;
pub mod classifier;
pub mod config;
pub mod discovery;
pub mod enrichment;
pub mod protocol;
pub mod retry;
pub mod scanner;
pub mod storage;
pub mod types;
pub mod udp;

pub use app::{ScoutContext, StartupError};
pub use config::ScoutConfig;

pub use classifier::{Classification, ClassificationSource, Ensemble, Retrainer, ServerClassification};
pub use enrichment::{EnrichmentWorker, Priority, ProfileApi};
pub use protocol::{PlayerEntry, ProtocolError, ServerInfo};
pub use scanner::{probe, ProbeResult, ScanScheduler, ScanStats, SweepStats, Sweeper};
pub use storage::{InMemoryGateway, PersistenceError, PersistenceGateway, SledGateway};

pub use types::{
    ClassifierKind, Feedback, GameMode, Label, PlayerId, PlayerRecord, Prediction, ServerRecord, Snapshot, Verdict,
};
