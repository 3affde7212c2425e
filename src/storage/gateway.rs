//! PersistenceGateway trait, the only door to durable storage
//!
//! Backends:
//! - `SledGateway`: embedded sled database, the production backend
//! - `InMemoryGateway`: RwLock-guarded maps for tests and `--ephemeral` runs
//!
//! Every write is an upsert keyed by a natural identity (address, player id,
//! server + classifier kind), so a retried write never duplicates a row.

use chrono::{DateTime, Utc};
use std::net::SocketAddr;

use crate::retry::Retryable;
use crate::types::{
    ClassifierKind, Feedback, NewPrediction, PlayerId, PlayerRecord, Prediction, PredictionId,
    ServerId, ServerObservation, ServerRecord, Snapshot,
};

/// Trait for pluggable persistence backends
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks.
pub trait PersistenceGateway: Send + Sync {
    /// Insert or update the server at `obs.addr`. Returns its stable id;
    /// `first_seen` is only set on insert.
    fn upsert_server(&self, obs: &ServerObservation) -> Result<ServerId, PersistenceError>;

    /// Refresh liveness of a known server. Unknown addresses return `None`.
    fn mark_online(&self, addr: SocketAddr, at: DateTime<Utc>) -> Result<Option<ServerId>, PersistenceError>;

    /// Record a failed probe of a known server. Unknown addresses return `None`.
    fn mark_offline(&self, addr: SocketAddr, at: DateTime<Utc>) -> Result<Option<ServerId>, PersistenceError>;

    fn get_server_id(&self, addr: SocketAddr) -> Result<Option<ServerId>, PersistenceError>;

    fn get_server(&self, id: ServerId) -> Result<Option<ServerRecord>, PersistenceError>;

    /// All known servers ordered by id.
    fn list_servers(&self) -> Result<Vec<ServerRecord>, PersistenceError>;

    /// Append a snapshot. The referenced server must exist.
    fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistenceError>;

    /// Most recent snapshots of one server, newest first.
    fn server_snapshots(&self, server_id: ServerId, limit: usize) -> Result<Vec<Snapshot>, PersistenceError>;

    /// Delete snapshots taken before `before`. Returns how many were removed.
    fn prune_snapshots(&self, before: DateTime<Utc>) -> Result<usize, PersistenceError>;

    fn upsert_player(&self, record: &PlayerRecord) -> Result<(), PersistenceError>;

    fn get_player(&self, id: PlayerId) -> Result<Option<PlayerRecord>, PersistenceError>;

    /// Players last refreshed before `older_than`, oldest first.
    fn stale_players(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<PlayerId>, PersistenceError>;

    /// Insert or refresh the prediction for (server, classifier kind).
    /// Rows that already carry feedback are left unchanged.
    fn upsert_prediction(&self, prediction: &NewPrediction) -> Result<PredictionId, PersistenceError>;

    fn get_prediction(&self, id: PredictionId) -> Result<Option<Prediction>, PersistenceError>;

    /// Predictions flagged for review that have no feedback yet.
    fn predictions_needing_review(&self) -> Result<Vec<Prediction>, PersistenceError>;

    /// Attach feedback. Returns `false` when feedback was already present
    /// (the existing feedback is kept).
    fn submit_feedback(&self, id: PredictionId, feedback: Feedback) -> Result<bool, PersistenceError>;

    /// Feedback-bearing predictions of one kind, joined with their server.
    fn feedback_training_set(&self, kind: ClassifierKind) -> Result<Vec<(ServerRecord, Prediction)>, PersistenceError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("connection pool exhausted ({0} connections in use)")]
    PoolExhausted(usize),
}

impl Retryable for PersistenceError {
    fn is_retryable(&self) -> bool {
        matches!(self, PersistenceError::Storage(_))
    }
}

impl From<sled::Error> for PersistenceError {
    fn from(err: sled::Error) -> Self {
        PersistenceError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<PersistenceError>> for PersistenceError {
    fn from(err: sled::transaction::TransactionError<PersistenceError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => PersistenceError::Storage(e.to_string()),
        }
    }
}
