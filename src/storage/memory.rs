//! In-memory gateway for tests and ephemeral runs.
//!
//! Thread-safe via `RwLock`. Not durable, data is lost on restart.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{PersistenceError, PersistenceGateway};
use crate::types::{
    ClassifierKind, Feedback, NewPrediction, PlayerId, PlayerRecord, Prediction, PredictionId,
    ServerId, ServerObservation, ServerRecord, Snapshot,
};

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    servers: BTreeMap<ServerId, ServerRecord>,
    server_index: HashMap<SocketAddr, ServerId>,
    snapshots: Vec<Snapshot>,
    players: HashMap<PlayerId, PlayerRecord>,
    predictions: BTreeMap<PredictionId, Prediction>,
    prediction_index: HashMap<(ServerId, ClassifierKind), PredictionId>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn server_at(&mut self, addr: SocketAddr) -> Option<&mut ServerRecord> {
        let id = self.server_index.get(&addr)?;
        self.servers.get_mut(id)
    }
}

#[derive(Default)]
pub struct InMemoryGateway {
    state: RwLock<MemoryState>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, PersistenceError> {
        self.state
            .read()
            .map_err(|e| PersistenceError::Storage(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, PersistenceError> {
        self.state
            .write()
            .map_err(|e| PersistenceError::Storage(e.to_string()))
    }
}

impl PersistenceGateway for InMemoryGateway {
    fn upsert_server(&self, obs: &ServerObservation) -> Result<ServerId, PersistenceError> {
        let mut state = self.write()?;
        if let Some(record) = state.server_at(obs.addr) {
            record.apply(obs);
            return Ok(record.id);
        }
        let id = state.allocate_id();
        state.server_index.insert(obs.addr, id);
        state.servers.insert(id, ServerRecord::from_observation(id, obs));
        Ok(id)
    }

    fn mark_online(&self, addr: SocketAddr, at: DateTime<Utc>) -> Result<Option<ServerId>, PersistenceError> {
        let mut state = self.write()?;
        Ok(state.server_at(addr).map(|record| {
            record.online = true;
            record.last_seen = at;
            record.id
        }))
    }

    fn mark_offline(&self, addr: SocketAddr, at: DateTime<Utc>) -> Result<Option<ServerId>, PersistenceError> {
        let mut state = self.write()?;
        Ok(state.server_at(addr).map(|record| {
            record.online = false;
            record.last_seen = at;
            record.id
        }))
    }

    fn get_server_id(&self, addr: SocketAddr) -> Result<Option<ServerId>, PersistenceError> {
        Ok(self.read()?.server_index.get(&addr).copied())
    }

    fn get_server(&self, id: ServerId) -> Result<Option<ServerRecord>, PersistenceError> {
        Ok(self.read()?.servers.get(&id).cloned())
    }

    fn list_servers(&self) -> Result<Vec<ServerRecord>, PersistenceError> {
        Ok(self.read()?.servers.values().cloned().collect())
    }

    fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let mut state = self.write()?;
        if !state.servers.contains_key(&snapshot.server_id) {
            return Err(PersistenceError::NotFound(format!("server {}", snapshot.server_id)));
        }
        // Same (server, instant) is the same snapshot
        state
            .snapshots
            .retain(|s| !(s.server_id == snapshot.server_id && s.taken_at == snapshot.taken_at));
        state.snapshots.push(snapshot.clone());
        Ok(())
    }

    fn server_snapshots(&self, server_id: ServerId, limit: usize) -> Result<Vec<Snapshot>, PersistenceError> {
        let state = self.read()?;
        let mut snapshots: Vec<Snapshot> = state
            .snapshots
            .iter()
            .filter(|s| s.server_id == server_id)
            .cloned()
            .collect();
        snapshots.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));
        snapshots.truncate(limit);
        Ok(snapshots)
    }

    fn prune_snapshots(&self, before: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let mut state = self.write()?;
        let original = state.snapshots.len();
        state.snapshots.retain(|s| s.taken_at >= before);
        Ok(original - state.snapshots.len())
    }

    fn upsert_player(&self, record: &PlayerRecord) -> Result<(), PersistenceError> {
        self.write()?.players.insert(record.id, record.clone());
        Ok(())
    }

    fn get_player(&self, id: PlayerId) -> Result<Option<PlayerRecord>, PersistenceError> {
        Ok(self.read()?.players.get(&id).cloned())
    }

    fn stale_players(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<PlayerId>, PersistenceError> {
        let state = self.read()?;
        let mut stale: Vec<&PlayerRecord> = state
            .players
            .values()
            .filter(|p| p.refreshed_at < older_than)
            .collect();
        stale.sort_by_key(|p| (p.refreshed_at, p.id));
        Ok(stale.into_iter().take(limit).map(|p| p.id).collect())
    }

    fn upsert_prediction(&self, prediction: &NewPrediction) -> Result<PredictionId, PersistenceError> {
        let mut state = self.write()?;
        if !state.servers.contains_key(&prediction.server_id) {
            return Err(PersistenceError::NotFound(format!("server {}", prediction.server_id)));
        }
        let key = (prediction.server_id, prediction.label.kind());
        if let Some(id) = state.prediction_index.get(&key).copied() {
            if let Some(existing) = state.predictions.get_mut(&id) {
                existing.refresh(prediction);
                return Ok(id);
            }
        }
        let id = state.allocate_id();
        state.prediction_index.insert(key, id);
        state.predictions.insert(id, Prediction::from_new(id, prediction));
        Ok(id)
    }

    fn get_prediction(&self, id: PredictionId) -> Result<Option<Prediction>, PersistenceError> {
        Ok(self.read()?.predictions.get(&id).cloned())
    }

    fn predictions_needing_review(&self) -> Result<Vec<Prediction>, PersistenceError> {
        Ok(self
            .read()?
            .predictions
            .values()
            .filter(|p| p.needs_review && p.feedback.is_none())
            .cloned()
            .collect())
    }

    fn submit_feedback(&self, id: PredictionId, feedback: Feedback) -> Result<bool, PersistenceError> {
        let mut state = self.write()?;
        let prediction = state
            .predictions
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::NotFound(format!("prediction {}", id)))?;
        if prediction.feedback.is_some() {
            return Ok(false);
        }
        prediction.feedback = Some(feedback);
        Ok(true)
    }

    fn feedback_training_set(&self, kind: ClassifierKind) -> Result<Vec<(ServerRecord, Prediction)>, PersistenceError> {
        let state = self.read()?;
        Ok(state
            .predictions
            .values()
            .filter(|p| p.kind == kind && p.feedback.is_some())
            .filter_map(|p| {
                state
                    .servers
                    .get(&p.server_id)
                    .map(|server| (server.clone(), p.clone()))
            })
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
