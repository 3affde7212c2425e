//! Sled-backed gateway
//!
//! Trees:
//! - `servers`: id (u64 BE) -> JSON `ServerRecord`
//! - `server_index`: "ip:port" -> id
//! - `snapshots`: taken_at nanos (u64 BE) ++ server id (u64 BE) -> JSON `Snapshot`
//! - `players`: player id (u64 BE) -> JSON `PlayerRecord`
//! - `predictions`: id (u64 BE) -> JSON `Prediction`
//! - `prediction_index`: "server_id:kind" -> prediction id
//!
//! Snapshot keys sort chronologically so retention is a range delete.
//! Writes that touch an index and its data tree run in one transaction.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::Transactional;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use super::pool::ConnectionPool;
use super::{PersistenceError, PersistenceGateway};
use crate::types::{
    ClassifierKind, Feedback, NewPrediction, PlayerId, PlayerRecord, Prediction, PredictionId,
    ServerId, ServerObservation, ServerRecord, Snapshot,
};

pub struct SledGateway {
    db: sled::Db,
    servers: sled::Tree,
    server_index: sled::Tree,
    snapshots: sled::Tree,
    players: sled::Tree,
    predictions: sled::Tree,
    prediction_index: sled::Tree,
    pool: ConnectionPool,
}

impl SledGateway {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P, pool_size: usize) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        info!(path = %path.display(), pool_size, "Sled gateway opened");
        Self::from_db(db, pool_size)
    }

    /// Database removed when dropped.
    pub fn temporary(pool_size: usize) -> Result<Self, PersistenceError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, pool_size)
    }

    fn from_db(db: sled::Db, pool_size: usize) -> Result<Self, PersistenceError> {
        Ok(Self {
            servers: db.open_tree("servers")?,
            server_index: db.open_tree("server_index")?,
            snapshots: db.open_tree("snapshots")?,
            players: db.open_tree("players")?,
            predictions: db.open_tree("predictions")?,
            prediction_index: db.open_tree("prediction_index")?,
            pool: ConnectionPool::new(pool_size),
            db,
        })
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), PersistenceError> {
        self.db.flush()?;
        Ok(())
    }

    fn set_liveness(&self, addr: SocketAddr, at: DateTime<Utc>, online: bool) -> Result<Option<ServerId>, PersistenceError> {
        let _lease = self.pool.lease()?;
        let Some(raw) = self.server_index.get(addr_key(addr))? else {
            return Ok(None);
        };
        let id = decode_id(&raw)?;
        let key = id_key(id);
        let found = self.servers.transaction(|servers| -> ConflictableTransactionResult<bool, PersistenceError> {
            let Some(bytes) = servers.get(key)? else {
                return Ok(false);
            };
            let mut record: ServerRecord = decode(&bytes).map_err(abort)?;
            record.online = online;
            record.last_seen = at;
            servers.insert(key.to_vec(), encode(&record).map_err(abort)?)?;
            Ok(true)
        })?;
        Ok(found.then_some(id))
    }
}

impl PersistenceGateway for SledGateway {
    fn upsert_server(&self, obs: &ServerObservation) -> Result<ServerId, PersistenceError> {
        let _lease = self.pool.lease()?;
        let index_key = addr_key(obs.addr);
        let fresh_id = match self.server_index.get(&index_key)? {
            Some(_) => None,
            None => Some(self.db.generate_id()?),
        };

        let id = (&self.server_index, &self.servers).transaction(
            |(index, servers)| -> ConflictableTransactionResult<ServerId, PersistenceError> {
                let record = match index.get(&index_key)? {
                    Some(raw) => {
                        let id = decode_id(&raw).map_err(abort)?;
                        match servers.get(id_key(id))? {
                            Some(bytes) => {
                                let mut record: ServerRecord = decode(&bytes).map_err(abort)?;
                                record.apply(obs);
                                record
                            }
                            None => ServerRecord::from_observation(id, obs),
                        }
                    }
                    None => {
                        let id = fresh_id.ok_or_else(|| {
                            abort(PersistenceError::Storage(format!(
                                "index entry for {} vanished during upsert",
                                obs.addr
                            )))
                        })?;
                        index.insert(index_key.as_bytes(), id_key(id).to_vec())?;
                        ServerRecord::from_observation(id, obs)
                    }
                };
                servers.insert(id_key(record.id).to_vec(), encode(&record).map_err(abort)?)?;
                Ok(record.id)
            },
        )?;
        Ok(id)
    }

    fn mark_online(&self, addr: SocketAddr, at: DateTime<Utc>) -> Result<Option<ServerId>, PersistenceError> {
        self.set_liveness(addr, at, true)
    }

    fn mark_offline(&self, addr: SocketAddr, at: DateTime<Utc>) -> Result<Option<ServerId>, PersistenceError> {
        self.set_liveness(addr, at, false)
    }

    fn get_server_id(&self, addr: SocketAddr) -> Result<Option<ServerId>, PersistenceError> {
        let _lease = self.pool.lease()?;
        self.server_index
            .get(addr_key(addr))?
            .map(|raw| decode_id(&raw))
            .transpose()
    }

    fn get_server(&self, id: ServerId) -> Result<Option<ServerRecord>, PersistenceError> {
        let _lease = self.pool.lease()?;
        self.servers.get(id_key(id))?.map(|b| decode(&b)).transpose()
    }

    fn list_servers(&self) -> Result<Vec<ServerRecord>, PersistenceError> {
        let _lease = self.pool.lease()?;
        let mut out = Vec::new();
        for value in self.servers.iter().values() {
            out.push(decode(&value?)?);
        }
        Ok(out)
    }

    fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let _lease = self.pool.lease()?;
        if !self.servers.contains_key(id_key(snapshot.server_id))? {
            return Err(PersistenceError::NotFound(format!("server {}", snapshot.server_id)));
        }
        self.snapshots
            .insert(snapshot_key(snapshot.taken_at, snapshot.server_id), encode(snapshot)?)?;
        Ok(())
    }

    fn server_snapshots(&self, server_id: ServerId, limit: usize) -> Result<Vec<Snapshot>, PersistenceError> {
        let _lease = self.pool.lease()?;
        let mut out = Vec::with_capacity(limit.min(64));
        for item in self.snapshots.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if key.len() == 16 && key[8..] == id_key(server_id) {
                out.push(decode(&value)?);
            }
        }
        Ok(out)
    }

    fn prune_snapshots(&self, before: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let _lease = self.pool.lease()?;
        let end = time_key(before);
        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for key in self.snapshots.range(..end).keys() {
            batch.remove(key?);
            removed += 1;
        }
        self.snapshots.apply_batch(batch)?;
        Ok(removed)
    }

    fn upsert_player(&self, record: &PlayerRecord) -> Result<(), PersistenceError> {
        let _lease = self.pool.lease()?;
        self.players.insert(id_key(record.id.0), encode(record)?)?;
        Ok(())
    }

    fn get_player(&self, id: PlayerId) -> Result<Option<PlayerRecord>, PersistenceError> {
        let _lease = self.pool.lease()?;
        self.players.get(id_key(id.0))?.map(|b| decode(&b)).transpose()
    }

    fn stale_players(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<PlayerId>, PersistenceError> {
        let _lease = self.pool.lease()?;
        let mut stale = Vec::new();
        for value in self.players.iter().values() {
            let record: PlayerRecord = decode(&value?)?;
            if record.refreshed_at < older_than {
                stale.push((record.refreshed_at, record.id));
            }
        }
        stale.sort();
        Ok(stale.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    fn upsert_prediction(&self, prediction: &NewPrediction) -> Result<PredictionId, PersistenceError> {
        let _lease = self.pool.lease()?;
        let index_key = prediction_key(prediction.server_id, prediction.label.kind());
        let fresh_id = match self.prediction_index.get(&index_key)? {
            Some(_) => None,
            None => Some(self.db.generate_id()?),
        };

        let id = (&self.servers, &self.prediction_index, &self.predictions).transaction(
            |(servers, index, predictions)| -> ConflictableTransactionResult<PredictionId, PersistenceError> {
                if servers.get(id_key(prediction.server_id))?.is_none() {
                    return Err(abort(PersistenceError::NotFound(format!(
                        "server {}",
                        prediction.server_id
                    ))));
                }
                if let Some(raw) = index.get(&index_key)? {
                    let id = decode_id(&raw).map_err(abort)?;
                    let stored = match predictions.get(id_key(id))? {
                        Some(bytes) => {
                            let mut existing: Prediction = decode(&bytes).map_err(abort)?;
                            if !existing.refresh(prediction) {
                                return Ok(id);
                            }
                            existing
                        }
                        None => Prediction::from_new(id, prediction),
                    };
                    predictions.insert(id_key(id).to_vec(), encode(&stored).map_err(abort)?)?;
                    return Ok(id);
                }

                let id = fresh_id.ok_or_else(|| {
                    abort(PersistenceError::Storage(format!(
                        "prediction index entry {} vanished during upsert",
                        index_key
                    )))
                })?;
                index.insert(index_key.as_bytes(), id_key(id).to_vec())?;
                let stored = Prediction::from_new(id, prediction);
                predictions.insert(id_key(id).to_vec(), encode(&stored).map_err(abort)?)?;
                Ok(id)
            },
        )?;
        Ok(id)
    }

    fn get_prediction(&self, id: PredictionId) -> Result<Option<Prediction>, PersistenceError> {
        let _lease = self.pool.lease()?;
        self.predictions.get(id_key(id))?.map(|b| decode(&b)).transpose()
    }

    fn predictions_needing_review(&self) -> Result<Vec<Prediction>, PersistenceError> {
        let _lease = self.pool.lease()?;
        let mut out = Vec::new();
        for value in self.predictions.iter().values() {
            let prediction: Prediction = decode(&value?)?;
            if prediction.needs_review && prediction.feedback.is_none() {
                out.push(prediction);
            }
        }
        Ok(out)
    }

    fn submit_feedback(&self, id: PredictionId, feedback: Feedback) -> Result<bool, PersistenceError> {
        let _lease = self.pool.lease()?;
        let key = id_key(id);
        let attached = self.predictions.transaction(|predictions| -> ConflictableTransactionResult<bool, PersistenceError> {
            let Some(bytes) = predictions.get(key)? else {
                return Err(abort(PersistenceError::NotFound(format!("prediction {}", id))));
            };
            let mut prediction: Prediction = decode(&bytes).map_err(abort)?;
            if prediction.feedback.is_some() {
                return Ok(false);
            }
            prediction.feedback = Some(feedback.clone());
            predictions.insert(key.to_vec(), encode(&prediction).map_err(abort)?)?;
            Ok(true)
        })?;
        Ok(attached)
    }

    fn feedback_training_set(&self, kind: ClassifierKind) -> Result<Vec<(ServerRecord, Prediction)>, PersistenceError> {
        let _lease = self.pool.lease()?;
        let mut out = Vec::new();
        for value in self.predictions.iter().values() {
            let prediction: Prediction = decode(&value?)?;
            if prediction.kind != kind || prediction.feedback.is_none() {
                continue;
            }
            if let Some(bytes) = self.servers.get(id_key(prediction.server_id))? {
                out.push((decode(&bytes)?, prediction));
            }
        }
        Ok(out)
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn decode_id(raw: &[u8]) -> Result<u64, PersistenceError> {
    raw.try_into()
        .map(u64::from_be_bytes)
        .map_err(|_| PersistenceError::Serialization(format!("id key has {} bytes", raw.len())))
}

fn addr_key(addr: SocketAddr) -> String {
    addr.to_string()
}

fn prediction_key(server_id: ServerId, kind: ClassifierKind) -> String {
    format!("{}:{}", server_id, kind.as_str())
}

fn time_key(at: DateTime<Utc>) -> [u8; 8] {
    let nanos = at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp().saturating_mul(1_000_000_000));
    u64::try_from(nanos).unwrap_or(0).to_be_bytes()
}

fn snapshot_key(at: DateTime<Utc>, server_id: ServerId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&time_key(at));
    key[8..].copy_from_slice(&id_key(server_id));
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, PersistenceError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PersistenceError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn abort(err: PersistenceError) -> ConflictableTransactionError<PersistenceError> {
    ConflictableTransactionError::Abort(err)
}
