//! Learned-stage checkpoints.
//!
//! One JSON file per classifier kind under the model directory, written
//! atomically (temp file, then rename).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::features::{FeatureVector, Vocabulary};
use super::model::{LinearModel, TrainingError};
use crate::types::ClassifierKind;

/// Checkpoint format version.
pub const FORMAT_VERSION: u32 = 1;

/// Everything the learned stage needs to score a blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedModel {
    pub format_version: u32,
    pub kind: ClassifierKind,
    /// 0 for the untrained bootstrap model, +1 per successful retrain.
    pub generation: u64,
    pub trained_at: Option<DateTime<Utc>>,
    pub trained_samples: usize,
    pub vocabulary: Vocabulary,
    pub model: LinearModel,
}

impl LearnedModel {
    /// Untrained model over `vocabulary`.
    pub fn untrained(kind: ClassifierKind, vocabulary: Vocabulary) -> Self {
        let model = LinearModel::new(class_count(kind), vocabulary.len());
        Self {
            format_version: FORMAT_VERSION,
            kind,
            generation: 0,
            trained_at: None,
            trained_samples: 0,
            vocabulary,
            model,
        }
    }

    pub fn featurize(&self, blob: &str) -> FeatureVector {
        self.vocabulary.featurize(blob)
    }

    /// Most probable class index and its probability.
    pub fn predict(&self, blob: &str) -> Result<(usize, f64), TrainingError> {
        self.model.predict(&self.featurize(blob))
    }

    /// Probability of one class.
    pub fn probability(&self, blob: &str, class: usize) -> Result<f64, TrainingError> {
        let probs = self.model.predict_proba(&self.featurize(blob))?;
        probs
            .get(class)
            .copied()
            .ok_or(TrainingError::LabelOutOfRange(class))
    }
}

/// Number of output classes for a classifier kind.
pub fn class_count(kind: ClassifierKind) -> usize {
    match kind {
        ClassifierKind::GameMode => crate::types::GameMode::ALL.len(),
        ClassifierKind::Regional => 2,
    }
}

/// Checkpoint path for `kind` under `dir`.
pub fn checkpoint_path(dir: &Path, kind: ClassifierKind) -> PathBuf {
    dir.join(format!("{}.json", kind.as_str()))
}

/// Save a checkpoint to disk atomically (write temp file, then rename).
pub fn save_to_disk(model: &LearnedModel, path: &Path) -> io::Result<()> {
    let json = serde_json::to_vec(model).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let tmp_path = path.with_extension("json.tmp");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&tmp_path, &json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unparseable JSON, or weights that do not fit the declared shape.
    #[error("malformed checkpoint: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported checkpoint format {0}")]
    UnsupportedFormat(u32),

    #[error("model is {classes}x{dims}, expected {expected_classes}x{vocabulary} for its kind and vocabulary")]
    ShapeMismatch {
        classes: usize,
        dims: usize,
        expected_classes: usize,
        vocabulary: usize,
    },
}

/// Load a checkpoint, rejecting unknown format versions and models whose
/// shape disagrees with their kind or vocabulary.
pub fn load_from_disk(path: &Path) -> Result<LearnedModel, CheckpointError> {
    let data = std::fs::read(path)?;
    let model: LearnedModel = serde_json::from_slice(&data)?;
    if model.format_version != FORMAT_VERSION {
        return Err(CheckpointError::UnsupportedFormat(model.format_version));
    }
    let expected_classes = class_count(model.kind);
    if model.model.dims() != model.vocabulary.len() || model.model.classes() != expected_classes {
        return Err(CheckpointError::ShapeMismatch {
            classes: model.model.classes(),
            dims: model.model.dims(),
            expected_classes,
            vocabulary: model.vocabulary.len(),
        });
    }
    Ok(model)
}
