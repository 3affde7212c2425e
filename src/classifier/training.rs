//! Feedback-driven retraining of the learned stage.
//!
//! Labels come from reviewed predictions: accept keeps the predicted label,
//! reject flips a regional label (game-mode rejects carry no label and are
//! skipped), an explicit label is used as given. Each run rebuilds the
//! vocabulary from reviewed servers and stored history, trains a fresh model
//! over it, checkpoints the result and swaps it in.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::checkpoint::{self, LearnedModel};
use super::ensemble::Ensemble;
use super::features::{FeatureVector, Vocabulary};
use super::model::{LinearModel, TrainingError, TrainingReport};
use super::text::text_blob;
use crate::config::ClassifierConfig;
use crate::storage::PersistenceGateway;
use crate::types::{ClassifierKind, GameMode, Label, Prediction, ServerRecord};

/// Class index of a label within its classifier.
pub fn class_index(label: Label) -> Option<usize> {
    match label {
        Label::GameMode(mode) => GameMode::ALL.iter().position(|m| *m == mode),
        Label::Regional(flag) => Some(usize::from(flag)),
    }
}

pub struct Retrainer {
    gateway: Arc<dyn PersistenceGateway>,
    ensemble: Arc<Ensemble>,
    config: ClassifierConfig,
}

impl Retrainer {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, ensemble: Arc<Ensemble>, config: ClassifierConfig) -> Self {
        Self {
            gateway,
            ensemble,
            config,
        }
    }

    /// Vocabulary over reviewed servers plus everything else in storage,
    /// counting each server once.
    pub fn build_vocabulary(
        &self,
        reviewed: &[(ServerRecord, Prediction)],
    ) -> Result<Vocabulary, TrainingError> {
        let mut seen = BTreeSet::new();
        let history = self.gateway.list_servers()?;
        let blobs: Vec<String> = reviewed
            .iter()
            .map(|(server, _)| server)
            .chain(history.iter())
            .filter(|server| seen.insert(server.id))
            .map(|server| text_blob(&server.name, &server.tags, &server.map))
            .collect();
        Ok(Vocabulary::build(blobs.iter().map(String::as_str), self.config.vocabulary_size))
    }

    /// Labelled samples from reviewed predictions, featurized over `vocabulary`.
    pub fn training_samples(
        reviewed: &[(ServerRecord, Prediction)],
        vocabulary: &Vocabulary,
    ) -> Vec<(FeatureVector, usize)> {
        reviewed
            .iter()
            .filter_map(|(server, prediction)| {
                let label = prediction.corrected_label()?;
                let class = class_index(label)?;
                let blob = text_blob(&server.name, &server.tags, &server.map);
                Some((vocabulary.featurize(&blob), class))
            })
            .collect()
    }

    /// Retrain one classifier kind and install the result.
    pub fn retrain(&self, kind: ClassifierKind) -> Result<TrainingReport, TrainingError> {
        let current = self.ensemble.learned(kind);
        let reviewed = self.gateway.feedback_training_set(kind)?;
        let vocabulary = self.build_vocabulary(&reviewed)?;
        let samples = Self::training_samples(&reviewed, &vocabulary);
        if samples.len() < self.config.min_training_samples {
            return Err(TrainingError::NotEnoughSamples {
                needed: self.config.min_training_samples,
                got: samples.len(),
            });
        }

        let mut model = LinearModel::new(current.model.classes(), vocabulary.len());
        let report = model.train(&samples, self.config.training_passes, self.config.learning_rate)?;

        let next = LearnedModel {
            format_version: checkpoint::FORMAT_VERSION,
            kind,
            generation: current.generation + 1,
            trained_at: Some(Utc::now()),
            trained_samples: samples.len(),
            vocabulary,
            model,
        };
        checkpoint::save_to_disk(&next, &checkpoint::checkpoint_path(&self.config.model_dir, kind))?;
        self.ensemble.install(next);

        info!(
            kind = %kind,
            samples = report.samples,
            passes = report.passes,
            loss = report.final_loss,
            accuracy = report.accuracy,
            "Retrained learned model"
        );
        Ok(report)
    }

    /// Retrain every kind. Failures are logged per kind and never affect
    /// the deployed models.
    pub fn retrain_all(&self) -> Vec<(ClassifierKind, Result<TrainingReport, TrainingError>)> {
        ClassifierKind::ALL
            .iter()
            .map(|&kind| {
                let result = self.retrain(kind);
                match &result {
                    Err(TrainingError::NotEnoughSamples { needed, got }) => {
                        info!(kind = %kind, needed, got, "Skipping retrain, not enough feedback");
                    }
                    Err(e) => warn!(kind = %kind, error = %e, "Retraining failed"),
                    Ok(_) => {}
                }
                (kind, result)
            })
            .collect()
    }

    /// Periodic retraining until cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; models were just loaded
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Retrainer shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    if let Err(e) = tokio::task::spawn_blocking(move || this.retrain_all()).await {
                        warn!(error = %e, "Retraining task panicked");
                    }
                }
            }
        }
    }
}
