//! Rule + learned ensemble
//!
//! ## Game mode
//!
//! 1. Rule confidence >= `rule_confident` (0.8): rule result outright.
//! 2. Otherwise the learned result is used if it beats the rule confidence
//!    and reaches `learned_gate` (0.6).
//! 3. Otherwise the rule result stands.
//!
//! ## Regional affinity
//!
//! Always blended: `confidence = w * rule + (1 - w) * learned` with
//! `w = rule_weight` (0.6), label `confidence > 0.5`.
//!
//! ## Review
//!
//! `needs_review` when confidence < `review` (0.5). Regional results are also
//! flagged inside the ambiguous band `(ambiguous_floor, combined_confident)`,
//! i.e. (0.3, 0.7).
//!
//! Learned models live behind `ArcSwap` so retraining replaces them without
//! blocking classification.

use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{info, warn};

use super::checkpoint::{self, LearnedModel};
use super::features::Vocabulary;
use super::rules::{GameModeRules, RegionalRules, RuleOutcome};
use super::text::text_blob;
use crate::config::{ClassifierConfig, GameModeThresholds, RegionalThresholds};
use crate::types::{ClassifierKind, GameMode, Label, NewPrediction, ServerId};

/// Which stage produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSource {
    RuleBased,
    Learned,
    Combined,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification<L> {
    pub source: ClassificationSource,
    pub label: L,
    pub confidence: f64,
    pub needs_review: bool,
    pub reason: String,
}

impl<L> Classification<L> {
    fn failed(label: L, error: impl std::fmt::Display) -> Self {
        Self {
            source: ClassificationSource::RuleBased,
            label,
            confidence: 0.0,
            needs_review: true,
            reason: format!("classifier error: {}", error),
        }
    }
}

/// Both classifications of one server plus the model versions used.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerClassification {
    pub game_mode: Classification<GameMode>,
    pub regional: Classification<bool>,
    pub game_mode_version: String,
    pub regional_version: String,
}

impl ServerClassification {
    /// Prediction rows for both classifiers.
    pub fn predictions(&self, server_id: ServerId, at: chrono::DateTime<chrono::Utc>) -> [NewPrediction; 2] {
        [
            NewPrediction {
                server_id,
                label: Label::GameMode(self.game_mode.label),
                confidence: self.game_mode.confidence,
                reason: self.game_mode.reason.clone(),
                needs_review: self.game_mode.needs_review,
                model_version: self.game_mode_version.clone(),
                predicted_at: at,
            },
            NewPrediction {
                server_id,
                label: Label::Regional(self.regional.label),
                confidence: self.regional.confidence,
                reason: self.regional.reason.clone(),
                needs_review: self.regional.needs_review,
                model_version: self.regional_version.clone(),
                predicted_at: at,
            },
        ]
    }
}

/// Combine game-mode rule and learned outputs.
pub fn combine_game_mode(
    rule: RuleOutcome<GameMode>,
    learned: Option<(GameMode, f64)>,
    t: &GameModeThresholds,
) -> Classification<GameMode> {
    let (source, label, confidence, reason) = match learned {
        _ if rule.confidence > t.rule_confident => {
            (ClassificationSource::RuleBased, rule.label, rule.confidence, rule.reason)
        }
        Some((mode, p)) if p > rule.confidence && p > t.learned_gate => (
            ClassificationSource::Learned,
            mode,
            p,
            format!("learned model predicts {} ({:.2}); {}", mode, p, rule.reason),
        ),
        _ => (ClassificationSource::RuleBased, rule.label, rule.confidence, rule.reason),
    };
    Classification {
        source,
        label,
        confidence,
        needs_review: confidence < t.review,
        reason,
    }
}

/// Blend regional rule score and learned probability.
pub fn combine_regional(
    rule: RuleOutcome<bool>,
    learned_probability: f64,
    t: &RegionalThresholds,
) -> Classification<bool> {
    let confidence = t.rule_weight * rule.confidence + (1.0 - t.rule_weight) * learned_probability;
    let ambiguous = confidence > t.ambiguous_floor && confidence < t.combined_confident;
    Classification {
        source: ClassificationSource::Combined,
        label: confidence > 0.5,
        confidence,
        needs_review: confidence < t.review || ambiguous,
        reason: format!(
            "{}; learned p={:.2}; blended {:.2}",
            rule.reason, learned_probability, confidence
        ),
    }
}

pub struct Ensemble {
    game_mode_rules: GameModeRules,
    regional_rules: RegionalRules,
    game_mode_thresholds: GameModeThresholds,
    regional_thresholds: RegionalThresholds,
    game_mode_model: ArcSwap<LearnedModel>,
    regional_model: ArcSwap<LearnedModel>,
}

impl Ensemble {
    pub fn new(
        config: &ClassifierConfig,
        game_mode_model: LearnedModel,
        regional_model: LearnedModel,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            game_mode_rules: GameModeRules::new()?,
            regional_rules: RegionalRules::new()?,
            game_mode_thresholds: config.game_mode,
            regional_thresholds: config.regional,
            game_mode_model: ArcSwap::from_pointee(game_mode_model),
            regional_model: ArcSwap::from_pointee(regional_model),
        })
    }

    /// Ensemble with untrained models sharing one vocabulary.
    pub fn untrained(config: &ClassifierConfig, vocabulary: Vocabulary) -> Result<Self, regex::Error> {
        Self::new(
            config,
            LearnedModel::untrained(ClassifierKind::GameMode, vocabulary.clone()),
            LearnedModel::untrained(ClassifierKind::Regional, vocabulary),
        )
    }

    /// Load checkpoints from the model directory. A kind without a usable
    /// checkpoint starts untrained over a vocabulary built from `history`.
    pub fn bootstrap<'a, I>(config: &ClassifierConfig, history: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let load = |kind: ClassifierKind| -> Option<LearnedModel> {
            let path = checkpoint::checkpoint_path(&config.model_dir, kind);
            if !path.exists() {
                return None;
            }
            match checkpoint::load_from_disk(&path) {
                Ok(model) if model.kind == kind => {
                    info!(kind = %kind, generation = model.generation, "Loaded model checkpoint");
                    Some(model)
                }
                Ok(model) => {
                    warn!(path = %path.display(), found = %model.kind, "Checkpoint kind mismatch, ignoring");
                    None
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load model checkpoint");
                    None
                }
            }
        };

        let game_mode = load(ClassifierKind::GameMode);
        let regional = load(ClassifierKind::Regional);
        let (game_mode, regional) = match (game_mode, regional) {
            (Some(g), Some(r)) => (g, r),
            (g, r) => {
                let vocabulary = Vocabulary::build(history, config.vocabulary_size);
                info!(tokens = vocabulary.len(), "Built vocabulary from server history");
                (
                    g.unwrap_or_else(|| LearnedModel::untrained(ClassifierKind::GameMode, vocabulary.clone())),
                    r.unwrap_or_else(|| LearnedModel::untrained(ClassifierKind::Regional, vocabulary)),
                )
            }
        };
        Self::new(config, game_mode, regional)
    }

    fn slot(&self, kind: ClassifierKind) -> &ArcSwap<LearnedModel> {
        match kind {
            ClassifierKind::GameMode => &self.game_mode_model,
            ClassifierKind::Regional => &self.regional_model,
        }
    }

    /// Currently deployed learned model.
    pub fn learned(&self, kind: ClassifierKind) -> Arc<LearnedModel> {
        self.slot(kind).load_full()
    }

    /// Replace the learned model of its kind.
    pub fn install(&self, model: LearnedModel) {
        let kind = model.kind;
        let generation = model.generation;
        self.slot(kind).store(Arc::new(model));
        info!(kind = %kind, generation, "Installed learned model");
    }

    /// Version tag stored with every prediction, e.g. `rules+lm3`.
    pub fn model_version(&self, kind: ClassifierKind) -> String {
        format!("rules+lm{}", self.slot(kind).load().generation)
    }

    pub fn classify_game_mode(&self, blob: &str) -> Classification<GameMode> {
        let rule = self.game_mode_rules.classify(blob);
        let model = self.game_mode_model.load();
        match model.predict(blob) {
            Ok((class, p)) => {
                let learned = GameMode::ALL.get(class).map(|mode| (*mode, p));
                combine_game_mode(rule, learned, &self.game_mode_thresholds)
            }
            Err(e) => {
                warn!(error = %e, "Game mode learned stage failed");
                Classification::failed(GameMode::Unknown, e)
            }
        }
    }

    pub fn classify_regional(&self, blob: &str) -> Classification<bool> {
        let rule = self.regional_rules.classify(blob);
        let model = self.regional_model.load();
        match model.probability(blob, 1) {
            Ok(p) => combine_regional(rule, p, &self.regional_thresholds),
            Err(e) => {
                warn!(error = %e, "Regional learned stage failed");
                Classification::failed(false, e)
            }
        }
    }

    pub fn classify(&self, name: &str, tags: &str, map: &str) -> ServerClassification {
        let blob = text_blob(name, tags, map);
        ServerClassification {
            game_mode: self.classify_game_mode(&blob),
            regional: self.classify_regional(&blob),
            game_mode_version: self.model_version(ClassifierKind::GameMode),
            regional_version: self.model_version(ClassifierKind::Regional),
        }
    }
}
