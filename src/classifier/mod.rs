//! Classification ensemble
//!
//! Labels every probed server twice: game mode (multiclass) and regional
//! affinity (binary). Each label comes from a deterministic rule stage and a
//! trainable bag-of-words model combined by [`ensemble`]; reviewed
//! predictions feed [`training::Retrainer`].

pub mod checkpoint;
pub mod ensemble;
pub mod features;
pub mod model;
pub mod rules;
pub mod text;
pub mod training;

pub use checkpoint::{CheckpointError, LearnedModel};
pub use ensemble::{
    combine_game_mode, combine_regional, Classification, ClassificationSource, Ensemble,
    ServerClassification,
};
pub use features::{FeatureVector, Vocabulary};
pub use model::{LinearModel, TrainingError, TrainingReport};
pub use rules::{GameModeRules, RegionalRules, RuleOutcome};
pub use text::text_blob;
pub use training::Retrainer;
