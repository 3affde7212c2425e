//! Trainable softmax linear model.
//!
//! `p = softmax(W x + b)`, trained with plain SGD on cross-entropy. Zero
//! initial weights give a uniform distribution, so an untrained model never
//! looks confident.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::features::FeatureVector;

/// Seed for sample shuffling, fixed so retraining is reproducible.
const SHUFFLE_SEED: u64 = 0x5C0_u64;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("not enough training samples ({got} < {needed})")]
    NotEnoughSamples { needed: usize, got: usize },

    #[error("feature width {got} does not match model width {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("label index {0} out of range")]
    LabelOutOfRange(usize),

    #[error("persistence error: {0}")]
    Persistence(#[from] crate::storage::PersistenceError),

    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LinearModelParts")]
pub struct LinearModel {
    classes: usize,
    dims: usize,
    /// Row-major `classes x dims`.
    weights: Vec<f64>,
    bias: Vec<f64>,
}

/// Deserialized fields before the shape check.
#[derive(Deserialize)]
struct LinearModelParts {
    classes: usize,
    dims: usize,
    weights: Vec<f64>,
    bias: Vec<f64>,
}

impl TryFrom<LinearModelParts> for LinearModel {
    type Error = String;

    fn try_from(parts: LinearModelParts) -> Result<Self, Self::Error> {
        let expected = parts.classes.checked_mul(parts.dims).ok_or("model shape overflows")?;
        if parts.weights.len() != expected {
            return Err(format!(
                "expected {} weights for {}x{}, found {}",
                expected,
                parts.classes,
                parts.dims,
                parts.weights.len()
            ));
        }
        if parts.bias.len() != parts.classes {
            return Err(format!("expected {} biases, found {}", parts.classes, parts.bias.len()));
        }
        Ok(Self {
            classes: parts.classes,
            dims: parts.dims,
            weights: parts.weights,
            bias: parts.bias,
        })
    }
}

/// Summary of one training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingReport {
    pub samples: usize,
    pub passes: usize,
    /// Mean cross-entropy over the final pass.
    pub final_loss: f64,
    /// Accuracy on the training set after the final pass.
    pub accuracy: f64,
}

impl LinearModel {
    pub fn new(classes: usize, dims: usize) -> Self {
        Self {
            classes,
            dims,
            weights: vec![0.0; classes * dims],
            bias: vec![0.0; classes],
        }
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn check_width(&self, x: &FeatureVector) -> Result<(), TrainingError> {
        if x.len() != self.dims {
            return Err(TrainingError::DimensionMismatch {
                expected: self.dims,
                got: x.len(),
            });
        }
        Ok(())
    }

    /// Class probabilities.
    pub fn predict_proba(&self, x: &FeatureVector) -> Result<Vec<f64>, TrainingError> {
        self.check_width(x)?;
        Ok(self.probabilities(x.values()))
    }

    /// Most probable class and its probability.
    pub fn predict(&self, x: &FeatureVector) -> Result<(usize, f64), TrainingError> {
        let probs = self.predict_proba(x)?;
        let best = probs
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (i, &p)| if p > acc.1 { (i, p) } else { acc });
        Ok(best)
    }

    fn probabilities(&self, x: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = (0..self.classes)
            .map(|c| {
                let row = &self.weights[c * self.dims..(c + 1) * self.dims];
                self.bias[c] + row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
            })
            .collect();
        softmax(&logits)
    }

    /// SGD over `samples` for `passes` epochs, shuffling each pass.
    pub fn train(
        &mut self,
        samples: &[(FeatureVector, usize)],
        passes: usize,
        learning_rate: f64,
    ) -> Result<TrainingReport, TrainingError> {
        for (x, label) in samples {
            self.check_width(x)?;
            if *label >= self.classes {
                return Err(TrainingError::LabelOutOfRange(*label));
            }
        }

        let mut rng = StdRng::seed_from_u64(SHUFFLE_SEED);
        let mut order: Vec<usize> = (0..samples.len()).collect();
        let mut final_loss = 0.0;

        for _ in 0..passes {
            order.shuffle(&mut rng);
            let mut loss = 0.0;
            for &i in &order {
                let (x, label) = &samples[i];
                let probs = self.probabilities(x.values());
                loss -= probs[*label].max(1e-12).ln();
                for (c, p) in probs.iter().enumerate() {
                    // d(loss)/d(logit_c) = p_c - 1[c == label]
                    let grad = p - if c == *label { 1.0 } else { 0.0 };
                    self.bias[c] -= learning_rate * grad;
                    let row = &mut self.weights[c * self.dims..(c + 1) * self.dims];
                    for (w, v) in row.iter_mut().zip(x.values()) {
                        if *v != 0.0 {
                            *w -= learning_rate * grad * v;
                        }
                    }
                }
            }
            final_loss = loss / samples.len().max(1) as f64;
        }

        let correct = samples
            .iter()
            .filter(|(x, label)| {
                let probs = self.probabilities(x.values());
                argmax(&probs) == *label
            })
            .count();

        Ok(TrainingReport {
            samples: samples.len(),
            passes,
            final_loss,
            accuracy: correct as f64 / samples.len().max(1) as f64,
        })
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc })
        .0
}
