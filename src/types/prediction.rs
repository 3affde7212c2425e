//! Classifier labels, persisted predictions and human feedback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ServerId;

/// Storage-assigned prediction identifier.
pub type PredictionId = u64;

/// The two independent classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    GameMode,
    Regional,
}

impl ClassifierKind {
    pub const ALL: [ClassifierKind; 2] = [ClassifierKind::GameMode, ClassifierKind::Regional];

    pub fn as_str(self) -> &'static str {
        match self {
            ClassifierKind::GameMode => "game_mode",
            ClassifierKind::Regional => "regional",
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Game modes the rule stage knows how to detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    DarkRp,
    Ttt,
    PropHunt,
    Murder,
    Deathrun,
    Jailbreak,
    ZombieSurvival,
    Sandbox,
    #[default]
    Unknown,
}

impl GameMode {
    /// Every mode, in a fixed order used for model class indices.
    pub const ALL: [GameMode; 9] = [
        GameMode::DarkRp,
        GameMode::Ttt,
        GameMode::PropHunt,
        GameMode::Murder,
        GameMode::Deathrun,
        GameMode::Jailbreak,
        GameMode::ZombieSurvival,
        GameMode::Sandbox,
        GameMode::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::DarkRp => "darkrp",
            GameMode::Ttt => "ttt",
            GameMode::PropHunt => "prophunt",
            GameMode::Murder => "murder",
            GameMode::Deathrun => "deathrun",
            GameMode::Jailbreak => "jailbreak",
            GameMode::ZombieSurvival => "zombie_survival",
            GameMode::Sandbox => "sandbox",
            GameMode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        GameMode::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| format!("unknown game mode '{}'", s))
    }
}

/// A classifier output label, tagged with the classifier that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Label {
    GameMode(GameMode),
    Regional(bool),
}

impl Label {
    pub fn kind(&self) -> ClassifierKind {
        match self {
            Label::GameMode(_) => ClassifierKind::GameMode,
            Label::Regional(_) => ClassifierKind::Regional,
        }
    }

    /// Parse a label of the given kind from operator input.
    pub fn parse(kind: ClassifierKind, raw: &str) -> Result<Self, String> {
        match kind {
            ClassifierKind::GameMode => raw.parse().map(Label::GameMode),
            ClassifierKind::Regional => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "regional" => Ok(Label::Regional(true)),
                "false" | "no" | "other" => Ok(Label::Regional(false)),
                other => Err(format!("invalid regional label '{}'", other)),
            },
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::GameMode(mode) => write!(f, "{}", mode),
            Label::Regional(flag) => write!(f, "{}", flag),
        }
    }
}

/// Operator verdict on a prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Reject,
    /// The operator supplies the correct label as text.
    Label(String),
}

impl FromStr for Verdict {
    type Err = String;

    /// Accepts `accept`, `reject` or `label:<value>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "accept" => Ok(Verdict::Accept),
            "reject" => Ok(Verdict::Reject),
            _ => match s.split_once(':') {
                Some((prefix, value)) if prefix.eq_ignore_ascii_case("label") && !value.trim().is_empty() => {
                    Ok(Verdict::Label(value.trim().to_string()))
                }
                _ => Err(format!("invalid verdict '{}': expected accept, reject or label:<value>", s)),
            },
        }
    }
}

/// Human feedback attached to a prediction, at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub verdict: Verdict,
    #[serde(default)]
    pub reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// A classification ready to be stored for a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPrediction {
    pub server_id: ServerId,
    pub label: Label,
    pub confidence: f64,
    pub reason: String,
    pub needs_review: bool,
    pub model_version: String,
    pub predicted_at: DateTime<Utc>,
}

/// One stored prediction per `(server, classifier kind)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: PredictionId,
    pub server_id: ServerId,
    pub kind: ClassifierKind,
    pub label: Label,
    pub confidence: f64,
    pub reason: String,
    pub needs_review: bool,
    pub model_version: String,
    pub predicted_at: DateTime<Utc>,
    #[serde(default)]
    pub feedback: Option<Feedback>,
}

impl Prediction {
    pub fn from_new(id: PredictionId, new: &NewPrediction) -> Self {
        Self {
            id,
            server_id: new.server_id,
            kind: new.label.kind(),
            label: new.label,
            confidence: new.confidence,
            reason: new.reason.clone(),
            needs_review: new.needs_review,
            model_version: new.model_version.clone(),
            predicted_at: new.predicted_at,
            feedback: None,
        }
    }

    /// Replace the classification fields. Rows carrying feedback are frozen.
    pub fn refresh(&mut self, new: &NewPrediction) -> bool {
        if self.feedback.is_some() {
            return false;
        }
        self.label = new.label;
        self.confidence = new.confidence;
        self.reason = new.reason.clone();
        self.needs_review = new.needs_review;
        self.model_version = new.model_version.clone();
        self.predicted_at = new.predicted_at;
        true
    }

    /// Label implied by the attached feedback, if any.
    ///
    /// `Reject` only yields a label for the binary regional classifier.
    pub fn corrected_label(&self) -> Option<Label> {
        let feedback = self.feedback.as_ref()?;
        match (&feedback.verdict, self.label) {
            (Verdict::Accept, label) => Some(label),
            (Verdict::Reject, Label::Regional(flag)) => Some(Label::Regional(!flag)),
            (Verdict::Reject, Label::GameMode(_)) => None,
            (Verdict::Label(raw), _) => Label::parse(self.kind, raw).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(label: Label, verdict: Option<Verdict>) -> Prediction {
        Prediction {
            id: 1,
            server_id: 1,
            kind: label.kind(),
            label,
            confidence: 0.4,
            reason: "test".to_string(),
            needs_review: true,
            model_version: "rules-v1+lr-0".to_string(),
            predicted_at: Utc::now(),
            feedback: verdict.map(|verdict| Feedback {
                verdict,
                reason: None,
                submitted_at: Utc::now(),
            }),
        }
    }

    #[test]
    fn test_verdict_parsing() {
        assert_eq!("Accept".parse::<Verdict>().unwrap(), Verdict::Accept);
        assert_eq!("reject".parse::<Verdict>().unwrap(), Verdict::Reject);
        assert_eq!(
            "label:ttt".parse::<Verdict>().unwrap(),
            Verdict::Label("ttt".to_string())
        );
        assert!("label:".parse::<Verdict>().is_err());
        assert!("maybe".parse::<Verdict>().is_err());
    }

    #[test]
    fn test_game_mode_roundtrip_through_str() {
        for mode in GameMode::ALL {
            assert_eq!(mode.as_str().parse::<GameMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_corrected_label() {
        let accepted = prediction(Label::Regional(true), Some(Verdict::Accept));
        assert_eq!(accepted.corrected_label(), Some(Label::Regional(true)));

        let rejected = prediction(Label::Regional(true), Some(Verdict::Reject));
        assert_eq!(rejected.corrected_label(), Some(Label::Regional(false)));

        let rejected_mode = prediction(Label::GameMode(GameMode::Ttt), Some(Verdict::Reject));
        assert_eq!(rejected_mode.corrected_label(), None);

        let relabeled = prediction(
            Label::GameMode(GameMode::Ttt),
            Some(Verdict::Label("murder".to_string())),
        );
        assert_eq!(relabeled.corrected_label(), Some(Label::GameMode(GameMode::Murder)));

        let none = prediction(Label::Regional(false), None);
        assert_eq!(none.corrected_label(), None);
    }

    #[test]
    fn test_refresh_is_frozen_by_feedback() {
        let mut with_feedback = prediction(Label::Regional(true), Some(Verdict::Accept));
        let update = NewPrediction {
            server_id: 1,
            label: Label::Regional(false),
            confidence: 0.9,
            reason: "new".to_string(),
            needs_review: false,
            model_version: "rules-v1+lr-3".to_string(),
            predicted_at: Utc::now(),
        };
        assert!(!with_feedback.refresh(&update));
        assert_eq!(with_feedback.label, Label::Regional(true));

        let mut open = prediction(Label::Regional(true), None);
        assert!(open.refresh(&update));
        assert_eq!(open.label, Label::Regional(false));
    }
}
