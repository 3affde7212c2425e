//! Deterministic rule stages
//!
//! ## Game mode
//!
//! Detectors are tried in declaration order. A matching detector scores
//! `min(0.5 + longest_match / blob_len, 0.95)` (lengths in characters); the
//! best score wins and ties keep the earlier detector. No match is `Unknown`
//! with confidence 0.
//!
//! ## Regional affinity
//!
//! Every matching detector adds the weight of its signal class:
//!
//! | signal | weight |
//! |---|---|
//! | locale or country name | 0.9 |
//! | marker or symbol | 0.8 |
//! | other community wording | 0.6 |
//!
//! The sum is capped at 0.95.

use regex::Regex;

use crate::types::GameMode;

/// Cap on any rule-stage confidence.
pub const MAX_RULE_CONFIDENCE: f64 = 0.95;

/// Output of a rule stage before combination.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome<L> {
    pub label: L,
    pub confidence: f64,
    pub reason: String,
}

// ============================================================================
// Game mode
// ============================================================================

const GAME_MODE_PATTERNS: [(GameMode, &str); 8] = [
    (GameMode::DarkRp, r"darkrp|\broleplay\b|\brp_\w+|\brp\b"),
    (GameMode::Ttt, r"\bttt\b|terrortown|trouble in terrorist town|\bttt_\w+"),
    (GameMode::PropHunt, r"prop ?hunt|\bph_\w+"),
    (GameMode::Murder, r"\bmurder\b|\bmu_\w+"),
    (GameMode::Deathrun, r"death ?run|\bdr_\w+"),
    (GameMode::Jailbreak, r"jail ?break|\bjb_\w+|\bba_jail\w*"),
    (GameMode::ZombieSurvival, r"zombie ?survival|\bzs_\w+|\bzombies?\b"),
    (GameMode::Sandbox, r"\bsandbox\b|\bgm_construct\b|\bgm_flatgrass\b|\bbuild\b"),
];

struct GameModeDetector {
    mode: GameMode,
    pattern: Regex,
}

pub struct GameModeRules {
    detectors: Vec<GameModeDetector>,
}

impl GameModeRules {
    pub fn new() -> Result<Self, regex::Error> {
        let detectors = GAME_MODE_PATTERNS
            .iter()
            .map(|(mode, pattern)| {
                Ok(GameModeDetector {
                    mode: *mode,
                    pattern: Regex::new(pattern)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { detectors })
    }

    pub fn classify(&self, blob: &str) -> RuleOutcome<GameMode> {
        let blob_len = blob.chars().count();
        let mut best: Option<(GameMode, f64, &str)> = None;

        for detector in &self.detectors {
            let Some(longest) = detector
                .pattern
                .find_iter(blob)
                .max_by_key(|m| m.as_str().chars().count())
            else {
                continue;
            };
            let matched = longest.as_str();
            let score = (0.5 + matched.chars().count() as f64 / blob_len.max(1) as f64).min(MAX_RULE_CONFIDENCE);
            // Strictly greater keeps the earlier detector on ties
            if best.map_or(true, |(_, s, _)| score > s) {
                best = Some((detector.mode, score, matched));
            }
        }

        match best {
            Some((mode, confidence, matched)) => RuleOutcome {
                label: mode,
                confidence,
                reason: format!("matched {} pattern \"{}\"", mode, matched),
            },
            None => RuleOutcome {
                label: GameMode::Unknown,
                confidence: 0.0,
                reason: "no game mode pattern matched".to_string(),
            },
        }
    }
}

// ============================================================================
// Regional affinity
// ============================================================================

/// Signal class of a regional detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionalSignal {
    Locale,
    Marker,
    Other,
}

impl RegionalSignal {
    pub fn weight(self) -> f64 {
        match self {
            RegionalSignal::Locale => 0.9,
            RegionalSignal::Marker => 0.8,
            RegionalSignal::Other => 0.6,
        }
    }
}

const REGIONAL_PATTERNS: [(&str, RegionalSignal, &str); 3] = [
    (
        "locale",
        RegionalSignal::Locale,
        r"\bfrance\b|\bfran[cç]ais(e)?\b|\bfrench\b|\bqu[ée]bec\b|\bbelgique\b",
    ),
    ("marker", RegionalSignal::Marker, r"\[fr\]|\(fr\)|🇫🇷|\bfr\b|\bvf\b"),
    (
        "wording",
        RegionalSignal::Other,
        r"\bserveur\b|\bcommunaut[ée]\b|\bbienvenue\b|\brejoignez\b|\bjoueurs\b",
    ),
];

struct RegionalDetector {
    name: &'static str,
    signal: RegionalSignal,
    pattern: Regex,
}

pub struct RegionalRules {
    detectors: Vec<RegionalDetector>,
}

impl RegionalRules {
    pub fn new() -> Result<Self, regex::Error> {
        let detectors = REGIONAL_PATTERNS
            .iter()
            .map(|(name, signal, pattern)| {
                Ok(RegionalDetector {
                    name: *name,
                    signal: *signal,
                    pattern: Regex::new(pattern)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { detectors })
    }

    /// Score in [0, 0.95]; label is `score > 0.5`.
    pub fn classify(&self, blob: &str) -> RuleOutcome<bool> {
        let mut score = 0.0;
        let mut hits = Vec::new();
        for detector in &self.detectors {
            if let Some(m) = detector.pattern.find(blob) {
                score += detector.signal.weight();
                hits.push(format!("{} \"{}\"", detector.name, m.as_str()));
            }
        }
        let confidence = f64::min(score, MAX_RULE_CONFIDENCE);
        RuleOutcome {
            label: confidence > 0.5,
            confidence,
            reason: if hits.is_empty() {
                "no regional markers".to_string()
            } else {
                format!("regional markers: {}", hits.join(", "))
            },
        }
    }
}
