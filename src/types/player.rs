//! Player identity and enriched profile data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable 64-bit player identifier (SteamID64).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PlayerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(PlayerId)
    }
}

/// Enriched player profile. The id never changes once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    pub profile_url: String,
    pub country: Option<String>,
    pub account_created: Option<DateTime<Utc>>,
    pub avatar_url: String,
    /// `None` when the owned-titles lookup was private or unavailable.
    pub owns_target_game: Option<bool>,
    pub game_count: Option<u32>,
    pub refreshed_at: DateTime<Utc>,
}

impl PlayerRecord {
    /// True when the record was refreshed less than `max_age` ago.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.refreshed_at < max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_parse_and_display() {
        let id: PlayerId = " 76561197960287930 ".parse().unwrap();
        assert_eq!(id, PlayerId(76_561_197_960_287_930));
        assert_eq!(id.to_string(), "76561197960287930");
        assert!("not-a-number".parse::<PlayerId>().is_err());
    }

    #[test]
    fn test_freshness() {
        let now = Utc::now();
        let record = PlayerRecord {
            id: PlayerId(1),
            name: "p".to_string(),
            profile_url: String::new(),
            country: None,
            account_created: None,
            avatar_url: String::new(),
            owns_target_game: None,
            game_count: None,
            refreshed_at: now - chrono::Duration::hours(23),
        };
        assert!(record.is_fresh(now, chrono::Duration::hours(24)));
        assert!(!record.is_fresh(now + chrono::Duration::hours(2), chrono::Duration::hours(24)));
    }
}
