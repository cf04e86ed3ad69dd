// Data models: Rust structs that map to database rows.
//
// These are the types that flow through the engine. They're separate from
// the queries so other modules can use them without depending on rusqlite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classify::buckets::{BucketKey, DayType, PlaceType, TimeOfDay};

/// A user profile. Every other row hangs off one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: Option<String>,
    pub interests: Vec<String>,
    pub auto_accept_connections: bool,
    pub is_visible: bool,
    pub emoji_signature: Option<String>,
}

impl Profile {
    /// A bare profile for a freshly authenticated user.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            interests: Vec::new(),
            auto_accept_connections: false,
            is_visible: true,
            emoji_signature: None,
        }
    }
}

/// One raw visit, as appended to the history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRecord {
    pub id: i64,
    pub user_id: String,
    pub lat: f64,
    pub lng: f64,
    pub place_type: String,
    pub place_name: Option<String>,
    pub time_of_day: String,
    pub day_type: String,
    pub visited_at: String,
}

/// Aggregated visit statistics for one (user, bucket).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStat {
    pub user_id: String,
    pub place_type: PlaceType,
    pub time_of_day: TimeOfDay,
    pub day_type: DayType,
    pub visit_count: u32,
    /// Recency-decayed habit strength, always derived from visit_count and last_visit_at
    pub frequency_score: f64,
    pub last_visit_at: DateTime<Utc>,
}

impl PatternStat {
    pub fn bucket(&self) -> BucketKey {
        BucketKey::new(self.place_type, self.time_of_day, self.day_type)
    }
}

/// Per-user blend of the three compatibility terms.
///
/// The three weights form a convex combination: each within [0, 1],
/// summing to 1. See scoring::weights for the update rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityWeights {
    pub interest_weight: f64,
    pub behavior_weight: f64,
    pub feedback_weight: f64,
    pub data_points_count: u32,
}

/// A user's most recent known location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: String,
    pub lat: f64,
    pub lng: f64,
    pub geohash: String,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of a pairing between two users.
///
/// `none` (no row) -> Pending -> Connected, Connected -> Connected,
/// Pending/Connected -> Declined/Blocked. Declined and Blocked are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Connected,
    Declined,
    Blocked,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Connected => "connected",
            MatchStatus::Declined => "declined",
            MatchStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MatchStatus::Pending),
            "connected" => Some(MatchStatus::Connected),
            "declined" => Some(MatchStatus::Declined),
            "blocked" => Some(MatchStatus::Blocked),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Declined | MatchStatus::Blocked)
    }

    /// Whether the pair may move from `self` to `next`.
    pub fn can_transition_to(&self, next: MatchStatus) -> bool {
        use MatchStatus::*;
        match (self, next) {
            (Pending, Connected) => true,
            (Connected, Connected) => true,
            (Pending | Connected, Declined | Blocked) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable pairing. `uid_a < uid_b` always.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: i64,
    pub pair_id: String,
    pub uid_a: String,
    pub uid_b: String,
    pub status: MatchStatus,
    pub shared_interests: Vec<String>,
    pub shared_emoji_code: Option<String>,
    pub meet_code: Option<String>,
    pub venue_lat: Option<f64>,
    pub venue_lng: Option<f64>,
    pub venue_name: Option<String>,
    pub landmark: Option<String>,
    pub last_seen_together_at: Option<String>,
    pub created_at: String,
}

impl MatchRecord {
    pub fn involves(&self, user_id: &str) -> bool {
        self.uid_a == user_id || self.uid_b == user_id
    }

    /// The participant that isn't `user_id`.
    pub fn other(&self, user_id: &str) -> &str {
        if self.uid_a == user_id {
            &self.uid_b
        } else {
            &self.uid_a
        }
    }
}

/// Fields for creating a match row, or refreshing an existing one.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub pair_id: String,
    pub uid_a: String,
    pub uid_b: String,
    pub status: MatchStatus,
    pub shared_interests: Vec<String>,
    pub shared_emoji_code: Option<String>,
    pub meet_code: Option<String>,
    pub venue_lat: Option<f64>,
    pub venue_lng: Option<f64>,
    pub venue_name: Option<String>,
    pub seen_together_at: Option<DateTime<Utc>>,
}

/// Status of a directed connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "accepted" => Some(RequestStatus::Accepted),
            "declined" => Some(RequestStatus::Declined),
            _ => None,
        }
    }
}

/// A directed proposal from one user to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: RequestStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// A rating left by one participant after meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetupFeedback {
    pub id: i64,
    pub match_id: i64,
    pub user_id: String,
    /// 1 (bad) to 5 (great)
    pub rating: u8,
    pub feedback_text: Option<String>,
    pub created_at: String,
}

/// Row counts for the status display.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub profiles: i64,
    pub visits: i64,
    pub patterns: i64,
    pub presence: i64,
    pub matches: i64,
    pub connected_matches: i64,
    pub feedback: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_status_transitions_are_monotone() {
        use MatchStatus::*;
        assert!(Pending.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Connected));
        assert!(Pending.can_transition_to(Declined));
        assert!(Connected.can_transition_to(Blocked));
        assert!(!Connected.can_transition_to(Pending));
        for terminal in [Declined, Blocked] {
            for next in [Pending, Connected, Declined, Blocked] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_match_status_display_matches_as_str() {
        for s in [
            MatchStatus::Pending,
            MatchStatus::Connected,
            MatchStatus::Declined,
            MatchStatus::Blocked,
        ] {
            assert_eq!(s.to_string(), s.as_str());
            assert_eq!(MatchStatus::parse(s.as_str()), Some(s));
        }
    }
}
