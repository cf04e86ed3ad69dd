// Database trait: backend-agnostic async interface for all store operations.
//
// Implementor: SqliteDatabase (wraps rusqlite). All methods are async so a
// natively async backend fits behind the same interface as the Mutex-wrapped
// synchronous one. The trait mirrors the queries.rs function signatures.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{
    CompatibilityWeights, ConnectionRequest, MatchRecord, MatchStatus, MeetupFeedback, NewMatch,
    PatternStat, Presence, Profile, RequestStatus, StoreStats, VisitRecord,
};
use crate::classify::ClassifiedVisit;
use crate::patterns::decay::DecayPolicy;
use crate::patterns::fingerprint::ActivityFingerprint;

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    /// Row counts for the status display.
    async fn stats(&self) -> Result<StoreStats>;

    // --- Profiles ---

    /// Create an empty profile if the user has none.
    async fn ensure_profile(&self, user_id: &str) -> Result<()>;

    async fn upsert_profile(&self, profile: &Profile) -> Result<()>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>>;

    // --- Visits and patterns ---

    /// Append the visit and upsert its bucket statistic atomically.
    async fn record_visit(
        &self,
        user_id: &str,
        visit: &ClassifiedVisit,
        decay: &DecayPolicy,
        now: DateTime<Utc>,
    ) -> Result<PatternStat>;

    async fn get_pattern_stats(&self, user_id: &str) -> Result<Vec<PatternStat>>;

    /// Re-derive every frequency score for a user at `now`.
    async fn recalculate_frequency_scores(
        &self,
        user_id: &str,
        decay: &DecayPolicy,
        now: DateTime<Utc>,
    ) -> Result<usize>;

    async fn get_recent_visits(&self, user_id: &str, limit: u32) -> Result<Vec<VisitRecord>>;

    // --- Activity fingerprint ---

    /// Reduce the user's statistic rows into a fingerprint and store it.
    /// The read and the write are one atomic unit.
    async fn rebuild_fingerprint(
        &self,
        user_id: &str,
        built_at: DateTime<Utc>,
    ) -> Result<ActivityFingerprint>;

    /// Load the stored fingerprint JSON and its build timestamp.
    async fn get_fingerprint(&self, user_id: &str) -> Result<Option<(String, String)>>;

    // --- Compatibility weights ---

    async fn get_weights(&self, user_id: &str) -> Result<Option<(CompatibilityWeights, i64)>>;

    async fn insert_weights_if_absent(
        &self,
        user_id: &str,
        weights: &CompatibilityWeights,
    ) -> Result<()>;

    /// Write `weights` only if the row is still at `expected_version`.
    async fn compare_and_swap_weights(
        &self,
        user_id: &str,
        weights: &CompatibilityWeights,
        expected_version: i64,
    ) -> Result<bool>;

    // --- Meetup feedback ---

    /// None if `user_id` already rated this match.
    async fn insert_feedback(
        &self,
        match_id: i64,
        user_id: &str,
        rating: u8,
        feedback_text: Option<&str>,
    ) -> Result<Option<i64>>;

    async fn delete_feedback(&self, feedback_id: i64) -> Result<bool>;

    async fn get_feedback_for_match(&self, match_id: i64) -> Result<Vec<MeetupFeedback>>;

    /// Ratings on any match involving either user.
    async fn ratings_involving(&self, user_a: &str, user_b: &str) -> Result<Vec<u8>>;

    // --- Presence ---

    async fn upsert_presence(&self, presence: &Presence) -> Result<()>;

    async fn get_presence(&self, user_id: &str) -> Result<Option<Presence>>;

    async fn presence_with_prefix(
        &self,
        prefix: &str,
        fresh_since: DateTime<Utc>,
    ) -> Result<Vec<Presence>>;

    async fn delete_stale_presence(&self, older_than: DateTime<Utc>) -> Result<usize>;

    // --- Connection requests ---

    async fn insert_connection_request(
        &self,
        sender_id: &str,
        receiver_id: &str,
    ) -> Result<ConnectionRequest>;

    async fn get_connection_request(
        &self,
        sender_id: &str,
        receiver_id: &str,
    ) -> Result<Option<ConnectionRequest>>;

    async fn set_request_status(
        &self,
        sender_id: &str,
        receiver_id: &str,
        status: RequestStatus,
    ) -> Result<bool>;

    async fn pending_requests_for(&self, receiver_id: &str) -> Result<Vec<ConnectionRequest>>;

    // --- Matches ---

    /// Insert unless the pair already has a row. True if this call created it.
    async fn insert_match_if_absent(&self, new: &NewMatch) -> Result<bool>;

    async fn get_match_by_pair(&self, pair_id: &str) -> Result<Option<MatchRecord>>;

    async fn get_match(&self, match_id: i64) -> Result<Option<MatchRecord>>;

    /// Re-entrant update of a connected pair.
    async fn refresh_match(&self, update: &NewMatch) -> Result<bool>;

    /// Conditional status change; false if the row wasn't in `from`.
    async fn transition_match(
        &self,
        pair_id: &str,
        from: MatchStatus,
        to: MatchStatus,
    ) -> Result<bool>;

    async fn list_matches_for(&self, user_id: &str) -> Result<Vec<MatchRecord>>;

    async fn count_matches_for_pair(&self, pair_id: &str) -> Result<i64>;
}
