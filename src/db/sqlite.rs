// SqliteDatabase: rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points, so every trait call is one
// atomic unit with respect to every other call on the same database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{
    CompatibilityWeights, ConnectionRequest, MatchRecord, MatchStatus, MeetupFeedback, NewMatch,
    PatternStat, Presence, Profile, RequestStatus, StoreStats, VisitRecord,
};
use super::queries;
use super::traits::Database;
use crate::classify::ClassifiedVisit;
use crate::patterns::decay::DecayPolicy;
use crate::patterns::fingerprint::ActivityFingerprint;

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// In-memory database with the full schema.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(super::open_in_memory()?))
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().await;
        queries::store_stats(&conn)
    }

    async fn ensure_profile(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::ensure_profile(&conn, user_id)
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::upsert_profile(&conn, profile)
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let conn = self.conn.lock().await;
        queries::get_profile(&conn, user_id)
    }

    async fn record_visit(
        &self,
        user_id: &str,
        visit: &ClassifiedVisit,
        decay: &DecayPolicy,
        now: DateTime<Utc>,
    ) -> Result<PatternStat> {
        let conn = self.conn.lock().await;
        queries::record_visit(&conn, user_id, visit, decay, now)
    }

    async fn get_pattern_stats(&self, user_id: &str) -> Result<Vec<PatternStat>> {
        let conn = self.conn.lock().await;
        queries::get_pattern_stats(&conn, user_id)
    }

    async fn recalculate_frequency_scores(
        &self,
        user_id: &str,
        decay: &DecayPolicy,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn.lock().await;
        queries::recalculate_frequency_scores(&conn, user_id, decay, now)
    }

    async fn get_recent_visits(&self, user_id: &str, limit: u32) -> Result<Vec<VisitRecord>> {
        let conn = self.conn.lock().await;
        queries::get_recent_visits(&conn, user_id, limit)
    }

    async fn rebuild_fingerprint(
        &self,
        user_id: &str,
        built_at: DateTime<Utc>,
    ) -> Result<ActivityFingerprint> {
        let conn = self.conn.lock().await;
        queries::rebuild_fingerprint(&conn, user_id, built_at)
    }

    async fn get_fingerprint(&self, user_id: &str) -> Result<Option<(String, String)>> {
        let conn = self.conn.lock().await;
        queries::get_fingerprint(&conn, user_id)
    }

    async fn get_weights(&self, user_id: &str) -> Result<Option<(CompatibilityWeights, i64)>> {
        let conn = self.conn.lock().await;
        queries::get_weights(&conn, user_id)
    }

    async fn insert_weights_if_absent(
        &self,
        user_id: &str,
        weights: &CompatibilityWeights,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::insert_weights_if_absent(&conn, user_id, weights)
    }

    async fn compare_and_swap_weights(
        &self,
        user_id: &str,
        weights: &CompatibilityWeights,
        expected_version: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::compare_and_swap_weights(&conn, user_id, weights, expected_version)
    }

    async fn insert_feedback(
        &self,
        match_id: i64,
        user_id: &str,
        rating: u8,
        feedback_text: Option<&str>,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        queries::insert_feedback(&conn, match_id, user_id, rating, feedback_text)
    }

    async fn delete_feedback(&self, feedback_id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::delete_feedback(&conn, feedback_id)
    }

    async fn get_feedback_for_match(&self, match_id: i64) -> Result<Vec<MeetupFeedback>> {
        let conn = self.conn.lock().await;
        queries::get_feedback_for_match(&conn, match_id)
    }

    async fn ratings_involving(&self, user_a: &str, user_b: &str) -> Result<Vec<u8>> {
        let conn = self.conn.lock().await;
        queries::ratings_involving(&conn, user_a, user_b)
    }

    async fn upsert_presence(&self, presence: &Presence) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::upsert_presence(&conn, presence)
    }

    async fn get_presence(&self, user_id: &str) -> Result<Option<Presence>> {
        let conn = self.conn.lock().await;
        queries::get_presence(&conn, user_id)
    }

    async fn presence_with_prefix(
        &self,
        prefix: &str,
        fresh_since: DateTime<Utc>,
    ) -> Result<Vec<Presence>> {
        let conn = self.conn.lock().await;
        queries::presence_with_prefix(&conn, prefix, fresh_since)
    }

    async fn delete_stale_presence(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        queries::delete_stale_presence(&conn, older_than)
    }

    async fn insert_connection_request(
        &self,
        sender_id: &str,
        receiver_id: &str,
    ) -> Result<ConnectionRequest> {
        let conn = self.conn.lock().await;
        queries::insert_connection_request(&conn, sender_id, receiver_id)
    }

    async fn get_connection_request(
        &self,
        sender_id: &str,
        receiver_id: &str,
    ) -> Result<Option<ConnectionRequest>> {
        let conn = self.conn.lock().await;
        queries::get_connection_request(&conn, sender_id, receiver_id)
    }

    async fn set_request_status(
        &self,
        sender_id: &str,
        receiver_id: &str,
        status: RequestStatus,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::set_request_status(&conn, sender_id, receiver_id, status)
    }

    async fn pending_requests_for(&self, receiver_id: &str) -> Result<Vec<ConnectionRequest>> {
        let conn = self.conn.lock().await;
        queries::pending_requests_for(&conn, receiver_id)
    }

    async fn insert_match_if_absent(&self, new: &NewMatch) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::insert_match_if_absent(&conn, new)
    }

    async fn get_match_by_pair(&self, pair_id: &str) -> Result<Option<MatchRecord>> {
        let conn = self.conn.lock().await;
        queries::get_match_by_pair(&conn, pair_id)
    }

    async fn get_match(&self, match_id: i64) -> Result<Option<MatchRecord>> {
        let conn = self.conn.lock().await;
        queries::get_match(&conn, match_id)
    }

    async fn refresh_match(&self, update: &NewMatch) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::refresh_match(&conn, update)
    }

    async fn transition_match(
        &self,
        pair_id: &str,
        from: MatchStatus,
        to: MatchStatus,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::transition_match(&conn, pair_id, from, to)
    }

    async fn list_matches_for(&self, user_id: &str) -> Result<Vec<MatchRecord>> {
        let conn = self.conn.lock().await;
        queries::list_matches_for(&conn, user_id)
    }

    async fn count_matches_for_pair(&self, pair_id: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::count_matches_for_pair(&conn, pair_id)
    }
}
