// Engine: the operations callers actually invoke.
//
// Every operation starts by resolving the caller's bearer token. An
// unresolvable token fails with Unauthorized before anything is written;
// bad coordinates or ratings fail with InvalidInput, also before any write.
// A resolved caller with valid input gets an empty profile on first contact.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::auth::IdentityProvider;
use crate::classify::traits::PlaceResolver;
use crate::classify::{classify_with_resolver, ClassifiedVisit};
use crate::db::models::{
    CompatibilityWeights, ConnectionRequest, MatchRecord, MatchStatus, Presence, Profile,
    VisitRecord,
};
use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::matching::matcher::{self, CoPresenceOutcome, ConnectionOutcome};
use crate::matching::presence::{self, NearbyCandidate};
use crate::patterns::aggregator;
use crate::patterns::decay::DecayPolicy;
use crate::patterns::fingerprint::{load_fingerprint, ActivityFingerprint};
use crate::scoring::compatibility::{compute_compatibility, CompatibilityBreakdown};
use crate::scoring::weights::{update_weights, FeedbackSignal, LearningSchedule};

/// Tunables shared by every operation.
#[derive(Debug, Clone, PartialEq)]
pub struct EnginePolicy {
    pub decay: DecayPolicy,
    pub learning: LearningSchedule,
    /// Geohash length stored with each presence row
    pub geohash_precision: usize,
    /// Presence older than this is ignored by nearby search
    pub presence_freshness: Duration,
    /// Minimum compatibility for co-presence to create a match
    pub match_threshold: f64,
    /// Attempts for contended writes before giving up
    pub max_retries: u32,
    /// Budget for one place lookup
    pub place_timeout: StdDuration,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            decay: DecayPolicy::default(),
            learning: LearningSchedule::default(),
            geohash_precision: 7,
            presence_freshness: Duration::minutes(10),
            match_threshold: 0.5,
            max_retries: 5,
            place_timeout: StdDuration::from_secs(2),
        }
    }
}

/// Source of "now" for every timestamp the engine writes.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Partial profile edit. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub interests: Option<Vec<String>>,
    pub auto_accept_connections: Option<bool>,
    pub is_visible: Option<bool>,
    pub emoji_signature: Option<String>,
}

/// Reject coordinates that are non-finite, out of range, or the (0, 0)
/// placeholder clients send when they have no fix.
pub fn validate_coordinates(lat: f64, lng: f64) -> EngineResult<()> {
    if !lat.is_finite() || !lng.is_finite() {
        return Err(EngineError::InvalidInput("coordinates must be finite".into()));
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(EngineError::InvalidInput(format!("latitude {lat} out of range")));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(EngineError::InvalidInput(format!("longitude {lng} out of range")));
    }
    if lat == 0.0 && lng == 0.0 {
        return Err(EngineError::InvalidInput("latitude and longitude are required".into()));
    }
    Ok(())
}

fn validate_radius(radius_m: f64) -> EngineResult<()> {
    if !radius_m.is_finite() || radius_m <= 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "radius must be a positive number of meters, got {radius_m}"
        )));
    }
    Ok(())
}

pub struct Engine {
    db: Arc<dyn Database>,
    resolver: Arc<dyn PlaceResolver>,
    identity: Arc<dyn IdentityProvider>,
    policy: EnginePolicy,
    clock: Clock,
}

impl Engine {
    pub fn new(
        db: Arc<dyn Database>,
        resolver: Arc<dyn PlaceResolver>,
        identity: Arc<dyn IdentityProvider>,
        policy: EnginePolicy,
    ) -> Self {
        Self {
            db,
            resolver,
            identity,
            policy,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock, e.g. to replay visits at a fixed instant.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    async fn caller(&self, token: &str) -> EngineResult<String> {
        Ok(self.identity.resolve(token).await?)
    }

    async fn admit(&self, user_id: &str) -> EngineResult<()> {
        Ok(self.db.ensure_profile(user_id).await?)
    }

    /// Resolve and admit in one step, for operations with no input to check.
    async fn authenticate(&self, token: &str) -> EngineResult<String> {
        let user_id = self.caller(token).await?;
        self.admit(&user_id).await?;
        Ok(user_id)
    }

    async fn require_profile(&self, user_id: &str) -> EngineResult<Profile> {
        self.db
            .get_profile(user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("profile {user_id}")))
    }

    /// Classify a location sample and fold it into the caller's patterns.
    ///
    /// `timestamp` carries the caller's local UTC offset; time buckets use
    /// that wall clock.
    #[instrument(skip(self, token))]
    pub async fn record_visit(
        &self,
        token: &str,
        lat: f64,
        lng: f64,
        timestamp: DateTime<FixedOffset>,
    ) -> EngineResult<ClassifiedVisit> {
        let user_id = self.caller(token).await?;
        validate_coordinates(lat, lng)?;
        self.admit(&user_id).await?;

        let visit = classify_with_resolver(
            self.resolver.as_ref(),
            lat,
            lng,
            timestamp,
            self.policy.place_timeout,
        )
        .await;
        aggregator::record_visit(
            self.db.as_ref(),
            &user_id,
            &visit,
            &self.policy.decay,
            self.now(),
        )
        .await?;
        Ok(visit)
    }

    /// The caller's latest raw visits, newest first.
    pub async fn recent_visits(&self, token: &str, limit: u32) -> EngineResult<Vec<VisitRecord>> {
        let user_id = self.authenticate(token).await?;
        Ok(self.db.get_recent_visits(&user_id, limit).await?)
    }

    /// A user's stored fingerprint; the caller's own when `user_id` is None.
    pub async fn get_fingerprint(
        &self,
        token: &str,
        user_id: Option<&str>,
    ) -> EngineResult<ActivityFingerprint> {
        let caller = self.authenticate(token).await?;
        let target = user_id.unwrap_or(caller.as_str());
        self.require_profile(target).await?;
        Ok(load_fingerprint(self.db.as_ref(), target).await?)
    }

    pub async fn compute_compatibility(
        &self,
        token: &str,
        user_a: &str,
        user_b: &str,
    ) -> EngineResult<CompatibilityBreakdown> {
        self.authenticate(token).await?;
        compute_compatibility(self.db.as_ref(), user_a, user_b).await
    }

    /// Rate a meetup and let the caller's weights learn from it.
    ///
    /// Only the two participants of a connected match may rate it, once
    /// each. If the weights cannot be updated the rating is withdrawn, so a
    /// retry is never counted twice.
    #[instrument(skip(self, token, text))]
    pub async fn submit_feedback(
        &self,
        token: &str,
        match_id: i64,
        rating: u8,
        text: Option<&str>,
    ) -> EngineResult<CompatibilityWeights> {
        let user_id = self.caller(token).await?;
        if !(1..=5).contains(&rating) {
            return Err(EngineError::InvalidInput(format!(
                "rating must be between 1 and 5, got {rating}"
            )));
        }
        self.admit(&user_id).await?;

        let record = self
            .db
            .get_match(match_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("match {match_id}")))?;
        if !record.involves(&user_id) {
            return Err(EngineError::Unauthorized(format!(
                "{user_id} is not part of match {match_id}"
            )));
        }
        if record.status != MatchStatus::Connected {
            return Err(EngineError::InvalidInput(format!(
                "match {match_id} is {}, only connected matches can be rated",
                record.status
            )));
        }
        let already_rated = || {
            EngineError::InvalidInput(format!("{user_id} already rated match {match_id}"))
        };
        let existing = self.db.get_feedback_for_match(match_id).await?;
        if existing.iter().any(|f| f.user_id == user_id) {
            return Err(already_rated());
        }

        // What the terms predicted, before this rating is counted
        let breakdown =
            compute_compatibility(self.db.as_ref(), &record.uid_a, &record.uid_b).await?;

        // A concurrent submit may have landed between the check and here
        let feedback_id = self
            .db
            .insert_feedback(match_id, &user_id, rating, text)
            .await?
            .ok_or_else(already_rated)?;

        let signal = FeedbackSignal::from_rating(
            rating,
            breakdown.interest,
            breakdown.behavior,
            breakdown.feedback,
        );
        let weights = match update_weights(
            self.db.as_ref(),
            &user_id,
            &signal,
            &self.policy.learning,
            self.policy.max_retries,
        )
        .await
        {
            Ok(weights) => weights,
            Err(e) => {
                warn!(user_id, match_id, error = %e, "Weight update failed, withdrawing rating");
                if let Err(undo) = self.db.delete_feedback(feedback_id).await {
                    warn!(user_id, feedback_id, error = %undo, "Failed to withdraw rating");
                }
                return Err(e);
            }
        };

        info!(user_id, match_id, rating, best = ?signal.best_predictor(), "Feedback recorded");
        Ok(weights)
    }

    pub async fn update_presence(&self, token: &str, lat: f64, lng: f64) -> EngineResult<Presence> {
        let user_id = self.caller(token).await?;
        validate_coordinates(lat, lng)?;
        self.admit(&user_id).await?;
        Ok(presence::update_presence(
            self.db.as_ref(),
            &user_id,
            lat,
            lng,
            self.policy.geohash_precision,
            self.now(),
        )
        .await?)
    }

    pub async fn find_nearby(
        &self,
        token: &str,
        radius_m: f64,
    ) -> EngineResult<Vec<NearbyCandidate>> {
        let user_id = self.caller(token).await?;
        validate_radius(radius_m)?;
        self.admit(&user_id).await?;
        presence::find_nearby(
            self.db.as_ref(),
            &user_id,
            radius_m,
            self.policy.presence_freshness,
            self.now(),
        )
        .await
    }

    /// Apply a partial edit to the caller's profile.
    pub async fn upsert_profile(&self, token: &str, update: ProfileUpdate) -> EngineResult<Profile> {
        let user_id = self.authenticate(token).await?;
        let mut profile = self.require_profile(&user_id).await?;

        if let Some(name) = update.name {
            profile.name = Some(name);
        }
        if let Some(interests) = update.interests {
            profile.interests = interests
                .into_iter()
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty())
                .collect();
        }
        if let Some(auto_accept) = update.auto_accept_connections {
            profile.auto_accept_connections = auto_accept;
        }
        if let Some(visible) = update.is_visible {
            profile.is_visible = visible;
        }
        if let Some(emoji) = update.emoji_signature {
            profile.emoji_signature = Some(emoji);
        }

        self.db.upsert_profile(&profile).await?;
        Ok(profile)
    }

    pub async fn send_connection_request(
        &self,
        token: &str,
        receiver_id: &str,
    ) -> EngineResult<ConnectionOutcome> {
        let user_id = self.authenticate(token).await?;
        matcher::send_connection_request(
            self.db.as_ref(),
            &user_id,
            receiver_id,
            self.policy.max_retries,
        )
        .await
    }

    /// Requests waiting on the caller's answer.
    pub async fn pending_requests(&self, token: &str) -> EngineResult<Vec<ConnectionRequest>> {
        let user_id = self.authenticate(token).await?;
        Ok(self.db.pending_requests_for(&user_id).await?)
    }

    pub async fn detect_co_presence(
        &self,
        token: &str,
        radius_m: f64,
    ) -> EngineResult<Vec<CoPresenceOutcome>> {
        let user_id = self.caller(token).await?;
        validate_radius(radius_m)?;
        self.admit(&user_id).await?;
        matcher::detect_co_presence(
            self.db.as_ref(),
            &user_id,
            radius_m,
            self.policy.presence_freshness,
            self.policy.match_threshold,
            self.policy.max_retries,
            self.now(),
        )
        .await
    }

    pub async fn decline(&self, token: &str, other_id: &str) -> EngineResult<MatchRecord> {
        let user_id = self.authenticate(token).await?;
        matcher::end_pair(
            self.db.as_ref(),
            &user_id,
            other_id,
            MatchStatus::Declined,
            self.policy.max_retries,
        )
        .await
    }

    pub async fn block(&self, token: &str, other_id: &str) -> EngineResult<MatchRecord> {
        let user_id = self.authenticate(token).await?;
        matcher::end_pair(
            self.db.as_ref(),
            &user_id,
            other_id,
            MatchStatus::Blocked,
            self.policy.max_retries,
        )
        .await
    }

    pub async fn list_matches(&self, token: &str) -> EngineResult<Vec<MatchRecord>> {
        let user_id = self.authenticate(token).await?;
        matcher::list_matches(self.db.as_ref(), &user_id).await
    }

    /// Decay all of the caller's frequency scores to the present.
    pub async fn recalculate_frequency_scores(&self, token: &str) -> EngineResult<usize> {
        let user_id = self.authenticate(token).await?;
        Ok(aggregator::recalculate_frequency_scores(
            self.db.as_ref(),
            &user_id,
            &self.policy.decay,
            self.now(),
        )
        .await?)
    }

    /// Drop presence rows past the freshness window. Meant for a scheduler,
    /// so it takes no caller token.
    pub async fn sweep_stale_presence(&self) -> EngineResult<usize> {
        Ok(presence::sweep_stale_presence(
            self.db.as_ref(),
            self.policy.presence_freshness,
            self.now(),
        )
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_validation() {
        assert!(validate_coordinates(48.85, 2.35).is_ok());
        assert!(validate_coordinates(0.0, 2.35).is_ok());
        assert!(validate_coordinates(-90.0, 180.0).is_ok());
        for (lat, lng) in [
            (0.0, 0.0),
            (91.0, 0.5),
            (-90.5, 0.5),
            (10.0, 180.5),
            (f64::NAN, 1.0),
            (1.0, f64::INFINITY),
        ] {
            let err = validate_coordinates(lat, lng).unwrap_err();
            assert!(matches!(err, EngineError::InvalidInput(_)), "({lat}, {lng})");
        }
    }

    #[test]
    fn test_radius_validation() {
        assert!(validate_radius(50.0).is_ok());
        assert!(validate_radius(0.0).is_err());
        assert!(validate_radius(-1.0).is_err());
        assert!(validate_radius(f64::NAN).is_err());
    }

    #[test]
    fn test_default_policy() {
        let p = EnginePolicy::default();
        assert_eq!(p.geohash_precision, 7);
        assert_eq!(p.presence_freshness, Duration::minutes(10));
        assert_eq!(p.max_retries, 5);
        assert_eq!(p.decay.half_life_days, 14.0);
    }
}
