// Pairing: connection requests, co-presence detection and the match
// lifecycle.
//
// Each unordered pair has at most one match row, keyed by pair_id:
//
//   (no row) -> pending -> connected -> connected (seen together again)
//   pending | connected -> declined | blocked   (terminal)
//
// Creation is insert-if-absent. Whoever loses a creation race falls through
// to the refresh path, so racing detections still leave exactly one row.

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::pair::{meet_code, ordered, pair_id, shared_emoji_code};
use super::presence::{find_nearby, NearbyCandidate};
use crate::db::models::{
    ConnectionRequest, MatchRecord, MatchStatus, NewMatch, Profile, RequestStatus,
};
use crate::db::Database;
use crate::error::{with_retry, EngineError, EngineResult};
use crate::scoring::compatibility::compute_compatibility;
use crate::scoring::terms::shared_interests;

/// Compatibility lookups run this many at a time during detection.
const SCORING_CONCURRENCY: usize = 8;

/// Result of asking to connect with someone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConnectionOutcome {
    /// Waiting on the other person.
    Pending { request: ConnectionRequest },
    /// Both sides agreed (or the receiver auto-accepts).
    Connected { record: MatchRecord },
}

/// What co-presence detection did about one nearby person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoPresenceAction {
    /// A new connected match was created.
    Created,
    /// An existing connected match was refreshed.
    Refreshed,
    /// Compatible, but the other person has to accept first.
    AwaitingConsent,
    /// Score under the threshold.
    BelowThreshold,
    /// The pair was declined or blocked earlier.
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoPresenceOutcome {
    pub user_id: String,
    pub distance_m: f64,
    pub score: f64,
    pub action: CoPresenceAction,
    pub match_id: Option<i64>,
}

async fn require_profile(db: &dyn Database, user_id: &str) -> EngineResult<Profile> {
    db.get_profile(user_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("profile {user_id}")))
}

fn reject_self(a: &str, b: &str) -> EngineResult<()> {
    if a == b {
        return Err(EngineError::InvalidInput(
            "a user cannot pair with themselves".into(),
        ));
    }
    Ok(())
}

/// Match row fields for a pair of profiles.
fn new_match(
    a: &Profile,
    b: &Profile,
    status: MatchStatus,
    venue: Option<(f64, f64)>,
    seen_together_at: Option<DateTime<Utc>>,
) -> NewMatch {
    let (uid_a, uid_b) = ordered(&a.id, &b.id);
    NewMatch {
        pair_id: pair_id(uid_a, uid_b),
        uid_a: uid_a.to_string(),
        uid_b: uid_b.to_string(),
        status,
        shared_interests: shared_interests(&a.interests, &b.interests),
        shared_emoji_code: Some(shared_emoji_code(uid_a, uid_b)),
        meet_code: Some(meet_code()),
        venue_lat: venue.map(|v| v.0),
        venue_lng: venue.map(|v| v.1),
        venue_name: None,
        seen_together_at,
    }
}

async fn load_match(db: &dyn Database, pair_id: &str) -> EngineResult<MatchRecord> {
    db.get_match_by_pair(pair_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("match {pair_id}")))
}

/// Bring a pair to `connected`, creating the row if needed.
///
/// Safe under concurrent calls for the same pair.
async fn establish(db: &dyn Database, new: &NewMatch, max_attempts: u32) -> EngineResult<MatchRecord> {
    with_retry("match creation", max_attempts, || async move {
        if db.insert_match_if_absent(new).await? {
            info!(pair_id = %new.pair_id, uid_a = %new.uid_a, uid_b = %new.uid_b, "Match created");
            return load_match(db, &new.pair_id).await;
        }

        let existing = load_match(db, &new.pair_id).await?;
        match existing.status {
            MatchStatus::Connected => {}
            MatchStatus::Pending => {
                if !db
                    .transition_match(&new.pair_id, MatchStatus::Pending, MatchStatus::Connected)
                    .await?
                {
                    return Err(EngineError::ConflictRetryable(new.pair_id.clone()));
                }
                info!(pair_id = %new.pair_id, "Match connected");
            }
            ended => {
                return Err(EngineError::InvalidInput(format!("pair is {ended}")));
            }
        }

        if !db.refresh_match(new).await? {
            // Ended between the read and the refresh
            return Err(EngineError::ConflictRetryable(new.pair_id.clone()));
        }
        load_match(db, &new.pair_id).await
    })
    .await
}

/// Ask to connect `sender` with `receiver`.
///
/// Connects immediately when the receiver already asked for the same thing
/// or accepts everyone automatically.
pub async fn send_connection_request(
    db: &dyn Database,
    sender_id: &str,
    receiver_id: &str,
    max_attempts: u32,
) -> EngineResult<ConnectionOutcome> {
    reject_self(sender_id, receiver_id)?;
    let sender = require_profile(db, sender_id).await?;
    let receiver = require_profile(db, receiver_id).await?;

    let pid = pair_id(sender_id, receiver_id);
    if let Some(existing) = db.get_match_by_pair(&pid).await? {
        if existing.status.is_terminal() {
            return Err(EngineError::InvalidInput(format!(
                "pair is {}",
                existing.status
            )));
        }
        if existing.status == MatchStatus::Connected {
            return Ok(ConnectionOutcome::Connected { record: existing });
        }
    }

    let request = db.insert_connection_request(sender_id, receiver_id).await?;
    let reciprocal = db
        .get_connection_request(receiver_id, sender_id)
        .await?
        .is_some_and(|r| r.status == RequestStatus::Pending);

    if reciprocal || receiver.auto_accept_connections {
        db.set_request_status(sender_id, receiver_id, RequestStatus::Accepted)
            .await?;
        if reciprocal {
            db.set_request_status(receiver_id, sender_id, RequestStatus::Accepted)
                .await?;
        }
        let new = new_match(&sender, &receiver, MatchStatus::Connected, None, None);
        let record = establish(db, &new, max_attempts).await?;
        debug!(sender_id, receiver_id, reciprocal, "Connection accepted");
        return Ok(ConnectionOutcome::Connected { record });
    }

    // First request for this pair opens a pending match row
    let new = new_match(&sender, &receiver, MatchStatus::Pending, None, None);
    if db.insert_match_if_absent(&new).await? {
        debug!(pair_id = %new.pair_id, "Pending match opened");
    }
    Ok(ConnectionOutcome::Pending { request })
}

/// Look for compatible people nearby and pair up where allowed.
///
/// Connected pairs seen together again are refreshed. New pairs are created
/// only when the score reaches `threshold` and the other person
/// auto-accepts.
pub async fn detect_co_presence(
    db: &dyn Database,
    user_id: &str,
    radius_m: f64,
    freshness: Duration,
    threshold: f64,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> EngineResult<Vec<CoPresenceOutcome>> {
    let me = require_profile(db, user_id).await?;
    let my_presence = db
        .get_presence(user_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("no presence reported for {user_id}")))?;
    let nearby = find_nearby(db, user_id, radius_m, freshness, now).await?;

    let scored: Vec<(NearbyCandidate, EngineResult<f64>)> =
        stream::iter(nearby.into_iter().map(|candidate| async move {
            let score = compute_compatibility(db, user_id, &candidate.user_id)
                .await
                .map(|b| b.score);
            (candidate, score)
        }))
        .buffer_unordered(SCORING_CONCURRENCY)
        .collect()
        .await;

    let mut outcomes = Vec::with_capacity(scored.len());
    for (candidate, score) in scored {
        let score = match score {
            Ok(s) => s,
            Err(e) => {
                warn!(user_id, other = %candidate.user_id, error = %e, "Failed to score candidate, skipping");
                continue;
            }
        };
        let other = require_profile(db, &candidate.user_id).await?;
        let venue = (
            (my_presence.lat + candidate.lat) / 2.0,
            (my_presence.lng + candidate.lng) / 2.0,
        );
        let new = new_match(&me, &other, MatchStatus::Connected, Some(venue), Some(now));

        let existing = db.get_match_by_pair(&new.pair_id).await?;
        let (action, match_id) = match existing {
            Some(m) if m.status.is_terminal() => (CoPresenceAction::Ended, Some(m.id)),
            Some(m) if m.status == MatchStatus::Connected => {
                match establish(db, &new, max_attempts).await {
                    Ok(record) => (CoPresenceAction::Refreshed, Some(record.id)),
                    Err(e) => ended_during_establish(db, user_id, &new.pair_id, e).await,
                }
            }
            _ if score < threshold => (CoPresenceAction::BelowThreshold, None),
            _ if other.auto_accept_connections => match establish(db, &new, max_attempts).await {
                Ok(record) => (CoPresenceAction::Created, Some(record.id)),
                Err(e) => ended_during_establish(db, user_id, &new.pair_id, e).await,
            },
            _ => (CoPresenceAction::AwaitingConsent, None),
        };

        outcomes.push(CoPresenceOutcome {
            user_id: candidate.user_id,
            distance_m: candidate.distance_m,
            score,
            action,
            match_id,
        });
    }

    outcomes.sort_by(|a, b| {
        a.distance_m
            .partial_cmp(&b.distance_m)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    info!(user_id, candidates = outcomes.len(), "Co-presence detection finished");
    Ok(outcomes)
}

// One candidate failing to pair (typically a block landing mid-detection)
// must not sink the rest of the sweep.
async fn ended_during_establish(
    db: &dyn Database,
    user_id: &str,
    pair_id: &str,
    error: EngineError,
) -> (CoPresenceAction, Option<i64>) {
    warn!(user_id, pair_id, error = %error, "Failed to pair with candidate, reporting it as ended");
    let match_id = db.get_match_by_pair(pair_id).await.ok().flatten().map(|m| m.id);
    (CoPresenceAction::Ended, match_id)
}

/// Move a pair to a terminal status (declined or blocked), creating the
/// row if the pair never had one. Repeating the same call is a no-op.
pub async fn end_pair(
    db: &dyn Database,
    user_id: &str,
    other_id: &str,
    to: MatchStatus,
    max_attempts: u32,
) -> EngineResult<MatchRecord> {
    if !to.is_terminal() {
        return Err(EngineError::InvalidInput(format!("{to} is not a terminal status")));
    }
    reject_self(user_id, other_id)?;
    let me = require_profile(db, user_id).await?;
    let other = require_profile(db, other_id).await?;
    let new = new_match(&me, &other, to, None, None);

    let record = with_retry("match status", max_attempts, || {
        let new = &new;
        async move {
            match db.get_match_by_pair(&new.pair_id).await? {
                None => {
                    if db.insert_match_if_absent(new).await? {
                        load_match(db, &new.pair_id).await
                    } else {
                        Err(EngineError::ConflictRetryable(new.pair_id.clone()))
                    }
                }
                Some(m) if m.status == to => Ok(m),
                Some(m) if m.status.can_transition_to(to) => {
                    if db.transition_match(&new.pair_id, m.status, to).await? {
                        load_match(db, &new.pair_id).await
                    } else {
                        Err(EngineError::ConflictRetryable(new.pair_id.clone()))
                    }
                }
                Some(m) => Err(EngineError::InvalidInput(format!("pair is already {}", m.status))),
            }
        }
    })
    .await?;

    // Outstanding requests between the two die with the pair
    for (from, to_user) in [(user_id, other_id), (other_id, user_id)] {
        if let Some(req) = db.get_connection_request(from, to_user).await? {
            if req.status == RequestStatus::Pending {
                db.set_request_status(from, to_user, RequestStatus::Declined)
                    .await?;
            }
        }
    }

    info!(user_id, other_id, status = %record.status, "Pair ended");
    Ok(record)
}

/// Every match `user_id` takes part in, newest first.
pub async fn list_matches(db: &dyn Database, user_id: &str) -> EngineResult<Vec<MatchRecord>> {
    Ok(db.list_matches_for(user_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteDatabase;

    async fn db_with(users: &[(&str, bool)]) -> SqliteDatabase {
        let db = SqliteDatabase::in_memory().unwrap();
        for (id, auto_accept) in users {
            let mut p = Profile::new(id);
            p.auto_accept_connections = *auto_accept;
            p.interests = vec!["coffee".into()];
            db.upsert_profile(&p).await.unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_one_sided_request_stays_pending() {
        let db = db_with(&[("alice", false), ("bob", false)]).await;
        let outcome = send_connection_request(&db, "alice", "bob", 5).await.unwrap();
        assert!(matches!(outcome, ConnectionOutcome::Pending { .. }));
        let m = db.get_match_by_pair(&pair_id("alice", "bob")).await.unwrap().unwrap();
        assert_eq!(m.status, MatchStatus::Pending);
    }

    #[tokio::test]
    async fn test_reciprocal_requests_connect() {
        let db = db_with(&[("alice", false), ("bob", false)]).await;
        send_connection_request(&db, "alice", "bob", 5).await.unwrap();
        let outcome = send_connection_request(&db, "bob", "alice", 5).await.unwrap();
        let ConnectionOutcome::Connected { record } = outcome else {
            panic!("expected a connection");
        };
        assert_eq!(record.status, MatchStatus::Connected);
        assert_eq!(record.uid_a, "alice");
        assert_eq!(record.shared_interests, vec!["coffee".to_string()]);
        assert_eq!(record.meet_code.as_deref().map(str::len), Some(6));
        let req = db.get_connection_request("alice", "bob").await.unwrap().unwrap();
        assert_eq!(req.status, RequestStatus::Accepted);
    }

    #[tokio::test]
    async fn test_auto_accept_connects_immediately() {
        let db = db_with(&[("alice", false), ("bob", true)]).await;
        let outcome = send_connection_request(&db, "alice", "bob", 5).await.unwrap();
        assert!(matches!(outcome, ConnectionOutcome::Connected { .. }));
    }

    #[tokio::test]
    async fn test_self_request_rejected() {
        let db = db_with(&[("alice", false)]).await;
        let err = send_connection_request(&db, "alice", "alice", 5).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_block_without_prior_match_creates_terminal_row() {
        let db = db_with(&[("alice", false), ("bob", true)]).await;
        let record = end_pair(&db, "bob", "alice", MatchStatus::Blocked, 5).await.unwrap();
        assert_eq!(record.status, MatchStatus::Blocked);

        // Terminal: no way back, even with auto-accept
        let err = send_connection_request(&db, "alice", "bob", 5).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        let err = end_pair(&db, "alice", "bob", MatchStatus::Declined, 5).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        // Same terminal state again is fine
        end_pair(&db, "alice", "bob", MatchStatus::Blocked, 5).await.unwrap();
    }

    #[tokio::test]
    async fn test_decline_kills_pending_requests() {
        let db = db_with(&[("alice", false), ("bob", false)]).await;
        send_connection_request(&db, "alice", "bob", 5).await.unwrap();
        end_pair(&db, "bob", "alice", MatchStatus::Declined, 5).await.unwrap();
        let req = db.get_connection_request("alice", "bob").await.unwrap().unwrap();
        assert_eq!(req.status, RequestStatus::Declined);
        assert_eq!(list_matches(&db, "alice").await.unwrap()[0].status, MatchStatus::Declined);
    }

    #[tokio::test]
    async fn test_establish_is_idempotent() {
        let db = db_with(&[("alice", false), ("bob", false)]).await;
        let a = db.get_profile("alice").await.unwrap().unwrap();
        let b = db.get_profile("bob").await.unwrap().unwrap();
        let new = new_match(&a, &b, MatchStatus::Connected, None, None);
        let first = establish(&db, &new, 5).await.unwrap();
        let second = establish(&db, &new, 5).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(db.count_matches_for_pair(&new.pair_id).await.unwrap(), 1);
    }
}
