// Database queries: CRUD operations for all tables.
//
// Every database interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the engine clean Rust
// interfaces. Multi-statement writes run inside a transaction so each one
// is atomic with respect to other writers.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{
    CompatibilityWeights, ConnectionRequest, MatchRecord, MatchStatus, MeetupFeedback, NewMatch,
    PatternStat, Presence, Profile, RequestStatus, StoreStats, VisitRecord,
};
use super::format_timestamp;
use crate::classify::buckets::{BucketKey, DayType, PlaceType, TimeOfDay};
use crate::classify::ClassifiedVisit;
use crate::patterns::decay::DecayPolicy;
use crate::patterns::fingerprint::ActivityFingerprint;

// --- Row conversion helpers ---

#[derive(Debug, thiserror::Error)]
#[error("unexpected value {value:?} in column {column}")]
struct UnexpectedValue {
    column: &'static str,
    value: String,
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn json_list_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn enum_column<T>(
    row: &Row<'_>,
    idx: usize,
    column: &'static str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    parse(&text).ok_or_else(|| conversion_error(idx, UnexpectedValue { column, value: text }))
}

// --- Profiles ---

/// Create an empty profile for `user_id` if none exists.
pub fn ensure_profile(conn: &Connection, user_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO profiles (id) VALUES (?1)",
        params![user_id],
    )?;
    Ok(())
}

/// Save or update a profile's declared fields. The fingerprint is untouched.
pub fn upsert_profile(conn: &Connection, profile: &Profile) -> Result<()> {
    let interests_json = serde_json::to_string(&profile.interests)?;
    conn.execute(
        "INSERT INTO profiles (id, name, interests, auto_accept_connections, is_visible, emoji_signature, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
            name = ?2,
            interests = ?3,
            auto_accept_connections = ?4,
            is_visible = ?5,
            emoji_signature = ?6,
            updated_at = datetime('now')",
        params![
            profile.id,
            profile.name,
            interests_json,
            profile.auto_accept_connections,
            profile.is_visible,
            profile.emoji_signature,
        ],
    )?;
    Ok(())
}

pub fn get_profile(conn: &Connection, user_id: &str) -> Result<Option<Profile>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, interests, auto_accept_connections, is_visible, emoji_signature
         FROM profiles WHERE id = ?1",
    )?;
    let result = stmt
        .query_row(params![user_id], |row| {
            Ok(Profile {
                id: row.get(0)?,
                name: row.get(1)?,
                interests: json_list_column(row, 2)?,
                auto_accept_connections: row.get(3)?,
                is_visible: row.get(4)?,
                emoji_signature: row.get(5)?,
            })
        })
        .optional()?;
    Ok(result)
}

// --- Visits and activity patterns ---

/// Append the raw visit, fold it into its bucket's statistics and re-derive
/// every other bucket's score at `now`, in one transaction. All of a user's
/// scores therefore share one evaluation time. Returns the visited bucket.
pub fn record_visit(
    conn: &Connection,
    user_id: &str,
    visit: &ClassifiedVisit,
    decay: &DecayPolicy,
    now: DateTime<Utc>,
) -> Result<PatternStat> {
    let tx = conn.unchecked_transaction()?;
    insert_visit(&tx, user_id, visit)?;
    let stat = upsert_pattern_stat(
        &tx,
        user_id,
        visit.bucket(),
        visit.timestamp.with_timezone(&Utc),
        decay,
        now,
    )?;
    rescore_patterns(&tx, user_id, decay, now)?;
    tx.commit()?;
    Ok(stat)
}

/// Append one row to the visit history. Never deduplicated.
pub fn insert_visit(conn: &Connection, user_id: &str, visit: &ClassifiedVisit) -> Result<i64> {
    conn.execute(
        "INSERT INTO location_visits
            (user_id, lat, lng, place_type, place_name, time_of_day, day_type, visited_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            user_id,
            visit.latitude,
            visit.longitude,
            visit.place_type.as_str(),
            visit.place_name,
            visit.time_of_day.as_str(),
            visit.day_type.as_str(),
            format_timestamp(&visit.timestamp.with_timezone(&Utc)),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Count one more visit to a bucket and re-derive its frequency score.
///
/// The increment is a single upsert statement; callers wanting the visit
/// log and the statistic to move together should go through `record_visit`.
pub fn upsert_pattern_stat(
    conn: &Connection,
    user_id: &str,
    bucket: BucketKey,
    visited_at: DateTime<Utc>,
    decay: &DecayPolicy,
    now: DateTime<Utc>,
) -> Result<PatternStat> {
    conn.execute(
        "INSERT INTO activity_patterns
            (user_id, place_type, time_of_day, day_type, visit_count, frequency_score, last_visit_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 1, 0, ?5, ?6)
         ON CONFLICT(user_id, place_type, time_of_day, day_type) DO UPDATE SET
            visit_count = visit_count + 1,
            last_visit_at = MAX(last_visit_at, excluded.last_visit_at),
            updated_at = excluded.updated_at",
        params![
            user_id,
            bucket.place_type.as_str(),
            bucket.time_of_day.as_str(),
            bucket.day_type.as_str(),
            format_timestamp(&visited_at),
            format_timestamp(&now),
        ],
    )?;

    let (visit_count, last_visit_at): (u32, DateTime<Utc>) = conn.query_row(
        "SELECT visit_count, last_visit_at FROM activity_patterns
         WHERE user_id = ?1 AND place_type = ?2 AND time_of_day = ?3 AND day_type = ?4",
        params![
            user_id,
            bucket.place_type.as_str(),
            bucket.time_of_day.as_str(),
            bucket.day_type.as_str(),
        ],
        |row| Ok((row.get(0)?, timestamp_column(row, 1)?)),
    )?;

    let frequency_score = decay.frequency_score(visit_count, last_visit_at, now);
    conn.execute(
        "UPDATE activity_patterns SET frequency_score = ?5
         WHERE user_id = ?1 AND place_type = ?2 AND time_of_day = ?3 AND day_type = ?4",
        params![
            user_id,
            bucket.place_type.as_str(),
            bucket.time_of_day.as_str(),
            bucket.day_type.as_str(),
            frequency_score,
        ],
    )?;

    Ok(PatternStat {
        user_id: user_id.to_string(),
        place_type: bucket.place_type,
        time_of_day: bucket.time_of_day,
        day_type: bucket.day_type,
        visit_count,
        frequency_score,
        last_visit_at,
    })
}

/// All of a user's bucket statistics, in stable bucket order.
pub fn get_pattern_stats(conn: &Connection, user_id: &str) -> Result<Vec<PatternStat>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, place_type, time_of_day, day_type, visit_count, frequency_score, last_visit_at
         FROM activity_patterns
         WHERE user_id = ?1
         ORDER BY place_type, time_of_day, day_type",
    )?;

    let rows = stmt.query_map(params![user_id], |row| {
        Ok(PatternStat {
            user_id: row.get(0)?,
            place_type: enum_column(row, 1, "place_type", PlaceType::parse)?,
            time_of_day: enum_column(row, 2, "time_of_day", TimeOfDay::parse)?,
            day_type: enum_column(row, 3, "day_type", DayType::parse)?,
            visit_count: row.get(4)?,
            frequency_score: row.get(5)?,
            last_visit_at: timestamp_column(row, 6)?,
        })
    })?;

    let mut stats = Vec::new();
    for row in rows {
        stats.push(row?);
    }
    Ok(stats)
}

/// Re-derive every frequency score for a user at `now`. Returns rows touched.
pub fn recalculate_frequency_scores(
    conn: &Connection,
    user_id: &str,
    decay: &DecayPolicy,
    now: DateTime<Utc>,
) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let touched = rescore_patterns(&tx, user_id, decay, now)?;
    tx.commit()?;
    Ok(touched)
}

// Caller owns the transaction.
fn rescore_patterns(
    conn: &Connection,
    user_id: &str,
    decay: &DecayPolicy,
    now: DateTime<Utc>,
) -> Result<usize> {
    let stats = get_pattern_stats(conn, user_id)?;
    for stat in &stats {
        let score = decay.frequency_score(stat.visit_count, stat.last_visit_at, now);
        conn.execute(
            "UPDATE activity_patterns SET frequency_score = ?5, updated_at = ?6
             WHERE user_id = ?1 AND place_type = ?2 AND time_of_day = ?3 AND day_type = ?4",
            params![
                user_id,
                stat.place_type.as_str(),
                stat.time_of_day.as_str(),
                stat.day_type.as_str(),
                score,
                format_timestamp(&now),
            ],
        )?;
    }
    Ok(stats.len())
}

/// Most recent raw visits for a user.
pub fn get_recent_visits(conn: &Connection, user_id: &str, limit: u32) -> Result<Vec<VisitRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, lat, lng, place_type, place_name, time_of_day, day_type, visited_at
         FROM location_visits
         WHERE user_id = ?1
         ORDER BY visited_at DESC, id DESC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![user_id, limit], |row| {
        Ok(VisitRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            lat: row.get(2)?,
            lng: row.get(3)?,
            place_type: row.get(4)?,
            place_name: row.get(5)?,
            time_of_day: row.get(6)?,
            day_type: row.get(7)?,
            visited_at: row.get(8)?,
        })
    })?;

    let mut visits = Vec::new();
    for row in rows {
        visits.push(row?);
    }
    Ok(visits)
}

// --- Activity fingerprint ---

/// Store a user's fingerprint snapshot (JSON) on their profile.
pub fn save_fingerprint(
    conn: &Connection,
    user_id: &str,
    fingerprint_json: &str,
    built_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE profiles SET activity_fingerprint = ?2, fingerprint_updated_at = ?3 WHERE id = ?1",
        params![user_id, fingerprint_json, format_timestamp(&built_at)],
    )?;
    Ok(())
}

/// Load a user's fingerprint JSON and when it was built.
pub fn get_fingerprint(conn: &Connection, user_id: &str) -> Result<Option<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT activity_fingerprint, fingerprint_updated_at FROM profiles WHERE id = ?1",
    )?;
    let result: Option<(Option<String>, Option<String>)> = stmt
        .query_row(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;

    Ok(match result {
        Some((Some(json), updated_at)) => Some((json, updated_at.unwrap_or_default())),
        _ => None,
    })
}

/// Reduce a user's statistic rows into a fingerprint and store it, reading
/// and writing in one transaction so the snapshot matches the rows it read.
pub fn rebuild_fingerprint(
    conn: &Connection,
    user_id: &str,
    built_at: DateTime<Utc>,
) -> Result<ActivityFingerprint> {
    let tx = conn.unchecked_transaction()?;
    let fingerprint = ActivityFingerprint::from_stats(&get_pattern_stats(&tx, user_id)?);
    save_fingerprint(&tx, user_id, &serde_json::to_string(&fingerprint)?, built_at)?;
    tx.commit()?;
    Ok(fingerprint)
}

// --- Compatibility weights ---

/// Load a user's weights and their row version.
pub fn get_weights(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<(CompatibilityWeights, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT interest_weight, behavior_weight, feedback_weight, data_points_count, version
         FROM compatibility_weights WHERE user_id = ?1",
    )?;
    let result = stmt
        .query_row(params![user_id], |row| {
            Ok((
                CompatibilityWeights {
                    interest_weight: row.get(0)?,
                    behavior_weight: row.get(1)?,
                    feedback_weight: row.get(2)?,
                    data_points_count: row.get(3)?,
                },
                row.get(4)?,
            ))
        })
        .optional()?;
    Ok(result)
}

/// Create the weights row at version 0 unless one already exists.
pub fn insert_weights_if_absent(
    conn: &Connection,
    user_id: &str,
    weights: &CompatibilityWeights,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO compatibility_weights
            (user_id, interest_weight, behavior_weight, feedback_weight, data_points_count, version)
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![
            user_id,
            weights.interest_weight,
            weights.behavior_weight,
            weights.feedback_weight,
            weights.data_points_count,
        ],
    )?;
    Ok(())
}

/// Overwrite the weights only if the row is still at `expected_version`.
/// Returns false when another writer got there first.
pub fn compare_and_swap_weights(
    conn: &Connection,
    user_id: &str,
    weights: &CompatibilityWeights,
    expected_version: i64,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE compatibility_weights SET
            interest_weight = ?2,
            behavior_weight = ?3,
            feedback_weight = ?4,
            data_points_count = ?5,
            version = version + 1,
            updated_at = datetime('now')
         WHERE user_id = ?1 AND version = ?6",
        params![
            user_id,
            weights.interest_weight,
            weights.behavior_weight,
            weights.feedback_weight,
            weights.data_points_count,
            expected_version,
        ],
    )?;
    Ok(changed == 1)
}

// --- Meetup feedback ---

/// Store a rating. Each participant rates a match once: returns None when
/// `user_id` already has a rating on `match_id`.
pub fn insert_feedback(
    conn: &Connection,
    match_id: i64,
    user_id: &str,
    rating: u8,
    feedback_text: Option<&str>,
) -> Result<Option<i64>> {
    let inserted = conn.execute(
        "INSERT INTO meetup_feedback (match_id, user_id, rating, feedback_text)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(match_id, user_id) DO NOTHING",
        params![match_id, user_id, rating, feedback_text],
    )?;
    Ok((inserted > 0).then(|| conn.last_insert_rowid()))
}

pub fn delete_feedback(conn: &Connection, feedback_id: i64) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM meetup_feedback WHERE id = ?1",
        params![feedback_id],
    )?;
    Ok(deleted > 0)
}

pub fn get_feedback_for_match(conn: &Connection, match_id: i64) -> Result<Vec<MeetupFeedback>> {
    let mut stmt = conn.prepare(
        "SELECT id, match_id, user_id, rating, feedback_text, created_at
         FROM meetup_feedback WHERE match_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![match_id], |row| {
        Ok(MeetupFeedback {
            id: row.get(0)?,
            match_id: row.get(1)?,
            user_id: row.get(2)?,
            rating: row.get(3)?,
            feedback_text: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;

    let mut feedback = Vec::new();
    for row in rows {
        feedback.push(row?);
    }
    Ok(feedback)
}

/// Every rating left on any match that involves either user.
pub fn ratings_involving(conn: &Connection, user_a: &str, user_b: &str) -> Result<Vec<u8>> {
    let mut stmt = conn.prepare(
        "SELECT f.rating
         FROM meetup_feedback f
         JOIN matches m ON m.id = f.match_id
         WHERE m.uid_a IN (?1, ?2) OR m.uid_b IN (?1, ?2)",
    )?;
    let rows = stmt.query_map(params![user_a, user_b], |row| row.get(0))?;

    let mut ratings = Vec::new();
    for row in rows {
        ratings.push(row?);
    }
    Ok(ratings)
}

// --- Presence ---

/// Overwrite a user's current location.
pub fn upsert_presence(conn: &Connection, presence: &Presence) -> Result<()> {
    conn.execute(
        "INSERT INTO presence (user_id, lat, lng, geohash, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id) DO UPDATE SET
            lat = ?2, lng = ?3, geohash = ?4, updated_at = ?5",
        params![
            presence.user_id,
            presence.lat,
            presence.lng,
            presence.geohash,
            format_timestamp(&presence.updated_at),
        ],
    )?;
    Ok(())
}

fn presence_from_row(row: &Row<'_>) -> rusqlite::Result<Presence> {
    Ok(Presence {
        user_id: row.get(0)?,
        lat: row.get(1)?,
        lng: row.get(2)?,
        geohash: row.get(3)?,
        updated_at: timestamp_column(row, 4)?,
    })
}

pub fn get_presence(conn: &Connection, user_id: &str) -> Result<Option<Presence>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, lat, lng, geohash, updated_at FROM presence WHERE user_id = ?1",
    )?;
    let result = stmt
        .query_row(params![user_id], presence_from_row)
        .optional()?;
    Ok(result)
}

/// Visible users whose geohash starts with `prefix` and who reported in at
/// or after `fresh_since`.
pub fn presence_with_prefix(
    conn: &Connection,
    prefix: &str,
    fresh_since: DateTime<Utc>,
) -> Result<Vec<Presence>> {
    let mut stmt = conn.prepare(
        "SELECT p.user_id, p.lat, p.lng, p.geohash, p.updated_at
         FROM presence p
         JOIN profiles pr ON pr.id = p.user_id
         WHERE p.geohash LIKE ?1 || '%'
           AND p.updated_at >= ?2
           AND pr.is_visible = 1",
    )?;
    let rows = stmt.query_map(
        params![prefix, format_timestamp(&fresh_since)],
        presence_from_row,
    )?;

    let mut found = Vec::new();
    for row in rows {
        found.push(row?);
    }
    Ok(found)
}

/// Remove presence rows older than `older_than`. Returns rows removed.
pub fn delete_stale_presence(conn: &Connection, older_than: DateTime<Utc>) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM presence WHERE updated_at < ?1",
        params![format_timestamp(&older_than)],
    )?;
    Ok(removed)
}

// --- Connection requests ---

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<ConnectionRequest> {
    Ok(ConnectionRequest {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        status: enum_column(row, 3, "status", RequestStatus::parse)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Create a pending request. An existing request in the same direction is
/// returned unchanged.
pub fn insert_connection_request(
    conn: &Connection,
    sender_id: &str,
    receiver_id: &str,
) -> Result<ConnectionRequest> {
    conn.execute(
        "INSERT INTO connection_requests (sender_id, receiver_id, status)
         VALUES (?1, ?2, 'pending')
         ON CONFLICT(sender_id, receiver_id) DO NOTHING",
        params![sender_id, receiver_id],
    )?;
    get_connection_request(conn, sender_id, receiver_id)?
        .ok_or_else(|| anyhow::anyhow!("Connection request vanished after insert"))
}

pub fn get_connection_request(
    conn: &Connection,
    sender_id: &str,
    receiver_id: &str,
) -> Result<Option<ConnectionRequest>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id, status, created_at, updated_at
         FROM connection_requests WHERE sender_id = ?1 AND receiver_id = ?2",
    )?;
    let result = stmt
        .query_row(params![sender_id, receiver_id], request_from_row)
        .optional()?;
    Ok(result)
}

pub fn set_request_status(
    conn: &Connection,
    sender_id: &str,
    receiver_id: &str,
    status: RequestStatus,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE connection_requests SET status = ?3, updated_at = datetime('now')
         WHERE sender_id = ?1 AND receiver_id = ?2",
        params![sender_id, receiver_id, status.as_str()],
    )?;
    Ok(changed == 1)
}

/// Pending requests waiting on `receiver_id`.
pub fn pending_requests_for(conn: &Connection, receiver_id: &str) -> Result<Vec<ConnectionRequest>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id, status, created_at, updated_at
         FROM connection_requests
         WHERE receiver_id = ?1 AND status = 'pending'
         ORDER BY created_at",
    )?;
    let rows = stmt.query_map(params![receiver_id], request_from_row)?;

    let mut requests = Vec::new();
    for row in rows {
        requests.push(row?);
    }
    Ok(requests)
}

// --- Matches ---

const MATCH_COLUMNS: &str = "id, pair_id, uid_a, uid_b, status, shared_interests, shared_emoji_code,
     meet_code, venue_lat, venue_lng, venue_name, landmark, last_seen_together_at, created_at";

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<MatchRecord> {
    Ok(MatchRecord {
        id: row.get(0)?,
        pair_id: row.get(1)?,
        uid_a: row.get(2)?,
        uid_b: row.get(3)?,
        status: enum_column(row, 4, "status", MatchStatus::parse)?,
        shared_interests: json_list_column(row, 5)?,
        shared_emoji_code: row.get(6)?,
        meet_code: row.get(7)?,
        venue_lat: row.get(8)?,
        venue_lng: row.get(9)?,
        venue_name: row.get(10)?,
        landmark: row.get(11)?,
        last_seen_together_at: row.get(12)?,
        created_at: row.get(13)?,
    })
}

/// Insert a match unless the pair already has one.
/// Returns true if this call created the row.
pub fn insert_match_if_absent(conn: &Connection, new: &NewMatch) -> Result<bool> {
    let shared_json = serde_json::to_string(&new.shared_interests)?;
    let inserted = conn.execute(
        "INSERT INTO matches
            (pair_id, uid_a, uid_b, status, shared_interests, shared_emoji_code, meet_code,
             venue_lat, venue_lng, venue_name, last_seen_together_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(pair_id) DO NOTHING",
        params![
            new.pair_id,
            new.uid_a,
            new.uid_b,
            new.status.as_str(),
            shared_json,
            new.shared_emoji_code,
            new.meet_code,
            new.venue_lat,
            new.venue_lng,
            new.venue_name,
            new.seen_together_at.as_ref().map(format_timestamp),
        ],
    )?;
    Ok(inserted == 1)
}

pub fn get_match_by_pair(conn: &Connection, pair_id: &str) -> Result<Option<MatchRecord>> {
    let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE pair_id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![pair_id], match_from_row).optional()?;
    Ok(result)
}

pub fn get_match(conn: &Connection, match_id: i64) -> Result<Option<MatchRecord>> {
    let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![match_id], match_from_row).optional()?;
    Ok(result)
}

/// Re-entrant update for a connected pair seen together again. Only touches
/// connected rows; returns false if the pair isn't connected.
pub fn refresh_match(conn: &Connection, update: &NewMatch) -> Result<bool> {
    let shared_json = serde_json::to_string(&update.shared_interests)?;
    let changed = conn.execute(
        "UPDATE matches SET
            last_seen_together_at = COALESCE(?2, last_seen_together_at),
            shared_interests = ?3,
            venue_lat = COALESCE(?4, venue_lat),
            venue_lng = COALESCE(?5, venue_lng),
            venue_name = COALESCE(?6, venue_name)
         WHERE pair_id = ?1 AND status = 'connected'",
        params![
            update.pair_id,
            update.seen_together_at.as_ref().map(format_timestamp),
            shared_json,
            update.venue_lat,
            update.venue_lng,
            update.venue_name,
        ],
    )?;
    Ok(changed == 1)
}

/// Move a match from `from` to `to`, only if it is still in `from`.
pub fn transition_match(
    conn: &Connection,
    pair_id: &str,
    from: MatchStatus,
    to: MatchStatus,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE matches SET status = ?3 WHERE pair_id = ?1 AND status = ?2",
        params![pair_id, from.as_str(), to.as_str()],
    )?;
    Ok(changed == 1)
}

/// All matches a user takes part in, newest first.
pub fn list_matches_for(conn: &Connection, user_id: &str) -> Result<Vec<MatchRecord>> {
    let sql = format!(
        "SELECT {MATCH_COLUMNS} FROM matches
         WHERE uid_a = ?1 OR uid_b = ?1
         ORDER BY created_at DESC, id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id], match_from_row)?;

    let mut matches = Vec::new();
    for row in rows {
        matches.push(row?);
    }
    Ok(matches)
}

pub fn count_matches_for_pair(conn: &Connection, pair_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM matches WHERE pair_id = ?1",
        params![pair_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// --- Status ---

pub fn store_stats(conn: &Connection) -> Result<StoreStats> {
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };
    Ok(StoreStats {
        profiles: count("SELECT COUNT(*) FROM profiles")?,
        visits: count("SELECT COUNT(*) FROM location_visits")?,
        patterns: count("SELECT COUNT(*) FROM activity_patterns")?,
        presence: count("SELECT COUNT(*) FROM presence")?,
        matches: count("SELECT COUNT(*) FROM matches")?,
        connected_matches: count("SELECT COUNT(*) FROM matches WHERE status = 'connected'")?,
        feedback: count("SELECT COUNT(*) FROM meetup_feedback")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use chrono::{Duration, FixedOffset, TimeZone};

    fn test_db() -> Connection {
        let conn = crate::db::open_in_memory().unwrap();
        ensure_profile(&conn, "alice").unwrap();
        ensure_profile(&conn, "bob").unwrap();
        conn
    }

    fn cafe_visit(day: u32, hour: u32) -> ClassifiedVisit {
        let ts = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 10, day, hour, 0, 0)
            .unwrap();
        classify(48.85, 2.35, ts, &["cafe".to_string()])
    }

    #[test]
    fn test_profile_roundtrip() {
        let conn = test_db();
        let mut profile = Profile::new("alice");
        profile.interests = vec!["hiking".into(), "coffee".into()];
        profile.auto_accept_connections = true;
        upsert_profile(&conn, &profile).unwrap();

        let loaded = get_profile(&conn, "alice").unwrap().unwrap();
        assert_eq!(loaded, profile);
        assert!(get_profile(&conn, "nobody").unwrap().is_none());
    }

    #[test]
    fn test_visit_count_accumulates_per_bucket() {
        let conn = test_db();
        let decay = DecayPolicy::default();
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 9, 0, 0).unwrap();

        for _ in 0..3 {
            record_visit(&conn, "alice", &cafe_visit(13, 8), &decay, now).unwrap();
        }
        // Same place, evening: a different bucket
        record_visit(&conn, "alice", &cafe_visit(13, 19), &decay, now).unwrap();

        let stats = get_pattern_stats(&conn, "alice").unwrap();
        assert_eq!(stats.len(), 2);
        let morning = stats
            .iter()
            .find(|s| s.time_of_day == TimeOfDay::Morning)
            .unwrap();
        assert_eq!(morning.visit_count, 3);
        assert_eq!(get_recent_visits(&conn, "alice", 10).unwrap().len(), 4);
    }

    #[test]
    fn test_out_of_order_visit_keeps_latest_timestamp() {
        let conn = test_db();
        let decay = DecayPolicy::default();
        let now = Utc.with_ymd_and_hms(2026, 10, 30, 0, 0, 0).unwrap();

        record_visit(&conn, "alice", &cafe_visit(20, 8), &decay, now).unwrap();
        let stat = record_visit(&conn, "alice", &cafe_visit(6, 8), &decay, now).unwrap();
        assert_eq!(stat.visit_count, 2);
        assert_eq!(
            stat.last_visit_at,
            Utc.with_ymd_and_hms(2026, 10, 20, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_recalculate_only_decays() {
        let conn = test_db();
        let decay = DecayPolicy::new(14.0);
        let visited = Utc.with_ymd_and_hms(2026, 10, 13, 8, 0, 0).unwrap();
        let stat = record_visit(&conn, "alice", &cafe_visit(13, 8), &decay, visited).unwrap();
        assert!((stat.frequency_score - 1.0).abs() < 1e-9);

        let later = visited + Duration::days(14);
        assert_eq!(recalculate_frequency_scores(&conn, "alice", &decay, later).unwrap(), 1);
        let stats = get_pattern_stats(&conn, "alice").unwrap();
        assert!((stats[0].frequency_score - 0.5).abs() < 1e-9);
        assert_eq!(stats[0].visit_count, 1);
    }

    #[test]
    fn test_visit_decays_every_other_bucket() {
        let conn = test_db();
        let decay = DecayPolicy::new(14.0);
        let then = Utc.with_ymd_and_hms(2026, 10, 13, 8, 0, 0).unwrap();
        for _ in 0..10 {
            record_visit(&conn, "alice", &cafe_visit(13, 8), &decay, then).unwrap();
        }

        let a_year_on = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2027, 10, 13, 19, 0, 0)
            .unwrap();
        let gym = classify(48.85, 2.35, a_year_on, &["gym".to_string()]);
        record_visit(&conn, "alice", &gym, &decay, a_year_on.with_timezone(&Utc)).unwrap();

        let stats = get_pattern_stats(&conn, "alice").unwrap();
        let score = |place: PlaceType| {
            stats
                .iter()
                .find(|s| s.place_type == place)
                .map(|s| s.frequency_score)
                .unwrap()
        };
        assert!((score(PlaceType::Gym) - 1.0).abs() < 1e-9);
        // Ten visits a year ago weigh less than one visit today
        assert!(score(PlaceType::Cafe) < score(PlaceType::Gym));
        let expected = decay.frequency_score(10, then, a_year_on.with_timezone(&Utc));
        assert!((score(PlaceType::Cafe) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_visit_requires_profile() {
        let conn = test_db();
        let decay = DecayPolicy::default();
        let result = record_visit(&conn, "ghost", &cafe_visit(13, 8), &decay, Utc::now());
        assert!(result.is_err());
        // The failed transaction left nothing behind
        assert_eq!(store_stats(&conn).unwrap().visits, 0);
    }

    #[test]
    fn test_fingerprint_roundtrip() {
        let conn = test_db();
        assert!(get_fingerprint(&conn, "alice").unwrap().is_none());
        save_fingerprint(&conn, "alice", r#"{"buckets":{}}"#, Utc::now()).unwrap();
        let (json, _built) = get_fingerprint(&conn, "alice").unwrap().unwrap();
        assert_eq!(json, r#"{"buckets":{}}"#);
    }

    #[test]
    fn test_rebuild_fingerprint_matches_rows() {
        let conn = test_db();
        let decay = DecayPolicy::default();
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 9, 0, 0).unwrap();
        record_visit(&conn, "alice", &cafe_visit(13, 8), &decay, now).unwrap();
        record_visit(&conn, "alice", &cafe_visit(13, 19), &decay, now).unwrap();

        let built = rebuild_fingerprint(&conn, "alice", now).unwrap();
        assert_eq!(built.len(), 2);
        let (json, built_at) = get_fingerprint(&conn, "alice").unwrap().unwrap();
        assert_eq!(built_at, format_timestamp(&now));
        let stored: ActivityFingerprint = serde_json::from_str(&json).unwrap();
        let rows = get_pattern_stats(&conn, "alice").unwrap();
        assert_eq!(stored.len(), rows.len());
        for row in &rows {
            let bucket = &stored.buckets[&row.bucket().key()];
            assert_eq!(bucket.visit_count, row.visit_count);
            assert!((bucket.frequency_score - row.frequency_score).abs() < 1e-9);
        }
    }

    #[test]
    fn test_weights_compare_and_swap() {
        let conn = test_db();
        let w = CompatibilityWeights {
            interest_weight: 0.4,
            behavior_weight: 0.4,
            feedback_weight: 0.2,
            data_points_count: 0,
        };
        insert_weights_if_absent(&conn, "alice", &w).unwrap();
        insert_weights_if_absent(&conn, "alice", &w).unwrap();
        let (_, version) = get_weights(&conn, "alice").unwrap().unwrap();
        assert_eq!(version, 0);

        let updated = CompatibilityWeights {
            data_points_count: 1,
            ..w
        };
        assert!(compare_and_swap_weights(&conn, "alice", &updated, 0).unwrap());
        // Stale version loses
        assert!(!compare_and_swap_weights(&conn, "alice", &updated, 0).unwrap());
        let (loaded, version) = get_weights(&conn, "alice").unwrap().unwrap();
        assert_eq!(version, 1);
        assert_eq!(loaded.data_points_count, 1);
    }

    #[test]
    fn test_presence_prefix_and_freshness() {
        let conn = test_db();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        upsert_presence(
            &conn,
            &Presence {
                user_id: "alice".into(),
                lat: 1.0,
                lng: 1.0,
                geohash: "u09tunq".into(),
                updated_at: now,
            },
        )
        .unwrap();
        upsert_presence(
            &conn,
            &Presence {
                user_id: "bob".into(),
                lat: 1.0,
                lng: 1.0,
                geohash: "u09tunr".into(),
                updated_at: now - Duration::hours(2),
            },
        )
        .unwrap();

        let fresh = presence_with_prefix(&conn, "u09tun", now - Duration::minutes(10)).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].user_id, "alice");

        assert_eq!(delete_stale_presence(&conn, now - Duration::hours(1)).unwrap(), 1);
        assert!(get_presence(&conn, "bob").unwrap().is_none());
    }

    #[test]
    fn test_match_insert_is_idempotent() {
        let conn = test_db();
        let new = NewMatch {
            pair_id: "pair-1".into(),
            uid_a: "alice".into(),
            uid_b: "bob".into(),
            status: MatchStatus::Connected,
            shared_interests: vec!["coffee".into()],
            shared_emoji_code: None,
            meet_code: Some("ABC123".into()),
            venue_lat: None,
            venue_lng: None,
            venue_name: None,
            seen_together_at: None,
        };
        assert!(insert_match_if_absent(&conn, &new).unwrap());
        assert!(!insert_match_if_absent(&conn, &new).unwrap());
        assert_eq!(count_matches_for_pair(&conn, "pair-1").unwrap(), 1);

        let seen = Utc::now();
        let refresh = NewMatch {
            seen_together_at: Some(seen),
            ..new.clone()
        };
        assert!(refresh_match(&conn, &refresh).unwrap());
        let m = get_match_by_pair(&conn, "pair-1").unwrap().unwrap();
        assert_eq!(m.meet_code.as_deref(), Some("ABC123"));
        assert!(m.last_seen_together_at.is_some());
        assert_eq!(list_matches_for(&conn, "bob").unwrap().len(), 1);
    }

    #[test]
    fn test_transition_is_conditional() {
        let conn = test_db();
        let new = NewMatch {
            pair_id: "pair-2".into(),
            uid_a: "alice".into(),
            uid_b: "bob".into(),
            status: MatchStatus::Connected,
            shared_interests: vec![],
            shared_emoji_code: None,
            meet_code: None,
            venue_lat: None,
            venue_lng: None,
            venue_name: None,
            seen_together_at: None,
        };
        insert_match_if_absent(&conn, &new).unwrap();
        assert!(
            transition_match(&conn, "pair-2", MatchStatus::Connected, MatchStatus::Blocked).unwrap()
        );
        assert!(
            !transition_match(&conn, "pair-2", MatchStatus::Connected, MatchStatus::Declined)
                .unwrap()
        );
        // Blocked rows are not refreshed
        assert!(!refresh_match(&conn, &new).unwrap());
    }

    #[test]
    fn test_feedback_ratings_involving_either_user() {
        let conn = test_db();
        ensure_profile(&conn, "carol").unwrap();
        let new = NewMatch {
            pair_id: "pair-3".into(),
            uid_a: "alice".into(),
            uid_b: "carol".into(),
            status: MatchStatus::Connected,
            shared_interests: vec![],
            shared_emoji_code: None,
            meet_code: None,
            venue_lat: None,
            venue_lng: None,
            venue_name: None,
            seen_together_at: None,
        };
        insert_match_if_absent(&conn, &new).unwrap();
        let m = get_match_by_pair(&conn, "pair-3").unwrap().unwrap();
        assert!(insert_feedback(&conn, m.id, "alice", 5, Some("great")).unwrap().is_some());
        let carol = insert_feedback(&conn, m.id, "carol", 3, None).unwrap();
        // A second rating from the same participant is refused
        assert!(insert_feedback(&conn, m.id, "alice", 1, None).unwrap().is_none());

        let ratings = ratings_involving(&conn, "alice", "bob").unwrap();
        assert_eq!(ratings.len(), 2);
        assert!(ratings_involving(&conn, "bob", "dave").unwrap().is_empty());
        let stored = get_feedback_for_match(&conn, m.id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].rating, 5);

        assert!(delete_feedback(&conn, carol.unwrap()).unwrap());
        assert_eq!(get_feedback_for_match(&conn, m.id).unwrap().len(), 1);
        assert!(insert_feedback(&conn, m.id, "carol", 4, None).unwrap().is_some());
    }

    #[test]
    fn test_connection_request_lifecycle() {
        let conn = test_db();
        let req = insert_connection_request(&conn, "alice", "bob").unwrap();
        assert_eq!(req.status, RequestStatus::Pending);
        // Second insert returns the same row
        let again = insert_connection_request(&conn, "alice", "bob").unwrap();
        assert_eq!(again.id, req.id);
        assert_eq!(pending_requests_for(&conn, "bob").unwrap().len(), 1);

        assert!(set_request_status(&conn, "alice", "bob", RequestStatus::Accepted).unwrap());
        assert!(pending_requests_for(&conn, "bob").unwrap().is_empty());
    }
}
