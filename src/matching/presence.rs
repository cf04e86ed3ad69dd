// Presence: where people are right now, and who is close by.
//
// Each user has at most one presence row holding their last reported
// coordinates and geohash. Nearby search narrows candidates with a 3x3
// block of geohash cells, drops rows older than the freshness window, then
// applies the exact haversine radius.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use super::geohash::{cell_and_neighbors, encode, haversine_m, precision_for_radius};
use crate::db::models::Presence;
use crate::db::Database;
use crate::error::{EngineError, EngineResult};

/// Someone within the search radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyCandidate {
    pub user_id: String,
    pub lat: f64,
    pub lng: f64,
    pub distance_m: f64,
    pub updated_at: DateTime<Utc>,
}

/// Store a user's current position.
pub async fn update_presence(
    db: &dyn Database,
    user_id: &str,
    lat: f64,
    lng: f64,
    precision: usize,
    now: DateTime<Utc>,
) -> Result<Presence> {
    let presence = Presence {
        user_id: user_id.to_string(),
        lat,
        lng,
        geohash: encode(lat, lng, precision),
        updated_at: now,
    };
    db.upsert_presence(&presence).await?;
    debug!(user_id, geohash = %presence.geohash, "Presence updated");
    Ok(presence)
}

/// Visible users with fresh presence within `radius_m` of the caller,
/// nearest first. The caller needs a presence row of their own.
pub async fn find_nearby(
    db: &dyn Database,
    user_id: &str,
    radius_m: f64,
    freshness: Duration,
    now: DateTime<Utc>,
) -> EngineResult<Vec<NearbyCandidate>> {
    let me = db
        .get_presence(user_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("no presence reported for {user_id}")))?;

    let precision = precision_for_radius(radius_m, me.lat, me.geohash.len());
    let prefix = me.geohash.get(..precision).unwrap_or(&me.geohash);
    let cells = cell_and_neighbors(prefix);
    let fresh_since = now - freshness;

    let batches = try_join_all(
        cells
            .iter()
            .map(|cell| db.presence_with_prefix(cell, fresh_since)),
    )
    .await?;

    let mut seen: HashMap<String, NearbyCandidate> = HashMap::new();
    for row in batches.into_iter().flatten() {
        if row.user_id == user_id {
            continue;
        }
        let distance_m = haversine_m(me.lat, me.lng, row.lat, row.lng);
        if distance_m > radius_m {
            continue;
        }
        seen.entry(row.user_id.clone()).or_insert(NearbyCandidate {
            user_id: row.user_id,
            lat: row.lat,
            lng: row.lng,
            distance_m,
            updated_at: row.updated_at,
        });
    }

    let mut nearby: Vec<NearbyCandidate> = seen.into_values().collect();
    nearby.sort_by(|a, b| {
        a.distance_m
            .partial_cmp(&b.distance_m)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    debug!(
        user_id,
        radius_m,
        precision,
        cells = cells.len(),
        found = nearby.len(),
        "Nearby search"
    );
    Ok(nearby)
}

/// Delete presence rows that fell out of the freshness window.
pub async fn sweep_stale_presence(
    db: &dyn Database,
    freshness: Duration,
    now: DateTime<Utc>,
) -> Result<usize> {
    let removed = db.delete_stale_presence(now - freshness).await?;
    if removed > 0 {
        info!(removed, "Swept stale presence rows");
    }
    Ok(removed)
}
