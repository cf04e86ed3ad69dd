// Pattern aggregation: folding classified visits into bucket statistics.
//
// Each visit appends a history row, bumps one (user, bucket) statistic and
// decays the user's other buckets to the same instant, all in a single
// store transaction. The fingerprint is then rebuilt so the profile
// snapshot catches up with the rows it summarizes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::decay::DecayPolicy;
use super::fingerprint::rebuild_fingerprint;
use crate::classify::ClassifiedVisit;
use crate::db::models::PatternStat;
use crate::db::Database;

/// Record one classified visit for a user. Returns the updated bucket row.
///
/// A failed fingerprint rebuild is logged but not returned: the visit and
/// statistic are already committed, and the next rebuild catches up.
pub async fn record_visit(
    db: &dyn Database,
    user_id: &str,
    visit: &ClassifiedVisit,
    decay: &DecayPolicy,
    now: DateTime<Utc>,
) -> Result<PatternStat> {
    let stat = db.record_visit(user_id, visit, decay, now).await?;

    info!(
        user_id,
        bucket = %stat.bucket(),
        visit_count = stat.visit_count,
        frequency_score = stat.frequency_score,
        "Recorded visit"
    );

    if let Err(e) = rebuild_fingerprint(db, user_id, now).await {
        warn!(user_id, error = %e, "Fingerprint rebuild failed, snapshot is stale");
    }

    Ok(stat)
}

/// Re-derive all of a user's frequency scores at `now`, then rebuild their
/// fingerprint. Scores only ever decay here; counts are untouched.
pub async fn recalculate_frequency_scores(
    db: &dyn Database,
    user_id: &str,
    decay: &DecayPolicy,
    now: DateTime<Utc>,
) -> Result<usize> {
    let updated = db.recalculate_frequency_scores(user_id, decay, now).await?;
    rebuild_fingerprint(db, user_id, now).await?;
    info!(user_id, buckets = updated, "Frequency scores recalculated");
    Ok(updated)
}
