// ActivityFingerprint: the compact summary of someone's habits.
//
// A fingerprint maps each bucket key ("cafe_morning_weekday") to that
// bucket's visit count, frequency score and last visit. It is a pure
// reduction of the user's activity_patterns rows and is stored as JSON on
// the profile, where the compatibility scorer reads it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::db::models::PatternStat;
use crate::db::Database;

/// Snapshot of one bucket inside a fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub visit_count: u32,
    pub frequency_score: f64,
    pub last_visit: DateTime<Utc>,
}

/// A complete activity fingerprint, keyed by bucket key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityFingerprint {
    pub buckets: BTreeMap<String, BucketSummary>,
}

impl ActivityFingerprint {
    /// Reduce statistic rows into a fingerprint. One entry per row.
    pub fn from_stats(stats: &[PatternStat]) -> Self {
        let buckets = stats
            .iter()
            .map(|s| {
                (
                    s.bucket().key(),
                    BucketSummary {
                        visit_count: s.visit_count,
                        frequency_score: s.frequency_score,
                        last_visit: s.last_visit_at,
                    },
                )
            })
            .collect();
        Self { buckets }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Sum of frequency scores across all buckets.
    pub fn total_frequency(&self) -> f64 {
        self.buckets.values().map(|b| b.frequency_score).sum()
    }

    /// Frequency score per bucket key, as a flat map.
    /// Used for computing behavior overlap between two users.
    pub fn frequency_weights(&self) -> HashMap<String, f64> {
        self.buckets
            .iter()
            .map(|(k, b)| (k.clone(), b.frequency_score))
            .collect()
    }

    /// Display the fingerprint as a bar chart in the terminal, strongest
    /// habits first.
    pub fn display(&self, user_id: &str) {
        println!(
            "\n{}",
            format!(
                "=== Activity fingerprint for {} ({} buckets) ===",
                user_id,
                self.len()
            )
            .bold()
        );
        println!();

        if self.is_empty() {
            println!("  No visits recorded yet.");
            return;
        }

        let mut ranked: Vec<(&String, &BucketSummary)> = self.buckets.iter().collect();
        ranked.sort_by(|a, b| {
            b.1.frequency_score
                .partial_cmp(&a.1.frequency_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let total = self.total_frequency();
        let bar_width: usize = 20;

        for (i, (key, bucket)) in ranked.iter().enumerate() {
            let share = if total > 0.0 {
                bucket.frequency_score / total
            } else {
                0.0
            };
            let filled = (share * bar_width as f64).round() as usize;
            let empty = bar_width.saturating_sub(filled);
            let bar = format!("[{}{}]", "=".repeat(filled), " ".repeat(empty));

            let colored_bar = if share >= 0.25 {
                bar.bright_green()
            } else if share >= 0.10 {
                bar.bright_yellow()
            } else {
                bar.bright_blue()
            };

            println!(
                "  {:>2}. {:<36} {} {:>6.2}  ({} visits, last {})",
                i + 1,
                key.bold(),
                colored_bar,
                bucket.frequency_score,
                bucket.visit_count,
                bucket.last_visit.format("%Y-%m-%d").to_string().dimmed()
            );
        }
        println!();
    }
}

/// Rebuild a user's fingerprint from their statistic rows and store it.
///
/// Idempotent. The store reads and writes under one lock, so whichever
/// rebuild lands last saw every row committed before it.
pub async fn rebuild_fingerprint(
    db: &dyn Database,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<ActivityFingerprint> {
    let fingerprint = db.rebuild_fingerprint(user_id, now).await?;
    debug!(user_id, buckets = fingerprint.len(), "Fingerprint rebuilt");
    Ok(fingerprint)
}

/// Load a user's stored fingerprint. Users who never visited anywhere get
/// an empty one.
pub async fn load_fingerprint(db: &dyn Database, user_id: &str) -> Result<ActivityFingerprint> {
    match db.get_fingerprint(user_id).await? {
        Some((json, _built_at)) => serde_json::from_str(&json)
            .with_context(|| format!("Corrupt activity fingerprint for {user_id}")),
        None => Ok(ActivityFingerprint::default()),
    }
}
