// Recency decay for frequency scores.
//
// A bucket's frequency score is `visit_count * decay(now - last_visit_at)`.
// Decay is exponential with a configurable half-life: a habit untouched for
// one half-life counts for half as much. decay(0) = 1, and timestamps in
// the future are treated as "just now".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exponential half-life decay policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayPolicy {
    pub half_life_days: f64,
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self {
            half_life_days: 14.0,
        }
    }
}

impl DecayPolicy {
    pub fn new(half_life_days: f64) -> Self {
        Self { half_life_days }
    }

    /// Decay factor for an elapsed time, in (0, 1].
    pub fn factor(&self, elapsed: chrono::Duration) -> f64 {
        let days = elapsed.num_milliseconds().max(0) as f64 / 86_400_000.0;
        if self.half_life_days <= 0.0 || !self.half_life_days.is_finite() {
            // Degenerate policy: no memory at all beyond the current instant
            return if days == 0.0 { 1.0 } else { 0.0 };
        }
        0.5_f64.powf(days / self.half_life_days)
    }

    /// Frequency score for a bucket evaluated at `now`.
    pub fn frequency_score(
        &self,
        visit_count: u32,
        last_visit_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> f64 {
        visit_count as f64 * self.factor(now - last_visit_at)
    }
}
