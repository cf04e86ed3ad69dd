// Per-user compatibility weights and how they learn from meetup feedback.
//
// After a rated meetup, whichever term came closest to the actual outcome
// gets more say next time: the weight vector moves toward that term's unit
// vector by a step that shrinks as the user accumulates data points.
//
//   eta = learning_rate / (data_points_count + 1)
//   w'  = normalize((1 - eta) * w + eta * e_best)
//
// A convex step between two points of the simplex stays on the simplex, so
// the sum-to-one check after an update only fails if something upstream
// already corrupted the row.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::terms::rating_to_unit;
use crate::db::models::CompatibilityWeights;
use crate::db::Database;
use crate::error::{with_retry, EngineError, EngineResult};

/// Allowed drift of the weight sum away from 1.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

impl Default for CompatibilityWeights {
    fn default() -> Self {
        Self {
            interest_weight: 0.4,
            behavior_weight: 0.4,
            feedback_weight: 0.2,
            data_points_count: 0,
        }
    }
}

impl CompatibilityWeights {
    pub fn components(&self) -> [f64; 3] {
        [self.interest_weight, self.behavior_weight, self.feedback_weight]
    }

    /// Each component in [0, 1] and the three summing to 1.
    pub fn is_valid(&self) -> bool {
        let parts = self.components();
        parts
            .iter()
            .all(|w| w.is_finite() && (0.0..=1.0).contains(w))
            && (parts.iter().sum::<f64>() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
    }

    /// The stored vector if the user has learned anything yet, else defaults.
    pub fn effective(stored: Option<CompatibilityWeights>) -> Self {
        match stored {
            Some(w) if w.data_points_count > 0 => w,
            _ => Self::default(),
        }
    }

    /// Component-wise mean of two vectors. The mean of two simplex points is
    /// on the simplex.
    pub fn average(a: &Self, b: &Self) -> Self {
        Self {
            interest_weight: (a.interest_weight + b.interest_weight) / 2.0,
            behavior_weight: (a.behavior_weight + b.behavior_weight) / 2.0,
            feedback_weight: (a.feedback_weight + b.feedback_weight) / 2.0,
            data_points_count: a.data_points_count.min(b.data_points_count),
        }
    }

    /// One learning step toward the term that best predicted `signal`.
    pub fn apply_feedback(&self, signal: &FeedbackSignal, schedule: &LearningSchedule) -> Self {
        let eta = schedule.step(self.data_points_count);
        let target = signal.best_predictor().unit_vector();

        let mut next = [0.0; 3];
        for (i, (w, t)) in self.components().iter().zip(target).enumerate() {
            next[i] = (1.0 - eta) * w + eta * t;
        }
        let sum: f64 = next.iter().sum();
        if sum > 0.0 {
            for w in next.iter_mut() {
                *w /= sum;
            }
        }

        Self {
            interest_weight: next[0],
            behavior_weight: next[1],
            feedback_weight: next[2],
            data_points_count: self.data_points_count.saturating_add(1),
        }
    }
}

/// One of the three compatibility terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Term {
    Interest,
    Behavior,
    Feedback,
}

impl Term {
    fn unit_vector(self) -> [f64; 3] {
        match self {
            Term::Interest => [1.0, 0.0, 0.0],
            Term::Behavior => [0.0, 1.0, 0.0],
            Term::Feedback => [0.0, 0.0, 1.0],
        }
    }
}

/// What happened at a meetup, alongside what each term had predicted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSignal {
    /// The rating scaled to [0, 1]
    pub outcome: f64,
    pub interest: f64,
    pub behavior: f64,
    pub feedback: f64,
}

impl FeedbackSignal {
    pub fn from_rating(rating: u8, interest: f64, behavior: f64, feedback: f64) -> Self {
        Self {
            outcome: rating_to_unit(rating),
            interest,
            behavior,
            feedback,
        }
    }

    /// The term with the smallest error against the outcome. Ties go to
    /// interest, then behavior.
    pub fn best_predictor(&self) -> Term {
        let candidates = [
            (Term::Interest, self.interest),
            (Term::Behavior, self.behavior),
            (Term::Feedback, self.feedback),
        ];
        let mut best = candidates[0];
        for candidate in &candidates[1..] {
            if (candidate.1 - self.outcome).abs() < (best.1 - self.outcome).abs() {
                best = *candidate;
            }
        }
        best.0
    }
}

/// How big each learning step is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningSchedule {
    pub learning_rate: f64,
}

impl Default for LearningSchedule {
    fn default() -> Self {
        Self { learning_rate: 0.3 }
    }
}

impl LearningSchedule {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }

    /// Step size after `data_points` prior updates, in [0, 1].
    pub fn step(&self, data_points: u32) -> f64 {
        let eta = self.learning_rate / (data_points as f64 + 1.0);
        if eta.is_finite() {
            eta.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Load a user's weights, falling back to defaults.
pub async fn load_weights(db: &dyn Database, user_id: &str) -> EngineResult<CompatibilityWeights> {
    let stored = db.get_weights(user_id).await?.map(|(w, _version)| w);
    Ok(CompatibilityWeights::effective(stored))
}

/// Apply one feedback signal to a user's stored weights.
///
/// Read-modify-write under compare-and-swap; a lost race is retried up to
/// `max_attempts` times.
pub async fn update_weights(
    db: &dyn Database,
    user_id: &str,
    signal: &FeedbackSignal,
    schedule: &LearningSchedule,
    max_attempts: u32,
) -> EngineResult<CompatibilityWeights> {
    db.insert_weights_if_absent(user_id, &CompatibilityWeights::default())
        .await?;

    with_retry("compatibility weights", max_attempts, || async move {
        let (current, version) = db
            .get_weights(user_id)
            .await?
            .ok_or_else(|| EngineError::Store(anyhow!("Weights row for {user_id} vanished")))?;

        if !current.is_valid() {
            error!(user_id, ?current, "Stored weights are off the simplex");
            return Err(EngineError::ConsistencyViolation(format!(
                "stored weights for {user_id} do not sum to 1"
            )));
        }

        let next = current.apply_feedback(signal, schedule);
        if !next.is_valid() {
            error!(user_id, ?current, ?next, "Weight update left the simplex");
            return Err(EngineError::ConsistencyViolation(format!(
                "updated weights for {user_id} do not sum to 1"
            )));
        }

        if db.compare_and_swap_weights(user_id, &next, version).await? {
            debug!(
                user_id,
                interest = next.interest_weight,
                behavior = next.behavior_weight,
                feedback = next.feedback_weight,
                data_points = next.data_points_count,
                "Weights updated"
            );
            Ok(next)
        } else {
            Err(EngineError::ConflictRetryable(format!("weights for {user_id}")))
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteDatabase;

    #[test]
    fn test_defaults_are_valid() {
        let w = CompatibilityWeights::default();
        assert!(w.is_valid());
        assert_eq!(w.components(), [0.4, 0.4, 0.2]);
    }

    #[test]
    fn test_effective_ignores_untrained_rows() {
        let untrained = CompatibilityWeights {
            interest_weight: 1.0,
            behavior_weight: 0.0,
            feedback_weight: 0.0,
            data_points_count: 0,
        };
        assert_eq!(
            CompatibilityWeights::effective(Some(untrained)),
            CompatibilityWeights::default()
        );
        let trained = CompatibilityWeights {
            data_points_count: 2,
            ..untrained
        };
        assert_eq!(CompatibilityWeights::effective(Some(trained)), trained);
    }

    #[test]
    fn test_best_predictor_picks_smallest_error() {
        let signal = FeedbackSignal::from_rating(5, 0.2, 0.9, 0.5);
        assert_eq!(signal.best_predictor(), Term::Behavior);
        let signal = FeedbackSignal::from_rating(1, 0.2, 0.9, 0.5);
        assert_eq!(signal.best_predictor(), Term::Interest);
    }

    #[test]
    fn test_first_step_moves_toward_best_term() {
        let w = CompatibilityWeights::default();
        let signal = FeedbackSignal::from_rating(5, 1.0, 0.0, 0.5);
        let next = w.apply_feedback(&signal, &LearningSchedule::default());
        // eta = 0.3: interest = 0.7 * 0.4 + 0.3 = 0.58
        assert!((next.interest_weight - 0.58).abs() < 1e-12);
        assert!((next.behavior_weight - 0.28).abs() < 1e-12);
        assert!((next.feedback_weight - 0.14).abs() < 1e-12);
        assert_eq!(next.data_points_count, 1);
        assert!(next.is_valid());
    }

    #[test]
    fn test_many_updates_stay_on_simplex() {
        let schedule = LearningSchedule::new(0.9);
        let mut w = CompatibilityWeights::default();
        for i in 0..500u32 {
            let rating = (i % 5 + 1) as u8;
            let signal = FeedbackSignal::from_rating(
                rating,
                (i % 3) as f64 / 2.0,
                (i % 7) as f64 / 6.0,
                (i % 4) as f64 / 3.0,
            );
            w = w.apply_feedback(&signal, &schedule);
            assert!(w.is_valid(), "off the simplex after {i} updates: {w:?}");
        }
        assert_eq!(w.data_points_count, 500);
    }

    #[test]
    fn test_step_shrinks_with_data() {
        let schedule = LearningSchedule::default();
        assert!((schedule.step(0) - 0.3).abs() < 1e-12);
        assert!((schedule.step(2) - 0.1).abs() < 1e-12);
        assert_eq!(LearningSchedule::new(50.0).step(0), 1.0);
    }

    #[tokio::test]
    async fn test_update_weights_persists_and_bumps_version() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.ensure_profile("alice").await.unwrap();
        let signal = FeedbackSignal::from_rating(5, 1.0, 0.0, 0.5);

        let w = update_weights(&db, "alice", &signal, &LearningSchedule::default(), 5)
            .await
            .unwrap();
        let (stored, version) = db.get_weights("alice").await.unwrap().unwrap();
        assert_eq!(stored, w);
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_consistency_violation() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.ensure_profile("alice").await.unwrap();
        let broken = CompatibilityWeights {
            interest_weight: 0.9,
            behavior_weight: 0.9,
            feedback_weight: 0.9,
            data_points_count: 3,
        };
        db.insert_weights_if_absent("alice", &broken).await.unwrap();

        let signal = FeedbackSignal::from_rating(3, 0.5, 0.5, 0.5);
        let err = update_weights(&db, "alice", &signal, &LearningSchedule::default(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ConsistencyViolation(_)));
    }
}
