// Pairwise compatibility score.
//
// score = wi * interest + wb * behavior + wf * feedback, clamped to [0, 1],
// where (wi, wb, wf) is the mean of the two users' weight vectors. Every
// ingredient is symmetric in the pair, and the pair is put in a canonical
// order before any arithmetic so floating-point results match bit for bit.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::terms::{behavior_term, feedback_term, interest_term, shared_interests};
use super::weights::load_weights;
use crate::db::models::CompatibilityWeights;
use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::patterns::fingerprint::load_fingerprint;

/// A score together with everything that went into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityBreakdown {
    /// Lexicographically smaller id
    pub user_a: String,
    pub user_b: String,
    pub interest: f64,
    pub behavior: f64,
    pub feedback: f64,
    pub weights: CompatibilityWeights,
    pub score: f64,
    pub shared_interests: Vec<String>,
}

/// Blend three term values with a weight vector.
pub fn combine(weights: &CompatibilityWeights, interest: f64, behavior: f64, feedback: f64) -> f64 {
    let score = weights.interest_weight * interest
        + weights.behavior_weight * behavior
        + weights.feedback_weight * feedback;
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Compute the compatibility of two existing users.
pub async fn compute_compatibility(
    db: &dyn Database,
    user_a: &str,
    user_b: &str,
) -> EngineResult<CompatibilityBreakdown> {
    let (lo, hi) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };

    let profile_lo = db
        .get_profile(lo)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("profile {lo}")))?;
    let profile_hi = db
        .get_profile(hi)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("profile {hi}")))?;

    let fp_lo = load_fingerprint(db, lo).await?;
    let fp_hi = load_fingerprint(db, hi).await?;
    let ratings = db.ratings_involving(lo, hi).await?;

    let weights = CompatibilityWeights::average(
        &load_weights(db, lo).await?,
        &load_weights(db, hi).await?,
    );

    let interest = interest_term(&profile_lo.interests, &profile_hi.interests);
    let behavior = behavior_term(&fp_lo, &fp_hi);
    let feedback = feedback_term(&ratings);
    let score = combine(&weights, interest, behavior, feedback);

    debug!(
        user_a = lo,
        user_b = hi,
        interest,
        behavior,
        feedback,
        score,
        "Compatibility computed"
    );

    Ok(CompatibilityBreakdown {
        user_a: lo.to_string(),
        user_b: hi.to_string(),
        interest,
        behavior,
        feedback,
        weights,
        score,
        shared_interests: shared_interests(&profile_lo.interests, &profile_hi.interests),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_identical_pair_with_neutral_feedback() {
        let w = CompatibilityWeights::default();
        let score = combine(&w, 1.0, 1.0, 0.5);
        assert!((score - (1.0 - w.feedback_weight / 2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_combine_approaches_one_as_feedback_weight_shrinks() {
        let mut previous = 0.0;
        for wf in [0.2, 0.1, 0.01, 0.0] {
            let w = CompatibilityWeights {
                interest_weight: (1.0 - wf) / 2.0,
                behavior_weight: (1.0 - wf) / 2.0,
                feedback_weight: wf,
                data_points_count: 1,
            };
            let score = combine(&w, 1.0, 1.0, 0.5);
            assert!(score >= previous);
            previous = score;
        }
        assert!((previous - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_combine_clamps() {
        let w = CompatibilityWeights::default();
        assert_eq!(combine(&w, 5.0, 5.0, 5.0), 1.0);
        assert_eq!(combine(&w, -1.0, -1.0, -1.0), 0.0);
        assert_eq!(combine(&w, f64::NAN, 0.0, 0.0), 0.0);
    }
}
