// The three compatibility terms, each in [0, 1].
//
// interest: set Jaccard over declared interests
// behavior: shared habit mass over the larger habit mass
//
//   sum over shared buckets of min(freq_a, freq_b) / max(total_a, total_b)
//
// feedback: how past meetups involving either person went, 0.5 when unknown

use std::collections::{BTreeSet, HashMap};

use crate::patterns::fingerprint::ActivityFingerprint;

/// Neutral feedback value used when nobody has rated anything yet.
pub const NEUTRAL_FEEDBACK: f64 = 0.5;

/// Lowercased, trimmed, de-duplicated interests. Blank entries are dropped.
pub fn normalize_interests(interests: &[String]) -> BTreeSet<String> {
    interests
        .iter()
        .map(|i| i.trim().to_lowercase())
        .filter(|i| !i.is_empty())
        .collect()
}

/// Interests both people declared, in normalized form, sorted.
pub fn shared_interests(a: &[String], b: &[String]) -> Vec<String> {
    let set_a = normalize_interests(a);
    let set_b = normalize_interests(b);
    set_a.intersection(&set_b).cloned().collect()
}

/// `|A ∩ B| / |A ∪ B|`, 0 when both sides are empty.
pub fn interest_term(a: &[String], b: &[String]) -> f64 {
    let set_a = normalize_interests(a);
    let set_b = normalize_interests(b);
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}

/// Overlap of two activity fingerprints.
pub fn behavior_term(fp_a: &ActivityFingerprint, fp_b: &ActivityFingerprint) -> f64 {
    overlap_from_weights(&fp_a.frequency_weights(), &fp_b.frequency_weights())
}

/// Behavior overlap from raw bucket weight maps. Always in [0, 1].
pub fn overlap_from_weights(
    weights_a: &HashMap<String, f64>,
    weights_b: &HashMap<String, f64>,
) -> f64 {
    let total_a: f64 = weights_a.values().sum();
    let total_b: f64 = weights_b.values().sum();
    let denominator = total_a.max(total_b);
    if denominator <= 0.0 || !denominator.is_finite() {
        return 0.0;
    }

    let shared: f64 = weights_a
        .iter()
        .filter_map(|(key, a)| weights_b.get(key).map(|b| a.min(*b)))
        .sum();

    (shared / denominator).clamp(0.0, 1.0)
}

/// Scale a 1–5 rating onto [0, 1].
pub fn rating_to_unit(rating: u8) -> f64 {
    (rating.clamp(1, 5) as f64 - 1.0) / 4.0
}

/// Mean scaled rating, or the neutral value when there are none.
pub fn feedback_term(ratings: &[u8]) -> f64 {
    if ratings.is_empty() {
        return NEUTRAL_FEEDBACK;
    }
    let sum: f64 = ratings.iter().map(|r| rating_to_unit(*r)).sum();
    sum / ratings.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn weights(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_interest_one_third() {
        let a = strings(&["hiking", "coffee"]);
        let b = strings(&["coffee", "music"]);
        assert!((interest_term(&a, &b) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_interest_case_and_whitespace_insensitive() {
        let a = strings(&["Coffee ", "HIKING"]);
        let b = strings(&["coffee", "hiking"]);
        assert!((interest_term(&a, &b) - 1.0).abs() < 1e-12);
        assert_eq!(shared_interests(&a, &b), strings(&["coffee", "hiking"]));
    }

    #[test]
    fn test_interest_both_empty_is_zero() {
        assert_eq!(interest_term(&[], &[]), 0.0);
        assert_eq!(interest_term(&strings(&["  "]), &[]), 0.0);
    }

    #[test]
    fn test_overlap_identical_is_one() {
        let w = weights(&[("cafe_morning_weekday", 3.0), ("gym_evening_weekday", 1.0)]);
        assert!((overlap_from_weights(&w, &w) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_overlap_disjoint_is_zero() {
        let a = weights(&[("cafe_morning_weekday", 3.0)]);
        let b = weights(&[("bar_night_weekend", 2.0)]);
        assert_eq!(overlap_from_weights(&a, &b), 0.0);
    }

    #[test]
    fn test_overlap_divides_by_larger_total() {
        let a = weights(&[("cafe_morning_weekday", 2.0)]);
        let b = weights(&[("cafe_morning_weekday", 2.0), ("gym_evening_weekday", 2.0)]);
        // min = 2, max(total) = 4
        assert!((overlap_from_weights(&a, &b) - 0.5).abs() < 1e-12);
        assert!((overlap_from_weights(&b, &a) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_overlap_both_empty_is_zero() {
        assert_eq!(overlap_from_weights(&HashMap::new(), &HashMap::new()), 0.0);
    }

    #[test]
    fn test_feedback_defaults_to_neutral() {
        assert_eq!(feedback_term(&[]), NEUTRAL_FEEDBACK);
    }

    #[test]
    fn test_feedback_scaling() {
        assert_eq!(feedback_term(&[5]), 1.0);
        assert_eq!(feedback_term(&[1]), 0.0);
        assert!((feedback_term(&[5, 3]) - 0.75).abs() < 1e-12);
    }
}
