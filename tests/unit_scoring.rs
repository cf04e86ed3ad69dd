// Unit tests for compatibility scoring and weight learning.

use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;

use kindred::db::models::CompatibilityWeights;
use kindred::patterns::decay::DecayPolicy;
use kindred::patterns::fingerprint::{ActivityFingerprint, BucketSummary};
use kindred::scoring::compatibility::combine;
use kindred::scoring::terms::{
    behavior_term, feedback_term, interest_term, rating_to_unit, shared_interests,
    NEUTRAL_FEEDBACK,
};
use kindred::scoring::weights::{FeedbackSignal, LearningSchedule, Term};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn fingerprint(buckets: &[(&str, f64)]) -> ActivityFingerprint {
    let last_visit = Utc.with_ymd_and_hms(2026, 10, 13, 8, 0, 0).unwrap();
    let buckets: BTreeMap<String, BucketSummary> = buckets
        .iter()
        .map(|(key, score)| {
            (
                key.to_string(),
                BucketSummary {
                    visit_count: score.ceil() as u32,
                    frequency_score: *score,
                    last_visit,
                },
            )
        })
        .collect();
    ActivityFingerprint { buckets }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// ============================================================
// Terms
// ============================================================

#[test]
fn interest_overlap_is_jaccard() {
    let a = strings(&["hiking", "coffee"]);
    let b = strings(&["coffee", "music"]);
    assert!(close(interest_term(&a, &b), 1.0 / 3.0));
    assert_eq!(shared_interests(&a, &b), strings(&["coffee"]));
}

#[test]
fn interest_term_is_symmetric() {
    let a = strings(&["chess", "go", "climbing"]);
    let b = strings(&["go"]);
    assert_eq!(interest_term(&a, &b), interest_term(&b, &a));
}

#[test]
fn duplicate_interests_count_once() {
    let a = strings(&["coffee", "Coffee", " coffee"]);
    let b = strings(&["coffee"]);
    assert!(close(interest_term(&a, &b), 1.0));
}

#[test]
fn identical_fingerprints_overlap_fully() {
    let fp = fingerprint(&[("cafe_morning_weekday", 3.0), ("gym_evening_weekday", 1.5)]);
    assert!(close(behavior_term(&fp, &fp), 1.0));
}

#[test]
fn empty_fingerprint_has_no_overlap() {
    let fp = fingerprint(&[("cafe_morning_weekday", 3.0)]);
    let empty = ActivityFingerprint::default();
    assert_eq!(behavior_term(&fp, &empty), 0.0);
    assert_eq!(behavior_term(&empty, &empty), 0.0);
}

#[test]
fn partial_fingerprint_overlap() {
    let a = fingerprint(&[("cafe_morning_weekday", 3.0), ("bar_night_weekend", 1.0)]);
    let b = fingerprint(&[("cafe_morning_weekday", 1.0), ("park_afternoon_weekend", 3.0)]);
    // shared min = 1, larger total = 4
    assert!(close(behavior_term(&a, &b), 0.25));
    assert!(close(behavior_term(&b, &a), 0.25));
}

#[test]
fn decayed_habits_weigh_less() {
    let decay = DecayPolicy::new(14.0);
    let last = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap();
    let fresh = decay.frequency_score(4, last, last);
    let stale = decay.frequency_score(4, last, last + chrono::Duration::days(14));
    assert!(close(fresh, 4.0));
    assert!(close(stale, 2.0));
}

#[test]
fn ratings_scale_to_unit_interval() {
    assert_eq!(rating_to_unit(1), 0.0);
    assert_eq!(rating_to_unit(3), 0.5);
    assert_eq!(rating_to_unit(5), 1.0);
    assert_eq!(feedback_term(&[]), NEUTRAL_FEEDBACK);
    assert!(close(feedback_term(&[4, 2]), 0.5));
}

// ============================================================
// Combining
// ============================================================

#[test]
fn default_weights_combine() {
    let w = CompatibilityWeights::default();
    // 0.4 * 1/3 + 0.4 * 0 + 0.2 * 0.5
    let score = combine(&w, 1.0 / 3.0, 0.0, 0.5);
    assert!(close(score, 0.4 / 3.0 + 0.1));
}

#[test]
fn combined_score_stays_in_range() {
    let w = CompatibilityWeights::default();
    assert!(close(combine(&w, 1.0, 1.0, 1.0), 1.0));
    assert_eq!(combine(&w, 0.0, 0.0, 0.0), 0.0);
    let s = combine(&w, f64::NAN, 0.5, 0.5);
    assert!((0.0..=1.0).contains(&s));
}

// ============================================================
// Weight learning
// ============================================================

#[test]
fn best_predictor_picks_smallest_error() {
    let signal = FeedbackSignal::from_rating(5, 0.2, 0.9, 0.5);
    assert_eq!(signal.best_predictor(), Term::Behavior);

    let signal = FeedbackSignal::from_rating(1, 0.2, 0.9, 0.5);
    assert_eq!(signal.best_predictor(), Term::Interest);
}

#[test]
fn first_update_moves_toward_best_term() {
    let w = CompatibilityWeights::default();
    let signal = FeedbackSignal::from_rating(5, 1.0, 0.0, 0.5);
    let next = w.apply_feedback(&signal, &LearningSchedule::default());

    // eta = 0.3 on the first data point
    assert!(close(next.interest_weight, 0.58));
    assert!(close(next.behavior_weight, 0.28));
    assert!(close(next.feedback_weight, 0.14));
    assert_eq!(next.data_points_count, 1);
    assert!(next.is_valid());
}

#[test]
fn steps_shrink_with_experience() {
    let schedule = LearningSchedule::default();
    assert!(schedule.step(0) > schedule.step(1));
    assert!(schedule.step(1) > schedule.step(10));
    assert!(schedule.step(1_000_000) >= 0.0);
}

#[test]
fn long_feedback_history_stays_on_simplex() {
    let schedule = LearningSchedule::new(1.0);
    let mut w = CompatibilityWeights::default();
    for i in 0..1_000u32 {
        let signal = match i % 3 {
            0 => FeedbackSignal::from_rating(5, 1.0, 0.0, 0.0),
            1 => FeedbackSignal::from_rating(1, 1.0, 0.0, 1.0),
            _ => FeedbackSignal::from_rating(3, 0.0, 0.0, 0.5),
        };
        w = w.apply_feedback(&signal, &schedule);
        assert!(w.is_valid(), "left the simplex at step {i}: {w:?}");
    }
    assert_eq!(w.data_points_count, 1_000);
}

#[test]
fn unlearned_weights_fall_back_to_defaults() {
    let stored = CompatibilityWeights {
        interest_weight: 0.1,
        behavior_weight: 0.1,
        feedback_weight: 0.8,
        data_points_count: 0,
    };
    assert_eq!(
        CompatibilityWeights::effective(Some(stored)),
        CompatibilityWeights::default()
    );
    assert_eq!(
        CompatibilityWeights::effective(None),
        CompatibilityWeights::default()
    );
}

#[test]
fn averaged_weights_are_valid() {
    let a = CompatibilityWeights {
        interest_weight: 0.7,
        behavior_weight: 0.2,
        feedback_weight: 0.1,
        data_points_count: 4,
    };
    let b = CompatibilityWeights::default();
    let avg = CompatibilityWeights::average(&a, &b);
    assert!(avg.is_valid());
    assert!(close(avg.interest_weight, 0.55));
}
