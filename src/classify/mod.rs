// Visit classification: raw location samples into behavioral buckets.
//
// A bucket is the (place type, time of day, day type) triple. Time buckets
// come straight from the local wall clock; the place bucket comes from an
// external reverse-geocoding lookup mapped through an ordered rule table.

pub mod buckets;
pub mod geocoding;
pub mod rules;
pub mod traits;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use self::buckets::{BucketKey, DayType, PlaceType, TimeOfDay};
use self::traits::{PlaceHint, PlaceResolver};
use crate::error::EngineError;

/// A location sample after classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedVisit {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<FixedOffset>,
    pub place_type: PlaceType,
    pub place_name: Option<String>,
    pub time_of_day: TimeOfDay,
    pub day_type: DayType,
}

impl ClassifiedVisit {
    pub fn bucket(&self) -> BucketKey {
        BucketKey::new(self.place_type, self.time_of_day, self.day_type)
    }
}

/// Classify a sample whose place tags (if any) are already known.
///
/// Pure and total: every input yields a bucket.
pub fn classify(
    latitude: f64,
    longitude: f64,
    timestamp: DateTime<FixedOffset>,
    place_tags: &[String],
) -> ClassifiedVisit {
    ClassifiedVisit {
        latitude,
        longitude,
        timestamp,
        place_type: rules::place_type_for_tags(place_tags),
        place_name: None,
        time_of_day: TimeOfDay::from_local(&timestamp),
        day_type: DayType::from_local(&timestamp),
    }
}

/// Classify a sample, asking `resolver` for place tags under `timeout`.
///
/// A failed or slow lookup degrades to `general` and is only logged.
pub async fn classify_with_resolver(
    resolver: &dyn PlaceResolver,
    latitude: f64,
    longitude: f64,
    timestamp: DateTime<FixedOffset>,
    timeout: Duration,
) -> ClassifiedVisit {
    let hint = match tokio::time::timeout(timeout, resolver.resolve(latitude, longitude)).await {
        Ok(Ok(hint)) => hint,
        Ok(Err(e)) => degrade(EngineError::UpstreamUnavailable(format!("{e:#}"))),
        Err(_) => degrade(EngineError::UpstreamUnavailable(format!(
            "no answer within {}ms",
            timeout.as_millis()
        ))),
    };

    let mut visit = classify(latitude, longitude, timestamp, &hint.tags);
    visit.place_name = hint.name;
    debug!(
        place_type = %visit.place_type,
        time_of_day = %visit.time_of_day,
        day_type = %visit.day_type,
        "Classified visit"
    );
    visit
}

fn degrade(err: EngineError) -> PlaceHint {
    warn!(error = %err, "Place resolution unavailable, using general bucket");
    PlaceHint::default()
}
