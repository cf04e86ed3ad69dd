// Bucket enums: the three axes of a behavioral bucket.
//
// Stored as lowercase strings in the database and used verbatim in the
// fingerprint keys ("cafe_morning_weekday"), so `as_str` is the canonical
// spelling and `parse` accepts exactly that spelling back.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local time-of-day bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// Bucket an hour of the local day (0-23).
    ///
    /// Half-open ranges: morning [5,12), afternoon [12,17), evening [17,21),
    /// everything else is night.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            17..=20 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    /// Bucket a timestamp by its own offset's wall clock.
    pub fn from_local(ts: &DateTime<FixedOffset>) -> Self {
        Self::from_hour(ts.hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Night => "night",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "morning" => Some(TimeOfDay::Morning),
            "afternoon" => Some(TimeOfDay::Afternoon),
            "evening" => Some(TimeOfDay::Evening),
            "night" => Some(TimeOfDay::Night),
            _ => None,
        }
    }
}

/// Weekday vs weekend, by local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayType {
    Weekday,
    Weekend,
}

impl DayType {
    pub fn from_weekday(day: Weekday) -> Self {
        match day {
            Weekday::Sat | Weekday::Sun => DayType::Weekend,
            _ => DayType::Weekday,
        }
    }

    pub fn from_local(ts: &DateTime<FixedOffset>) -> Self {
        Self::from_weekday(ts.weekday())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayType::Weekday => "weekday",
            DayType::Weekend => "weekend",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "weekday" => Some(DayType::Weekday),
            "weekend" => Some(DayType::Weekend),
            _ => None,
        }
    }
}

/// Semantic place category. `General` is the fallback for anything the
/// rule table can't place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceType {
    Cafe,
    Gym,
    Library,
    Bar,
    Restaurant,
    Park,
    Education,
    Shopping,
    Poi,
    Establishment,
    General,
}

impl PlaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceType::Cafe => "cafe",
            PlaceType::Gym => "gym",
            PlaceType::Library => "library",
            PlaceType::Bar => "bar",
            PlaceType::Restaurant => "restaurant",
            PlaceType::Park => "park",
            PlaceType::Education => "education",
            PlaceType::Shopping => "shopping",
            PlaceType::Poi => "poi",
            PlaceType::Establishment => "establishment",
            PlaceType::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "cafe" => PlaceType::Cafe,
            "gym" => PlaceType::Gym,
            "library" => PlaceType::Library,
            "bar" => PlaceType::Bar,
            "restaurant" => PlaceType::Restaurant,
            "park" => PlaceType::Park,
            "education" => PlaceType::Education,
            "shopping" => PlaceType::Shopping,
            "poi" => PlaceType::Poi,
            "establishment" => PlaceType::Establishment,
            "general" => PlaceType::General,
            _ => return None,
        })
    }
}

/// The full bucket triple. Its `key()` is the fingerprint map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub place_type: PlaceType,
    pub time_of_day: TimeOfDay,
    pub day_type: DayType,
}

impl BucketKey {
    pub fn new(place_type: PlaceType, time_of_day: TimeOfDay, day_type: DayType) -> Self {
        Self {
            place_type,
            time_of_day,
            day_type,
        }
    }

    /// `"<place_type>_<time_of_day>_<day_type>"`
    pub fn key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.place_type.as_str(),
            self.time_of_day.as_str(),
            self.day_type.as_str()
        )
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for DayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for PlaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}
