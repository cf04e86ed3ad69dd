// Place-type rule table.
//
// Geocoder results carry a bag of type tags ("cafe", "food",
// "point_of_interest", ...). Each rule names the tags that select its
// bucket; rules are tried top to bottom and the first hit wins, so the
// specific categories sit above the generic poi/establishment catch-alls.

use super::buckets::PlaceType;

/// A single classification rule: any of `tags` selects `place_type`.
pub struct PlaceRule {
    pub tags: &'static [&'static str],
    pub place_type: PlaceType,
}

/// Priority-ordered rules. Order matters.
pub const PLACE_RULES: &[PlaceRule] = &[
    PlaceRule {
        tags: &["cafe", "coffee_shop"],
        place_type: PlaceType::Cafe,
    },
    PlaceRule {
        tags: &["gym", "health"],
        place_type: PlaceType::Gym,
    },
    PlaceRule {
        tags: &["library", "book_store"],
        place_type: PlaceType::Library,
    },
    PlaceRule {
        tags: &["bar", "night_club"],
        place_type: PlaceType::Bar,
    },
    PlaceRule {
        tags: &["restaurant"],
        place_type: PlaceType::Restaurant,
    },
    PlaceRule {
        tags: &["park"],
        place_type: PlaceType::Park,
    },
    PlaceRule {
        tags: &["university", "school"],
        place_type: PlaceType::Education,
    },
    PlaceRule {
        tags: &["store", "shopping_mall"],
        place_type: PlaceType::Shopping,
    },
    PlaceRule {
        tags: &["point_of_interest"],
        place_type: PlaceType::Poi,
    },
    PlaceRule {
        tags: &["establishment"],
        place_type: PlaceType::Establishment,
    },
];

impl PlaceRule {
    fn matches(&self, tags: &[String]) -> bool {
        tags.iter()
            .any(|t| self.tags.contains(&t.trim().to_ascii_lowercase().as_str()))
    }
}

/// Map geocoder tags to a place bucket, falling back to `General`.
pub fn place_type_for_tags(tags: &[String]) -> PlaceType {
    PLACE_RULES
        .iter()
        .find(|rule| rule.matches(tags))
        .map(|rule| rule.place_type)
        .unwrap_or(PlaceType::General)
}
