// Presence and pairing: who is nearby, and what happens between two
// people over time.

pub mod geohash;
pub mod matcher;
pub mod pair;
pub mod presence;
