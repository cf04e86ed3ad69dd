// Activity patterns: per-bucket visit statistics and the fingerprint
// built from them.

pub mod aggregator;
pub mod decay;
pub mod fingerprint;
