// Compatibility scoring: three terms, a per-user weight vector, and the
// feedback loop that tunes it.

pub mod compatibility;
pub mod terms;
pub mod weights;
