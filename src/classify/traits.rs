// Place resolver trait: the swap-ready abstraction over reverse geocoding.
//
// The default implementation calls Google's reverse geocoding API. Tests
// and offline runs use NoopResolver, which never knows anything and so
// sends every visit to the `general` bucket.

use anyhow::Result;
use async_trait::async_trait;

/// What a resolver knows about a coordinate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceHint {
    /// Semantic type tags, most specific result first
    pub tags: Vec<String>,
    /// Human-readable name of the place, when the service has one
    pub name: Option<String>,
}

/// Trait for turning coordinates into semantic place tags. Implementations
/// are async because every real provider is a network call.
#[async_trait]
pub trait PlaceResolver: Send + Sync {
    async fn resolve(&self, latitude: f64, longitude: f64) -> Result<PlaceHint>;
}

/// Resolver that always answers "nothing known".
pub struct NoopResolver;

#[async_trait]
impl PlaceResolver for NoopResolver {
    async fn resolve(&self, _latitude: f64, _longitude: f64) -> Result<PlaceHint> {
        Ok(PlaceHint::default())
    }
}
