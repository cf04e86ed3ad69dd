use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};

use crate::auth::DEFAULT_TOKEN_TTL_SECS;
use crate::classify::geocoding::DEFAULT_GEOCODE_URL;
use crate::engine::EnginePolicy;
use crate::matching::geohash::MAX_PRECISION;
use crate::patterns::decay::DecayPolicy;
use crate::scoring::weights::LearningSchedule;

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    /// HMAC key for bearer tokens (KINDRED_TOKEN_SECRET)
    pub token_secret: String,
    pub token_ttl_secs: u64,
    /// Reverse geocoding key. Empty means every visit lands in `general`.
    pub google_maps_api_key: String,
    pub geocode_url: String,
    pub place_timeout_ms: u64,
    pub half_life_days: f64,
    pub learning_rate: f64,
    pub geohash_precision: usize,
    pub presence_freshness_secs: i64,
    pub match_threshold: f64,
    pub max_retries: u32,
}

/// Read `name`, falling back to `default` when unset. A set but unparsable
/// value is an error rather than a silent default.
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Invalid value for {name}: {raw:?}")),
        _ => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Only the token secret has no default, and only commands that touch
    /// tokens need it.
    pub fn load() -> Result<Self> {
        let defaults = EnginePolicy::default();

        let config = Self {
            db_path: env::var("KINDRED_DB_PATH").unwrap_or_else(|_| "./kindred.db".to_string()),
            token_secret: env::var("KINDRED_TOKEN_SECRET").unwrap_or_default(),
            token_ttl_secs: parse_var("KINDRED_TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS)?,
            google_maps_api_key: env::var("GOOGLE_MAPS_API_KEY").unwrap_or_default(),
            geocode_url: env::var("KINDRED_GEOCODE_URL")
                .unwrap_or_else(|_| DEFAULT_GEOCODE_URL.to_string()),
            place_timeout_ms: parse_var(
                "KINDRED_PLACE_TIMEOUT_MS",
                defaults.place_timeout.as_millis() as u64,
            )?,
            half_life_days: parse_var("KINDRED_HALF_LIFE_DAYS", defaults.decay.half_life_days)?,
            learning_rate: parse_var("KINDRED_LEARNING_RATE", defaults.learning.learning_rate)?,
            geohash_precision: parse_var("KINDRED_GEOHASH_PRECISION", defaults.geohash_precision)?,
            presence_freshness_secs: parse_var(
                "KINDRED_PRESENCE_FRESHNESS_SECS",
                defaults.presence_freshness.num_seconds(),
            )?,
            match_threshold: parse_var("KINDRED_MATCH_THRESHOLD", defaults.match_threshold)?,
            max_retries: parse_var("KINDRED_MAX_RETRIES", defaults.max_retries)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.half_life_days > 0.0 && self.half_life_days.is_finite()) {
            anyhow::bail!("KINDRED_HALF_LIFE_DAYS must be a positive number of days");
        }
        if !(0.0..=1.0).contains(&self.learning_rate) {
            anyhow::bail!("KINDRED_LEARNING_RATE must be between 0 and 1");
        }
        if !(1..=MAX_PRECISION).contains(&self.geohash_precision) {
            anyhow::bail!("KINDRED_GEOHASH_PRECISION must be between 1 and {MAX_PRECISION}");
        }
        if self.presence_freshness_secs <= 0 {
            anyhow::bail!("KINDRED_PRESENCE_FRESHNESS_SECS must be positive");
        }
        if !(0.0..=1.0).contains(&self.match_threshold) {
            anyhow::bail!("KINDRED_MATCH_THRESHOLD must be between 0 and 1");
        }
        if self.max_retries == 0 {
            anyhow::bail!("KINDRED_MAX_RETRIES must be at least 1");
        }
        Ok(())
    }

    /// Check that a token secret is configured.
    /// Call this before any operation that issues or checks bearer tokens.
    pub fn require_token_secret(&self) -> Result<()> {
        if self.token_secret.is_empty() {
            anyhow::bail!(
                "KINDRED_TOKEN_SECRET not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }

    /// The engine tunables this configuration describes.
    pub fn policy(&self) -> EnginePolicy {
        EnginePolicy {
            decay: DecayPolicy::new(self.half_life_days),
            learning: LearningSchedule::new(self.learning_rate),
            geohash_precision: self.geohash_precision,
            presence_freshness: chrono::Duration::seconds(self.presence_freshness_secs),
            match_threshold: self.match_threshold,
            max_retries: self.max_retries,
            place_timeout: StdDuration::from_millis(self.place_timeout_ms),
        }
    }
}
