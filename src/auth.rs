// Caller identity: turning a bearer token into a user id.
//
// Token format: {user_id}.{issued_at_secs}.{hmac_hex}
//
// The HMAC-SHA256 covers "{user_id}.{issued_at_secs}" and is keyed with
// KINDRED_TOKEN_SECRET. Tokens are stateless and expire after the TTL.
// User ids may themselves contain dots, so parsing splits from the right.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{EngineError, EngineResult};

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime: 30 days.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 30 * 86_400;

/// Resolves a bearer credential to the caller's user id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Unauthorized` when the credential is missing, malformed, forged or expired.
    async fn resolve(&self, bearer: &str) -> EngineResult<String>;
}

/// Stateless HMAC-signed bearer tokens.
pub struct SignedTokenIdentity {
    secret: Vec<u8>,
    ttl_secs: u64,
}

impl SignedTokenIdentity {
    pub fn new(secret: &str, ttl_secs: u64) -> Result<Self> {
        if secret.is_empty() {
            bail!("Token secret must not be empty. Set KINDRED_TOKEN_SECRET.");
        }
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
            ttl_secs,
        })
    }

    /// Issue a token for `user_id`, valid from now.
    pub fn issue(&self, user_id: &str) -> Result<String> {
        self.issue_at(user_id, unix_now())
    }

    /// Issue a token as if it had been created at `issued_at` (unix seconds).
    pub fn issue_at(&self, user_id: &str, issued_at: u64) -> Result<String> {
        if user_id.is_empty() {
            bail!("Cannot issue a token for an empty user id");
        }
        let payload = format!("{user_id}.{issued_at}");
        let sig = self.sign(&payload)?;
        Ok(format!("{payload}.{sig}"))
    }

    /// Check a token at time `now`. Returns the user id or why it was refused.
    pub fn verify_at(&self, token: &str, now: u64) -> std::result::Result<String, &'static str> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(provided_sig), Some(issued_str), Some(user_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err("malformed token");
        };
        if user_id.is_empty() {
            return Err("malformed token");
        }

        let payload = format!("{user_id}.{issued_str}");
        let expected_sig = self.sign(&payload).map_err(|_| "signing failed")?;
        if !constant_time_eq(provided_sig, &expected_sig) {
            return Err("bad signature");
        }

        let Ok(issued_at) = issued_str.parse::<u64>() else {
            return Err("malformed token");
        };
        if now.saturating_sub(issued_at) >= self.ttl_secs {
            return Err("token expired");
        }
        Ok(user_id.to_string())
    }

    fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| anyhow!("Invalid token secret: {e}"))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl IdentityProvider for SignedTokenIdentity {
    async fn resolve(&self, bearer: &str) -> EngineResult<String> {
        let token = bearer.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        if token.is_empty() {
            return Err(EngineError::Unauthorized("missing credential".into()));
        }
        self.verify_at(token, unix_now())
            .map_err(|reason| EngineError::Unauthorized(reason.into()))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> SignedTokenIdentity {
        SignedTokenIdentity::new("test_secret_32_bytes_long_enough!", DEFAULT_TOKEN_TTL_SECS)
            .unwrap()
    }

    #[tokio::test]
    async fn test_token_roundtrip() {
        let id = identity();
        let token = id.issue("alice").unwrap();
        assert_eq!(id.resolve(&token).await.unwrap(), "alice");
        assert_eq!(id.resolve(&format!("Bearer {token}")).await.unwrap(), "alice");
    }

    #[test]
    fn test_user_id_with_dots() {
        let id = identity();
        let token = id.issue_at("alice.example.com", 1_000).unwrap();
        assert_eq!(id.verify_at(&token, 1_001).unwrap(), "alice.example.com");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = identity().issue_at("alice", 1_000).unwrap();
        let other = SignedTokenIdentity::new("another_secret", DEFAULT_TOKEN_TTL_SECS).unwrap();
        assert_eq!(other.verify_at(&token, 1_001), Err("bad signature"));
    }

    #[test]
    fn test_forged_user_rejected() {
        let id = identity();
        let token = id.issue_at("alice", 1_000).unwrap();
        let forged = token.replacen("alice", "mallory", 1);
        assert!(id.verify_at(&forged, 1_001).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let id = SignedTokenIdentity::new("secret", 60).unwrap();
        let token = id.issue_at("alice", 1_000).unwrap();
        assert!(id.verify_at(&token, 1_059).is_ok());
        assert_eq!(id.verify_at(&token, 1_060), Err("token expired"));
    }

    #[tokio::test]
    async fn test_malformed_tokens_unauthorized() {
        let id = identity();
        for bad in ["", "   ", "onlyone", "two.parts", ".1000.abcd"] {
            let err = id.resolve(bad).await.unwrap_err();
            assert!(matches!(err, EngineError::Unauthorized(_)), "{bad:?}");
        }
    }

    #[test]
    fn test_empty_secret_refused() {
        assert!(SignedTokenIdentity::new("", 60).is_err());
    }
}
