// Pair identity: one stable id per unordered pair of users, plus the two
// short codes people use to find each other in person.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Emoji the shared code is drawn from.
const EMOJI: [&str; 32] = [
    "🌵", "🐙", "🍋", "🚲", "🎈", "🦊", "🌙", "🍄", "🎧", "🐢", "🌻", "🍩", "🚀", "🐝", "🎲",
    "🌈", "🦉", "🍉", "⛵", "🎸", "🐳", "🌶", "🍪", "🛼", "🦜", "🌊", "🍒", "🪁", "🐞", "🎨",
    "🧩", "🌋",
];

/// Meet codes avoid 0/O and 1/I/L.
const MEET_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub const MEET_CODE_LEN: usize = 6;

/// The two ids in canonical (lexicographic) order.
pub fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn pair_digest(a: &str, b: &str) -> [u8; 32] {
    let (lo, hi) = ordered(a, b);
    let mut hasher = Sha256::new();
    hasher.update(lo.as_bytes());
    hasher.update(b":");
    hasher.update(hi.as_bytes());
    hasher.finalize().into()
}

/// First 32 hex characters of SHA-256("{lo}:{hi}").
pub fn pair_id(a: &str, b: &str) -> String {
    let digest = pair_digest(a, b);
    hex::encode(&digest[..16])
}

/// Three emoji derived from the pair hash. Same pair, same code.
pub fn shared_emoji_code(a: &str, b: &str) -> String {
    let digest = pair_digest(a, b);
    // Bytes past the ones pair_id exposes
    digest[16..19]
        .iter()
        .map(|byte| EMOJI[*byte as usize % EMOJI.len()])
        .collect()
}

/// A fresh random code for meeting up.
pub fn meet_code() -> String {
    let mut rng = rand::rng();
    (0..MEET_CODE_LEN)
        .map(|_| MEET_CODE_ALPHABET[rng.random_range(0..MEET_CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_id_is_order_independent() {
        assert_eq!(pair_id("alice", "bob"), pair_id("bob", "alice"));
        assert_ne!(pair_id("alice", "bob"), pair_id("alice", "carol"));
    }

    #[test]
    fn test_pair_id_shape() {
        let id = pair_id("alice", "bob");
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_pair_id_matches_sha256_of_sorted_ids() {
        let full = hex::encode(Sha256::digest(b"alice:bob"));
        assert_eq!(pair_id("bob", "alice"), &full[..32]);
    }

    #[test]
    fn test_separator_prevents_collisions() {
        assert_ne!(pair_id("ab", "c"), pair_id("a", "bc"));
    }

    #[test]
    fn test_emoji_code_is_stable_and_three_long() {
        let code = shared_emoji_code("alice", "bob");
        assert_eq!(code, shared_emoji_code("bob", "alice"));
        assert_eq!(code.chars().count(), 3);
    }

    #[test]
    fn test_meet_code_alphabet() {
        for _ in 0..50 {
            let code = meet_code();
            assert_eq!(code.len(), MEET_CODE_LEN);
            assert!(code.bytes().all(|b| MEET_CODE_ALPHABET.contains(&b)));
        }
    }
}
