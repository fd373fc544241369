//! Idempotency key derivation.
//!
//! The key is the deduplication anchor of the whole pipeline: the unique
//! constraint on `Outbox."idemKey"` turns the outbox into an effective log of
//! intended sends and makes scheduler retries safe. The derivation must stay
//! deterministic and stable across versions.

use sha2::{Digest, Sha256};

/// Length of the hex-encoded key stored in `Outbox."idemKey"`.
pub const IDEM_KEY_LEN: usize = 32;

/// Attempt number baked into keys for normal step progression.
pub const FIRST_ATTEMPT: u32 = 0;

/// Derive the idempotency key for one intended send.
///
/// SHA-256 over the canonical `:`-joined encoding of
/// `(sequence_id, lead_id, step_number, attempt, suffix)`, truncated to 32
/// hex characters.
pub fn idem_key(
    sequence_id: &str,
    lead_id: &str,
    step_number: i32,
    attempt: u32,
    suffix: &str,
) -> String {
    let canonical = format!(
        "{}:{}:{}:{}:{}",
        sequence_id, lead_id, step_number, attempt, suffix
    );
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..IDEM_KEY_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        let a = idem_key("seq-1", "lead-1", 1, 0, "");
        let b = idem_key("seq-1", "lead-1", 1, 0, "");
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_shape() {
        let key = idem_key("seq-1", "lead-1", 1, 0, "");
        assert_eq!(key.len(), IDEM_KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, key.to_lowercase());
    }

    #[test]
    fn test_every_field_changes_the_key() {
        let base = idem_key("seq-1", "lead-1", 1, 0, "");
        assert_ne!(base, idem_key("seq-2", "lead-1", 1, 0, ""));
        assert_ne!(base, idem_key("seq-1", "lead-2", 1, 0, ""));
        assert_ne!(base, idem_key("seq-1", "lead-1", 2, 0, ""));
        assert_ne!(base, idem_key("seq-1", "lead-1", 1, 1, ""));
        assert_ne!(base, idem_key("seq-1", "lead-1", 1, 0, "manual"));
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        // Joining with ':' must not let adjacent fields collide.
        assert_ne!(
            idem_key("seq-1", "lead", 1, 0, ""),
            idem_key("seq-1:lead", "", 1, 0, "")
        );
    }
}
