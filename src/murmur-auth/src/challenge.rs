//! Challenge/session pair for one handshake.

use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// One outstanding handshake. Never persisted; held in memory only for the
/// duration of the correlation window.
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    /// Opaque challenge echoed back by the callback.
    pub challenge: String,
    /// Opaque session id echoed back by the callback.
    pub session_id: String,
    /// When the handshake started.
    pub(crate) issued_at: Instant,
}

impl AuthChallenge {
    /// Generate a fresh, cryptographically random pair.
    pub fn generate() -> Self {
        Self {
            challenge: random_opaque(),
            session_id: random_opaque(),
            issued_at: Instant::now(),
        }
    }

    /// Key under which callbacks for this handshake are deduplicated.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.challenge, self.session_id)
    }
}

/// 32 random bytes, base64url encoded without padding (43 characters).
fn random_opaque() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_values_have_expected_length() {
        let challenge = AuthChallenge::generate();
        assert_eq!(challenge.challenge.len(), 43);
        assert_eq!(challenge.session_id.len(), 43);
        assert_ne!(challenge.challenge, challenge.session_id);
    }

    #[test]
    fn test_generated_values_are_unique() {
        let a = AuthChallenge::generate();
        let b = AuthChallenge::generate();
        assert_ne!(a.challenge, b.challenge);
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_values_are_url_safe() {
        let challenge = AuthChallenge::generate();
        for c in challenge.challenge.chars().chain(challenge.session_id.chars()) {
            assert!(
                c.is_ascii_alphanumeric() || c == '-' || c == '_',
                "unexpected character: {c}"
            );
        }
    }

    #[test]
    fn test_dedup_key_combines_both_values() {
        let challenge = AuthChallenge::generate();
        let key = challenge.dedup_key();
        assert!(key.contains(&challenge.challenge));
        assert!(key.contains(&challenge.session_id));
    }
}
