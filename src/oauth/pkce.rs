//! Usage: PKCE verifier/challenge generation for the authorization code flow.

use crate::shared::error::AppResult;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

const VERIFIER_ENTROPY_BYTES: usize = 32;

/// One attempt's verifier and its S256 challenge. Never persisted.
#[derive(Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Draws from the OS random source; failure is fatal for the attempt.
pub fn generate() -> AppResult<PkcePair> {
    let mut random = [0u8; VERIFIER_ENTROPY_BYTES];
    OsRng
        .try_fill_bytes(&mut random)
        .map_err(|e| format!("OAUTH_PKCE: os random source unavailable: {e}"))?;

    let verifier = URL_SAFE_NO_PAD.encode(random);
    let challenge = code_challenge_s256(&verifier);
    Ok(PkcePair {
        verifier,
        challenge,
    })
}

pub fn code_challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_unreserved(ch: char) -> bool {
        ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'
    }

    #[test]
    fn generated_pair_is_url_safe_and_consistent() {
        for _ in 0..32 {
            let pair = generate().expect("pkce");
            assert!(pair.verifier.len() >= 43 && pair.verifier.len() <= 128);
            assert!(pair.verifier.chars().all(is_unreserved), "{}", pair.verifier);
            assert!(pair.challenge.chars().all(is_unreserved));
            assert_eq!(pair.challenge, code_challenge_s256(&pair.verifier));
        }
    }

    #[test]
    fn challenge_matches_rfc7636_vector() {
        assert_eq!(
            code_challenge_s256("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn pairs_are_not_reused() {
        let a = generate().expect("pkce");
        let b = generate().expect("pkce");
        assert_ne!(a.verifier, b.verifier);
    }

    #[test]
    fn debug_hides_verifier() {
        let pair = generate().expect("pkce");
        assert!(!format!("{pair:?}").contains(&pair.verifier));
    }
}
