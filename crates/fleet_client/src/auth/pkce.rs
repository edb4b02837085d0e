//! PKCE verifier/challenge pairs and CSRF state tokens.
//!
//! Both draw from the OS random source. If it cannot produce bytes the
//! login cannot proceed, so the failure is reported as
//! [`Error::EntropyUnavailable`] rather than falling back to a weaker RNG.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub const PKCE_METHOD: &str = "S256";

/// 87 bytes encode to 116 base64url characters.
const VERIFIER_BYTES: usize = 87;
const STATE_BYTES: usize = 9;

#[derive(Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
    pub method: &'static str,
}

impl std::fmt::Debug for Pkce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkce")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .finish()
    }
}

impl Pkce {
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; VERIFIER_BYTES];
        fill_random(&mut bytes)?;
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = Self::challenge_for(&verifier);
        Ok(Pkce {
            verifier,
            challenge,
            method: PKCE_METHOD,
        })
    }

    pub fn challenge_for(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }

    pub fn verify(verifier: &str, challenge: &str) -> bool {
        Self::challenge_for(verifier) == challenge
    }
}

/// Random token binding one authorization request to its callback.
pub fn state() -> Result<String> {
    let mut bytes = [0u8; STATE_BYTES];
    fill_random(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng.try_fill_bytes(buf).map_err(Error::EntropyUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_sha256_of_verifier() {
        for _ in 0..32 {
            let pkce = Pkce::generate().expect("entropy");
            assert_eq!(pkce.verifier.len(), 116);
            assert_eq!(pkce.challenge, Pkce::challenge_for(&pkce.verifier));
            assert!(Pkce::verify(&pkce.verifier, &pkce.challenge));
            assert_eq!(pkce.method, "S256");
        }
    }

    #[test]
    fn verifier_is_url_safe() {
        let pkce = Pkce::generate().expect("entropy");
        assert!(pkce
            .verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn known_challenge_vector() {
        // RFC 7636 appendix B
        assert_eq!(
            Pkce::challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn state_is_twelve_chars_and_unique() {
        let a = state().expect("entropy");
        let b = state().expect("entropy");
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn debug_hides_verifier() {
        let pkce = Pkce::generate().expect("entropy");
        let rendered = format!("{pkce:?}");
        assert!(!rendered.contains(&pkce.verifier));
    }
}
