//! PKCE code generation: a cryptographically random verifier and its
//! S256 challenge, plus a random state value for the authorize request.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub struct PkceCodes {
    pub code_verifier: String,
    pub code_challenge: String,
}

/// 32 random bytes base64url-encoded yield a 43-character verifier, within
/// the RFC 7636 43-128 char range.
pub fn generate_pkce() -> PkceCodes {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let code_verifier = URL_SAFE_NO_PAD.encode(bytes);
    let digest = Sha256::digest(code_verifier.as_bytes());
    let code_challenge = URL_SAFE_NO_PAD.encode(digest);
    PkceCodes {
        code_verifier,
        code_challenge,
    }
}

pub fn generate_state() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_matches_sha256_of_verifier() {
        let codes = generate_pkce();
        let digest = Sha256::digest(codes.code_verifier.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(digest);
        assert_eq!(codes.code_challenge, expected);
    }

    #[test]
    fn verifier_length_within_rfc_range() {
        let codes = generate_pkce();
        assert!(codes.code_verifier.len() >= 43 && codes.code_verifier.len() <= 128);
    }
}
