//! CRAM-MD5 challenge/response authentication
//!
//! The answering side offers a hex-encoded random challenge in its greeting
//! (`M_NUL OPT CRAM-MD5-<hex>`). Instead of sending the session password in
//! the clear, the caller answers `M_PWD CRAM-MD5-<hex>` where the hex digest
//! is HMAC-MD5 keyed by the password over the decoded challenge bytes. Both
//! sides use the same construction, so one helper builds our response and
//! validates the peer's.

use hmac::{Hmac, Mac};
use md5::Md5;
use rand::RngExt;

type HmacMd5 = Hmac<Md5>;

/// Number of random bytes behind a generated challenge.
const CHALLENGE_BYTES: usize = 16;

/// Per-session CRAM state: at most one active challenge.
///
/// The answering side generates and stores its own challenge; the
/// originating side stores the challenge the peer announced.
#[derive(Debug, Default)]
pub struct CramAuthenticator {
    challenge: Option<String>,
}

impl CramAuthenticator {
    pub fn new() -> Self {
        Self { challenge: None }
    }

    /// Generate and store a fresh random challenge, returned as lowercase hex.
    pub fn generate_challenge(&mut self) -> &str {
        let bytes: [u8; CHALLENGE_BYTES] = rand::rng().random();
        self.challenge = Some(hex::encode(bytes));
        self.challenge.as_deref().unwrap_or("")
    }

    /// Store the challenge announced by the peer.
    pub fn set_challenge(&mut self, challenge: &str) {
        self.challenge = Some(challenge.to_string());
    }

    /// The active challenge, if any.
    pub fn challenge(&self) -> Option<&str> {
        self.challenge.as_deref()
    }

    /// Validate a peer's hashed password against the stored challenge.
    /// False when no challenge is active.
    pub fn validate_password(&self, secret: &str, given_hashed_secret: &str) -> bool {
        match &self.challenge {
            Some(challenge) => validate_password(challenge, secret, given_hashed_secret),
            None => false,
        }
    }
}

/// HMAC-MD5 over the hex-decoded challenge, keyed by `secret`, as lowercase
/// hex. A challenge that is not valid hex is hashed as its literal bytes so
/// a malformed peer option degrades to a mismatch instead of a failure.
pub fn create_hashed_secret(challenge_hex: &str, secret: &str) -> String {
    let challenge = hex::decode(challenge_hex)
        .unwrap_or_else(|_| challenge_hex.as_bytes().to_vec());
    let Ok(mut mac) = HmacMd5::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(&challenge);
    hex::encode(mac.finalize().into_bytes())
}

/// Recompute the hash for (`challenge_hex`, `secret`) and compare it to
/// `given_hashed_secret` without short-circuiting on the first differing
/// byte. Case of the given hex is ignored; malformed input is a mismatch,
/// never an error.
pub fn validate_password(challenge_hex: &str, secret: &str, given_hashed_secret: &str) -> bool {
    let expected = create_hashed_secret(challenge_hex, secret);
    if expected.is_empty() {
        return false;
    }
    let given = given_hashed_secret.to_ascii_lowercase();
    eq_bytes_constant(expected.as_bytes(), given.as_bytes())
}

fn eq_bytes_constant(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
