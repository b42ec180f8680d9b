//! Timestamp collaborators.
//!
//! No network timestamp authority is bundled. [`LocalClockAuthority`] issues
//! tokens from the local clock, binding the signature value with SHA-256.

use chrono::Utc;
use sha2::{Digest, Sha256};

use super::types::{TimestampAuthority, TimestampCheck, TimestampToken};
use crate::error::Result;

/// Authority name written into tokens by [`LocalClockAuthority`].
pub const LOCAL_CLOCK_AUTHORITY: &str = "local-clock";

/// Tokens asserting the local system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClockAuthority;

impl LocalClockAuthority {
    /// Whether `token` was issued by this authority for `signature`.
    pub fn verify_token(token: &TimestampToken, signature: &[u8]) -> bool {
        token.authority == LOCAL_CLOCK_AUTHORITY
            && token.token == Sha256::digest(signature).to_vec()
    }
}

/// Classify the token carried with `signature`.
pub fn check_token(token: Option<&TimestampToken>, signature: &[u8]) -> TimestampCheck {
    match token {
        None => TimestampCheck::Absent,
        Some(token) if token.authority != LOCAL_CLOCK_AUTHORITY => TimestampCheck::Unverified,
        Some(token) if LocalClockAuthority::verify_token(token, signature) => TimestampCheck::Bound,
        Some(_) => TimestampCheck::Unbound,
    }
}

impl TimestampAuthority for LocalClockAuthority {
    fn request_token(&self, signature: &[u8]) -> Result<TimestampToken> {
        Ok(TimestampToken {
            authority: LOCAL_CLOCK_AUTHORITY.to_string(),
            issued_at: Utc::now().timestamp(),
            token: Sha256::digest(signature).to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_clock_token() {
        let token = LocalClockAuthority.request_token(b"signature").unwrap();
        assert_eq!(token.authority, "local-clock");
        assert_eq!(token.token.len(), 32);
        assert!(LocalClockAuthority::verify_token(&token, b"signature"));
        assert!(!LocalClockAuthority::verify_token(&token, b"other"));
    }

    #[test]
    fn test_check_token() {
        let token = LocalClockAuthority.request_token(b"signature").unwrap();
        assert_eq!(check_token(None, b"signature"), TimestampCheck::Absent);
        assert_eq!(check_token(Some(&token), b"signature"), TimestampCheck::Bound);
        assert_eq!(check_token(Some(&token), b"other"), TimestampCheck::Unbound);

        let foreign = TimestampToken {
            authority: "tsa.example".to_string(),
            ..token
        };
        assert_eq!(check_token(Some(&foreign), b"signature"), TimestampCheck::Unverified);
    }
}
