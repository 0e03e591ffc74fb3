//! Webhook Signature Verification
//!
//! Authenticates a raw delivery against the shared signing secret before
//! anything else looks at the payload. The provider signs the canonical
//! string `"{timestamp}.{raw_body}"` with HMAC-SHA256 and sends the result
//! in a header of the form:
//!
//! ```text
//! t=1717000000,v1=5257a869e7ecebeda32affa62cdca3fa51cad7e77a0e56ff536d0ce8e108d8bd
//! ```
//!
//! Multiple `v1` entries may appear during secret rotation; any one match
//! accepts the delivery. Comparison is constant-time to prevent timing
//! attacks, and neither the secret nor the presented signature is ever
//! logged.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

use crate::webhook::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

/// Verifies provider signatures over raw webhook bodies.
///
/// Stateless apart from the secret and tolerance window; `verify` has no
/// side effects and can be called concurrently.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The secret must never leak through Debug output
        f.debug_struct("SignatureVerifier")
            .field("secret", &"[redacted]")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl SignatureVerifier {
    /// Create a verifier from the shared secret and replay tolerance window.
    pub fn new(secret: impl Into<Vec<u8>>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    /// Verify a raw body against its signature header.
    ///
    /// Checks run in order: header parse (`Malformed`), timestamp age
    /// (`Expired`), digest comparison (`Mismatch`).
    pub fn verify(&self, raw_body: &[u8], signature_header: &str) -> Result<(), SignatureError> {
        self.verify_at(raw_body, signature_header, Utc::now())
    }

    /// Verify against an explicit clock.
    ///
    /// The production path goes through [`verify`](Self::verify); tests use
    /// this to exercise the tolerance window deterministically.
    pub fn verify_at(
        &self,
        raw_body: &[u8],
        signature_header: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let (timestamp, candidates) = parse_header(signature_header)?;

        let age = now.timestamp() - timestamp;
        if age > self.tolerance.as_secs() as i64 {
            return Err(SignatureError::Expired(self.tolerance.as_secs()));
        }

        let expected = compute_digest(&self.secret, timestamp, raw_body);
        for candidate in &candidates {
            if constant_time_eq(candidate, &expected) {
                return Ok(());
            }
        }

        Err(SignatureError::Mismatch)
    }
}

/// Compute the hex digest the provider would attach for `(timestamp, body)`.
///
/// This is the provider-side half of the scheme. It is exposed so the
/// replay tooling and the test suites can construct valid headers.
pub fn sign_payload(secret: &[u8], timestamp: i64, raw_body: &[u8]) -> String {
    hex::encode(compute_digest(secret, timestamp, raw_body))
}

/// Build a complete signature header for `(timestamp, body)`.
pub fn signature_header(secret: &[u8], timestamp: i64, raw_body: &[u8]) -> String {
    format!("t={},v1={}", timestamp, sign_payload(secret, timestamp, raw_body))
}

fn compute_digest(secret: &[u8], timestamp: i64, raw_body: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    mac.finalize().into_bytes().to_vec()
}

/// Parse `t=<ts>,v1=<hex>[,v1=<hex>...]` into a timestamp and candidate
/// signatures. Entries with schemes other than `v1` are skipped so newer
/// scheme versions don't break older consumers.
fn parse_header(header: &str) -> Result<(i64, Vec<Vec<u8>>), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("t=") {
            let parsed = value.parse::<i64>().map_err(|_| SignatureError::Malformed)?;
            timestamp = Some(parsed);
        } else if let Some(value) = part.strip_prefix("v1=") {
            match hex::decode(value) {
                Ok(bytes) => candidates.push(bytes),
                Err(_) => return Err(SignatureError::Malformed),
            }
        }
    }

    match (timestamp, candidates.is_empty()) {
        (Some(ts), false) => Ok((ts, candidates)),
        _ => Err(SignatureError::Malformed),
    }
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
