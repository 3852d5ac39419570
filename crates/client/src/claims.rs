// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expiry extraction from a JWT-shaped access token.
//!
//! Decodes the claim segment without verifying the signature. This exists
//! purely so the refresh scheduler can compute a renewal deadline and is
//! never used for a trust decision.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

/// Read the `exp` claim (epoch seconds) from an access token.
///
/// Returns `None` on any malformed input: too few segments, invalid
/// base64url, invalid UTF-8, non-JSON claims, or a missing/non-numeric
/// `exp`. Padding in the claim segment is tolerated.
pub fn read_expiry(access_token: &str) -> Option<i64> {
    let mut segments = access_token.split('.');
    let _header = segments.next()?;
    let claims_segment = segments.next()?;

    let decoded = URL_SAFE_NO_PAD
        .decode(claims_segment.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("exp")?.as_i64()
}

#[cfg(test)]
#[path = "claims_tests.rs"]
mod tests;
