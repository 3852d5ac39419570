// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reversible token obfuscation for local persistence.
//!
//! Positional XOR with a small repeating mask, then base64. This keeps raw
//! credentials out of casual storage inspection and nothing more: the
//! encoding is reversible without a secret and is not a security boundary.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Mask period for the positional XOR.
const MASK_PERIOD: usize = 7;
/// Mask offset added to each position before XOR.
const MASK_OFFSET: u8 = 13;

fn mask_byte(index: usize) -> u8 {
    (index % MASK_PERIOD) as u8 ^ MASK_OFFSET
}

/// Encode a raw token into its storage-safe representation.
pub fn encode(raw: &str) -> String {
    let masked: Vec<u8> =
        raw.bytes().enumerate().map(|(i, b)| b ^ mask_byte(i)).collect();
    STANDARD.encode(masked)
}

/// Decode a stored representation back into the raw token.
///
/// Returns an empty string on any malformed input (bad base64, invalid
/// UTF-8 after unmasking). Callers treat `""` as "no usable value" and fall
/// back to an unauthenticated state.
pub fn decode(encoded: &str) -> String {
    let Ok(masked) = STANDARD.decode(encoded) else {
        return String::new();
    };
    let bytes: Vec<u8> =
        masked.iter().enumerate().map(|(i, b)| b ^ mask_byte(i)).collect();
    String::from_utf8(bytes).unwrap_or_default()
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
