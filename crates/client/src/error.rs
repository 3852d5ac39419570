// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by every backend-facing operation.
//!
//! Three buckets, three propagation policies: [`ApiError::Auth`] is terminal
//! for the current session and never retried automatically,
//! [`ApiError::Transient`] is retried by each component's own policy, and
//! [`ApiError::Protocol`] is retried like a transient failure but logged
//! distinctly so malformed backend responses stay visible.

use std::fmt;

/// Failure of an authenticated backend operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// HTTP 401/403: the credential is invalid or expired.
    Auth,
    /// Network failure, non-auth 4xx/5xx, or any other retryable condition.
    Transient(String),
    /// Response had an unexpected shape (e.g. 200 without token fields).
    Protocol(String),
}

impl ApiError {
    /// Classify an HTTP status that already failed `is_success()`.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Auth,
            other => Self::Transient(format!("HTTP {other}")),
        }
    }

    /// Wrap a transport-level failure (connect, timeout, body read).
    pub fn transport(err: reqwest::Error) -> Self {
        Self::Transient(format!("transport: {err}"))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => f.write_str("authorization failed"),
            Self::Transient(msg) => write!(f, "transient: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
