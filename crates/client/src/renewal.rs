// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token exchange and renewal against the identity provider.
//!
//! One network round trip per call, no self-retry: retry policy belongs to
//! the callers (the refresh scheduler and the retry coordinator each apply
//! their own). These requests never route through the retry coordinator:
//! intercepting the renewal endpoint with renewal-on-401 would self-loop.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;
use crate::pkce;
use crate::session::CredentialPair;

/// Seam for the renewal exchange, so coordination logic can be driven by a
/// test double instead of a live token endpoint.
#[async_trait]
pub trait RenewClient: Send + Sync {
    /// Trade the refresh credential for a fresh pair.
    async fn renew(&self, refresh_token: &str) -> Result<CredentialPair, ApiError>;
}

/// Identity-provider endpoints and client identity.
#[derive(Debug, Clone)]
pub struct TokenEndpoints {
    pub token_url: String,
    pub authorize_url: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub scope: String,
}

/// Token response from the provider. Fields are optional so a 200 with a
/// malformed body maps to [`ApiError::Protocol`] instead of a parse failure.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// HTTP implementation of the exchange/renewal operations.
pub struct Renewer {
    http: reqwest::Client,
    endpoints: TokenEndpoints,
}

impl Renewer {
    pub fn new(endpoints: TokenEndpoints) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http, endpoints }
    }

    /// Build the authorization URL the user opens in a browser.
    pub fn authorize_url(&self, code_challenge: &str, state: &str) -> String {
        pkce::build_auth_url(
            &self.endpoints.authorize_url,
            &self.endpoints.client_id,
            &self.endpoints.redirect_uri,
            &self.endpoints.scope,
            code_challenge,
            state,
        )
    }

    /// Exchange an authorization code for the initial credential pair.
    pub async fn exchange(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<CredentialPair, ApiError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", &self.endpoints.client_id),
            ("code", code),
            ("redirect_uri", &self.endpoints.redirect_uri),
            ("code_verifier", code_verifier),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<CredentialPair, ApiError> {
        let resp = self
            .http
            .post(&self.endpoints.token_url)
            .form(form)
            .send()
            .await
            .map_err(ApiError::transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(%status, "token request rejected: {body}");
            return Err(ApiError::from_status(status));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Protocol(format!("token response body: {e}")))?;

        match (token.access_token, token.refresh_token) {
            (Some(access_token), Some(refresh_token))
                if !access_token.is_empty() && !refresh_token.is_empty() =>
            {
                Ok(CredentialPair { access_token, refresh_token })
            }
            _ => Err(ApiError::Protocol("token response missing token fields".to_owned())),
        }
    }
}

#[async_trait]
impl RenewClient for Renewer {
    async fn renew(&self, refresh_token: &str) -> Result<CredentialPair, ApiError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.endpoints.client_id),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

#[cfg(test)]
#[path = "renewal_tests.rs"]
mod tests;
