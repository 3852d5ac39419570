// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated backend surface: installation listing and launch tokens.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;
use crate::installations::{InstallationRecord, InstallationsApi};
use crate::retry::RetryCoordinator;

#[derive(Debug, Deserialize)]
struct LaunchTokenResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Bare HTTP client for the launcher backend. Callers supply the access
/// token; session handling lives in the retry coordinator.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http, base_url: base_url.into() }
    }

    /// List the installations the token's user may launch.
    pub async fn list_installations(
        &self,
        access_token: &str,
    ) -> Result<Vec<InstallationRecord>, ApiError> {
        let resp = self
            .http
            .get(format!("{}/installations", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ApiError::transport)?;

        let status = resp.status();
        if !status.is_success() {
            debug!(%status, "installations request rejected");
            return Err(ApiError::from_status(status));
        }

        resp.json()
            .await
            .map_err(|e| ApiError::Protocol(format!("installations body: {e}")))
    }

    /// Fetch a one-time launch token for an installation.
    pub async fn launch_token(
        &self,
        access_token: &str,
        installation_id: &str,
    ) -> Result<String, ApiError> {
        let resp = self
            .http
            .post(format!("{}/installations/{installation_id}/launch-token", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ApiError::transport)?;

        let status = resp.status();
        if !status.is_success() {
            debug!(%status, installation_id, "launch token request rejected");
            return Err(ApiError::from_status(status));
        }

        let body: LaunchTokenResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Protocol(format!("launch token body: {e}")))?;

        match body.token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(ApiError::Protocol("launch token response missing token".to_owned())),
        }
    }
}

/// Installation source that routes fetches through the retry coordinator,
/// so a 401 mid-fetch renews and replays like any other authenticated call.
pub struct AuthorizedInstallations {
    coordinator: Arc<RetryCoordinator>,
    api: Arc<ApiClient>,
}

impl AuthorizedInstallations {
    pub fn new(coordinator: Arc<RetryCoordinator>, api: Arc<ApiClient>) -> Self {
        Self { coordinator, api }
    }
}

#[async_trait]
impl InstallationsApi for AuthorizedInstallations {
    async fn fetch_installations(&self) -> Result<Vec<InstallationRecord>, ApiError> {
        let api = Arc::clone(&self.api);
        self.coordinator
            .execute(move |access| {
                let api = Arc::clone(&api);
                async move { api.list_installations(&access).await }
            })
            .await
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
