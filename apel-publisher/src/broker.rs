#![doc = "Broker client: token exchange and message posting against the accounting message service."]
//
//! # Broker Integration (CLI <-> Core)
//!
//! This module wires the core [`Broker`] trait to the real upstream service.
//!
//! - A bearer token is obtained with `GET auth_url`, authenticating with the host
//!   certificate and key as TLS client identity. The response body is `{"token": "..."}`.
//! - Envelopes are posted as JSON to `{ams_url}{token}`.
//! - An optional `ca_path` adds a trusted root for both endpoints.

use apel_publisher_core::contract::{Broker, PublishPayload};
use apel_publisher_core::error::CollaboratorError;
use async_trait::async_trait;
use serde::Deserialize;
use std::fs;

use crate::load_config::AuthConfig;

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

pub struct AmsClient {
    client: reqwest::Client,
    auth_url: String,
    ams_url: String,
}

impl AmsClient {
    pub fn new(auth: &AuthConfig) -> Result<Self, CollaboratorError> {
        let mut pem = fs::read(&auth.client_cert).map_err(|e| {
            tracing::error!(error = ?e, path = %auth.client_cert.display(), "Failed to read client certificate");
            format!("cannot read client certificate {}: {e}", auth.client_cert.display())
        })?;
        let key = fs::read(&auth.client_key).map_err(|e| {
            tracing::error!(error = ?e, path = %auth.client_key.display(), "Failed to read client key");
            format!("cannot read client key {}: {e}", auth.client_key.display())
        })?;
        pem.push(b'\n');
        pem.extend_from_slice(&key);

        let mut builder = reqwest::Client::builder().identity(reqwest::Identity::from_pem(&pem)?);
        if let Some(ca_path) = &auth.ca_path {
            let ca = fs::read(ca_path)
                .map_err(|e| format!("cannot read CA certificate {}: {e}", ca_path.display()))?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&ca)?);
        }

        tracing::info!(auth_url = %auth.auth_url, "Initialised broker client");
        Ok(Self {
            client: builder.build()?,
            auth_url: auth.auth_url.clone(),
            ams_url: auth.ams_url.clone(),
        })
    }

    fn publish_url(&self, token: &str) -> String {
        format!("{}{}", self.ams_url, token)
    }
}

#[async_trait]
impl Broker for AmsClient {
    async fn fetch_token(&self) -> Result<String, CollaboratorError> {
        tracing::debug!(auth_url = %self.auth_url, "Requesting broker token");
        let response = self
            .client
            .get(&self.auth_url)
            .send()
            .await?
            .error_for_status()?;
        let body: TokenResponse = response.json().await?;
        Ok(body.token)
    }

    async fn send(&self, token: &str, payload: &PublishPayload) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .post(self.publish_url(token))
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, %body, "Broker rejected message");
            return Err(format!("broker responded with {status}: {body}").into());
        }
        tracing::info!(%status, "Broker accepted message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_appended_to_publish_url() {
        let client = AmsClient {
            client: reqwest::Client::new(),
            auth_url: "https://auth.example.org/token".to_string(),
            ams_url: "https://msg.example.org/v1/projects/accounting/topics/gLite-APEL:publish?key="
                .to_string(),
        };
        assert_eq!(
            client.publish_url("abc123"),
            "https://msg.example.org/v1/projects/accounting/topics/gLite-APEL:publish?key=abc123"
        );
    }

    #[test]
    fn token_response_is_parsed() {
        let body: TokenResponse = serde_json::from_str(r#"{"token": "abc123"}"#).unwrap();
        assert_eq!(body.token, "abc123");
    }
}
