//! HTTP client for the AUDITOR metering service.

use apel_publisher_core::contract::{RawRecord, RecordSource};
use apel_publisher_core::error::CollaboratorError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

use crate::load_config::AuditorConfig;

pub struct AuditorClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuditorClient {
    pub fn new(config: &AuditorConfig) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        let base_url = format!("http://{}:{}", config.host, config.port);
        tracing::info!(%base_url, "Initialised AUDITOR client");
        Ok(Self { client, base_url })
    }

    fn stopped_since_url(&self, since: DateTime<Utc>) -> String {
        format!(
            "{}/get_stopped_since/{}",
            self.base_url,
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

#[async_trait]
impl RecordSource for AuditorClient {
    async fn get_records_stopped_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, CollaboratorError> {
        let url = self.stopped_since_url(since);
        tracing::debug!(%url, "Requesting records from AUDITOR");
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let records: Vec<RawRecord> = response.json().await?;
        tracing::info!(count = records.len(), since = %since, "Received records from AUDITOR");
        Ok(records)
    }
}
