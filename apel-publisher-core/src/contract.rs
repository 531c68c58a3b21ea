//! # contract: interfaces to the outside world
//!
//! This module defines the data read from the metering service and the three
//! collaborator traits the publish pipeline drives:
//!
//! - [`RecordSource`]: fetches usage records stopped since a point in time.
//! - [`MessageSigner`]: produces a detached S/MIME signature over a message.
//! - [`Broker`]: exchanges a client certificate for a token and posts envelopes.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, so tests can drive the publish cycle
//!   without network access or key material.
//!
//! ## Error Handling
//! - Implementors return boxed errors; the pipeline wraps them into
//!   [`PublisherError::Transport`](crate::error::PublisherError::Transport) and
//!   retries on the next poll.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use mockall::automock;

use crate::error::CollaboratorError;

/// One unit of resource usage as delivered by the metering service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub record_id: String,
    /// Metadata values keyed by name; the first value of a key is the one used.
    #[serde(default)]
    pub meta: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub components: Vec<Component>,
    pub start_time: DateTime<Utc>,
    pub stop_time: DateTime<Utc>,
    /// Wall runtime in seconds. Derived from start and stop when the source omits it.
    #[serde(default)]
    pub runtime: Option<i64>,
}

impl RawRecord {
    pub fn runtime(&self) -> i64 {
        self.runtime
            .unwrap_or_else(|| (self.stop_time - self.start_time).num_seconds())
    }

    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// A named resource attached to a record, e.g. the cores a job ran on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub amount: i64,
    #[serde(default)]
    pub scores: Vec<Score>,
}

/// A named score of a component, e.g. a HEPSPEC benchmark factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub name: String,
    #[serde(alias = "factor")]
    pub value: f64,
}

/// Source of raw usage records (the metering service).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// All records whose stop time is at or after `since`.
    async fn get_records_stopped_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, CollaboratorError>;
}

/// Signs outgoing messages with the client certificate and key.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait MessageSigner: Send + Sync {
    /// Returns the S/MIME encoding of `message` with a detached SHA-256 signature.
    fn sign(&self, message: &str) -> Result<Vec<u8>, CollaboratorError>;
}

/// The upstream accounting broker.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Exchange the client certificate for a bearer token.
    async fn fetch_token(&self) -> Result<String, CollaboratorError>;

    /// Post one envelope using a token from [`Broker::fetch_token`].
    async fn send(&self, token: &str, payload: &PublishPayload) -> Result<(), CollaboratorError>;
}

/// JSON envelope accepted by the broker's publish endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishPayload {
    pub messages: Vec<PublishMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishMessage {
    pub attributes: MessageAttributes,
    /// Base64 of the signed message bytes.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAttributes {
    pub empaid: String,
}

impl PublishPayload {
    /// Wraps one signed message, stamping it with `YYYYMMDD/YYYYMMDDHHMMSS` of `now`.
    pub fn new(signed: &[u8], now: DateTime<Utc>) -> Self {
        let stamp = now.format("%Y%m%d%H%M%S").to_string();
        let empaid = format!("{}/{}", &stamp[..8], stamp);
        PublishPayload {
            messages: vec![PublishMessage {
                attributes: MessageAttributes { empaid },
                data: STANDARD.encode(signed),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn payload_carries_empaid_and_base64_data() {
        let now = Utc.with_ymd_and_hms(2023, 3, 7, 14, 5, 9).unwrap();
        let payload = PublishPayload::new(b"signed bytes", now);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json["messages"][0]["attributes"]["empaid"],
            "20230307/20230307140509"
        );
        let data = json["messages"][0]["data"].as_str().unwrap();
        assert_eq!(STANDARD.decode(data).unwrap(), b"signed bytes");
    }

    #[test]
    fn record_runtime_falls_back_to_stop_minus_start() {
        let record: RawRecord = serde_json::from_str(
            r#"{
                "record_id": "r1",
                "meta": {"site_id": ["site-A"], "user_id": ["alice"]},
                "components": [{"name": "Cores", "amount": 8, "scores": [{"name": "HEPSPEC", "factor": 10.0}]}],
                "start_time": "2023-01-01T00:00:00Z",
                "stop_time": "2023-01-01T00:00:55Z"
            }"#,
        )
        .unwrap();

        assert_eq!(record.runtime(), 55);
        assert_eq!(record.meta_value("site_id"), Some("site-A"));
        assert_eq!(record.meta_value("missing"), None);
        assert_eq!(record.components[0].scores[0].value, 10.0);
    }
}
