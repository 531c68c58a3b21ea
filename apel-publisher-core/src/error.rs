//! Error taxonomy for the publish pipeline.
//!
//! Only two kinds of failure end the process: a [`MismatchError`] (the deployed
//! configuration cannot attribute the data correctly) and an impossible republish
//! period. Everything else aborts the current cycle and is retried on the next poll.

use thiserror::Error;

/// Boxed error returned by external collaborators (metering client, signer, broker).
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Failures of the persistent watermark store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("watermark row is missing from {0}")]
    MissingRow(String),

    #[error("watermark field {field} holds an invalid value: {value}")]
    Malformed { field: &'static str, value: String },
}

/// The configuration does not match the vocabulary of the data source.
#[derive(Debug, Error, PartialEq)]
pub enum MismatchError {
    #[error("no site name mapping defined for site {site_id}")]
    UnknownSite { site_id: String },

    #[error("user {user_id} is not matched by any VO mapping pattern")]
    UnmatchedVo { user_id: String },

    #[error("record {record_id} has no metadata value for key {key}")]
    MissingMetadata { record_id: String, key: String },

    #[error("record {record_id} has no component named {component}")]
    MissingComponent { record_id: String, component: String },

    #[error("record {record_id}: component {component} has no score named {score}")]
    MissingScore {
        record_id: String,
        component: String,
        score: String,
    },
}

/// Any error surfaced by a publish cycle or a republish run.
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("watermark store fault: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration mismatch: {0}")]
    Mismatch(#[from] MismatchError),

    #[error("{operation} failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: CollaboratorError,
    },

    #[error("invalid republish period {year}-{month}")]
    InvalidPeriod { year: i32, month: u32 },
}

impl PublisherError {
    pub fn transport(operation: &'static str, source: CollaboratorError) -> Self {
        PublisherError::Transport { operation, source }
    }

    /// Whether the error must terminate the process instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PublisherError::Mismatch(_) | PublisherError::InvalidPeriod { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_mismatch_and_period_errors_are_fatal() {
        let mismatch = PublisherError::from(MismatchError::UnmatchedVo {
            user_id: "alice".into(),
        });
        assert!(mismatch.is_fatal());
        assert!(PublisherError::InvalidPeriod { year: 2023, month: 13 }.is_fatal());

        let storage = PublisherError::from(StorageError::MissingRow("times".into()));
        assert!(!storage.is_fatal());

        let transport = PublisherError::transport("send", "connection refused".into());
        assert!(!transport.is_fatal());
        assert_eq!(transport.to_string(), "send failed: connection refused");
    }
}
