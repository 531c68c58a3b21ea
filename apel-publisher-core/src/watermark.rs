//! Durable record of how far processing and publishing have progressed.
//!
//! The store is a single-row sqlite table:
//!
//! ```text
//! times(last_end_time INTEGER NOT NULL, last_report_time TIMESTAMP NOT NULL)
//! ```
//!
//! `last_end_time` is the stop time (epoch seconds) of the newest record that has been
//! published, `last_report_time` the wall-clock time of the last successful publish.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::StorageError;

pub struct WatermarkStore {
    conn: Connection,
    path: PathBuf,
}

impl WatermarkStore {
    /// Opens the store at `path`, creating and seeding it when it holds no watermark yet.
    ///
    /// A new store starts with `last_end_time = publish_since` and a report time at the
    /// epoch. A seeded store is opened as-is and `publish_since` is ignored. Schema and
    /// seed row are written in one transaction, so an interrupted creation is redone on
    /// the next open.
    pub fn open(path: impl AsRef<Path>, publish_since: DateTime<Utc>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "Opening watermark store");
        let mut conn = Connection::open(&path)?;
        let tx = conn.transaction()?;
        tx.execute(
            "CREATE TABLE IF NOT EXISTS times (
                last_end_time INTEGER NOT NULL,
                last_report_time TIMESTAMP NOT NULL
            )",
            [],
        )?;
        let seeded = tx.execute(
            "INSERT INTO times (last_end_time, last_report_time)
             SELECT ?1, ?2 WHERE NOT EXISTS (SELECT 1 FROM times)",
            params![publish_since.timestamp(), DateTime::<Utc>::UNIX_EPOCH],
        )?;
        tx.commit()?;
        if seeded > 0 {
            info!(
                path = %path.display(),
                publish_since = %publish_since,
                "Created watermark store"
            );
        }
        Ok(Self { conn, path })
    }

    /// Stop time of the newest record already published; the next fetch starts here.
    pub fn processed_watermark(&self) -> Result<DateTime<Utc>, StorageError> {
        let secs: i64 = self
            .conn
            .query_row("SELECT last_end_time FROM times", [], |row| row.get(0))
            .optional()?
            .ok_or_else(|| self.missing_row())?;
        Utc.timestamp_opt(secs, 0)
            .single()
            .ok_or(StorageError::Malformed {
                field: "last_end_time",
                value: secs.to_string(),
            })
    }

    /// Wall-clock time of the last successful publish.
    pub fn published_watermark(&self) -> Result<DateTime<Utc>, StorageError> {
        self.conn
            .query_row("SELECT last_report_time FROM times", [], |row| row.get(0))
            .optional()?
            .ok_or_else(|| self.missing_row())
    }

    /// Updates both watermarks in one statement.
    pub fn advance(
        &self,
        processed: DateTime<Utc>,
        published: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let updated = self.conn.execute(
            "UPDATE times SET last_end_time = ?1, last_report_time = ?2",
            params![processed.timestamp(), published],
        )?;
        if updated == 0 {
            return Err(self.missing_row());
        }
        info!(
            last_end_time = %processed,
            last_report_time = %published,
            "Advanced watermarks"
        );
        Ok(())
    }

    fn missing_row(&self) -> StorageError {
        StorageError::MissingRow(self.path.display().to_string())
    }
}
