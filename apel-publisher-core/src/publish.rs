//! High-level pipeline: fetch → normalise → aggregate → format → sign → send → advance.
//!
//! # Major Types
//! - [`Publisher`]: owns the configuration and the three collaborators
//! - [`CycleOutcome`]: what a single poll did
//!
//! # Responsibilities
//! - Gate publishing on the configured report interval, independent of the poll interval
//! - Fetch everything stopped since the processed watermark and publish it as a summary
//! - Publish a sync message covering the previous and the current month
//! - Advance the watermarks only after every message has been sent
//!
//! # Error Handling
//! A [`PublisherError`] aborts the cycle with the store untouched. [`Publisher::serve`]
//! keeps polling after storage and transport faults and returns on fatal errors
//! (see [`PublisherError::is_fatal`]).
//!
//! # Navigation
//! - Long-running loop: [`Publisher::serve`]
//! - One poll: [`Publisher::run_cycle`]
//! - Targeted re-publication: [`Publisher::republish`]

use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::fmt;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::aggregate::{aggregate_summary, aggregate_sync, SummaryFilter};
use crate::config::PublisherConfig;
use crate::contract::{Broker, MessageSigner, PublishPayload, RawRecord, RecordSource};
use crate::error::PublisherError;
use crate::message::{format_summary, format_sync};
use crate::normalise::{build_table, Normaliser, RecordTable};
use crate::watermark::WatermarkStore;

/// Steps of one publish cycle, used to label log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    CheckElapsed,
    Fetch,
    Normalise,
    Sign,
    Send,
    Advance,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::CheckElapsed => "check_elapsed",
            Phase::Fetch => "fetch",
            Phase::Normalise => "normalise",
            Phase::Sign => "sign",
            Phase::Send => "send",
            Phase::Advance => "advance",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The report interval has not elapsed since the last publish.
    Skipped { since_last_report_secs: i64 },
    /// Nothing stopped since the processed watermark.
    NoNewRecords,
    Published {
        summary_rows: usize,
        sync_rows: usize,
        last_end_time: DateTime<Utc>,
    },
}

pub struct Publisher<S, G, B> {
    config: PublisherConfig,
    normaliser: Normaliser,
    source: S,
    signer: G,
    broker: B,
}

impl<S, G, B> Publisher<S, G, B>
where
    S: RecordSource,
    G: MessageSigner,
    B: Broker,
{
    pub fn new(config: PublisherConfig, source: S, signer: G, broker: B) -> Result<Self, regex::Error> {
        let normaliser = Normaliser::new(&config)?;
        Ok(Self {
            config,
            normaliser,
            source,
            signer,
            broker,
        })
    }

    /// Polls forever, opening the watermark store afresh for every cycle.
    ///
    /// Only returns on a fatal error; everything else is logged and retried.
    pub async fn serve(
        &self,
        time_db_path: &Path,
        publish_since: DateTime<Utc>,
    ) -> Result<(), PublisherError> {
        let poll_every = self.config.intervals.poll_every();
        info!(
            poll_secs = poll_every.as_secs(),
            report_secs = self.config.intervals.report_interval,
            "[PUBLISH] Starting publish loop"
        );
        loop {
            let result = match WatermarkStore::open(time_db_path, publish_since) {
                Ok(store) => self.run_cycle(&store, Utc::now()).await,
                Err(e) => {
                    error!(error = %e, "[PUBLISH][ERROR] Cannot open watermark store");
                    Err(e.into())
                }
            };
            match result {
                Ok(outcome) => debug!(?outcome, "[PUBLISH] Cycle finished"),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "[PUBLISH][FATAL] Stopping publisher");
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "[PUBLISH] Cycle aborted, retrying on next poll");
                }
            }
            tokio::time::sleep(poll_every).await;
        }
    }

    /// Runs one poll against `store` as of `now`.
    pub async fn run_cycle(
        &self,
        store: &WatermarkStore,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, PublisherError> {
        info!("[PUBLISH] cycle_start");

        let last_report = store
            .published_watermark()
            .map_err(|e| abort(Phase::CheckElapsed, e.into()))?;
        let since_last_report_secs = (now - last_report).num_seconds();
        if since_last_report_secs < self.config.intervals.report_interval as i64 {
            info!(since_last_report_secs, "[PUBLISH] Not enough time since last report");
            return Ok(CycleOutcome::Skipped {
                since_last_report_secs,
            });
        }
        info!("[PUBLISH] Enough time since last report, create new report");

        let start = store
            .processed_watermark()
            .map_err(|e| abort(Phase::CheckElapsed, e.into()))?;
        let records = self.fetch(start).await?;
        if records.is_empty() {
            info!(since = %start, "[PUBLISH] No new records, do nothing for now");
            return Ok(CycleOutcome::NoNewRecords);
        }
        let last_end_time = records
            .iter()
            .map(|r| r.stop_time)
            .max()
            .map_or(start, |latest| latest.max(start));
        debug!(latest_stop_time = %last_end_time, "[PUBLISH] Latest stop time of batch");

        let summary_table = self.normalise(&records)?;
        let summary = aggregate_summary(summary_table.rows(), None);

        let sync_since = begin_previous_month(now);
        let sync_records = self.fetch(sync_since).await?;
        let sync_table = self.normalise(&sync_records)?;
        let sync = aggregate_sync(sync_table.rows());

        if summary.is_empty() && sync.is_empty() {
            info!(
                fetched = records.len(),
                "[PUBLISH] All fetched records are out of scope, nothing to send"
            );
        } else {
            let token = self
                .broker
                .fetch_token()
                .await
                .map_err(|e| abort(Phase::Send, PublisherError::transport("fetch token", e)))?;
            if !summary.is_empty() {
                let message = format_summary(&summary);
                debug!(%message, "[PUBLISH] Summary message");
                self.sign_and_send(&token, &message, now).await?;
                info!(rows = summary.len(), jobs = summary_table.len(), "[PUBLISH] Sent summary");
            }
            if !sync.is_empty() {
                let message = format_sync(&sync);
                debug!(%message, "[PUBLISH] Sync message");
                self.sign_and_send(&token, &message, now).await?;
                info!(rows = sync.len(), since = %sync_since, "[PUBLISH] Sent sync");
            }
        }

        store
            .advance(last_end_time, now)
            .map_err(|e| abort(Phase::Advance, e.into()))?;

        Ok(CycleOutcome::Published {
            summary_rows: summary.len(),
            sync_rows: sync.len(),
            last_end_time,
        })
    }

    /// Re-sends the summary of one site and month. Watermarks are not touched.
    ///
    /// Returns the number of summary blocks sent.
    pub async fn republish(
        &self,
        year: i32,
        month: u32,
        site: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, PublisherError> {
        let since = begin_of_month(year, month).ok_or(PublisherError::InvalidPeriod { year, month })?;
        info!(year, month, site, "[REPUBLISH] Republishing summary");

        let records = self.fetch(since).await?;
        let table = self.normalise(&records)?;
        let filter = SummaryFilter {
            month,
            year,
            site: site.to_string(),
        };
        let summary = aggregate_summary(table.rows(), Some(&filter));
        if summary.is_empty() {
            warn!(year, month, site, "[REPUBLISH] No records for this site and month");
            return Ok(0);
        }

        let token = self
            .broker
            .fetch_token()
            .await
            .map_err(|e| abort(Phase::Send, PublisherError::transport("fetch token", e)))?;
        let message = format_summary(&summary);
        debug!(%message, "[REPUBLISH] Summary message");
        self.sign_and_send(&token, &message, now).await?;
        info!(rows = summary.len(), "[REPUBLISH] Republishing finished");
        Ok(summary.len())
    }

    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>, PublisherError> {
        info!(since = %since, "[PUBLISH] Getting records");
        let records = self
            .source
            .get_records_stopped_since(since)
            .await
            .map_err(|e| abort(Phase::Fetch, PublisherError::transport("fetch records", e)))?;
        debug!(count = records.len(), "[PUBLISH] Fetched records");
        Ok(records)
    }

    fn normalise(&self, records: &[RawRecord]) -> Result<RecordTable, PublisherError> {
        build_table(&self.normaliser, records).map_err(|e| abort(Phase::Normalise, e.into()))
    }

    async fn sign_and_send(
        &self,
        token: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PublisherError> {
        let signed = self
            .signer
            .sign(message)
            .map_err(|e| abort(Phase::Sign, PublisherError::transport("sign message", e)))?;
        let payload = PublishPayload::new(&signed, now);
        self.broker
            .send(token, &payload)
            .await
            .map_err(|e| abort(Phase::Send, PublisherError::transport("send message", e)))
    }
}

fn abort(phase: Phase, err: PublisherError) -> PublisherError {
    match &err {
        e if e.is_fatal() => {
            error!(%phase, error = %e, "[PUBLISH][FATAL] Configuration cannot attribute records");
        }
        PublisherError::Storage(e) => {
            error!(%phase, error = %e, "[PUBLISH][ABORT] Watermark store fault, watermark unchanged");
        }
        e => {
            warn!(%phase, error = %e, "[PUBLISH][ABORT] Cycle aborted, watermark unchanged");
        }
    }
    err
}

/// First instant of the given month in UTC, or `None` for an impossible month.
pub fn begin_of_month(year: i32, month: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

/// First instant of the calendar month before the one containing `now`.
pub fn begin_previous_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = match now.month() {
        1 => (now.year() - 1, 12),
        m => (now.year(), m - 1),
    };
    begin_of_month(year, month).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previous_month_wraps_the_year() {
        let now = Utc.with_ymd_and_hms(2023, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(
            begin_previous_month(now),
            Utc.with_ymd_and_hms(2022, 12, 1, 0, 0, 0).unwrap()
        );

        let now = Utc.with_ymd_and_hms(2023, 3, 31, 23, 59, 59).unwrap();
        assert_eq!(
            begin_previous_month(now),
            Utc.with_ymd_and_hms(2023, 2, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn impossible_months_have_no_beginning() {
        assert!(begin_of_month(2023, 0).is_none());
        assert!(begin_of_month(2023, 13).is_none());
        assert_eq!(
            begin_of_month(2024, 2),
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn phases_render_as_snake_case() {
        assert_eq!(Phase::CheckElapsed.to_string(), "check_elapsed");
        assert_eq!(Phase::Advance.to_string(), "advance");
    }
}
