//! APEL wire format for summary and sync messages.
//!
//! Each message is a header line followed by one `Key: value` block per row,
//! every block terminated by a `%%` line. Field labels and order are fixed by
//! the receiving broker, including the odd `WallDuration :` label.

use std::fmt::Write;

use crate::aggregate::{SummaryRow, SyncRow};

pub const SUMMARY_HEADER: &str = "APEL-summary-job-message: v0.3";
pub const SYNC_HEADER: &str = "APEL-sync-message: v0.1";
const BLOCK_END: &str = "%%";

pub fn format_summary(rows: &[SummaryRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{SUMMARY_HEADER}");
    for row in rows {
        let k = &row.key;
        let _ = writeln!(out, "Site: {}", k.site);
        let _ = writeln!(out, "Month: {}", k.month);
        let _ = writeln!(out, "Year: {}", k.year);
        let _ = writeln!(out, "VO: {}", k.vo);
        let _ = writeln!(out, "VOGroup: {}", k.vogroup);
        let _ = writeln!(out, "VORole: {}", k.vorole);
        let _ = writeln!(out, "SubmitHost: {}", k.submithost);
        let _ = writeln!(out, "Infrastructure: {}", k.infrastructure);
        let _ = writeln!(out, "Processors: {}", k.cpucount);
        let _ = writeln!(out, "NodeCount: {}", k.nodecount);
        let _ = writeln!(out, "EarliestEndTime: {}", row.min_stop_time);
        let _ = writeln!(out, "LatestEndTime: {}", row.max_stop_time);
        let _ = writeln!(out, "WallDuration : {}", row.runtime);
        let _ = writeln!(out, "CpuDuration: {}", row.cputime);
        let _ = writeln!(out, "NormalisedWallDuration: {}", decimal(row.norm_runtime));
        let _ = writeln!(out, "NormalisedCpuDuration: {}", decimal(row.norm_cputime));
        let _ = writeln!(out, "NumberOfJobs: {}", row.job_count);
        let _ = writeln!(out, "{BLOCK_END}");
    }
    out
}

pub fn format_sync(rows: &[SyncRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{SYNC_HEADER}");
    for row in rows {
        let _ = writeln!(out, "Site: {}", row.key.site);
        let _ = writeln!(out, "Month: {}", row.key.month);
        let _ = writeln!(out, "Year: {}", row.key.year);
        let _ = writeln!(out, "SubmitHost: {}", row.key.submithost);
        let _ = writeln!(out, "NumberOfJobs: {}", row.job_count);
        let _ = writeln!(out, "{BLOCK_END}");
    }
    out
}

/// Shortest round-trip decimal that always shows a fractional part: `550.0`, `12.5`.
fn decimal(value: f64) -> String {
    let s = value.to_string();
    if value.is_finite() && !s.contains('.') {
        format!("{s}.0")
    } else {
        s
    }
}

/// Splits a message into its header and `(label, value)` blocks.
#[cfg(any(test, feature = "test-export-mocks"))]
pub fn parse_blocks(message: &str) -> (String, Vec<Vec<(String, String)>>) {
    let mut lines = message.lines();
    let header = lines.next().unwrap_or_default().to_string();
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in lines {
        if line == BLOCK_END {
            blocks.push(std::mem::take(&mut current));
            continue;
        }
        if let Some((label, value)) = line.split_once(": ") {
            current.push((label.trim_end().to_string(), value.to_string()));
        }
    }
    (header, blocks)
}
