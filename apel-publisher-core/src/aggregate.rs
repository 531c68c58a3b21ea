//! Group-by aggregation of normalised rows into summary and sync rows.
//!
//! Output is ordered by group key, so identical input always yields identical output.

use std::collections::{BTreeMap, HashSet};

use crate::normalise::NormalisedRow;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SummaryKey {
    pub site: String,
    pub submithost: String,
    pub vo: String,
    pub vogroup: String,
    pub vorole: String,
    pub infrastructure: String,
    pub year: i32,
    pub month: u32,
    pub cpucount: i64,
    pub nodecount: i64,
}

impl SummaryKey {
    fn of(row: &NormalisedRow) -> Self {
        SummaryKey {
            site: row.site.clone(),
            submithost: row.submithost.clone(),
            vo: row.vo.clone(),
            vogroup: row.vogroup.clone(),
            vorole: row.vorole.clone(),
            infrastructure: row.infrastructure.clone(),
            year: row.year,
            month: row.month,
            cpucount: row.cpucount,
            nodecount: row.nodecount,
        }
    }
}

/// One block of the summary message.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub key: SummaryKey,
    pub job_count: u64,
    pub runtime: i64,
    pub norm_runtime: f64,
    pub cputime: i64,
    pub norm_cputime: f64,
    pub min_stop_time: i64,
    pub max_stop_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncKey {
    pub site: String,
    pub submithost: String,
    pub year: i32,
    pub month: u32,
}

/// One block of the sync message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRow {
    pub key: SyncKey,
    pub job_count: u64,
}

/// Restricts a summary to one site and month, for republishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryFilter {
    pub month: u32,
    pub year: i32,
    pub site: String,
}

impl SummaryFilter {
    fn matches(&self, row: &NormalisedRow) -> bool {
        row.month == self.month && row.year == self.year && row.site == self.site
    }
}

struct SummaryAccumulator {
    record_ids: HashSet<String>,
    runtime: i64,
    norm_runtime: f64,
    cputime: i64,
    norm_cputime: f64,
    min_stop_time: i64,
    max_stop_time: i64,
}

impl SummaryAccumulator {
    fn new(first_stop_time: i64) -> Self {
        Self {
            record_ids: HashSet::new(),
            runtime: 0,
            norm_runtime: 0.0,
            cputime: 0,
            norm_cputime: 0.0,
            min_stop_time: first_stop_time,
            max_stop_time: first_stop_time,
        }
    }

    fn add(&mut self, row: &NormalisedRow) {
        self.record_ids.insert(row.record_id.clone());
        self.runtime += row.runtime;
        self.norm_runtime += row.norm_runtime;
        self.cputime += row.cputime;
        self.norm_cputime += row.norm_cputime;
        self.min_stop_time = self.min_stop_time.min(row.stop_time);
        self.max_stop_time = self.max_stop_time.max(row.stop_time);
    }

    fn finish(self, key: SummaryKey) -> SummaryRow {
        SummaryRow {
            key,
            job_count: self.record_ids.len() as u64,
            runtime: self.runtime,
            norm_runtime: self.norm_runtime,
            cputime: self.cputime,
            norm_cputime: self.norm_cputime,
            min_stop_time: self.min_stop_time,
            max_stop_time: self.max_stop_time,
        }
    }
}

/// Sums, counts and stop-time bounds per summary key.
pub fn aggregate_summary(rows: &[NormalisedRow], filter: Option<&SummaryFilter>) -> Vec<SummaryRow> {
    let mut groups: BTreeMap<SummaryKey, SummaryAccumulator> = BTreeMap::new();
    for row in rows {
        if filter.is_some_and(|f| !f.matches(row)) {
            continue;
        }
        groups
            .entry(SummaryKey::of(row))
            .or_insert_with(|| SummaryAccumulator::new(row.stop_time))
            .add(row);
    }
    groups
        .into_iter()
        .map(|(key, acc)| acc.finish(key))
        .collect()
}

/// Job counts per site, submit host and month.
pub fn aggregate_sync(rows: &[NormalisedRow]) -> Vec<SyncRow> {
    let mut groups: BTreeMap<SyncKey, HashSet<&str>> = BTreeMap::new();
    for row in rows {
        let key = SyncKey {
            site: row.site.clone(),
            submithost: row.submithost.clone(),
            year: row.year,
            month: row.month,
        };
        groups.entry(key).or_default().insert(row.record_id.as_str());
    }
    groups
        .into_iter()
        .map(|(key, ids)| SyncRow {
            key,
            job_count: ids.len() as u64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, site: &str, vo: &str, month: u32, cores: i64, runtime: i64, stop: i64) -> NormalisedRow {
        let benchmark = 2.5;
        NormalisedRow {
            site: site.to_string(),
            submithost: "ce.example.org".to_string(),
            vo: vo.to_string(),
            vogroup: format!("/{vo}"),
            vorole: "Role=NULL".to_string(),
            infrastructure: "grid".to_string(),
            year: 2023,
            month,
            cpucount: cores,
            nodecount: 1,
            record_id: id.to_string(),
            benchmark,
            runtime,
            norm_runtime: runtime as f64 * benchmark,
            cputime: runtime * cores,
            norm_cputime: (runtime * cores) as f64 * benchmark,
            start_time: stop - runtime,
            stop_time: stop,
        }
    }

    #[test]
    fn summary_sums_counts_and_bounds_per_group() {
        let rows = vec![
            row("a", "site-A", "atlas", 3, 8, 100, 1_000),
            row("b", "site-A", "atlas", 3, 8, 200, 3_000),
            row("c", "site-A", "atlas", 3, 8, 50, 2_000),
            row("d", "site-A", "atlas", 3, 1, 10, 2_500),
            row("e", "site-A", "cms", 3, 8, 10, 2_500),
        ];

        let summary = aggregate_summary(&rows, None);
        assert_eq!(summary.len(), 3);

        let eight_core = summary
            .iter()
            .find(|s| s.key.vo == "atlas" && s.key.cpucount == 8)
            .unwrap();
        assert_eq!(eight_core.job_count, 3);
        assert_eq!(eight_core.runtime, 350);
        assert_eq!(eight_core.norm_runtime, 875.0);
        assert_eq!(eight_core.cputime, 2_800);
        assert_eq!(eight_core.norm_cputime, 7_000.0);
        assert_eq!(eight_core.min_stop_time, 1_000);
        assert_eq!(eight_core.max_stop_time, 3_000);
    }

    #[test]
    fn mixed_benchmark_factors_sum_per_row_products() {
        let mut slow = row("a", "site-A", "atlas", 3, 8, 100, 1_000);
        slow.benchmark = 10.0;
        slow.norm_runtime = 100.0 * 10.0;
        let mut fast = row("b", "site-A", "atlas", 3, 8, 50, 2_000);
        fast.benchmark = 23.0;
        fast.norm_runtime = 50.0 * 23.0;

        let summary = aggregate_summary(&[slow, fast], None);

        assert_eq!(summary.len(), 1, "benchmark factor is not part of the group key");
        assert_eq!(summary[0].runtime, 150);
        assert_eq!(summary[0].norm_runtime, 1_000.0 + 1_150.0);
    }

    #[test]
    fn summary_is_deterministic_and_order_independent() {
        let mut rows = vec![
            row("a", "site-B", "atlas", 4, 8, 100, 1_000),
            row("b", "site-A", "atlas", 3, 8, 200, 3_000),
            row("c", "site-A", "cms", 3, 8, 50, 2_000),
        ];
        let first = aggregate_summary(&rows, None);
        let second = aggregate_summary(&rows, None);
        assert_eq!(first, second);

        rows.reverse();
        assert_eq!(aggregate_summary(&rows, None), first);
    }

    #[test]
    fn filter_restricts_summary_to_one_site_and_month() {
        let rows = vec![
            row("a", "site-A", "atlas", 3, 8, 100, 1_000),
            row("b", "site-A", "atlas", 4, 8, 200, 3_000),
            row("c", "site-B", "atlas", 3, 8, 50, 2_000),
        ];
        let filter = SummaryFilter {
            month: 3,
            year: 2023,
            site: "site-A".to_string(),
        };

        let summary = aggregate_summary(&rows, Some(&filter));
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].job_count, 1);
        assert_eq!(summary[0].runtime, 100);
    }

    #[test]
    fn sync_counts_jobs_per_site_and_month() {
        let rows = vec![
            row("a", "site-A", "atlas", 3, 8, 100, 1_000),
            row("b", "site-A", "cms", 3, 1, 200, 3_000),
            row("c", "site-A", "atlas", 4, 8, 50, 2_000),
            row("d", "site-B", "atlas", 3, 8, 50, 2_000),
        ];

        let sync = aggregate_sync(&rows);
        let counts: Vec<_> = sync
            .iter()
            .map(|s| (s.key.site.as_str(), s.key.month, s.job_count))
            .collect();
        assert_eq!(
            counts,
            vec![("site-A", 3, 2), ("site-A", 4, 1), ("site-B", 3, 1)]
        );
    }

    #[test]
    fn empty_input_yields_no_rows() {
        assert!(aggregate_summary(&[], None).is_empty());
        assert!(aggregate_sync(&[]).is_empty());
    }
}
