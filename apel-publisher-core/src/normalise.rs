//! Turns raw metering records into normalised accounting rows.
//!
//! A record is first checked against the site scope; out-of-scope records are
//! dropped silently. In-scope records must carry every configured metadata key,
//! component and benchmark score, otherwise normalisation fails with a
//! [`MismatchError`] and nothing from the batch may be published.

use chrono::Datelike;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::{ComponentNames, MetadataKeys, PublisherConfig};
use crate::contract::RawRecord;
use crate::error::MismatchError;
use crate::taxonomy::Taxonomy;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalisedRow {
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
    pub record_id: String,
    pub benchmark: f64,
    pub runtime: i64,
    pub norm_runtime: f64,
    pub cputime: i64,
    pub norm_cputime: f64,
    pub start_time: i64,
    pub stop_time: i64,
}

pub struct Normaliser {
    taxonomy: Taxonomy,
    components: ComponentNames,
    metadata: MetadataKeys,
    submit_host: String,
    infrastructure: String,
}

impl Normaliser {
    pub fn new(config: &PublisherConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            taxonomy: Taxonomy::new(&config.site, &config.vo_mapping)?,
            components: config.components.clone(),
            metadata: config.metadata.clone(),
            submit_host: config.site.submit_host.clone(),
            infrastructure: config.site.infrastructure_type.clone(),
        })
    }

    /// Normalises one record, or returns `None` when its site is not reported.
    pub fn normalise(&self, record: &RawRecord) -> Result<Option<NormalisedRow>, MismatchError> {
        let raw_site = self.meta(record, &self.metadata.site_key)?;
        if !self.taxonomy.site_in_scope(raw_site) {
            debug!(record_id = %record.record_id, site = raw_site, "Skipping out-of-scope record");
            return Ok(None);
        }

        let site = self.taxonomy.resolve_site(raw_site)?;
        let user = self.meta(record, &self.metadata.user_key)?;
        let vo = self.taxonomy.resolve_vo(user)?;

        let names = &self.components;
        let mut cores = None;
        let mut benchmark = None;
        let mut cputime = None;
        let mut nodes = None;
        for component in &record.components {
            if component.name == names.cores_name {
                cores = Some(component.amount);
                benchmark = component
                    .scores
                    .iter()
                    .find(|s| s.name == names.benchmark_name)
                    .map(|s| s.value);
            }
            if component.name == names.cpu_time_name {
                cputime = Some(component.amount);
            }
            if component.name == names.nnodes_name {
                nodes = Some(component.amount);
            }
        }

        let cpucount = cores.ok_or_else(|| self.missing_component(record, &names.cores_name))?;
        let benchmark = benchmark.ok_or_else(|| MismatchError::MissingScore {
            record_id: record.record_id.clone(),
            component: names.cores_name.clone(),
            score: names.benchmark_name.clone(),
        })?;
        let cputime = cputime.ok_or_else(|| self.missing_component(record, &names.cpu_time_name))?;
        let nodecount = nodes.ok_or_else(|| self.missing_component(record, &names.nnodes_name))?;

        let runtime = record.runtime();
        Ok(Some(NormalisedRow {
            site,
            submithost: self.submit_host.clone(),
            vo: vo.vo.clone(),
            vogroup: vo.vogroup.clone(),
            vorole: vo.vorole.clone(),
            infrastructure: self.infrastructure.clone(),
            year: record.stop_time.year(),
            month: record.stop_time.month(),
            cpucount,
            nodecount,
            record_id: record.record_id.clone(),
            benchmark,
            runtime,
            norm_runtime: runtime as f64 * benchmark,
            cputime,
            norm_cputime: cputime as f64 * benchmark,
            start_time: record.start_time.timestamp(),
            stop_time: record.stop_time.timestamp(),
        }))
    }

    fn meta<'r>(&self, record: &'r RawRecord, key: &str) -> Result<&'r str, MismatchError> {
        record
            .meta_value(key)
            .ok_or_else(|| MismatchError::MissingMetadata {
                record_id: record.record_id.clone(),
                key: key.to_string(),
            })
    }

    fn missing_component(&self, record: &RawRecord, name: &str) -> MismatchError {
        MismatchError::MissingComponent {
            record_id: record.record_id.clone(),
            component: name.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("record {0} is already present in this batch")]
pub struct DuplicateRecord(pub String);

/// Rows of one aggregation pass, unique by record id.
#[derive(Debug, Default)]
pub struct RecordTable {
    rows: Vec<NormalisedRow>,
    ids: HashSet<String>,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, row: NormalisedRow) -> Result<(), DuplicateRecord> {
        if !self.ids.insert(row.record_id.clone()) {
            return Err(DuplicateRecord(row.record_id));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn rows(&self) -> &[NormalisedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Normalises a whole batch. Duplicate record ids are logged and dropped;
/// any configuration mismatch fails the batch.
pub fn build_table(
    normaliser: &Normaliser,
    records: &[RawRecord],
) -> Result<RecordTable, MismatchError> {
    let mut table = RecordTable::new();
    for record in records {
        let Some(row) = normaliser.normalise(record)? else {
            continue;
        };
        if let Err(e) = table.insert(row) {
            error!(error = %e, "Dropping duplicate record");
        }
    }
    Ok(table)
}
