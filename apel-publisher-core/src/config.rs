use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};

/// Typed configuration of the publish pipeline. Built once at startup and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub intervals: Intervals,
    pub site: SiteConfig,
    pub vo_mapping: Vec<VoRule>,
    pub components: ComponentNames,
    pub metadata: MetadataKeys,
}

impl PublisherConfig {
    pub fn trace_loaded(&self) {
        info!(
            run_interval = self.intervals.run_interval,
            report_interval = self.intervals.report_interval,
            submit_host = %self.site.submit_host,
            vo_rules = self.vo_mapping.len(),
            "Loaded PublisherConfig"
        );
        debug!(?self, "PublisherConfig loaded (full debug)");
    }
}

/// Polling and publishing cadence, both in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervals {
    pub run_interval: u64,
    pub report_interval: u64,
}

impl Intervals {
    pub fn poll_every(&self) -> Duration {
        Duration::from_secs(self.run_interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub sites_to_report: SiteScope,
    /// Raw site id → published site name. When absent, raw ids are published as-is.
    #[serde(default)]
    pub site_name_mapping: Option<BTreeMap<String, String>>,
    pub submit_host: String,
    pub infrastructure_type: String,
}

/// Which raw site ids are reported: the `all` keyword or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SiteScopeRepr", into = "SiteScopeRepr")]
pub enum SiteScope {
    All,
    Only(BTreeSet<String>),
}

impl SiteScope {
    pub fn contains(&self, site_id: &str) -> bool {
        match self {
            SiteScope::All => true,
            SiteScope::Only(sites) => sites.contains(site_id),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SiteScopeRepr {
    Keyword(String),
    List(Vec<String>),
}

impl TryFrom<SiteScopeRepr> for SiteScope {
    type Error = String;

    fn try_from(repr: SiteScopeRepr) -> Result<Self, Self::Error> {
        match repr {
            SiteScopeRepr::Keyword(k) if k == "all" => Ok(SiteScope::All),
            SiteScopeRepr::Keyword(other) => Err(format!(
                "sites_to_report must be \"all\" or a list of site ids, got \"{other}\""
            )),
            SiteScopeRepr::List(sites) => Ok(SiteScope::Only(sites.into_iter().collect())),
        }
    }
}

impl From<SiteScope> for SiteScopeRepr {
    fn from(scope: SiteScope) -> Self {
        match scope {
            SiteScope::All => SiteScopeRepr::Keyword("all".to_string()),
            SiteScope::Only(sites) => SiteScopeRepr::List(sites.into_iter().collect()),
        }
    }
}

/// One entry of the ordered VO mapping: a regex over the user id and the VO triple it maps to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoRule {
    pub pattern: String,
    pub vo: String,
    pub vogroup: String,
    pub vorole: String,
}

/// Component and score names as they appear in the metering records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentNames {
    pub cores_name: String,
    pub cpu_time_name: String,
    pub nnodes_name: String,
    pub benchmark_name: String,
}

/// Metadata keys under which records carry their site and user identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataKeys {
    pub site_key: String,
    pub user_key: String,
}
