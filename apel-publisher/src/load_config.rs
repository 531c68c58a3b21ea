/// `load_config` module: Loads a static YAML config file into the typed [`AppConfig`].
///
/// This module is the only place where untrusted YAML is parsed and mapped to the
/// strongly-typed structs of `apel-publisher-core`.
///
/// # Responsibilities
/// - Parse the YAML sections (`auditor`, `intervals`, `paths`, `site`, `uservo`,
///   `components`, `metadata`, `authentication`, `logging`)
/// - Convert loosely-typed values (timestamps, log levels) into rich types
/// - Inject the certificate and key paths from the environment when set
///   (`APEL_CLIENT_CERT`, `APEL_CLIENT_KEY`)
/// - Reject configurations that could never publish correct data: zero intervals,
///   an empty VO mapping, or a VO pattern that is not a valid regex
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{bail, Context, Result};
use apel_publisher_core::config::{
    ComponentNames, Intervals, MetadataKeys, PublisherConfig, SiteConfig, SiteScope, VoRule,
};
use apel_publisher_core::taxonomy::Taxonomy;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const PUBLISH_SINCE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// Fully validated runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub publisher: PublisherConfig,
    pub auditor: AuditorConfig,
    pub time_db_path: PathBuf,
    pub publish_since: DateTime<Utc>,
    pub auth: AuthConfig,
    pub log_level: tracing::Level,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditorConfig {
    pub host: String,
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub auth_url: String,
    pub ams_url: String,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
}

#[derive(Deserialize)]
struct StaticConfig {
    auditor: AuditorConfig,
    intervals: Intervals,
    paths: PathsSection,
    site: SiteSection,
    uservo: UserVoSection,
    components: ComponentNames,
    metadata: MetadataKeys,
    authentication: AuthConfig,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Deserialize)]
struct PathsSection {
    time_db_path: PathBuf,
}

#[derive(Deserialize)]
struct SiteSection {
    publish_since: String,
    sites_to_report: SiteScope,
    #[serde(default)]
    site_name_mapping: Option<BTreeMap<String, String>>,
    submit_host: String,
    infrastructure_type: String,
}

#[derive(Deserialize)]
struct UserVoSection {
    vo_mapping: Vec<VoRule>,
}

#[derive(Deserialize)]
struct LoggingSection {
    #[serde(default = "default_log_level")]
    log_level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Loads a static YAML config file and injects certificate paths from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let static_conf: StaticConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => conf,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let publish_since = DateTime::parse_from_str(&static_conf.site.publish_since, PUBLISH_SINCE_FORMAT)
        .with_context(|| {
            format!(
                "site.publish_since {:?} does not match {PUBLISH_SINCE_FORMAT}",
                static_conf.site.publish_since
            )
        })?
        .with_timezone(&Utc);

    let log_level = static_conf
        .logging
        .log_level
        .parse::<tracing::Level>()
        .map_err(|e| anyhow::anyhow!("Unsupported logging.log_level {:?}: {e}", static_conf.logging.log_level))?;

    if static_conf.intervals.run_interval == 0 || static_conf.intervals.report_interval == 0 {
        bail!("intervals.run_interval and intervals.report_interval must be positive");
    }
    if static_conf.uservo.vo_mapping.is_empty() {
        bail!("uservo.vo_mapping must contain at least one pattern");
    }

    let site = SiteConfig {
        sites_to_report: static_conf.site.sites_to_report,
        site_name_mapping: static_conf.site.site_name_mapping,
        submit_host: static_conf.site.submit_host,
        infrastructure_type: static_conf.site.infrastructure_type,
    };
    Taxonomy::new(&site, &static_conf.uservo.vo_mapping)
        .context("uservo.vo_mapping contains an invalid pattern")?;

    let mut auth = static_conf.authentication;
    if let Ok(cert) = std::env::var("APEL_CLIENT_CERT") {
        info!("APEL_CLIENT_CERT found in env");
        auth.client_cert = PathBuf::from(cert);
    }
    if let Ok(key) = std::env::var("APEL_CLIENT_KEY") {
        info!("APEL_CLIENT_KEY found in env");
        auth.client_key = PathBuf::from(key);
    }

    let publisher = PublisherConfig {
        intervals: static_conf.intervals,
        site,
        vo_mapping: static_conf.uservo.vo_mapping,
        components: static_conf.components,
        metadata: static_conf.metadata,
    };

    info!(
        auditor = %format!("{}:{}", static_conf.auditor.host, static_conf.auditor.port),
        time_db_path = %static_conf.paths.time_db_path.display(),
        publish_since = %publish_since,
        "Config loaded and validated successfully"
    );

    Ok(AppConfig {
        publisher,
        auditor: static_conf.auditor,
        time_db_path: static_conf.paths.time_db_path,
        publish_since,
        auth,
        log_level,
    })
}
