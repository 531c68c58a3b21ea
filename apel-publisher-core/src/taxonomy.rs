use regex::Regex;
use std::collections::BTreeMap;

use crate::config::{SiteConfig, SiteScope, VoRule};
use crate::error::MismatchError;

/// The VO triple a user id resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoInfo {
    pub vo: String,
    pub vogroup: String,
    pub vorole: String,
}

/// Maps raw site and user identifiers onto published site names and VO triples.
///
/// VO rules are evaluated in declaration order and the first matching pattern wins.
#[derive(Debug)]
pub struct Taxonomy {
    scope: SiteScope,
    site_names: Option<BTreeMap<String, String>>,
    vo_rules: Vec<(Regex, VoInfo)>,
}

impl Taxonomy {
    pub fn new(site: &SiteConfig, vo_mapping: &[VoRule]) -> Result<Self, regex::Error> {
        let vo_rules = vo_mapping
            .iter()
            .map(|rule| {
                let info = VoInfo {
                    vo: rule.vo.clone(),
                    vogroup: rule.vogroup.clone(),
                    vorole: rule.vorole.clone(),
                };
                Regex::new(&rule.pattern).map(|re| (re, info))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            scope: site.sites_to_report.clone(),
            site_names: site.site_name_mapping.clone(),
            vo_rules,
        })
    }

    pub fn site_in_scope(&self, raw_site_id: &str) -> bool {
        self.scope.contains(raw_site_id)
    }

    pub fn resolve_site(&self, raw_site_id: &str) -> Result<String, MismatchError> {
        match &self.site_names {
            None => Ok(raw_site_id.to_string()),
            Some(names) => names
                .get(raw_site_id)
                .cloned()
                .ok_or_else(|| MismatchError::UnknownSite {
                    site_id: raw_site_id.to_string(),
                }),
        }
    }

    pub fn resolve_vo(&self, raw_user_id: &str) -> Result<&VoInfo, MismatchError> {
        self.vo_rules
            .iter()
            .find(|(re, _)| re.is_match(raw_user_id))
            .map(|(_, info)| info)
            .ok_or_else(|| MismatchError::UnmatchedVo {
                user_id: raw_user_id.to_string(),
            })
    }
}
