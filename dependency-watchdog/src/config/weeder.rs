//! Weeder configuration (spec §3 "WeederConfig", §6).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validate::{require_non_empty, ConfigError};

fn default_watch_duration() -> Duration {
    Duration::from_secs(5 * 60)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DependantSelectors {
    pub pod_selectors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WeederConfig {
    #[serde(default = "default_watch_duration", with = "crate::duration_serde")]
    pub watch_duration: Duration,
    pub services_and_dependant_selectors: BTreeMap<String, DependantSelectors>,
}

impl WeederConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut violations = Vec::new();

        if self.services_and_dependant_selectors.is_empty() {
            violations.push("servicesAndDependantSelectors must not be empty".to_string());
        }

        for (service, selectors) in &self.services_and_dependant_selectors {
            if selectors.pod_selectors.is_empty() {
                violations.push(format!(
                    "servicesAndDependantSelectors[{service}].podSelectors must not be empty"
                ));
            }
            for (idx, selector) in selectors.pod_selectors.iter().enumerate() {
                require_non_empty(
                    &mut violations,
                    &format!("servicesAndDependantSelectors[{service}].podSelectors[{idx}]"),
                    selector,
                );
                if !selector.trim().is_empty() && parse_label_selector(selector).is_err() {
                    violations.push(format!(
                        "servicesAndDependantSelectors[{service}].podSelectors[{idx}] \
                         is not a syntactically valid label selector: '{selector}'"
                    ));
                }
            }
        }

        ConfigError::from_violations(violations)
    }
}

/// A minimal syntax check for Kubernetes label-selector strings
/// (`key=value`, `key!=value`, or bare `key` comma-separated terms), enough
/// to catch the obviously malformed selectors the config validator is meant
/// to reject (spec §6 "each selector must parse as a valid label selector").
/// Full selector semantics (`in`/`notin` set-based expressions) are left to
/// `kube::api::ListParams::labels` at watch-construction time; this check
/// exists purely so a typo is caught at config-load time instead of at the
/// first failed watch.
pub fn parse_label_selector(selector: &str) -> Result<(), String> {
    for term in selector.split(',') {
        let term = term.trim();
        if term.is_empty() {
            return Err("empty selector term".to_string());
        }
        let key = term
            .trim_start_matches('!')
            .split(['=', '!'])
            .next()
            .unwrap_or_default();
        if key.trim().is_empty() {
            return Err(format!("selector term '{term}' has no key"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WeederConfig {
        let mut map = BTreeMap::new();
        map.insert(
            "etcd-client".to_string(),
            DependantSelectors {
                pod_selectors: vec!["app=kube-apiserver".to_string()],
            },
        );
        WeederConfig {
            watch_duration: default_watch_duration(),
            services_and_dependant_selectors: map,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn empty_selector_map_is_rejected() {
        let cfg = WeederConfig {
            watch_duration: default_watch_duration(),
            services_and_dependant_selectors: BTreeMap::new(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_selector_is_rejected() {
        let mut cfg = sample();
        cfg.services_and_dependant_selectors
            .get_mut("etcd-client")
            .unwrap()
            .pod_selectors
            .push("=oops".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.violations.iter().any(|v| v.contains("not a syntactically valid")));
    }
}
