//! Per-installation Prober configuration and its documented defaults
//! (spec §3 "ProbeConfig").

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validate::{require_non_empty, require_non_zero_duration, ConfigError};
use crate::types::DependentResourceInfo;

fn default_probe_interval() -> Duration {
    Duration::from_secs(10)
}
fn default_initial_delay() -> Duration {
    Duration::from_secs(30)
}
fn default_probe_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_backoff_jitter_factor() -> f64 {
    0.2
}
fn default_success_threshold() -> u32 {
    1
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_api_server_probe_failure_backoff() -> Duration {
    Duration::from_secs(30)
}
fn default_lease_failure_threshold_fraction() -> f64 {
    0.60
}
fn default_rate_limited_backoff() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProberConfig {
    #[serde(default = "default_probe_interval", with = "crate::duration_serde")]
    pub probe_interval: Duration,
    #[serde(default = "default_initial_delay", with = "crate::duration_serde")]
    pub initial_delay: Duration,
    #[serde(default = "default_probe_timeout", with = "crate::duration_serde")]
    pub probe_timeout: Duration,
    #[serde(default = "default_backoff_jitter_factor")]
    pub backoff_jitter_factor: f64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(
        default = "default_api_server_probe_failure_backoff",
        with = "crate::duration_serde"
    )]
    pub api_server_probe_failure_backoff: Duration,
    #[serde(default = "default_lease_failure_threshold_fraction")]
    pub lease_failure_threshold_fraction: f64,
    #[serde(
        default = "default_rate_limited_backoff",
        with = "crate::duration_serde"
    )]
    pub rate_limited_backoff: Duration,
    pub kcm_node_monitor_grace_duration: Duration,
    pub kube_config_secret_name: String,
    pub dependent_resource_infos: Vec<DependentResourceInfo>,
}

impl ProberConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut violations = Vec::new();

        require_non_empty(
            &mut violations,
            "kubeConfigSecretName",
            &self.kube_config_secret_name,
        );
        require_non_zero_duration(
            &mut violations,
            "kcmNodeMonitorGraceDuration",
            self.kcm_node_monitor_grace_duration,
        );
        if self.dependent_resource_infos.is_empty() {
            violations.push("dependentResourceInfos must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.lease_failure_threshold_fraction) {
            violations.push("leaseFailureThresholdFraction must be in [0, 1]".to_string());
        }
        if self.success_threshold == 0 {
            violations.push("successThreshold must be at least 1".to_string());
        }
        if self.failure_threshold == 0 {
            violations.push("failureThreshold must be at least 1".to_string());
        }

        for (idx, dep) in self.dependent_resource_infos.iter().enumerate() {
            require_non_empty(
                &mut violations,
                &format!("dependentResourceInfos[{idx}].ref.apiVersion"),
                &dep.reference.api_version,
            );
            require_non_empty(
                &mut violations,
                &format!("dependentResourceInfos[{idx}].ref.kind"),
                &dep.reference.kind,
            );
            require_non_empty(
                &mut violations,
                &format!("dependentResourceInfos[{idx}].ref.name"),
                &dep.reference.name,
            );
        }

        ConfigError::from_violations(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceRef, ScaleInfo};

    fn sample_dependent() -> DependentResourceInfo {
        DependentResourceInfo {
            reference: ResourceRef {
                api_version: "apps/v1".into(),
                kind: "Deployment".into(),
                name: "machine-controller-manager".into(),
            },
            optional: false,
            scale_up: ScaleInfo {
                level: 0,
                initial_delay: None,
                timeout: None,
                replicas: None,
            },
            scale_down: ScaleInfo {
                level: 0,
                initial_delay: None,
                timeout: None,
                replicas: None,
            },
        }
    }

    fn valid_config() -> ProberConfig {
        ProberConfig {
            probe_interval: default_probe_interval(),
            initial_delay: default_initial_delay(),
            probe_timeout: default_probe_timeout(),
            backoff_jitter_factor: default_backoff_jitter_factor(),
            success_threshold: default_success_threshold(),
            failure_threshold: default_failure_threshold(),
            api_server_probe_failure_backoff: default_api_server_probe_failure_backoff(),
            lease_failure_threshold_fraction: default_lease_failure_threshold_fraction(),
            rate_limited_backoff: default_rate_limited_backoff(),
            kcm_node_monitor_grace_duration: Duration::from_secs(120),
            kube_config_secret_name: "shoot-access".into(),
            dependent_resource_infos: vec![sample_dependent()],
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn reports_every_violation_at_once() {
        let mut cfg = valid_config();
        cfg.kube_config_secret_name.clear();
        cfg.kcm_node_monitor_grace_duration = Duration::ZERO;
        cfg.dependent_resource_infos.clear();
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.violations.len(), 3);
    }
}
