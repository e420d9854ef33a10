//! Node-lease probe (spec §4.2 "Node-lease probe" and "Lease expiry rule").

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::Lease;
use kube::api::{Api, ListParams};
use kube::Client;
use std::time::Duration;

pub const NODE_LEASE_NAMESPACE: &str = "kube-node-lease";

/// The outcome of a single node-lease probe tick (spec §4.2: "If `owned =
/// 0`, reset this probe's state and return (no scaling decision)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// No owned leases were found; the probe has nothing to say this tick.
    Indeterminate,
    Healthy,
    Unhealthy,
}

/// Computes a single lease's effective expiry instant (spec §4.2 "Lease
/// expiry rule"). The 0.75 factor gives the kubelet roughly three retries to
/// renew before this watchdog calls the lease expired, so it doesn't race
/// KCM's own "Unknown" verdict.
pub fn effective_expiry(
    renew_time: DateTime<Utc>,
    kubelet_lease_duration: Duration,
    kcm_node_monitor_grace_duration: Duration,
) -> DateTime<Utc> {
    let slack = if kcm_node_monitor_grace_duration > kubelet_lease_duration {
        kubelet_lease_duration
    } else {
        kcm_node_monitor_grace_duration.mul_f64(0.75)
    };
    renew_time
        + chrono::Duration::from_std(slack).unwrap_or_else(|_| chrono::Duration::zero())
}

/// A single lease's retained/expired classification, computed independently
/// of any live API call so it is directly unit-testable.
pub struct LeaseObservation {
    pub has_owner_ref: bool,
    pub renew_time: Option<DateTime<Utc>>,
    pub lease_duration: Option<Duration>,
}

impl LeaseObservation {
    fn is_retained(&self) -> bool {
        // A lease without an owner reference corresponds to a removed node
        // and must be ignored (spec §4.2, workaround for a known upstream
        // bug where such leases linger).
        self.has_owner_ref
    }

    fn is_expired(&self, now: DateTime<Utc>, kcm_node_monitor_grace_duration: Duration) -> bool {
        match (self.renew_time, self.lease_duration) {
            (Some(renew_time), Some(lease_duration)) => {
                now >= effective_expiry(renew_time, lease_duration, kcm_node_monitor_grace_duration)
            }
            // A lease with no renew time / duration cannot be judged fresh;
            // treat it as expired so a genuinely stuck node is counted.
            _ => true,
        }
    }
}

/// Classifies a full set of lease observations against
/// `leaseFailureThresholdFraction` (spec §4.2).
pub fn classify(
    leases: &[LeaseObservation],
    now: DateTime<Utc>,
    kcm_node_monitor_grace_duration: Duration,
    failure_threshold_fraction: f64,
) -> LeaseOutcome {
    let retained: Vec<&LeaseObservation> = leases.iter().filter(|l| l.is_retained()).collect();
    if retained.is_empty() {
        return LeaseOutcome::Indeterminate;
    }
    let expired = retained
        .iter()
        .filter(|l| l.is_expired(now, kcm_node_monitor_grace_duration))
        .count();
    let fraction = expired as f64 / retained.len() as f64;
    if fraction > failure_threshold_fraction {
        LeaseOutcome::Unhealthy
    } else {
        LeaseOutcome::Healthy
    }
}

pub fn leases_api(client: Client) -> Api<Lease> {
    Api::namespaced(client, NODE_LEASE_NAMESPACE)
}

pub fn list_params() -> ListParams {
    ListParams::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn short_grace_duration_uses_kubelet_lease_duration() {
        let expiry = effective_expiry(at(0), Duration::from_secs(40), Duration::from_secs(1000));
        assert_eq!(expiry, at(40));
    }

    #[test]
    fn long_grace_duration_uses_seventy_five_percent() {
        let expiry = effective_expiry(at(0), Duration::from_secs(1000), Duration::from_secs(40));
        assert_eq!(expiry, at(30));
    }

    #[test]
    fn leases_without_owner_refs_are_ignored() {
        let leases = vec![LeaseObservation {
            has_owner_ref: false,
            renew_time: Some(at(0)),
            lease_duration: Some(Duration::from_secs(40)),
        }];
        assert_eq!(
            classify(&leases, at(1000), Duration::from_secs(40), 0.6),
            LeaseOutcome::Indeterminate
        );
    }

    #[test]
    fn fraction_strictly_greater_than_threshold_is_unhealthy() {
        let expired = LeaseObservation {
            has_owner_ref: true,
            renew_time: Some(at(0)),
            lease_duration: Some(Duration::from_secs(40)),
        };
        let fresh = LeaseObservation {
            has_owner_ref: true,
            renew_time: Some(at(990)),
            lease_duration: Some(Duration::from_secs(40)),
        };
        // 1 of 2 expired = 0.5, at or below a 0.4 threshold => unhealthy
        let leases = vec![expired, fresh];
        assert_eq!(
            classify(&leases, at(1000), Duration::from_secs(40), 0.4),
            LeaseOutcome::Unhealthy
        );
    }

    #[test]
    fn fraction_at_or_below_threshold_is_healthy() {
        let fresh_a = LeaseObservation {
            has_owner_ref: true,
            renew_time: Some(at(990)),
            lease_duration: Some(Duration::from_secs(40)),
        };
        let fresh_b = LeaseObservation {
            has_owner_ref: true,
            renew_time: Some(at(995)),
            lease_duration: Some(Duration::from_secs(40)),
        };
        let leases = vec![fresh_a, fresh_b];
        assert_eq!(
            classify(&leases, at(1000), Duration::from_secs(40), 0.6),
            LeaseOutcome::Healthy
        );
    }
}
