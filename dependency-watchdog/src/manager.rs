//! The options this binary hands off to its host controller-manager
//! runtime. Leader-election arbitration and reconcile-concurrency limiting
//! are genuine external collaborators (spec §5 "the host framework's
//! `kube::runtime::Controller`") — this module only carries the handful of
//! values the CLI is instructed to pass through; it does not re-implement
//! leader election or a reconcile scheduler of its own.

use std::time::Duration;

use crate::cli::SharedArgs;

#[derive(Debug, Clone)]
pub struct ManagerOpts {
    pub concurrent_reconciles: usize,
    pub enable_leader_election: bool,
    pub leader_election_namespace: String,
    pub kube_api_qps: f32,
    pub kube_api_burst: u32,
    pub metrics_bind_address: String,
    pub health_bind_address: String,
}

impl From<&SharedArgs> for ManagerOpts {
    fn from(args: &SharedArgs) -> Self {
        ManagerOpts {
            concurrent_reconciles: args.concurrent_reconciles,
            enable_leader_election: args.enable_leader_election,
            leader_election_namespace: args.leader_election_namespace.clone(),
            kube_api_qps: args.kube_api_qps,
            kube_api_burst: args.kube_api_burst,
            metrics_bind_address: args.metrics_bind_address.clone(),
            health_bind_address: args.health_bind_address.clone(),
        }
    }
}

/// The interval at which the manager's own liveness is considered stale if
/// no tick of any kind (reconcile, probe, weed) has been observed. Used by
/// `metrics::health` to decide `/healthz`'s response.
pub const LIVENESS_STALE_AFTER: Duration = Duration::from_secs(60);
