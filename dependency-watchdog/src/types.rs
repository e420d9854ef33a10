//! Shared value types threaded between the config layer, the Prober and the
//! Scaler. Kept free of any `kube`/API-server dependency where possible so
//! they stay trivially unit-testable.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque key identifying a tenant cluster: its control-plane namespace on
/// the seed. At most one Prober exists per key at any time (spec §3).
pub type ClusterKey = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LastOperationType {
    Create,
    Reconcile,
    Restore,
    Migrate,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LastOperationState {
    Processing,
    Pending,
    Error,
    Aborted,
    Failed,
    Succeeded,
}

#[derive(Debug, Clone, Copy)]
pub struct LastOperation {
    pub op_type: LastOperationType,
    pub state: LastOperationState,
}

/// A decoded projection of the tenant cluster spec, used only for Prober
/// admission decisions (spec §3 "Shoot view").
#[derive(Debug, Clone)]
pub struct ShootView {
    pub hibernation_enabled_spec: bool,
    pub hibernation_enabled_status: bool,
    pub deletion_timestamp_set: bool,
    pub last_operation: Option<LastOperation>,
    pub worker_pools: Vec<WorkerPool>,
    /// Override for `kcmNodeMonitorGraceDuration` taken from the shoot's own
    /// KCM spec, when present (spec §4.1 "Derived probe configuration").
    pub kcm_node_monitor_grace_period: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    pub name: String,
    /// Node conditions that mark a node unhealthy for this pool. Empty means
    /// "use the documented default list" (spec §3).
    pub unhealthy_node_conditions: Vec<String>,
}

pub const DEFAULT_UNHEALTHY_NODE_CONDITIONS: &[&str] = &["KubeletReady"];

impl WorkerPool {
    pub fn effective_unhealthy_conditions(&self) -> Vec<String> {
        if self.unhealthy_node_conditions.is_empty() {
            DEFAULT_UNHEALTHY_NODE_CONDITIONS
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            self.unhealthy_node_conditions.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Up,
    Down,
}

/// A reference to a scalable target workload, addressed the same way
/// `kube::discovery::ApiResource` addresses a GVK + name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScaleInfo {
    pub level: u32,
    #[serde(default, with = "crate::duration_serde::option")]
    pub initial_delay: Option<Duration>,
    #[serde(default, with = "crate::duration_serde::option")]
    pub timeout: Option<Duration>,
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DependentResourceInfo {
    #[serde(rename = "ref")]
    pub reference: ResourceRef,
    #[serde(default)]
    pub optional: bool,
    pub scale_up: ScaleInfo,
    pub scale_down: ScaleInfo,
}

/// A single, flattened scale task produced from a `DependentResourceInfo`
/// for one direction (spec §3 "ScaleableResource").
#[derive(Debug, Clone)]
pub struct ScaleableResource {
    pub reference: ResourceRef,
    pub optional: bool,
    pub level: u32,
    pub initial_delay: Duration,
    pub timeout: Duration,
    pub operation: Operation,
    /// Replicas to use absent any better information (the save-annotation
    /// takes precedence on ScaleUp, see spec §4.3 step 3).
    pub default_replicas: i32,
}

pub const DEFAULT_SCALE_UP_REPLICAS: i32 = 1;
pub const DEFAULT_SCALE_DOWN_REPLICAS: i32 = 0;
pub const DEFAULT_SCALE_TIMEOUT: Duration = Duration::from_secs(30);

pub const REPLICAS_ANNOTATION: &str = "dependency-watchdog.gardener.cloud/replicas";
pub const IGNORE_SCALING_ANNOTATION: &str = "dependency-watchdog.gardener.cloud/ignore-scaling";

impl DependentResourceInfo {
    pub fn flatten(&self) -> [ScaleableResource; 2] {
        [
            ScaleableResource {
                reference: self.reference.clone(),
                optional: self.optional,
                level: self.scale_up.level,
                initial_delay: self.scale_up.initial_delay.unwrap_or_default(),
                timeout: self.scale_up.timeout.unwrap_or(DEFAULT_SCALE_TIMEOUT),
                operation: Operation::Up,
                default_replicas: self
                    .scale_up
                    .replicas
                    .unwrap_or(DEFAULT_SCALE_UP_REPLICAS),
            },
            ScaleableResource {
                reference: self.reference.clone(),
                optional: self.optional,
                level: self.scale_down.level,
                initial_delay: self.scale_down.initial_delay.unwrap_or_default(),
                timeout: self.scale_down.timeout.unwrap_or(DEFAULT_SCALE_TIMEOUT),
                operation: Operation::Down,
                default_replicas: self
                    .scale_down
                    .replicas
                    .unwrap_or(DEFAULT_SCALE_DOWN_REPLICAS),
            },
        ]
    }
}

/// Groups a flattened resource list by ascending `level`, as the DAG
/// executor wants them (spec §4.3 "Flow construction").
pub fn group_by_level(resources: Vec<ScaleableResource>) -> Vec<(u32, Vec<ScaleableResource>)> {
    let mut by_level: BTreeMap<u32, Vec<ScaleableResource>> = BTreeMap::new();
    for resource in resources {
        by_level.entry(resource.level).or_default().push(resource);
    }
    by_level.into_iter().collect()
}
