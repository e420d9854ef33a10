//! Cluster lifecycle watcher (spec §4.1): reconciles Gardener's
//! `extensions.gardener.cloud/v1alpha1` `Cluster` resource and decides
//! whether a Prober should be present for it.
//!
//! The `Cluster` resource already exists in every seed; this crate does not
//! own or install its schema. `#[derive(CustomResource)]` is used purely to
//! get a typed `Api<Cluster>`, the same way
//! `examples/eosin-platform-eosin/types/src/lib.rs` types its own owned
//! `Cluster` CRD — here the derive's generated `crd()`/`Cluster::crd()`
//! YAML is simply never installed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use kube::runtime::controller::Action;
use kube::{Api, Client, CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use crate::prober::registry::ProberRegistry;
use crate::types::{LastOperation, LastOperationState, LastOperationType, ShootView, WorkerPool};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "extensions.gardener.cloud",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced
)]
pub struct ClusterSpec {
    pub cloud_profile: RawExtension,
    pub seed: RawExtension,
    pub shoot: RawExtension,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cluster resource has no embedded shoot payload")]
    MissingShoot,
    #[error("failed to decode embedded shoot payload: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Decodes the fields the admission predicate and the scaler need out of
/// the `Cluster` resource's embedded `spec.shoot` raw JSON (spec §3 "Shoot
/// view").
pub fn decode_shoot_view(cluster: &Cluster) -> Result<ShootView, DecodeError> {
    let shoot: Value = cluster
        .spec
        .shoot
        .0
        .clone();
    if shoot.is_null() {
        return Err(DecodeError::MissingShoot);
    }

    let hibernation_enabled_spec = shoot
        .pointer("/spec/hibernation/enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let hibernation_enabled_status = shoot
        .pointer("/status/isHibernated")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let deletion_timestamp_set = shoot
        .pointer("/metadata/deletionTimestamp")
        .map(|v| !v.is_null())
        .unwrap_or(false);

    let last_operation = shoot
        .pointer("/status/lastOperation")
        .map(|lo| parse_last_operation(lo))
        .transpose()?;

    let kcm_node_monitor_grace_period = shoot
        .pointer("/spec/kubernetes/kubeControllerManager/nodeMonitorGracePeriod")
        .and_then(Value::as_str)
        .and_then(|raw| humantime::parse_duration(raw).ok());

    let worker_pools = shoot
        .pointer("/spec/provider/workers")
        .and_then(Value::as_array)
        .map(|workers| {
            workers
                .iter()
                .map(|worker| WorkerPool {
                    name: worker
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    unhealthy_node_conditions: worker
                        .pointer("/machineControllerManager/unhealthyNodeConditions")
                        .and_then(Value::as_array)
                        .map(|conditions| {
                            conditions
                                .iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ShootView {
        hibernation_enabled_spec,
        hibernation_enabled_status,
        deletion_timestamp_set,
        last_operation,
        worker_pools,
        kcm_node_monitor_grace_period,
    })
}

fn parse_last_operation(value: &Value) -> Result<LastOperation, DecodeError> {
    let op_type = match value.get("type").and_then(Value::as_str) {
        Some("Create") => LastOperationType::Create,
        Some("Reconcile") => LastOperationType::Reconcile,
        Some("Restore") => LastOperationType::Restore,
        Some("Migrate") => LastOperationType::Migrate,
        Some("Delete") => LastOperationType::Delete,
        _ => {
            return Err(DecodeError::Malformed(serde::de::Error::custom(
                "unrecognized lastOperation.type",
            )))
        }
    };
    let state = match value.get("state").and_then(Value::as_str) {
        Some("Processing") => LastOperationState::Processing,
        Some("Pending") => LastOperationState::Pending,
        Some("Error") => LastOperationState::Error,
        Some("Aborted") => LastOperationState::Aborted,
        Some("Failed") => LastOperationState::Failed,
        Some("Succeeded") => LastOperationState::Succeeded,
        _ => {
            return Err(DecodeError::Malformed(serde::de::Error::custom(
                "unrecognized lastOperation.state",
            )))
        }
    };
    Ok(LastOperation { op_type, state })
}

/// The admission predicate (spec §4.1): must hold for a Prober to be
/// started/kept for this cluster.
pub fn admits(shoot: &ShootView) -> bool {
    if shoot.deletion_timestamp_set {
        return false;
    }
    if shoot.hibernation_enabled_spec || shoot.hibernation_enabled_status {
        return false;
    }
    if shoot.worker_pools.is_empty() {
        return false;
    }
    let Some(last_operation) = &shoot.last_operation else {
        return false;
    };
    match last_operation.op_type {
        LastOperationType::Migrate => false,
        LastOperationType::Reconcile => true,
        LastOperationType::Create | LastOperationType::Restore => {
            matches!(last_operation.state, LastOperationState::Succeeded)
        }
        LastOperationType::Delete => false,
    }
}

pub struct Context {
    pub client: Client,
    pub registry: Arc<ProberRegistry>,
    pub default_kcm_node_monitor_grace_duration: Duration,
    pub start_prober: Box<dyn Fn(String, ShootView, CancellationToken) + Send + Sync>,
    /// Root token for process-wide shutdown; every started Prober's own
    /// token is a child of this one so a single cancellation tears all of
    /// them down alongside the registry's own per-cluster cancellation.
    pub shutdown: CancellationToken,
    pub metrics: Arc<Metrics>,
}

pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action, DecodeError> {
    let key = cluster.name_any();
    let view = match decode_shoot_view(&cluster) {
        Ok(view) => view,
        Err(err) => {
            log::warn!(
                "{} could not decode shoot view for {}: {err}; unregistering any existing prober",
                term_colors::orange("cluster-watcher"),
                term_colors::cyan(&key)
            );
            ctx.registry.unregister(&key);
            ctx.metrics.active_probers.set(ctx.registry.len() as i64);
            return Ok(Action::requeue(Duration::from_secs(30)));
        }
    };

    if admits(&view) {
        let token = ctx.shutdown.child_token();
        if ctx.registry.register(key.clone(), token.clone()) {
            log::info!("{} starting prober for {}", term_colors::green("cluster-watcher"), term_colors::cyan(&key));
            (ctx.start_prober)(key, view, token);
        }
    } else {
        ctx.registry.unregister(&key);
    }
    ctx.metrics.active_probers.set(ctx.registry.len() as i64);

    Ok(Action::requeue(Duration::from_secs(60)))
}

pub fn error_policy(_cluster: Arc<Cluster>, _err: &DecodeError, _ctx: Arc<Context>) -> Action {
    Action::requeue(Duration::from_secs(30))
}

/// A pre-reconcile filter dropping events that cannot possibly change the
/// admission decision (spec §4.1: "a create/delete event for a cluster
/// without workers must be filtered out before reaching the reconciler").
pub fn worth_reconciling(old: Option<&ShootView>, new: &ShootView) -> bool {
    !new.worker_pools.is_empty() || old.is_some_and(|old| !old.worker_pools.is_empty())
}

#[allow(dead_code)]
fn new_cluster_api(client: Client, namespace: &str) -> Api<Cluster> {
    Api::namespaced(client, namespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shoot(op_type: LastOperationType, state: LastOperationState, workers: usize) -> ShootView {
        ShootView {
            hibernation_enabled_spec: false,
            hibernation_enabled_status: false,
            deletion_timestamp_set: false,
            last_operation: Some(LastOperation { op_type, state }),
            worker_pools: (0..workers)
                .map(|i| WorkerPool {
                    name: format!("pool-{i}"),
                    unhealthy_node_conditions: vec![],
                })
                .collect(),
            kcm_node_monitor_grace_period: None,
        }
    }

    #[test]
    fn reconcile_admits_with_no_conditions() {
        assert!(admits(&shoot(LastOperationType::Reconcile, LastOperationState::Error, 1)));
    }

    #[test]
    fn create_requires_succeeded() {
        assert!(!admits(&shoot(LastOperationType::Create, LastOperationState::Processing, 1)));
        assert!(admits(&shoot(LastOperationType::Create, LastOperationState::Succeeded, 1)));
    }

    #[test]
    fn restore_requires_succeeded() {
        assert!(!admits(&shoot(LastOperationType::Restore, LastOperationState::Processing, 1)));
        assert!(admits(&shoot(LastOperationType::Restore, LastOperationState::Succeeded, 1)));
    }

    #[test]
    fn migrate_is_never_admitted() {
        assert!(!admits(&shoot(LastOperationType::Migrate, LastOperationState::Succeeded, 1)));
    }

    #[test]
    fn no_workers_is_rejected() {
        assert!(!admits(&shoot(LastOperationType::Reconcile, LastOperationState::Succeeded, 0)));
    }

    #[test]
    fn hibernating_cluster_is_rejected() {
        let mut view = shoot(LastOperationType::Reconcile, LastOperationState::Succeeded, 1);
        view.hibernation_enabled_spec = true;
        assert!(!admits(&view));
    }

    #[test]
    fn deletion_timestamp_is_rejected() {
        let mut view = shoot(LastOperationType::Reconcile, LastOperationState::Succeeded, 1);
        view.deletion_timestamp_set = true;
        assert!(!admits(&view));
    }

    #[test]
    fn missing_last_operation_is_rejected() {
        let mut view = shoot(LastOperationType::Reconcile, LastOperationState::Succeeded, 1);
        view.last_operation = None;
        assert!(!admits(&view));
    }

    #[test]
    fn worth_reconciling_admits_transition_either_direction() {
        let empty = shoot(LastOperationType::Reconcile, LastOperationState::Succeeded, 0);
        let non_empty = shoot(LastOperationType::Reconcile, LastOperationState::Succeeded, 1);
        assert!(worth_reconciling(Some(&empty), &non_empty));
        assert!(worth_reconciling(Some(&non_empty), &empty));
        assert!(!worth_reconciling(Some(&empty), &empty));
    }
}
