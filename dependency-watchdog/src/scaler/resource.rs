//! Per-resource scale operation (spec §4.3, steps 1-7). Grounded on
//! `other_examples/.../sero-rs/src/scaler.rs`'s `get_scale`/`patch_scale`
//! calls, generalized from a single hard-coded `Deployment` to an arbitrary
//! GVK addressed through `kube::discovery::ApiResource` +
//! `Api<DynamicObject>`.

use std::time::Duration;

use k8s_openapi::api::autoscaling::v1::Scale;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::{Client, Error as KubeError};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::retry::{retry, sleep_or_cancel, Backoff, RetryError};
use crate::types::{Operation, ScaleableResource, IGNORE_SCALING_ANNOTATION, REPLICAS_ANNOTATION};

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("operation was cancelled")]
    Cancelled,
    #[error("timed out waiting on {0}")]
    Timeout(String),
    #[error("Kubernetes API error: {0}")]
    Api(#[source] KubeError),
}

fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

pub fn dynamic_api(client: &Client, resource: &ScaleableResource, namespace: &str) -> Api<DynamicObject> {
    let (group, version) = parse_api_version(&resource.reference.api_version);
    let gvk = GroupVersionKind::gvk(&group, &version, &resource.reference.kind);
    let ar = ApiResource::from_gvk_with_plural(
        &gvk,
        &format!("{}s", resource.reference.kind.to_lowercase()),
    );
    Api::namespaced_with(client.clone(), namespace, &ar)
}

fn is_not_found(err: &KubeError) -> bool {
    matches!(err, KubeError::Api(resp) if resp.code == 404)
}

fn annotation(object: &DynamicObject, key: &str) -> Option<String> {
    object
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .cloned()
}

fn ignore_scaling(object: &DynamicObject) -> bool {
    annotation(object, IGNORE_SCALING_ANNOTATION).as_deref() == Some("true")
}

/// Computes `targetReplicas` (spec §4.3 step 3).
fn target_replicas(resource: &ScaleableResource, object: &DynamicObject) -> i32 {
    match resource.operation {
        Operation::Down => 0,
        Operation::Up => match annotation(object, REPLICAS_ANNOTATION).and_then(|v| v.parse::<i32>().ok())
        {
            Some(saved) if saved > 0 => saved,
            _ => {
                log::debug!(
                    "{} has no usable '{REPLICAS_ANNOTATION}' annotation, using default {}",
                    resource.reference.name,
                    resource.default_replicas
                );
                resource.default_replicas
            }
        },
    }
}

fn already_satisfied(operation: Operation, current: i32, target: i32) -> bool {
    match operation {
        Operation::Up => current >= target,
        Operation::Down => current <= target,
    }
}

/// Runs one `ScaleableResource`'s full operation: initial delay, fetch,
/// skip checks, wait-gate on upstream resources, apply with retry (spec
/// §4.3 steps 1-7).
pub async fn apply(
    client: &Client,
    namespace: &str,
    resource: &ScaleableResource,
    upstream: &[ScaleableResource],
    token: &CancellationToken,
) -> Result<(), ResourceError> {
    sleep_or_cancel(token, resource.initial_delay).await;
    if token.is_cancelled() {
        return Err(ResourceError::Cancelled);
    }

    let api = dynamic_api(client, resource, namespace);

    let object = match api.get(&resource.reference.name).await {
        Ok(obj) => obj,
        Err(err) if is_not_found(&err) && resource.optional => return Ok(()),
        Err(err) => return Err(ResourceError::Api(err)),
    };

    if ignore_scaling(&object) {
        return Ok(());
    }

    let target = target_replicas(resource, &object);

    let scale = match api.get_scale(&resource.reference.name).await {
        Ok(scale) => scale,
        Err(err) if is_not_found(&err) && resource.optional => return Ok(()),
        Err(err) => return Err(ResourceError::Api(err)),
    };
    let current = scale.spec.and_then(|s| s.replicas).unwrap_or(0);

    if already_satisfied(resource.operation, current, target) {
        return Ok(());
    }

    wait_for_upstream(client, namespace, resource.operation, upstream, token, resource.timeout).await?;

    retry(token, 3, Backoff::Linear(Duration::from_millis(100)), || {
        let api = api.clone();
        let resource = resource.clone();
        async move { apply_once(&api, &resource, target).await }
    })
    .await
    .map_err(|err| match err {
        RetryError::Cancelled => ResourceError::Cancelled,
        RetryError::Exhausted(err) => err,
    })
}

async fn apply_once(
    api: &Api<DynamicObject>,
    resource: &ScaleableResource,
    target: i32,
) -> Result<(), ResourceError> {
    let patch = json!({ "spec": { "replicas": target } });
    api.patch_scale(
        &resource.reference.name,
        &PatchParams::apply("dependency-watchdog").force(),
        &Patch::Apply(&patch),
    )
    .await
    .map_err(ResourceError::Api)?;

    match resource.operation {
        Operation::Down => {
            let annotate = json!({
                "metadata": { "annotations": { REPLICAS_ANNOTATION: target.to_string() } }
            });
            api.patch(
                &resource.reference.name,
                &PatchParams::apply("dependency-watchdog"),
                &Patch::Merge(annotate),
            )
            .await
            .map_err(ResourceError::Api)?;
        }
        Operation::Up => {
            let remove_annotation = json!({
                "metadata": { "annotations": { REPLICAS_ANNOTATION: serde_json::Value::Null } }
            });
            api.patch(
                &resource.reference.name,
                &PatchParams::apply("dependency-watchdog"),
                &Patch::Merge(remove_annotation),
            )
            .await
            .map_err(ResourceError::Api)?;
        }
    }
    Ok(())
}

/// Blocks until every upstream resource's *observed* replica count matches
/// its own direction, or `timeout` elapses (spec §4.3 step 5). Resources
/// that are optional-and-absent or annotated `ignore-scaling=true` count as
/// already satisfied.
async fn wait_for_upstream(
    client: &Client,
    namespace: &str,
    operation: Operation,
    upstream: &[ScaleableResource],
    token: &CancellationToken,
    timeout: Duration,
) -> Result<(), ResourceError> {
    if upstream.is_empty() {
        return Ok(());
    }
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let mut all_satisfied = true;
        for dependency in upstream {
            let api = dynamic_api(client, dependency, namespace);
            let satisfied = match api.get_scale(&dependency.reference.name).await {
                Ok(scale) => {
                    let observed = scale.status.as_ref().map(|s| s.replicas).unwrap_or(0);
                    let target = dependency_target(dependency, &scale);
                    already_satisfied(operation, observed, target)
                }
                Err(err) if is_not_found(&err) && dependency.optional => true,
                Err(_) => false,
            };
            if !satisfied {
                all_satisfied = false;
                break;
            }
        }
        if all_satisfied {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(ResourceError::Timeout(format!(
                "upstream resources for operation {:?}",
                operation
            )));
        }
        if token.is_cancelled() {
            return Err(ResourceError::Cancelled);
        }
        sleep_or_cancel(token, Duration::from_millis(100)).await;
    }
}

/// The dependency's actual computed target (spec §4.3 step 3), recovered
/// from its own Scale subresource rather than assumed to be its configured
/// default — an upstream resource scaled up via the saved
/// `dependency-watchdog.gardener.cloud/replicas` annotation has a target
/// that can differ from `default_replicas`, and the wait-gate must match
/// against what the dependency was actually scaled to.
fn dependency_target(dependency: &ScaleableResource, scale: &Scale) -> i32 {
    match dependency.operation {
        Operation::Down => 0,
        Operation::Up => scale
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(REPLICAS_ANNOTATION))
            .and_then(|v| v.parse::<i32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(dependency.default_replicas),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceRef, DEFAULT_SCALE_TIMEOUT};

    fn resource(operation: Operation) -> ScaleableResource {
        ScaleableResource {
            reference: ResourceRef {
                api_version: "apps/v1".into(),
                kind: "Deployment".into(),
                name: "machine-controller-manager".into(),
            },
            optional: false,
            level: 0,
            initial_delay: Duration::ZERO,
            timeout: DEFAULT_SCALE_TIMEOUT,
            operation,
            default_replicas: 1,
        }
    }

    #[test]
    fn scale_up_is_satisfied_once_current_meets_target() {
        assert!(already_satisfied(Operation::Up, 1, 1));
        assert!(already_satisfied(Operation::Up, 2, 1));
        assert!(!already_satisfied(Operation::Up, 0, 1));
    }

    #[test]
    fn scale_down_is_satisfied_once_current_meets_target() {
        assert!(already_satisfied(Operation::Down, 0, 0));
        assert!(!already_satisfied(Operation::Down, 1, 0));
    }

    #[test]
    fn target_for_scale_down_is_always_zero() {
        let resource = resource(Operation::Down);
        let object = DynamicObject::new("mcm", &ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("apps", "v1", "Deployment"),
            "deployments",
        ));
        assert_eq!(target_replicas(&resource, &object), 0);
    }

    #[test]
    fn target_for_scale_up_falls_back_to_default_without_annotation() {
        let resource = resource(Operation::Up);
        let object = DynamicObject::new("mcm", &ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("apps", "v1", "Deployment"),
            "deployments",
        ));
        assert_eq!(target_replicas(&resource, &object), 1);
    }

    #[test]
    fn target_for_scale_up_prefers_saved_annotation() {
        let resource = resource(Operation::Up);
        let mut object = DynamicObject::new("mcm", &ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("apps", "v1", "Deployment"),
            "deployments",
        ));
        object.metadata.annotations = Some(
            [(REPLICAS_ANNOTATION.to_string(), "4".to_string())]
                .into_iter()
                .collect(),
        );
        assert_eq!(target_replicas(&resource, &object), 4);
    }

    #[test]
    fn ignore_scaling_annotation_is_detected() {
        let mut object = DynamicObject::new("mcm", &ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("apps", "v1", "Deployment"),
            "deployments",
        ));
        assert!(!ignore_scaling(&object));
        object.metadata.annotations = Some(
            [(IGNORE_SCALING_ANNOTATION.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(ignore_scaling(&object));
    }

    fn scale_with_annotation(value: Option<&str>) -> Scale {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

        Scale {
            metadata: ObjectMeta {
                annotations: value.map(|v| {
                    [(REPLICAS_ANNOTATION.to_string(), v.to_string())]
                        .into_iter()
                        .collect()
                }),
                ..Default::default()
            },
            spec: None,
            status: None,
        }
    }

    #[test]
    fn dependency_target_for_scale_down_is_always_zero() {
        let dependency = resource(Operation::Down);
        assert_eq!(dependency_target(&dependency, &scale_with_annotation(Some("5"))), 0);
    }

    #[test]
    fn dependency_target_for_scale_up_prefers_saved_annotation_over_default() {
        let dependency = resource(Operation::Up);
        assert_eq!(dependency_target(&dependency, &scale_with_annotation(Some("4"))), 4);
    }

    #[test]
    fn dependency_target_for_scale_up_falls_back_to_default_without_annotation() {
        let dependency = resource(Operation::Up);
        assert_eq!(dependency_target(&dependency, &scale_with_annotation(None)), 1);
    }
}
