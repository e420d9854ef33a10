//! `PodExt` answers the one question the pod watcher (spec §4.5.1) actually
//! needs answered: is this pod stuck in `CrashLoopBackOff`? Modeled on the
//! teacher's own `PodExt` trait, trimmed to what this watchdog uses.

use k8s_openapi::api::core::v1::{ContainerState, Pod, PodStatus};

pub trait PodExt {
    /// True iff at least one container is `Waiting` with reason
    /// `CrashLoopBackOff`.
    fn crashed(&self) -> bool;

    /// True iff the pod carries a deletion timestamp already.
    fn is_terminating(&self) -> bool;
}

impl PodExt for Pod {
    fn crashed(&self) -> bool {
        let default_state = ContainerState::default();
        let default_status = PodStatus::default();
        let default_statuses = vec![];
        self.status
            .as_ref()
            .unwrap_or(&default_status)
            .container_statuses
            .as_ref()
            .unwrap_or(&default_statuses)
            .iter()
            .any(|status| {
                let state = status.state.as_ref().unwrap_or(&default_state);
                matches!(
                    state.waiting.as_ref().and_then(|w| w.reason.as_deref()),
                    Some("CrashLoopBackOff")
                )
            })
    }

    fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateWaiting, ContainerStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod_with_waiting_reason(reason: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta::default(),
            spec: None,
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    state: Some(ContainerState {
                        waiting: reason.map(|r| ContainerStateWaiting {
                            reason: Some(r.to_string()),
                            message: None,
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn crash_loop_back_off_is_detected() {
        assert!(pod_with_waiting_reason(Some("CrashLoopBackOff")).crashed());
    }

    #[test]
    fn other_waiting_reasons_are_not_crashed() {
        assert!(!pod_with_waiting_reason(Some("ContainerCreating")).crashed());
    }

    #[test]
    fn no_status_is_not_crashed() {
        let pod = Pod {
            metadata: ObjectMeta::default(),
            spec: None,
            status: None,
        };
        assert!(!pod.crashed());
    }

    #[test]
    fn terminating_pod_carries_deletion_timestamp() {
        let mut pod = pod_with_waiting_reason(Some("CrashLoopBackOff"));
        assert!(!pod.is_terminating());
        pod.metadata.deletion_timestamp =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                chrono::Utc::now(),
            ));
        assert!(pod.is_terminating());
    }
}
