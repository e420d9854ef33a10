//! Level-grouped concurrent DAG executor (spec §4.3, §9 "a small DAG
//! executor that runs equi-level tasks concurrently and joins between
//! levels"). Generalized from
//! `other_examples/.../sero-rs/src/scaler.rs`'s two-task `tokio::join!`
//! orchestration to an arbitrary number of ordered levels.

use kube::Client;
use tokio_util::sync::CancellationToken;

use super::resource::{self, ResourceError};
use crate::types::{group_by_level, ScaleableResource};

/// Runs `resources` level by level: every task in level N runs concurrently,
/// and level N+1 does not start until every task in level N has returned
/// (spec §4.3 "Flow construction"). Returns the first error encountered;
/// every task in the failing level is still allowed to finish so a single
/// slow task doesn't get silently abandoned mid-write.
pub async fn execute(
    client: &Client,
    namespace: &str,
    resources: Vec<ScaleableResource>,
    token: &CancellationToken,
) -> Result<(), ResourceError> {
    let levels = group_by_level(resources);
    let mut upstream: Vec<ScaleableResource> = Vec::new();
    let mut first_error: Option<ResourceError> = None;

    for (_level, tasks) in levels {
        let results = futures::future::join_all(tasks.iter().map(|task| {
            resource::apply(client, namespace, task, &upstream, token)
        }))
        .await;

        for result in results {
            if let Err(err) = result {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        if let Some(err) = first_error.take() {
            return Err(err);
        }

        upstream.extend(tasks);
    }

    Ok(())
}
