//! Pod watcher (spec §4.5.1): watches pods matching one label selector and
//! deletes those stuck in `CrashLoopBackOff`. Directly generalized from the
//! teacher's `podmanager/event_watcher.rs` three-phase `select!` loop
//! (combine a `k8s::watcher` stream with a termination signal, recreate the
//! stream with a fixed back-off on tear-down).

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s::watcher::Event;
use k8s::PodExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;

const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Runs until `token` is cancelled. Recreates the underlying watch whenever
/// the server tears it down, so a `CrashLoopBackOff` pod that appears after
/// a tear-down but before `token` fires is still caught (spec §4.5.1
/// "Watch resilience").
pub async fn run(api: Api<Pod>, label_selector: String, metrics: Arc<Metrics>, token: CancellationToken) {
    loop {
        if token.is_cancelled() {
            return;
        }

        let config = k8s::watcher::Config::default().labels(&label_selector);
        let mut stream = Box::pin(k8s::watcher::watch(api.clone(), config));

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => handle_event(&api, event, &metrics).await,
                        Some(Err(err)) => {
                            log::warn!(
                                "{} watch stream error, reconnecting: {err}",
                                term_colors::orange("pod-watcher")
                            );
                            break;
                        }
                        None => {
                            log::debug!(
                                "{} watch stream closed, reconnecting",
                                term_colors::orange("pod-watcher")
                            );
                            break;
                        }
                    }
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
        }
    }
}

async fn handle_event(api: &Api<Pod>, event: Event<Pod>, metrics: &Metrics) {
    match event {
        Event::Apply(pod) | Event::InitApply(pod) => maybe_weed(api, &pod, metrics).await,
        Event::Delete(_) | Event::Init | Event::InitDone => {}
    }
}

/// Deletes `pod` iff it is not already terminating and is stuck in
/// `CrashLoopBackOff` (spec §4.5.1).
async fn maybe_weed(api: &Api<Pod>, pod: &Pod, metrics: &Metrics) {
    if pod.is_terminating() || !pod.crashed() {
        return;
    }
    let name = pod.name_any();
    match api.delete(&name, &DeleteParams::default()).await {
        Ok(_) => {
            metrics.pods_weeded_total.inc();
            log::info!(
                "{} deleted crash-looping pod {}",
                term_colors::green("pod-watcher"),
                term_colors::cyan(&name)
            );
        }
        Err(kube::Error::Api(resp)) if resp.code == 404 => {}
        Err(err) => log::warn!(
            "{} failed to delete crash-looping pod {}: {err}",
            term_colors::red("pod-watcher"),
            term_colors::cyan(&name)
        ),
    }
}
