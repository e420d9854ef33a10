//! The Weeder: a bounded-duration coordinator that spawns one pod watcher
//! per configured selector and tears them all down when its deadline or
//! external cancellation fires (spec §4.5). Grounded on the teacher's
//! `podmanager/garbage_collector.rs` deadline `select!` loop.

pub mod endpoint_watcher;
pub mod pod_watcher;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use crate::weeder::registry::WeederRegistry;

pub struct Weeder {
    pub namespace: String,
    pub service: String,
    pub client: Client,
    pub pod_selectors: Vec<String>,
    pub watch_duration: Duration,
    pub metrics: Arc<Metrics>,
    pub registry: Arc<WeederRegistry>,
    pub token: CancellationToken,
}

impl Weeder {
    /// Spawns one pod watcher task per configured selector, then blocks
    /// until `watch_duration` elapses or `token` is cancelled — whichever
    /// comes first — and cancels every child watcher on the way out.
    pub async fn run(self) {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let children = CancellationToken::new();

        let mut tasks = Vec::new();
        for selector in &self.pod_selectors {
            let api = api.clone();
            let selector = selector.clone();
            let child_token = children.child_token();
            self.metrics.record_tick();
            tasks.push(tokio::spawn(pod_watcher::run(
                api,
                selector,
                self.metrics.clone(),
                child_token,
            )));
        }

        log::info!(
            "{} watching {} for {:?} across {} selector(s)",
            term_colors::cyan("weeder"),
            term_colors::cyan(&self.service),
            self.watch_duration,
            tasks.len()
        );

        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep(self.watch_duration) => {}
        }

        children.cancel();
        for task in tasks {
            let _ = task.await;
        }

        // If our own token is still uncancelled, nothing has replaced this
        // registration yet (a replacing Register always cancels the old
        // token first) — safe to drop our own entry (spec §4.5 "Expiry =>
        // all watchers stop => registry entry is dropped"). If it's already
        // cancelled, either a newer Weeder has taken our slot (leave its
        // entry alone) or the process is shutting down (nothing to clean up).
        if !self.token.is_cancelled() {
            self.registry
                .unregister(&(self.namespace.clone(), self.service.clone()));
            self.metrics.active_weeders.set(self.registry.len() as i64);
        }

        log::debug!(
            "{} watch window for {} closed",
            term_colors::cyan("weeder"),
            term_colors::cyan(&self.service)
        );
    }
}
