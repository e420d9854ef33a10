//! Endpoint watcher (spec §4.5): reconciles `EndpointSlice` resources and
//! starts a Weeder once a relevant service's endpoints become ready.
//! Readiness predicate grounded on
//! `other_examples/.../sero-rs/src/scaler.rs`'s
//! `ep.conditions.and_then(|epc| epc.serving) == Some(true)` check.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use k8s::watcher::Event;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::weeder::WeederConfig;
use crate::metrics::Metrics;
use crate::weeder::registry::WeederRegistry;

const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileEvent {
    Create,
    Update,
    Delete,
    Generic,
}

pub fn service_name(slice: &EndpointSlice) -> Option<&str> {
    slice
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(SERVICE_NAME_LABEL))
        .map(String::as_str)
}

pub fn is_relevant(service: &str, config: &WeederConfig) -> bool {
    config.services_and_dependant_selectors.contains_key(service)
}

/// True iff every endpoint in the slice reports `conditions.ready == true`.
/// An endpoint slice with no endpoints at all is not considered ready.
pub fn is_ready(slice: &EndpointSlice) -> bool {
    !slice.endpoints.is_empty()
        && slice
            .endpoints
            .iter()
            .all(|ep| ep.conditions.as_ref().and_then(|c| c.ready) == Some(true))
}

/// The admission predicate (spec §4.5 "Readiness transition"): Create/
/// Generic events are admitted only if the slice is ready now; Update
/// events are admitted only on a not-ready -> ready transition; Delete is
/// never admitted.
pub fn admits(event: ReconcileEvent, was_ready: Option<bool>, is_ready_now: bool) -> bool {
    match event {
        ReconcileEvent::Create | ReconcileEvent::Generic => is_ready_now,
        ReconcileEvent::Update => was_ready == Some(false) && is_ready_now,
        ReconcileEvent::Delete => false,
    }
}

#[derive(Debug, Error)]
pub enum EndpointWatcherError {
    #[error("endpoint slice has no '{SERVICE_NAME_LABEL}' label")]
    MissingServiceNameLabel,
}

pub struct Context {
    pub config: WeederConfig,
    pub registry: Arc<WeederRegistry>,
    pub start_weeder: Box<dyn Fn(String, String, CancellationToken) + Send + Sync>,
    /// Root token for process-wide shutdown; every started Weeder's own
    /// token is a child of this one (mirrors `cluster_watcher::Context`).
    pub shutdown: CancellationToken,
    pub metrics: Arc<Metrics>,
    /// Last observed readiness per `(namespace, slice name)`, used to detect
    /// the not-ready -> ready transition `admits` requires for updates. The
    /// raw watch stream gives us `Apply`/`Delete`, not a labeled
    /// create/update/delete; this is what turns the former into the latter.
    readiness: Mutex<HashMap<(String, String), bool>>,
}

impl Context {
    pub fn new(
        config: WeederConfig,
        registry: Arc<WeederRegistry>,
        start_weeder: Box<dyn Fn(String, String, CancellationToken) + Send + Sync>,
        shutdown: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> Self {
        Context {
            config,
            registry,
            start_weeder,
            shutdown,
            metrics,
            readiness: Mutex::new(HashMap::new()),
        }
    }
}

/// Watches `EndpointSlice` resources until `token` is cancelled, reconnecting
/// after a stream error/close the same way `pod_watcher::run` does.
pub async fn run(api: Api<EndpointSlice>, ctx: Arc<Context>, token: CancellationToken) {
    loop {
        if token.is_cancelled() {
            return;
        }

        let config = k8s::watcher::Config::default();
        let mut stream = Box::pin(k8s::watcher::watch(api.clone(), config));

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => handle_event(event, &ctx),
                        Some(Err(err)) => {
                            log::warn!(
                                "{} watch stream error, reconnecting: {err}",
                                term_colors::orange("endpoint-watcher")
                            );
                            break;
                        }
                        None => break,
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

/// The watcher's own `Apply`/`InitApply` framing only tells us whether this
/// event came from the initial relist, not whether the slice is new —
/// every reconnect (the 500ms backoff loop in `run`) redoes a relist and
/// re-emits every still-existing slice as `InitApply`. So create/update is
/// decided from the `readiness` map instead: a slice not yet present in it
/// is a Create regardless of which event variant carried it, and a slice
/// already present is an Update, which only admits on a not-ready -> ready
/// transition — this is what stops a reconnect from spuriously restarting
/// already-running Weeders.
fn handle_event(event: Event<EndpointSlice>, ctx: &Context) {
    let slice = match event {
        Event::Apply(slice) | Event::InitApply(slice) => slice,
        Event::Delete(slice) => {
            let key = (slice.namespace().unwrap_or_default(), slice.name_any());
            ctx.readiness
                .lock()
                .expect("readiness mutex poisoned")
                .remove(&key);
            return;
        }
        Event::Init | Event::InitDone => return,
    };

    let key = (slice.namespace().unwrap_or_default(), slice.name_any());
    let is_ready_now = is_ready(&slice);
    let was_ready = {
        let mut readiness = ctx.readiness.lock().expect("readiness mutex poisoned");
        let was_ready = readiness.insert(key, is_ready_now);
        was_ready
    };
    let reconcile_event = if was_ready.is_some() {
        ReconcileEvent::Update
    } else {
        ReconcileEvent::Create
    };

    if !admits(reconcile_event, was_ready, is_ready_now) {
        return;
    }
    if let Err(err) = handle_ready_slice(&slice, ctx) {
        log::warn!(
            "{} {err}",
            term_colors::orange("endpoint-watcher")
        );
    }
}

/// Called once an admitted event for a relevant, ready slice has been
/// identified; starts (or restarts) the Weeder for that service.
pub fn handle_ready_slice(slice: &EndpointSlice, ctx: &Context) -> Result<(), EndpointWatcherError> {
    let service = service_name(slice).ok_or(EndpointWatcherError::MissingServiceNameLabel)?;
    if !is_relevant(service, &ctx.config) {
        return Ok(());
    }
    let namespace = slice.namespace().unwrap_or_default();
    let token = ctx.shutdown.child_token();
    ctx.registry
        .register((namespace.clone(), service.to_string()), token.clone());
    ctx.metrics.active_weeders.set(ctx.registry.len() as i64);
    (ctx.start_weeder)(namespace, service.to_string(), token);
    Ok(())
}

pub fn error_policy(
    _slice: Arc<EndpointSlice>,
    _err: &EndpointWatcherError,
    _ctx: Arc<Context>,
) -> Action {
    Action::requeue(Duration::from_secs(15))
}
