//! The Prober: a long-running per-cluster control loop (spec §4.2).

pub mod cluster_watcher;
pub mod lease;
pub mod probe_status;
pub mod registry;
pub mod shoot_client;

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::Client;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::ProberConfig;
use crate::metrics::Metrics;
use crate::scaler::{self, Scaler};
use crate::types::ShootView;
use lease::LeaseOutcome;
use probe_status::ProbeStatus;

pub struct Prober {
    pub cluster_key: String,
    pub namespace: String,
    pub seed_client: Client,
    pub config: ProberConfig,
    pub kcm_node_monitor_grace_duration: Duration,
    pub metrics: Arc<Metrics>,
    pub token: CancellationToken,
}

impl Prober {
    /// Applies jitter to `probeInterval` the way the spec's back-off jitter
    /// factor is documented (spec §3 `backoffJitterFactor`): a uniform
    /// perturbation of ±factor around the base interval.
    fn jittered_interval(&self) -> Duration {
        jitter(
            self.config.probe_interval,
            self.config.backoff_jitter_factor,
            &mut rand::thread_rng(),
        )
    }

    pub async fn run(self) {
        crate::retry::sleep_or_cancel(&self.token, self.config.initial_delay).await;

        let mut api_server_status =
            ProbeStatus::new(self.config.success_threshold, self.config.failure_threshold);
        let mut lease_status =
            ProbeStatus::new(self.config.success_threshold, self.config.failure_threshold);

        let scaler = Scaler::new(
            self.seed_client.clone(),
            self.namespace.clone(),
            self.config.dependent_resource_infos.clone(),
        );

        while !self.token.is_cancelled() {
            self.metrics.record_tick();
            self.tick(&mut api_server_status, &mut lease_status, &scaler).await;
            crate::retry::sleep_or_cancel(&self.token, self.jittered_interval()).await;
        }
    }

    async fn tick(
        &self,
        api_server_status: &mut ProbeStatus,
        lease_status: &mut ProbeStatus,
        scaler: &Scaler,
    ) {
        let now = Instant::now();
        if api_server_status.in_backoff(now) {
            return;
        }

        let shoot_client = match shoot_client::build(
            self.seed_client.clone(),
            &self.namespace,
            &self.config.kube_config_secret_name,
            self.config.probe_timeout,
            &self.token,
        )
        .await
        {
            Ok(client) => client,
            Err(err) => {
                log::debug!(
                    "{} could not obtain a shoot client for {}: {err}",
                    term_colors::orange("prober"),
                    term_colors::cyan(&self.cluster_key)
                );
                return;
            }
        };

        match shoot_client.apiserver_version().await {
            Ok(_) => {
                api_server_status.record_success();
                self.metrics.probe_success_total.inc();
            }
            Err(err) => {
                self.metrics.probe_failure_total.inc();
                match k8s::errors::classify(&err) {
                    k8s::errors::ErrorClass::Ignorable => {}
                    k8s::errors::ErrorClass::RateLimited => {
                        api_server_status
                            .record_rate_limited(self.config.rate_limited_backoff, now);
                    }
                    k8s::errors::ErrorClass::NonIgnorable => {
                        api_server_status.record_failure(
                            err.to_string(),
                            self.config.api_server_probe_failure_backoff,
                            now,
                        );
                    }
                }
                return;
            }
        }

        if !api_server_status.is_healthy() {
            return;
        }

        let lease_outcome = self.probe_leases(&shoot_client).await;
        match lease_outcome {
            LeaseOutcome::Indeterminate => return,
            LeaseOutcome::Healthy => lease_status.record_success(),
            LeaseOutcome::Unhealthy => {
                lease_status.record_failure("lease expiry fraction exceeded threshold", Duration::ZERO, now)
            }
        }

        if lease_status.is_unhealthy() {
            log::info!(
                "{} {} unhealthy, scaling down dependents",
                term_colors::red("prober"),
                term_colors::cyan(&self.cluster_key)
            );
            if let Err(err) = scaler.scale_down(&self.token).await {
                log::warn!("scale-down for {} failed: {err}", self.cluster_key);
            } else {
                self.metrics.scale_down_total.inc();
            }
        } else if lease_status.is_healthy() {
            log::info!(
                "{} {} healthy, scaling up dependents",
                term_colors::green("prober"),
                term_colors::cyan(&self.cluster_key)
            );
            if let Err(err) = scaler.scale_up(&self.token).await {
                log::warn!("scale-up for {} failed: {err}", self.cluster_key);
            } else {
                self.metrics.scale_up_total.inc();
            }
        }
    }

    async fn probe_leases(&self, shoot_client: &Client) -> LeaseOutcome {
        use kube::api::ResourceExt;

        let api = lease::leases_api(shoot_client.clone());
        let leases = match api.list(&lease::list_params()).await {
            Ok(list) => list,
            Err(_) => return LeaseOutcome::Indeterminate,
        };

        let now = chrono::Utc::now();
        let observations: Vec<lease::LeaseObservation> = leases
            .items
            .iter()
            .map(|l| lease::LeaseObservation {
                has_owner_ref: !l.owner_references().is_empty(),
                renew_time: l
                    .spec
                    .as_ref()
                    .and_then(|s| s.renew_time.as_ref())
                    .map(|t| t.0),
                lease_duration: l
                    .spec
                    .as_ref()
                    .and_then(|s| s.lease_duration_seconds)
                    .map(|secs| Duration::from_secs(secs.max(0) as u64)),
            })
            .collect();

        lease::classify(
            &observations,
            now,
            self.kcm_node_monitor_grace_duration,
            self.config.lease_failure_threshold_fraction,
        )
    }
}

pub use scaler::ScalerError;

/// A uniform perturbation of `base` by up to ±`factor` (clamped to
/// `[0, 1]`), never returning a negative duration. Factored out of
/// `Prober::jittered_interval` so it can be unit tested without needing a
/// live `kube::Client`.
fn jitter(base: Duration, factor: f64, rng: &mut impl Rng) -> Duration {
    let factor = factor.clamp(0.0, 1.0);
    let base_secs = base.as_secs_f64();
    let delta = base_secs * factor;
    let perturbation = if delta > 0.0 {
        rng.gen_range(-delta..=delta)
    } else {
        0.0
    };
    Duration::from_secs_f64((base_secs + perturbation).max(0.0))
}
