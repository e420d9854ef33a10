//! Entry point (spec §6): parses the CLI, loads and validates the selected
//! subcommand's config file, then runs either the Prober or the Weeder
//! subsystem until a termination signal arrives. Modeled on
//! `examples/eosin-platform-eosin/storage/src/main.rs`'s
//! `Cli::parse()` -> `match cli.command` shape.

mod cli;
mod config;
mod duration_serde;
mod manager;
mod metrics;
mod prober;
mod retry;
mod scaler;
mod types;
mod weeder;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::Api;
use kube::runtime::watcher;
use kube::runtime::Controller;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands, ProberArgs, WeederArgs};
use config::{ProberConfig, WeederConfig};
use manager::ManagerOpts;
use metrics::Metrics;
use prober::cluster_watcher::{self, Cluster};
use prober::registry::ProberRegistry;
use prober::Prober;
use weeder::endpoint_watcher;
use weeder::registry::WeederRegistry;
use weeder::Weeder;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Prober(args) => run_prober(args).await,
        Commands::Weeder(args) => run_weeder(args).await,
    }
}

async fn run_prober(args: ProberArgs) -> Result<()> {
    let config: ProberConfig = config::load_yaml(&args.config_file)
        .with_context(|| format!("loading {}", args.config_file.display()))?;
    config.validate().context("prober config failed validation")?;

    let opts = ManagerOpts::from(&args.shared);
    let client = k8s::client::new_with_kubeconfig(args.shared.kubeconfig.as_deref())
        .await
        .context("building seed client")?;

    let metrics = Metrics::new();
    let registry = ProberRegistry::new();
    let shutdown = CancellationToken::new();

    let metrics_task = tokio::spawn(spawn_metrics(metrics.clone(), opts.clone(), shutdown.clone()));

    let config = Arc::new(config);
    let client_for_probers = client.clone();
    let metrics_for_probers = metrics.clone();
    let default_grace = config.kcm_node_monitor_grace_duration;
    let config_for_probers = config.clone();

    let ctx = Arc::new(cluster_watcher::Context {
        client: client.clone(),
        registry: registry.clone(),
        default_kcm_node_monitor_grace_duration: default_grace,
        start_prober: Box::new(move |key, view, token| {
            let namespace = key.clone();
            let grace_duration = view.kcm_node_monitor_grace_period.unwrap_or(default_grace);
            let prober = Prober {
                cluster_key: key,
                namespace,
                seed_client: client_for_probers.clone(),
                config: (*config_for_probers).clone(),
                kcm_node_monitor_grace_duration: grace_duration,
                metrics: metrics_for_probers.clone(),
                token,
            };
            tokio::spawn(prober.run());
        }),
        shutdown: shutdown.clone(),
        metrics: metrics.clone(),
    });

    log::info!(
        "{} prober starting ({} concurrent reconcile(s))",
        term_colors::green("dependency-watchdog"),
        opts.concurrent_reconciles
    );

    let clusters: Api<Cluster> = Api::all(client.clone());
    Controller::new(clusters, watcher::Config::default())
        .shutdown_on_signal()
        .with_config(
            kube::runtime::controller::Config::default()
                .concurrency(opts.concurrent_reconciles as u16),
        )
        .run(cluster_watcher::reconcile, cluster_watcher::error_policy, ctx)
        .for_each(|result| async move {
            if let Err(err) = result {
                log::warn!("{} reconcile error: {err}", term_colors::orange("cluster-watcher"));
            }
        })
        .await;

    shutdown.cancel();
    let _ = metrics_task.await;
    Ok(())
}

async fn run_weeder(args: WeederArgs) -> Result<()> {
    let config: WeederConfig = config::load_yaml(&args.config_file)
        .with_context(|| format!("loading {}", args.config_file.display()))?;
    config.validate().context("weeder config failed validation")?;

    let opts = ManagerOpts::from(&args.shared);
    let client = k8s::client::new_with_kubeconfig(args.shared.kubeconfig.as_deref())
        .await
        .context("building seed client")?;

    let metrics = Metrics::new();
    let registry = WeederRegistry::new();
    let shutdown = CancellationToken::new();

    let metrics_task = tokio::spawn(spawn_metrics(metrics.clone(), opts.clone(), shutdown.clone()));

    let watch_duration = config.watch_duration;
    let selectors = config.services_and_dependant_selectors.clone();
    let client_for_weeders = client.clone();
    let metrics_for_weeders = metrics.clone();
    let registry_for_weeders = registry.clone();

    let ctx = Arc::new(endpoint_watcher::Context::new(
        config,
        registry,
        Box::new(move |namespace, service, token| {
            let Some(selectors) = selectors.get(&service) else {
                return;
            };
            let weeder = Weeder {
                namespace,
                service,
                client: client_for_weeders.clone(),
                pod_selectors: selectors.pod_selectors.clone(),
                watch_duration,
                metrics: metrics_for_weeders.clone(),
                registry: registry_for_weeders.clone(),
                token,
            };
            tokio::spawn(weeder.run());
        }),
        shutdown.clone(),
        metrics.clone(),
    ));

    log::info!(
        "{} weeder starting ({} concurrent reconcile(s))",
        term_colors::green("dependency-watchdog"),
        opts.concurrent_reconciles
    );

    let slices: Api<EndpointSlice> = Api::all(client.clone());
    let watch = tokio::spawn(endpoint_watcher::run(slices, ctx, shutdown.clone()));

    tokio::signal::ctrl_c().await.ok();
    shutdown.cancel();
    let _ = watch.await;
    let _ = metrics_task.await;
    Ok(())
}

/// Serves `/metrics` and `/healthz` on both the metrics and health bind
/// addresses (they are usually the same host:port pair apart from the
/// port; each listener answers either path, matching a typical
/// controller-manager's separate `--metrics-bind-address` /
/// `--health-probe-bind-address` flags).
async fn spawn_metrics(metrics: Arc<Metrics>, opts: ManagerOpts, token: CancellationToken) {
    let mut addrs = vec![opts.metrics_bind_address.clone()];
    if opts.health_bind_address != opts.metrics_bind_address {
        addrs.push(opts.health_bind_address.clone());
    }

    let mut listeners = Vec::new();
    for raw in addrs {
        match raw.parse() {
            Ok(addr) => listeners.push(tokio::spawn(metrics::serve(metrics.clone(), addr, token.clone()))),
            Err(err) => log::error!(
                "{} invalid bind address '{raw}': {err}",
                term_colors::red("dependency-watchdog")
            ),
        }
    }
    for listener in listeners {
        if let Ok(Err(err)) = listener.await {
            log::error!("{} metrics server failed: {err}", term_colors::red("dependency-watchdog"));
        }
    }
}
