//! Ambient `/metrics` and `/healthz` endpoints (spec §AMBIENT). Grounded on
//! `examples/eosin-platform-eosin/storage-operator`'s optional `metrics`
//! feature (`prometheus` crate) and `storage/src/main.rs`'s
//! `maybe_spawn_metrics_server()` pattern, reimplemented as a small always-on
//! `hyper` server since this spec treats metrics/health as always-present.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub struct Metrics {
    registry: Registry,
    pub active_probers: IntGauge,
    pub active_weeders: IntGauge,
    pub probe_success_total: IntCounter,
    pub probe_failure_total: IntCounter,
    pub scale_up_total: IntCounter,
    pub scale_down_total: IntCounter,
    pub pods_weeded_total: IntCounter,
    last_tick: AtomicI64,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Arc<Metrics> {
        let registry = Registry::new();
        let active_probers =
            IntGauge::new("dependency_watchdog_active_probers", "Number of running probers")
                .unwrap();
        let active_weeders =
            IntGauge::new("dependency_watchdog_active_weeders", "Number of running weeders")
                .unwrap();
        let probe_success_total = IntCounter::new(
            "dependency_watchdog_probe_success_total",
            "Total successful probes",
        )
        .unwrap();
        let probe_failure_total = IntCounter::new(
            "dependency_watchdog_probe_failure_total",
            "Total failed probes",
        )
        .unwrap();
        let scale_up_total =
            IntCounter::new("dependency_watchdog_scale_up_total", "Total scale-up operations")
                .unwrap();
        let scale_down_total = IntCounter::new(
            "dependency_watchdog_scale_down_total",
            "Total scale-down operations",
        )
        .unwrap();
        let pods_weeded_total =
            IntCounter::new("dependency_watchdog_pods_weeded_total", "Total pods weeded").unwrap();

        for collector in [
            Box::new(active_probers.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(active_weeders.clone()),
            Box::new(probe_success_total.clone()),
            Box::new(probe_failure_total.clone()),
            Box::new(scale_up_total.clone()),
            Box::new(scale_down_total.clone()),
            Box::new(pods_weeded_total.clone()),
        ] {
            registry.register(collector).expect("metric name collision");
        }

        Arc::new(Metrics {
            registry,
            active_probers,
            active_weeders,
            probe_success_total,
            probe_failure_total,
            scale_up_total,
            scale_down_total,
            pods_weeded_total,
            last_tick: AtomicI64::new(0),
            started_at: Instant::now(),
        })
    }

    /// Called from every Prober/Weeder tick so `/healthz` can tell a wedged
    /// process apart from a quiet one.
    pub fn record_tick(&self) {
        self.last_tick
            .store(self.started_at.elapsed().as_secs() as i64, Ordering::Relaxed);
    }

    fn seconds_since_last_tick(&self) -> Duration {
        let last = self.last_tick.load(Ordering::Relaxed);
        let now = self.started_at.elapsed().as_secs() as i64;
        Duration::from_secs((now - last).max(0) as u64)
    }

    fn is_live(&self) -> bool {
        self.seconds_since_last_tick() < crate::manager::LIVENESS_STALE_AFTER
    }

    fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).expect("encoding metrics never fails");
        String::from_utf8(buf).expect("prometheus text format is always utf8")
    }
}

async fn handle(
    metrics: Arc<Metrics>,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => Response::new(Full::new(Bytes::from(metrics.render()))),
        "/healthz" => {
            if metrics.is_live() {
                Response::new(Full::new(Bytes::from_static(b"ok")))
            } else {
                Response::builder()
                    .status(StatusCode::SERVICE_UNAVAILABLE)
                    .body(Full::new(Bytes::from_static(b"stale")))
                    .unwrap()
            }
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap(),
    };
    Ok(response)
}

/// Serves `/metrics` and `/healthz` on `bind_address` until `token` is
/// cancelled.
pub async fn serve(
    metrics: Arc<Metrics>,
    bind_address: SocketAddr,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_address).await?;
    log::info!(
        "{} metrics/health endpoint listening on {}",
        term_colors::cyan("dependency-watchdog"),
        bind_address
    );
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let io = TokioIo::new(stream);
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(metrics.clone(), req));
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        log::debug!("metrics connection ended: {err}");
                    }
                });
            }
        }
    }
}
