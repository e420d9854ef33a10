//! Client construction, including the shoot-client transport tweak the
//! Prober depends on (spec §4.6): a half-open TCP connection kept alive
//! across a seed↔shoot network partition would let a later probe "succeed"
//! against a dead peer, silently masking the very outage the watchdog exists
//! to catch. `TransportOptions` captures that intent independently of any
//! live connection so it can be unit tested.

use std::path::Path;
use std::time::Duration;

use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::rt::TokioExecutor;
use kube::client::ConfigExt;
use kube::{Client, Config};
use tower::ServiceBuilder;

use crate::errors::ApiError;

/// Returns a client built from the ambient environment (in-cluster service
/// account or local kubeconfig), used for the seed-side API calls
/// (Cluster/EndpointSlice/Pod/Secret watches and reads).
pub async fn new() -> Result<Client, ApiError> {
    Client::try_default().await.map_err(ApiError::from)
}

/// Like [`new`], but honors an explicit kubeconfig path when given (the
/// `--kubeconfig` CLI flag), falling back to the ambient environment when
/// `path` is `None`.
pub async fn new_with_kubeconfig(path: Option<&Path>) -> Result<Client, ApiError> {
    let Some(path) = path else {
        return new().await;
    };
    let kubeconfig = kube::config::Kubeconfig::read_from(path)
        .map_err(|err| ApiError::Other(kube::Error::KubeConfig(err)))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &Default::default())
        .await
        .map_err(|err| ApiError::Other(kube::Error::KubeConfig(err)))?;
    Client::try_from(config).map_err(ApiError::from)
}

/// Transport knobs derived from a probe's configuration. Kept as a plain
/// struct, independent of any live `hyper` client, so its derivation from a
/// `ProbeConfig` is directly unit-testable (spec §9 design note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    /// When true, no idle connection is kept alive across requests — every
    /// probe opens a fresh TCP/TLS handshake. This is what makes a partition
    /// visible instead of masked by a stale pooled connection.
    pub disable_idle_pooling: bool,
}

impl TransportOptions {
    pub fn for_shoot_probe(probe_timeout: Duration) -> Self {
        TransportOptions {
            connect_timeout: probe_timeout,
            disable_idle_pooling: true,
        }
    }

    fn pool_max_idle_per_host(&self) -> usize {
        if self.disable_idle_pooling {
            0
        } else {
            usize::MAX
        }
    }
}

/// Builds a client targeting a shoot's API server from an already-decoded
/// kubeconfig, with the transport tweaks in `opts` applied.
pub async fn new_for_shoot(
    kubeconfig: kube::config::Kubeconfig,
    opts: TransportOptions,
) -> Result<Client, ApiError> {
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &Default::default())
        .await
        .map_err(|err| ApiError::Other(kube::Error::KubeConfig(err)))?;
    config.connect_timeout = Some(opts.connect_timeout);
    config.read_timeout = Some(opts.connect_timeout);

    let https = config.rustls_https_connector().map_err(kube::Error::from)?;
    let service = ServiceBuilder::new()
        .layer(config.base_uri_layer())
        .option_layer(config.auth_layer().map_err(kube::Error::from)?)
        .service(
            LegacyClient::builder(TokioExecutor::new())
                .pool_max_idle_per_host(opts.pool_max_idle_per_host())
                .build(https),
        );
    Ok(Client::new(service, config.default_namespace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disables_idle_pooling_for_shoot_probes() {
        let opts = TransportOptions::for_shoot_probe(Duration::from_secs(30));
        assert!(opts.disable_idle_pooling);
        assert_eq!(opts.pool_max_idle_per_host(), 0);
        assert_eq!(opts.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn enabled_pooling_keeps_connections_around() {
        let opts = TransportOptions {
            connect_timeout: Duration::from_secs(5),
            disable_idle_pooling: false,
        };
        assert_eq!(opts.pool_max_idle_per_host(), usize::MAX);
    }
}
