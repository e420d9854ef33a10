//! Small Kubernetes helper crate shared by every subcommand of the watchdog
//! binary: client construction, error classification and a couple of
//! extension traits over `k8s-openapi` types that the probe and weeder
//! control loops lean on.

pub mod client;
pub mod errors;
pub mod pod;
pub mod watcher;

pub use errors::ApiError;
pub use pod::PodExt;
