//! Command-line surface (spec §6). The teacher's two binaries (`acm`/`aim`)
//! are bare Rocket servers with no subcommands of their own; this shape is
//! imported instead from `examples/eosin-platform-eosin/storage/src/args.rs`'s
//! `Parser`/`Subcommand`/`#[command(flatten)]` idiom.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dependency-watchdog", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the Prober subsystem: scale dependent controllers up/down based
    /// on shoot API server and node lease health.
    Prober(ProberArgs),
    /// Run the Weeder subsystem: delete CrashLoopBackOff pods shortly after
    /// their dependency's endpoint becomes ready.
    Weeder(WeederArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct SharedArgs {
    /// Path to a kubeconfig file; defaults to the in-cluster service account.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Maximum number of reconciles for the relevant controller run
    /// concurrently.
    #[arg(long, default_value_t = 1)]
    pub concurrent_reconciles: usize,

    #[arg(long, default_value_t = false)]
    pub enable_leader_election: bool,

    #[arg(long, default_value = "dependency-watchdog")]
    pub leader_election_namespace: String,

    #[arg(long, default_value_t = 20.0)]
    pub kube_api_qps: f32,

    #[arg(long, default_value_t = 30)]
    pub kube_api_burst: u32,

    #[arg(long, default_value = "0.0.0.0:9643")]
    pub metrics_bind_address: String,

    #[arg(long, default_value = "0.0.0.0:9644")]
    pub health_bind_address: String,
}

#[derive(Parser, Debug)]
pub struct ProberArgs {
    #[command(flatten)]
    pub shared: SharedArgs,

    /// Path to the prober YAML config file.
    #[arg(long)]
    pub config_file: PathBuf,
}

#[derive(Parser, Debug)]
pub struct WeederArgs {
    #[command(flatten)]
    pub shared: SharedArgs,

    /// Path to the weeder YAML config file.
    #[arg(long)]
    pub config_file: PathBuf,
}
