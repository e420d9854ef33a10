//! Config file loading and validation (spec §6). Both subcommands load a
//! YAML file into a typed, defaulted struct, then validate it; a violation
//! produces a single aggregate error describing every problem found, not
//! just the first (spec §7).

pub mod prober;
pub mod validate;
pub mod weeder;

pub use prober::ProberConfig;
pub use validate::ConfigError;
pub use weeder::WeederConfig;

use std::path::Path;

use serde::de::DeserializeOwned;

/// Reads and parses `path` as YAML into `T`. Does not validate; callers are
/// expected to call the type's own `validate()` afterward.
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("failed to read config file {}: {err}", path.display()))?;
    serde_yaml::from_str(&raw)
        .map_err(|err| anyhow::anyhow!("failed to parse config file {}: {err}", path.display()))
}
