use crate::error::{Error, Result};
use crate::pod::PodKeyScheme;

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Environment variable naming this node; required, used to scope the NNC
/// watch.
pub const NODENAME_ENV: &str = "NODENAME";

/// Environment variable pointing at the optional JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "CNS_CONFIGURATION_PATH";

/// Node service configuration, loaded once at startup from the JSON file at
/// [`CONFIG_PATH_ENV`]. Every field has a default so an absent file is a
/// valid configuration.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CnsConfig {
    /// Process-wide pod key scheme; fixed for the lifetime of the service.
    pub pod_key_scheme: PodKeyScheme,
    /// Pool monitor tick in seconds.
    pub reconcile_interval_secs: u64,
    /// Namespace the NodeNetworkConfig for this node lives in.
    pub nnc_namespace: String,
}

impl Default for CnsConfig {
    fn default() -> Self {
        Self {
            pod_key_scheme: PodKeyScheme::default(),
            reconcile_interval_secs: 1,
            nnc_namespace: "kube-system".to_string(),
        }
    }
}

impl CnsConfig {
    /// Load from the given path, or defaults when no path is set.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            info!(msg = "no configuration file set, using defaults");
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("failed to read {}", path.display()), e)
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::SerializationError(format!("failed to parse {}", path.display()), e)
        })?;
        info!(
            msg = "loaded configuration",
            path = %path.display(),
            pod_key_scheme = %config.pod_key_scheme,
        );
        Ok(config)
    }
}
