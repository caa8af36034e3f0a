use crate::crd::{NodeNetworkConfig, NodeNetworkConfigSpec};
use crate::error::{Error, Result};

use cnsd_ipam::error::Error as IpamError;
use cnsd_ipam::pool::monitor::{PoolSpec, PoolSpecWriter};
use kube::api::{Api, Patch, PatchParams};
use kube::client::Client;
use tracing::debug;

/// Narrow facade over the Kubernetes API for the one NodeNetworkConfig this
/// node owns, bound to (namespace, name) at construction. Errors propagate;
/// no retries here.
#[derive(Clone)]
pub struct NodeNetworkConfigClient {
    api: Api<NodeNetworkConfig>,
    name: String,
}

impl NodeNetworkConfigClient {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
        }
    }

    pub async fn get(&self) -> Result<NodeNetworkConfig> {
        self.api.get(&self.name).await.map_err(|e| {
            Error::KubeError(
                format!("failed to get NodeNetworkConfig {}", self.name),
                Box::new(e),
            )
        })
    }

    pub async fn update_spec(&self, spec: &NodeNetworkConfigSpec) -> Result<NodeNetworkConfig> {
        debug!(
            msg = "updating NodeNetworkConfig spec",
            name = %self.name,
            requested = spec.requested_ip_count,
            not_in_use = spec.ips_not_in_use.len(),
        );
        // both fields are always present so a merge patch can shrink the
        // requested count and clear the not-in-use list
        let patch = serde_json::json!({
            "spec": {
                "requestedIPCount": spec.requested_ip_count,
                "ipsNotInUse": spec.ips_not_in_use,
            }
        });
        self.api
            .patch(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                Error::KubeError(
                    format!("failed to patch NodeNetworkConfig {} spec", self.name),
                    Box::new(e),
                )
            })
    }
}

impl PoolSpecWriter for NodeNetworkConfigClient {
    async fn update_spec(&self, spec: &PoolSpec) -> Result<(), IpamError> {
        let spec = NodeNetworkConfigSpec {
            requested_ip_count: spec.requested_ip_count,
            ips_not_in_use: spec.ips_not_in_use.clone(),
        };
        NodeNetworkConfigClient::update_spec(self, &spec)
            .await
            .map_err(|e| IpamError::SpecWrite(Box::new(e)))?;
        Ok(())
    }
}
