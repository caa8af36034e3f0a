use std::collections::HashMap;
use std::net::IpAddr;

use ipnet::IpNet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One secondary IP carved out of the NC's subnet for pod use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryIpConfig {
    pub ip_address: String,
    pub nc_version: i64,
}

/// Network container programming request, assembled from the NNC status and
/// consumed by the dataplane collaborator. The cached copy is the
/// reconciler's baseline for diffing the next NNC update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNetworkContainerRequest {
    pub network_container_id: String,
    /// Monotonic NC version; secondary IPs newer than the host-programmed
    /// version stay PendingProgramming.
    pub version: i64,
    pub primary_ip: IpNet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    pub subnet_prefix: IpNet,
    /// Secondary IPs keyed by the orchestrator-assigned UUID.
    pub secondary_ip_configs: HashMap<String, SecondaryIpConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_primary_ip: Option<IpAddr>,
}

/// Outcome of a dataplane programming call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ResponseCode {
    Success,
    InvalidRequest,
    UnexpectedError,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::Success => "Success",
            ResponseCode::InvalidRequest => "InvalidRequest",
            ResponseCode::UnexpectedError => "UnexpectedError",
        }
    }
}

/// Seam towards the HNS/netlink programming layer. The reconciler treats any
/// non-Success response as retryable.
pub trait NetworkContainerProgrammer: Send + Sync {
    fn create_or_update_network_container(
        &self,
        request: &CreateNetworkContainerRequest,
    ) -> ResponseCode;
}

/// Programmer used while no real dataplane is wired in: accepts every
/// request. The request itself is cached by the reconciler.
#[derive(Default)]
pub struct AcceptingProgrammer;

impl NetworkContainerProgrammer for AcceptingProgrammer {
    fn create_or_update_network_container(
        &self,
        request: &CreateNetworkContainerRequest,
    ) -> ResponseCode {
        tracing::debug!(
            msg = "accepting network container request",
            nc_id = %request.network_container_id,
            version = request.version,
            secondary_ips = request.secondary_ip_configs.len(),
        );
        ResponseCode::Success
    }
}

/// Most recent programming request per NC. Written by the reconciler only;
/// read by the dataplane collaborator and the debug surface.
#[derive(Default)]
pub struct NcCache {
    inner: RwLock<HashMap<String, CreateNetworkContainerRequest>>,
}

impl NcCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, nc_id: &str) -> Option<CreateNetworkContainerRequest> {
        self.inner.read().get(nc_id).cloned()
    }

    pub fn insert(&self, request: CreateNetworkContainerRequest) {
        self.inner
            .write()
            .insert(request.network_container_id.clone(), request);
    }

    pub fn snapshot(&self) -> HashMap<String, CreateNetworkContainerRequest> {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn request(nc_id: &str, version: i64) -> CreateNetworkContainerRequest {
        CreateNetworkContainerRequest {
            network_container_id: nc_id.to_string(),
            version,
            primary_ip: "10.240.0.4/32".parse().unwrap(),
            gateway: Some("10.240.0.1".parse().unwrap()),
            subnet_prefix: "10.240.0.0/16".parse().unwrap(),
            secondary_ip_configs: HashMap::new(),
            host_primary_ip: None,
        }
    }

    #[test]
    fn test_cache_replaces_by_nc_id() {
        let cache = NcCache::new();
        cache.insert(request("nc-1", 1));
        cache.insert(request("nc-1", 2));
        assert_eq!(cache.get("nc-1").unwrap().version, 2);
        assert_eq!(cache.snapshot().len(), 1);
        assert!(cache.get("nc-2").is_none());
    }
}
