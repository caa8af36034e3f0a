use cnsd_ipam::pool::scaler::ScalerPolicy;

use kube::CustomResource;
#[cfg(feature = "schemars")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// NodeNetworkConfig mediates between this node and the orchestrator: the
/// spec is our request (how many secondary IPs, which ones we no longer
/// use), the status is the orchestrator's reply (provisioned network
/// containers and the scaler policy).
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    group = "acn.azure.com",
    version = "v1alpha",
    kind = "NodeNetworkConfig",
    plural = "nodenetworkconfigs",
    singular = "nodenetworkconfig",
    shortname = "nnc",
    namespaced,
    status = "NodeNetworkConfigStatus",
    printcolumn = r#"{"name":"Requested IPs","type":"integer","jsonPath":".spec.requestedIPCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkConfigSpec {
    /// Secondary IP count this node asks the orchestrator to provision.
    #[serde(rename = "requestedIPCount")]
    pub requested_ip_count: i64,

    /// IP configuration UUIDs queued for reclamation; the orchestrator is
    /// free to unassign these. Always serialized so a merge patch can clear
    /// the list.
    #[serde(default)]
    pub ips_not_in_use: Vec<String>,
}

/// Orchestrator-owned half of the NodeNetworkConfig. Read-only for us.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkConfigStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaler: Option<Scaler>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_containers: Vec<NetworkContainer>,
}

/// Pool scaling policy announced by the orchestrator.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct Scaler {
    pub batch_size: i64,
    #[serde(rename = "maxIPCount")]
    pub max_ip_count: i64,
    pub request_threshold_percent: i64,
    pub release_threshold_percent: i64,
}

impl From<Scaler> for ScalerPolicy {
    fn from(scaler: Scaler) -> Self {
        ScalerPolicy {
            batch_size: scaler.batch_size,
            max_ip_count: scaler.max_ip_count,
            request_threshold_percent: scaler.request_threshold_percent,
            release_threshold_percent: scaler.release_threshold_percent,
        }
    }
}

/// One network container provisioned to this node.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct NetworkContainer {
    pub id: String,

    /// Primary IP of the NC; bare address or CIDR.
    #[serde(default, rename = "primaryIP")]
    pub primary_ip: String,

    #[serde(default)]
    pub subnet_name: String,

    /// CIDR of the subnet the NC is backed by.
    #[serde(default)]
    pub subnet_address_space: String,

    #[serde(default)]
    pub default_gateway: String,

    #[serde(default)]
    pub version: i64,

    /// Secondary IPs assigned to the NC; the assignment name is the IP
    /// configuration UUID.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_assignments: Vec<IpAssignment>,

    #[serde(default, rename = "subscriptionID")]
    pub subscription_id: String,

    #[serde(default, rename = "resourceGroupID")]
    pub resource_group_id: String,

    #[serde(default, rename = "vnetID")]
    pub vnet_id: String,

    #[serde(default, rename = "subnetID")]
    pub subnet_id: String,

    #[serde(default, rename = "type")]
    pub nc_type: String,

    /// Primary IP of the hosting node; used for host-routed traffic.
    #[serde(default, rename = "nodeIP")]
    pub node_ip: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct IpAssignment {
    /// IP configuration UUID.
    pub name: String,
    #[serde(default)]
    pub ip: String,
}

/// Cluster-wide subnet state published by the orchestrator; the exhaustion
/// flag narrows the pool scaler to minimal granularity.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    group = "acn.azure.com",
    version = "v1alpha1",
    kind = "ClusterSubnetState",
    plural = "clustersubnetstates",
    singular = "clustersubnetstate",
    shortname = "css",
    namespaced,
    status = "ClusterSubnetStateStatus",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSubnetStateSpec {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ClusterSubnetStateStatus {
    #[serde(default)]
    pub exhausted: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
}
