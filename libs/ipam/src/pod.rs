use crate::error::{Error, Result};

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Process-wide choice of how pods are keyed in the store. Read once from
/// configuration at startup; mixing schemes within one process is not
/// supported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PodKeyScheme {
    /// Key pods by `name:namespace`.
    #[default]
    Kubernetes,
    /// Key pods by the CNI interface ID.
    InterfaceId,
}

impl fmt::Display for PodKeyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodKeyScheme::Kubernetes => write!(f, "kubernetes"),
            PodKeyScheme::InterfaceId => write!(f, "interfaceId"),
        }
    }
}

/// The identifiers a CNI request carries for a pod, common to both key
/// schemes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodIdentifiers {
    pub name: String,
    pub namespace: String,
    pub infra_container_id: String,
    pub interface_id: String,
}

/// Pod identity. The two shapes carry the same identifiers and differ only
/// in what [`PodInfo::key`] returns; equality and hashing follow the key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "scheme", content = "pod", rename_all = "camelCase")]
pub enum PodInfo {
    Kubernetes(PodIdentifiers),
    InterfaceId(PodIdentifiers),
}

impl PodInfo {
    pub fn new(scheme: PodKeyScheme, ids: PodIdentifiers) -> Self {
        match scheme {
            PodKeyScheme::Kubernetes => PodInfo::Kubernetes(ids),
            PodKeyScheme::InterfaceId => PodInfo::InterfaceId(ids),
        }
    }

    /// Build pod identity from the CNI request envelope: the orchestrator
    /// context JSON plus the container identifiers.
    pub fn from_orchestrator_context(
        scheme: PodKeyScheme,
        context: &[u8],
        infra_container_id: impl Into<String>,
        interface_id: impl Into<String>,
    ) -> Result<Self> {
        let ctx: OrchestratorContext = serde_json::from_slice(context).map_err(|e| {
            Error::SerializationError("failed to parse orchestrator context".to_string(), e)
        })?;
        Ok(Self::new(
            scheme,
            PodIdentifiers {
                name: ctx.pod_name,
                namespace: ctx.pod_namespace,
                infra_container_id: infra_container_id.into(),
                interface_id: interface_id.into(),
            },
        ))
    }

    fn identifiers(&self) -> &PodIdentifiers {
        match self {
            PodInfo::Kubernetes(ids) | PodInfo::InterfaceId(ids) => ids,
        }
    }

    pub fn name(&self) -> &str {
        &self.identifiers().name
    }

    pub fn namespace(&self) -> &str {
        &self.identifiers().namespace
    }

    pub fn infra_container_id(&self) -> &str {
        &self.identifiers().infra_container_id
    }

    pub fn interface_id(&self) -> &str {
        &self.identifiers().interface_id
    }

    /// The store key for this pod under the process-wide scheme.
    pub fn key(&self) -> String {
        match self {
            PodInfo::Kubernetes(ids) => format!("{}:{}", ids.name, ids.namespace),
            PodInfo::InterfaceId(ids) => ids.interface_id.clone(),
        }
    }

    /// Orchestrator context JSON as carried on the CNI wire.
    pub fn orchestrator_context(&self) -> Result<Vec<u8>> {
        let ids = self.identifiers();
        serde_json::to_vec(&OrchestratorContext {
            pod_name: ids.name.clone(),
            pod_namespace: ids.namespace.clone(),
        })
        .map_err(|e| {
            Error::SerializationError("failed to serialize orchestrator context".to_string(), e)
        })
    }
}

impl PartialEq for PodInfo {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PodInfo {}

impl Hash for PodInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Pod-scoping payload inside a CNI IP request. Field spelling matches the
/// wire format used by the orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorContext {
    #[serde(rename = "PodName")]
    pub pod_name: String,
    #[serde(rename = "PodNamespace")]
    pub pod_namespace: String,
}

#[cfg(test)]
mod test {
    use super::*;

    fn ids() -> PodIdentifiers {
        PodIdentifiers {
            name: "nginx-0".to_string(),
            namespace: "default".to_string(),
            infra_container_id: "abc123".to_string(),
            interface_id: "eth0-abc123".to_string(),
        }
    }

    #[test]
    fn test_kubernetes_key() {
        let pod = PodInfo::new(PodKeyScheme::Kubernetes, ids());
        assert_eq!(pod.key(), "nginx-0:default");
    }

    #[test]
    fn test_interface_id_key() {
        let pod = PodInfo::new(PodKeyScheme::InterfaceId, ids());
        assert_eq!(pod.key(), "eth0-abc123");
    }

    #[test]
    fn test_equality_follows_key() {
        let a = PodInfo::new(PodKeyScheme::Kubernetes, ids());
        let mut other = ids();
        other.infra_container_id = "different".to_string();
        let b = PodInfo::new(PodKeyScheme::Kubernetes, other);
        assert_eq!(a, b);

        let c = PodInfo::new(PodKeyScheme::InterfaceId, ids());
        assert_ne!(a, c);
    }

    #[test]
    fn test_orchestrator_context_round_trip() {
        let pod = PodInfo::new(PodKeyScheme::Kubernetes, ids());
        let raw = pod.orchestrator_context().unwrap();
        assert!(String::from_utf8_lossy(&raw).contains("\"PodName\":\"nginx-0\""));

        let parsed =
            PodInfo::from_orchestrator_context(PodKeyScheme::Kubernetes, &raw, "abc123", "eth0")
                .unwrap();
        assert_eq!(parsed, pod);
    }

    #[test]
    fn test_malformed_orchestrator_context() {
        let err = PodInfo::from_orchestrator_context(
            PodKeyScheme::Kubernetes,
            b"not json",
            "abc123",
            "eth0",
        )
        .unwrap_err();
        assert!(matches!(err, Error::SerializationError(..)));
    }
}
