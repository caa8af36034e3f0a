use crate::pod::PodInfo;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a secondary IP configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpConfigState {
    /// The dataplane has not caught up with the NC version that carries this
    /// IP; it must not be handed to a pod yet.
    PendingProgramming,
    /// Free to be reserved for a pod.
    Available,
    /// Bound to a pod.
    Assigned,
    /// Queued for reclamation by the orchestrator.
    PendingRelease,
}

impl IpConfigState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpConfigState::PendingProgramming => "PendingProgramming",
            IpConfigState::Available => "Available",
            IpConfigState::Assigned => "Assigned",
            IpConfigState::PendingRelease => "PendingRelease",
        }
    }

    /// Allowed transitions; everything else is rejected by the store.
    ///
    /// ```text
    /// PendingProgramming -> Available
    /// Available          -> Assigned | PendingRelease
    /// Assigned           -> Available
    /// PendingRelease     -> (deletion)
    /// ```
    pub fn can_transition_to(self, next: IpConfigState) -> bool {
        matches!(
            (self, next),
            (IpConfigState::PendingProgramming, IpConfigState::Available)
                | (IpConfigState::Available, IpConfigState::Assigned)
                | (IpConfigState::Available, IpConfigState::PendingRelease)
                | (IpConfigState::Assigned, IpConfigState::Available)
        )
    }
}

impl fmt::Display for IpConfigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical record for one secondary IP owned by this node.
///
/// Invariant: `pod_info.is_some()` exactly when `state == Assigned`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfigurationStatus {
    /// UUID handed out by the orchestrator; unique across the store.
    pub id: String,
    /// Network container this IP belongs to.
    pub nc_id: String,
    pub ip_address: String,
    pub state: IpConfigState,
    pub last_state_transition: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_info: Option<PodInfo>,
}

impl IpConfigurationStatus {
    pub fn new(
        id: impl Into<String>,
        nc_id: impl Into<String>,
        ip_address: impl Into<String>,
        state: IpConfigState,
    ) -> Self {
        Self {
            id: id.into(),
            nc_id: nc_id.into(),
            ip_address: ip_address.into(),
            state,
            last_state_transition: Utc::now(),
            pod_info: None,
        }
    }
}
