use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Explicit timestamp unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self(ms)
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Offline,
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Poor => "poor",
            Self::Offline => "offline",
        })
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerLifecycleState {
    #[default]
    NotRegistered,
    Installing,
    Waiting,
    Active,
    Redundant,
}

impl WorkerLifecycleState {
    #[must_use]
    pub const fn state_name(self) -> &'static str {
        match self {
            Self::NotRegistered => "not_registered",
            Self::Installing => "installing",
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Redundant => "redundant",
        }
    }

    #[must_use]
    pub const fn is_registered(self) -> bool {
        !matches!(self, Self::NotRegistered)
    }
}

impl fmt::Display for WorkerLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

/// A named application feature and whether it works right now.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineCapability {
    pub feature: String,
    pub available: bool,
    pub description: String,
    pub fallback_action: String,
}

/// The writable inputs of a [`ConnectionStatus`].
///
/// Writers edit a draft; the store derives `capabilities` and enforces the
/// offline/quality invariant when it turns the draft into a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusDraft {
    pub is_online: bool,
    pub connection_quality: ConnectionQuality,
    pub worker_supported: bool,
    pub worker_registered: bool,
    pub worker_lifecycle_state: WorkerLifecycleState,
    pub last_sync: Option<UnixTimeMs>,
    pub crisis_resources_available: bool,
}

impl StatusDraft {
    /// Safe defaults at mount: the current online flag, everything else
    /// pessimistic.
    #[must_use]
    pub const fn initial(is_online: bool, worker_supported: bool) -> Self {
        Self {
            is_online,
            connection_quality: if is_online {
                ConnectionQuality::Good
            } else {
                ConnectionQuality::Offline
            },
            worker_supported,
            worker_registered: false,
            worker_lifecycle_state: WorkerLifecycleState::NotRegistered,
            last_sync: None,
            crisis_resources_available: false,
        }
    }
}

/// The snapshot published to consumers. Always shared as
/// `Arc<ConnectionStatus>` and replaced wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub is_online: bool,
    pub connection_quality: ConnectionQuality,
    pub worker_supported: bool,
    pub worker_registered: bool,
    pub worker_lifecycle_state: WorkerLifecycleState,
    pub last_sync: Option<UnixTimeMs>,
    pub crisis_resources_available: bool,
    pub capabilities: Vec<OfflineCapability>,
}

impl ConnectionStatus {
    pub(crate) fn from_draft(draft: &StatusDraft, capabilities: Vec<OfflineCapability>) -> Self {
        Self {
            is_online: draft.is_online,
            connection_quality: draft.connection_quality,
            worker_supported: draft.worker_supported,
            worker_registered: draft.worker_registered,
            worker_lifecycle_state: draft.worker_lifecycle_state,
            last_sync: draft.last_sync,
            crisis_resources_available: draft.crisis_resources_available,
            capabilities,
        }
    }

    #[must_use]
    pub fn to_draft(&self) -> StatusDraft {
        StatusDraft {
            is_online: self.is_online,
            connection_quality: self.connection_quality,
            worker_supported: self.worker_supported,
            worker_registered: self.worker_registered,
            worker_lifecycle_state: self.worker_lifecycle_state,
            last_sync: self.last_sync,
            crisis_resources_available: self.crisis_resources_available,
        }
    }

    #[must_use]
    pub fn capability(&self, feature: &str) -> Option<&OfflineCapability> {
        crate::registry::find_capability(&self.capabilities, feature)
    }
}
