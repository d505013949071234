//! Fire-and-forget messaging with the service worker.
//!
//! At most once, no acknowledgement, no retry. A `true` from [`send`] only
//! means the post was dispatched.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::model::UnixTimeMs;
use crate::platform::ServiceWorkerApi;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    // worker -> app
    CrisisResourcesCached,
    OfflineCapabilitiesUpdated,
    SyncCompleted,
    CacheUpdated,
    // app -> worker
    UpdateCrisisResources,
    ForceCacheUpdate,
}

impl MessageType {
    #[must_use]
    pub const fn is_inbound(self) -> bool {
        matches!(
            self,
            Self::CrisisResourcesCached
                | Self::OfflineCapabilitiesUpdated
                | Self::SyncCompleted
                | Self::CacheUpdated
        )
    }

    #[must_use]
    pub const fn is_outbound(self) -> bool {
        !self.is_inbound()
    }

    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::CrisisResourcesCached => "crisis-resources-cached",
            Self::OfflineCapabilitiesUpdated => "offline-capabilities-updated",
            Self::SyncCompleted => "sync-completed",
            Self::CacheUpdated => "cache-updated",
            Self::UpdateCrisisResources => "update-crisis-resources",
            Self::ForceCacheUpdate => "force-cache-update",
        }
    }
}

/// Wire format in both directions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: UnixTimeMs,
}

impl WorkerMessage {
    #[must_use]
    pub const fn new(kind: MessageType, timestamp: UnixTimeMs) -> Self {
        Self {
            kind,
            data: None,
            timestamp,
        }
    }

    #[must_use]
    pub fn update_crisis_resources() -> Self {
        Self::new(MessageType::UpdateCrisisResources, UnixTimeMs::now())
    }

    #[must_use]
    pub fn force_cache_update() -> Self {
        Self::new(MessageType::ForceCacheUpdate, UnixTimeMs::now())
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed worker message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("'{}' is not a worker-to-app message", .0.wire_name())]
    WrongDirection(MessageType),
}

/// What an inbound message asks the facade to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundAction {
    /// The worker finished caching crisis resources; trust it and stamp the
    /// sync time.
    MarkCrisisResourcesCached { at: UnixTimeMs },
    /// Re-derive capabilities from the current inputs.
    RecomputeCapabilities,
    MarkSynced { at: UnixTimeMs },
    /// The cache changed; ask the cache itself instead of the payload.
    RecheckCache,
}

pub fn decode(raw: serde_json::Value) -> Result<WorkerMessage, BridgeError> {
    let message: WorkerMessage = serde_json::from_value(raw)?;
    if !message.kind.is_inbound() {
        return Err(BridgeError::WrongDirection(message.kind));
    }
    Ok(message)
}

#[must_use]
pub fn route(message: &WorkerMessage) -> Option<InboundAction> {
    match message.kind {
        MessageType::CrisisResourcesCached => Some(InboundAction::MarkCrisisResourcesCached {
            at: message.timestamp,
        }),
        MessageType::OfflineCapabilitiesUpdated => {
            if message.data.is_some() {
                debug!("ignoring capability payload from worker");
            }
            Some(InboundAction::RecomputeCapabilities)
        }
        MessageType::SyncCompleted => Some(InboundAction::MarkSynced {
            at: message.timestamp,
        }),
        MessageType::CacheUpdated => Some(InboundAction::RecheckCache),
        MessageType::UpdateCrisisResources | MessageType::ForceCacheUpdate => None,
    }
}

/// Decodes and routes a raw `MessageEvent.data`. Anything unusable is logged
/// and dropped.
pub fn handle_inbound(raw: serde_json::Value) -> Option<InboundAction> {
    match decode(raw) {
        Ok(message) => {
            debug!(kind = message.kind.wire_name(), "worker message");
            route(&message)
        }
        Err(e) => {
            warn!(error = %e, "dropping worker message");
            None
        }
    }
}

/// Posts to the registration's active worker. Never fails; `false` when
/// there is no worker API, no active worker, or the post throws.
#[instrument(skip(container, message), fields(kind = message.kind.wire_name()))]
pub async fn send(container: Option<&dyn ServiceWorkerApi>, message: &WorkerMessage) -> bool {
    if !message.kind.is_outbound() {
        warn!("refusing to send a worker-to-app message type");
        return false;
    }
    let Some(container) = container else {
        debug!("service worker API unsupported");
        return false;
    };
    let active = match container.registration().await {
        Ok(Some(registration)) => registration.active,
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "registration lookup failed");
            return false;
        }
    };
    let Some(worker) = active else {
        debug!("no active service worker");
        return false;
    };
    let payload = match serde_json::to_value(message) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "could not encode worker message");
            return false;
        }
    };
    match container.post_message(worker.id, &payload) {
        Ok(()) => true,
        Err(e) => {
            warn!(worker = worker.id.0, error = %e, "postMessage failed");
            false
        }
    }
}
