//! Host platform seams.
//!
//! The core never touches browser globals. The host glue implements these
//! traits over `navigator.onLine`, `navigator.connection`,
//! `navigator.serviceWorker`, `caches` and `addEventListener`, and forwards
//! every event it was asked to listen for as a [`crate::event::PlatformEvent`].

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u64);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

/// `ServiceWorker.state` as reported by the platform.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerScriptState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub id: WorkerId,
    pub state: WorkerScriptState,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub scope: String,
    pub installing: Option<WorkerHandle>,
    pub waiting: Option<WorkerHandle>,
    pub active: Option<WorkerHandle>,
}

/// Network Information API reading. Either field may be missing even when
/// the API itself exists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub effective_type: Option<String>,
    pub downlink_mbps: Option<f64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListenerTarget {
    Online,
    Offline,
    ConnectionChange,
    WorkerMessage,
    UpdateFound,
    WorkerStateChange(WorkerId),
    Interval { period_ms: u64 },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("registration lookup failed: {0}")]
    Lookup(String),

    #[error("cache '{cache_name}' unavailable: {message}")]
    Cache { cache_name: String, message: String },

    #[error("postMessage failed: {0}")]
    Post(String),

    #[error("listener error: {0}")]
    Listener(String),
}

pub trait NetworkApi: Send + Sync {
    fn is_online(&self) -> bool;

    /// `None` when the Network Information API is absent.
    fn connection(&self) -> Option<ConnectionInfo>;
}

#[async_trait::async_trait]
pub trait ServiceWorkerApi: Send + Sync {
    async fn registration(&self) -> Result<Option<Registration>, PlatformError>;
    fn post_message(
        &self,
        worker: WorkerId,
        message: &serde_json::Value,
    ) -> Result<(), PlatformError>;
}

#[async_trait::async_trait]
pub trait CacheApi: Send + Sync {
    /// Request URLs of every entry in the named cache.
    async fn keys(&self, cache_name: &str) -> Result<Vec<String>, PlatformError>;
}

pub trait EventHub: Send + Sync {
    fn add_listener(&self, target: ListenerTarget) -> Result<ListenerId, PlatformError>;
    fn remove_listener(&self, id: ListenerId) -> Result<(), PlatformError>;
}

pub trait Platform: Send + Sync {
    fn network(&self) -> &dyn NetworkApi;
    fn events(&self) -> &dyn EventHub;
    fn service_worker(&self) -> Option<&dyn ServiceWorkerApi>;
    fn caches(&self) -> Option<&dyn CacheApi>;
}

/// Which optional APIs the host exposes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSupport {
    pub quality_signal: bool,
    pub service_worker: bool,
    pub cache_storage: bool,
}

#[must_use]
pub fn detect_support(platform: &dyn Platform) -> PlatformSupport {
    let support = PlatformSupport {
        quality_signal: platform.network().connection().is_some(),
        service_worker: platform.service_worker().is_some(),
        cache_storage: platform.caches().is_some(),
    };
    debug!(?support, "detected platform support");
    support
}

/// Listener ids owned by one component, revoked exactly once.
#[derive(Debug, Default)]
pub struct ListenerSet {
    ids: Mutex<Vec<ListenerId>>,
}

impl ListenerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a listener. A refusal is logged and yields `None`; the
    /// caller carries on with that signal missing.
    pub fn attach(&self, hub: &dyn EventHub, target: ListenerTarget) -> Option<ListenerId> {
        match hub.add_listener(target) {
            Ok(id) => {
                self.ids
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(id);
                Some(id)
            }
            Err(e) => {
                warn!(?target, error = %e, "could not attach listener");
                None
            }
        }
    }

    /// Removes every held listener. Safe to call repeatedly; the second call
    /// finds nothing to remove.
    pub fn revoke_all(&self, hub: &dyn EventHub) -> usize {
        let drained: Vec<ListenerId> = std::mem::take(
            &mut *self.ids.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for id in &drained {
            if let Err(e) = hub.remove_listener(*id) {
                warn!(?id, error = %e, "could not remove listener");
            }
        }
        drained.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockPlatform;
    use super::*;

    #[test]
    fn detect_support_reports_missing_apis() {
        let platform = MockPlatform::bare(true);
        let support = detect_support(&platform);
        assert!(!support.quality_signal);
        assert!(!support.service_worker);
        assert!(!support.cache_storage);

        let platform = MockPlatform::full(true);
        let support = detect_support(&platform);
        assert!(support.quality_signal);
        assert!(support.service_worker);
        assert!(support.cache_storage);
    }

    #[test]
    fn listener_set_revokes_once() {
        let platform = MockPlatform::full(true);
        let set = ListenerSet::new();
        set.attach(platform.events(), ListenerTarget::Online);
        set.attach(platform.events(), ListenerTarget::Offline);
        assert_eq!(platform.active_listener_count(), 2);

        assert_eq!(set.revoke_all(platform.events()), 2);
        assert_eq!(set.revoke_all(platform.events()), 0);
        assert_eq!(platform.active_listener_count(), 0);
        assert_eq!(platform.removal_errors(), 0);
    }

    #[test]
    fn refused_listener_is_not_held() {
        let platform = MockPlatform::full(true);
        platform.refuse_listeners(true);
        let set = ListenerSet::new();
        assert!(set.attach(platform.events(), ListenerTarget::Online).is_none());
        assert!(set.is_empty());
    }
}
