//! The single entry point the application talks to.
//!
//! [`ConnectionFacade`] owns the snapshot, every platform listener, and the
//! leaf components. The host forwards platform callbacks through
//! [`ConnectionFacade::dispatch`]; consumers read [`ConnectionFacade::status`]
//! or hold a receiver from [`ConnectionFacade::subscribe`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::bridge::{self, InboundAction, WorkerMessage};
use crate::cache_checker::CrisisResourceCacheChecker;
use crate::config::{ConfigError, ResilienceConfig};
use crate::event::PlatformEvent;
use crate::lifecycle::{StateChangeOutcome, WorkerLifecycleTracker};
use crate::model::{ConnectionStatus, OfflineCapability, StatusDraft, WorkerLifecycleState};
use crate::monitor::{ConnectionMonitor, ConnectionReading};
use crate::platform::{
    detect_support, CacheApi, ListenerSet, ListenerTarget, Platform, PlatformSupport,
};
use crate::registry::{self, CapabilityRegistry};
use crate::store::{StatusReceiver, StatusStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FacadeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("connection facade used after teardown")]
    NotMounted,

    #[error("no connection facade mounted in this provider")]
    NoProvider,
}

pub struct ConnectionFacade {
    platform: Arc<dyn Platform>,
    support: PlatformSupport,
    monitor: ConnectionMonitor,
    tracker: WorkerLifecycleTracker,
    checker: CrisisResourceCacheChecker,
    store: StatusStore,
    listeners: ListenerSet,
    mounted: AtomicBool,
}

impl std::fmt::Debug for ConnectionFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFacade")
            .field("support", &self.support)
            .field("mounted", &self.is_mounted())
            .field("listeners", &self.listeners.len())
            .field("status", &self.store.snapshot())
            .finish_non_exhaustive()
    }
}

impl ConnectionFacade {
    /// Builds the snapshot, attaches listeners, resolves the worker
    /// registration and runs the first crisis cache check.
    ///
    /// Only an invalid config fails. Missing or failing platform APIs
    /// leave their fields at the pessimistic defaults.
    #[instrument(skip(platform, config))]
    pub async fn mount(
        platform: Arc<dyn Platform>,
        config: ResilienceConfig,
    ) -> Result<Self, FacadeError> {
        config.validate()?;
        let checker = CrisisResourceCacheChecker::from_config(&config)?;
        let monitor = ConnectionMonitor::new(config.quality_tiers.clone());
        let support = detect_support(platform.as_ref());

        let reading = monitor.read(platform.network());
        let mut initial = StatusDraft::initial(reading.is_online, support.service_worker);
        initial.connection_quality = reading.quality;
        let store = StatusStore::new(initial, CapabilityRegistry::default());

        let facade = Self {
            platform,
            support,
            monitor,
            tracker: WorkerLifecycleTracker::new(),
            checker,
            store,
            listeners: ListenerSet::new(),
            mounted: AtomicBool::new(true),
        };
        facade.attach_listeners(config.recheck_interval_ms);

        facade.sync_worker().await;
        facade.run_cache_check().await;

        let status = facade.store.snapshot();
        info!(
            online = status.is_online,
            quality = %status.connection_quality,
            worker = %status.worker_lifecycle_state,
            crisis = status.crisis_resources_available,
            listeners = facade.listeners.len(),
            "connection facade mounted"
        );
        Ok(facade)
    }

    fn attach_listeners(&self, recheck_interval_ms: Option<u64>) {
        let hub = self.platform.events();
        self.listeners.attach(hub, ListenerTarget::Online);
        self.listeners.attach(hub, ListenerTarget::Offline);
        if self.support.quality_signal {
            self.listeners.attach(hub, ListenerTarget::ConnectionChange);
        }
        if self.support.service_worker {
            self.listeners.attach(hub, ListenerTarget::WorkerMessage);
            self.listeners.attach(hub, ListenerTarget::UpdateFound);
        }
        if let Some(period_ms) = recheck_interval_ms {
            self.listeners
                .attach(hub, ListenerTarget::Interval { period_ms });
        }
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn ensure_mounted(&self) -> Result<(), FacadeError> {
        if self.is_mounted() {
            Ok(())
        } else {
            Err(FacadeError::NotMounted)
        }
    }

    #[must_use]
    pub const fn support(&self) -> PlatformSupport {
        self.support
    }

    pub fn status(&self) -> Result<Arc<ConnectionStatus>, FacadeError> {
        self.ensure_mounted()?;
        Ok(self.store.snapshot())
    }

    /// A receiver that sees every snapshot published from now on.
    pub fn subscribe(&self) -> Result<StatusReceiver, FacadeError> {
        self.ensure_mounted()?;
        Ok(self.store.subscribe())
    }

    /// Case-insensitive; unknown features are unavailable.
    pub fn is_feature_available(&self, feature: &str) -> Result<bool, FacadeError> {
        let status = self.status()?;
        Ok(registry::is_feature_available(&status.capabilities, feature))
    }

    pub fn offline_capability(
        &self,
        feature: &str,
    ) -> Result<Option<OfflineCapability>, FacadeError> {
        Ok(self.status()?.capability(feature).cloned())
    }

    /// Asks the active worker to refetch crisis resources.
    pub async fn update_crisis_resources(&self) -> bool {
        self.send_message_to_service_worker(&WorkerMessage::update_crisis_resources())
            .await
    }

    pub async fn force_cache_update(&self) -> bool {
        self.send_message_to_service_worker(&WorkerMessage::force_cache_update())
            .await
    }

    /// `true` once the post is dispatched. Delivery is not confirmed.
    pub async fn send_message_to_service_worker(&self, message: &WorkerMessage) -> bool {
        if !self.is_mounted() {
            debug!("send after teardown");
            return false;
        }
        bridge::send(self.platform.service_worker(), message).await
    }

    /// Re-checks the crisis cache now. Returns the availability published
    /// once the check settles.
    pub async fn refresh_crisis_resources(&self) -> Result<bool, FacadeError> {
        self.ensure_mounted()?;
        self.run_cache_check().await;
        Ok(self.store.snapshot().crisis_resources_available)
    }

    /// Routes one platform callback. Events arriving after teardown are
    /// dropped.
    pub async fn dispatch(&self, event: PlatformEvent) {
        if !self.is_mounted() {
            debug!(event = event.name(), "event after teardown dropped");
            return;
        }
        match event {
            PlatformEvent::Online => {
                let reading = self.monitor.reading_for(true, self.platform.network());
                self.apply_reading(reading);
            }
            PlatformEvent::Offline => {
                let reading = self.monitor.reading_for(false, self.platform.network());
                self.apply_reading(reading);
            }
            PlatformEvent::ConnectionChange => {
                let is_online = self.store.snapshot().is_online;
                let reading = self.monitor.reading_for(is_online, self.platform.network());
                self.apply_reading(reading);
            }
            PlatformEvent::WorkerStateChange { worker, state } => {
                let outcome = self
                    .tracker
                    .on_state_change(self.platform.events(), worker, state);
                match outcome {
                    StateChangeOutcome::Ignored => {}
                    StateChangeOutcome::Updated(next) => {
                        self.store.apply(|d| d.worker_lifecycle_state = next);
                    }
                    StateChangeOutcome::Redundant => {
                        self.store
                            .apply(|d| d.worker_lifecycle_state = WorkerLifecycleState::Redundant);
                        self.sync_worker().await;
                    }
                }
            }
            PlatformEvent::UpdateFound => self.sync_worker().await,
            PlatformEvent::WorkerMessage(raw) => {
                if let Some(action) = bridge::handle_inbound(raw) {
                    self.apply_inbound(action).await;
                }
            }
            PlatformEvent::RecheckTick => self.run_cache_check().await,
        }
    }

    fn apply_reading(&self, reading: ConnectionReading) {
        self.store.apply(|d| {
            d.is_online = reading.is_online;
            d.connection_quality = reading.quality;
        });
    }

    async fn apply_inbound(&self, action: InboundAction) {
        match action {
            InboundAction::MarkCrisisResourcesCached { at } => {
                // The worker's word beats any cache listing still in flight.
                self.checker.supersede();
                self.store.apply(|d| {
                    d.crisis_resources_available = true;
                    d.last_sync = Some(at);
                });
            }
            InboundAction::RecomputeCapabilities => {
                self.store.recompute();
            }
            InboundAction::MarkSynced { at } => {
                self.store.apply(|d| d.last_sync = Some(at));
            }
            InboundAction::RecheckCache => self.run_cache_check().await,
        }
    }

    /// Cache storage as detected at mount.
    fn caches(&self) -> Option<&dyn CacheApi> {
        if self.support.cache_storage {
            self.platform.caches()
        } else {
            None
        }
    }

    async fn sync_worker(&self) {
        let state = self.tracker.sync(self.platform.as_ref()).await;
        if !self.is_mounted() {
            // Torn down while the lookup was in flight; drop what it attached.
            self.tracker.release(self.platform.events());
            return;
        }
        self.store.apply(|d| d.worker_lifecycle_state = state);
    }

    /// Runs one cache check and publishes it only if no newer check or
    /// teardown happened meanwhile.
    async fn run_cache_check(&self) {
        let (token, available) = self.checker.check(self.caches()).await;
        let mut published = false;
        self.store.apply(|d| {
            if self.checker.is_current(token) {
                d.crisis_resources_available = available;
                published = true;
            }
        });
        if !published {
            debug!(?token, "superseded cache check discarded");
        }
    }

    /// Revokes every listener and timer, stops following the worker, and
    /// invalidates checks in flight. Idempotent.
    pub fn teardown(&self) {
        if !self.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        let hub = self.platform.events();
        let revoked = self.listeners.revoke_all(hub);
        self.tracker.release(hub);
        self.checker.supersede();
        info!(revoked, "connection facade torn down");
    }
}

impl Drop for ConnectionFacade {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Context slot the application reads the mounted facade from.
#[derive(Debug, Default)]
pub struct ConnectionProvider {
    slot: RwLock<Option<Arc<ConnectionFacade>>>,
}

impl ConnectionProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `facade`, returning the one it replaced. A replaced facade is
    /// torn down.
    pub fn install(&self, facade: ConnectionFacade) -> Arc<ConnectionFacade> {
        let facade = Arc::new(facade);
        let previous = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&facade));
        if let Some(previous) = previous {
            warn!("replacing a mounted connection facade");
            previous.teardown();
        }
        facade
    }

    pub fn facade(&self) -> Result<Arc<ConnectionFacade>, FacadeError> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(FacadeError::NoProvider)
    }

    /// Empties the slot and tears the facade down.
    pub fn unmount(&self) {
        let taken = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(facade) = taken {
            facade.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectionQuality;
    use crate::platform::testing::MockPlatform;
    use crate::platform::{Registration, WorkerHandle, WorkerId, WorkerScriptState};
    use crate::registry::{AI_ASSISTANT, COMMUNITY_POSTS, CRISIS_RESOURCES};
    use serde_json::json;

    fn active(id: u64) -> Registration {
        Registration {
            scope: "/".into(),
            active: Some(WorkerHandle {
                id: WorkerId(id),
                state: WorkerScriptState::Activated,
            }),
            ..Registration::default()
        }
    }

    async fn mount(platform: &Arc<MockPlatform>) -> ConnectionFacade {
        ConnectionFacade::mount(platform.clone(), ResilienceConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn invalid_config_rejected() {
        let platform = Arc::new(MockPlatform::full(true));
        let config = ResilienceConfig {
            crisis_manifest: Vec::new(),
            ..ResilienceConfig::default()
        };
        let err = ConnectionFacade::mount(platform.clone(), config)
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::Config(_)));
        assert_eq!(platform.active_listener_count(), 0);
    }

    #[tokio::test]
    async fn bare_platform_mounts_pessimistic() {
        let platform = Arc::new(MockPlatform::bare(true));
        let facade = mount(&platform).await;
        let status = facade.status().unwrap();
        assert!(status.is_online);
        assert_eq!(status.connection_quality, ConnectionQuality::Good);
        assert!(!status.worker_supported);
        assert_eq!(status.worker_lifecycle_state, WorkerLifecycleState::NotRegistered);
        assert!(!status.crisis_resources_available);
        assert!(!facade.is_feature_available(CRISIS_RESOURCES).unwrap());
        assert!(facade.is_feature_available("ai assistant").unwrap());

        // Only online/offline are observable.
        let mut targets = platform.active_listeners();
        targets.sort_by_key(|t| format!("{t:?}"));
        assert_eq!(targets, [ListenerTarget::Offline, ListenerTarget::Online]);
    }

    #[tokio::test]
    async fn full_platform_attaches_every_listener() {
        let platform = Arc::new(MockPlatform::full(true).with_registration(active(1)));
        let config = ResilienceConfig {
            recheck_interval_ms: Some(30_000),
            ..ResilienceConfig::default()
        };
        let facade = ConnectionFacade::mount(platform.clone(), config)
            .await
            .unwrap();
        for target in [
            ListenerTarget::Online,
            ListenerTarget::Offline,
            ListenerTarget::ConnectionChange,
            ListenerTarget::WorkerMessage,
            ListenerTarget::UpdateFound,
            ListenerTarget::WorkerStateChange(WorkerId(1)),
            ListenerTarget::Interval { period_ms: 30_000 },
        ] {
            assert!(platform.has_listener(target), "missing {target:?}");
        }
        let status = facade.status().unwrap();
        assert_eq!(status.connection_quality, ConnectionQuality::Excellent);
        assert_eq!(status.worker_lifecycle_state, WorkerLifecycleState::Active);
        assert!(facade.is_feature_available(COMMUNITY_POSTS).unwrap());
    }

    #[tokio::test]
    async fn offline_event_forces_offline_quality() {
        let platform = Arc::new(MockPlatform::full(true));
        let facade = mount(&platform).await;
        platform.set_online(false);
        facade.dispatch(PlatformEvent::Offline).await;
        let status = facade.status().unwrap();
        assert!(!status.is_online);
        assert_eq!(status.connection_quality, ConnectionQuality::Offline);
        assert!(!facade.is_feature_available(AI_ASSISTANT).unwrap());
    }

    #[tokio::test]
    async fn connection_change_reclassifies() {
        let platform = Arc::new(MockPlatform::full(true));
        let facade = mount(&platform).await;
        platform.set_connection(Some(crate::platform::ConnectionInfo {
            effective_type: Some("2g".into()),
            downlink_mbps: Some(0.2),
        }));
        facade.dispatch(PlatformEvent::ConnectionChange).await;
        assert_eq!(
            facade.status().unwrap().connection_quality,
            ConnectionQuality::Poor
        );
    }

    #[tokio::test]
    async fn capability_payload_is_not_trusted() {
        let platform = Arc::new(MockPlatform::full(false));
        let facade = mount(&platform).await;
        facade
            .dispatch(PlatformEvent::WorkerMessage(json!({
                "type": "offline-capabilities-updated",
                "data": [{"feature": "AI Assistant", "available": true}],
                "timestamp": 5
            })))
            .await;
        assert!(!facade.is_feature_available(AI_ASSISTANT).unwrap());
    }

    #[tokio::test]
    async fn sync_completed_stamps_last_sync() {
        let platform = Arc::new(MockPlatform::full(true));
        let facade = mount(&platform).await;
        facade
            .dispatch(PlatformEvent::WorkerMessage(json!({
                "type": "sync-completed",
                "timestamp": 1_234
            })))
            .await;
        let status = facade.status().unwrap();
        assert_eq!(status.last_sync, Some(crate::model::UnixTimeMs(1_234)));
        assert!(!status.crisis_resources_available);
    }

    #[tokio::test]
    async fn redundant_worker_resyncs_registration() {
        let platform = Arc::new(MockPlatform::full(true).with_registration(active(1)));
        let facade = mount(&platform).await;
        platform.set_registration(Some(Registration {
            scope: "/".into(),
            installing: Some(WorkerHandle {
                id: WorkerId(2),
                state: WorkerScriptState::Installing,
            }),
            ..Registration::default()
        }));
        facade
            .dispatch(PlatformEvent::WorkerStateChange {
                worker: WorkerId(1),
                state: WorkerScriptState::Redundant,
            })
            .await;
        let status = facade.status().unwrap();
        assert_eq!(status.worker_lifecycle_state, WorkerLifecycleState::Installing);
        assert!(platform.has_listener(ListenerTarget::WorkerStateChange(WorkerId(2))));
        assert!(!platform.has_listener(ListenerTarget::WorkerStateChange(WorkerId(1))));
    }

    #[tokio::test]
    async fn queries_after_teardown_fail() {
        let platform = Arc::new(MockPlatform::full(true).with_registration(active(1)));
        let facade = mount(&platform).await;
        facade.teardown();
        assert_eq!(facade.status().unwrap_err(), FacadeError::NotMounted);
        assert_eq!(
            facade.is_feature_available(CRISIS_RESOURCES).unwrap_err(),
            FacadeError::NotMounted
        );
        assert!(facade.subscribe().is_err());
        assert!(facade.refresh_crisis_resources().await.is_err());
        assert!(!facade.force_cache_update().await);
        assert!(platform.posted_messages().is_empty());
    }

    #[tokio::test]
    async fn drop_releases_listeners() {
        let platform = Arc::new(MockPlatform::full(true).with_registration(active(1)));
        let facade = mount(&platform).await;
        assert!(platform.active_listener_count() > 0);
        drop(facade);
        assert_eq!(platform.active_listener_count(), 0);
        assert_eq!(platform.removal_errors(), 0);
    }

    #[tokio::test]
    async fn provider_slot() {
        let provider = ConnectionProvider::new();
        assert_eq!(provider.facade().unwrap_err(), FacadeError::NoProvider);

        let platform = Arc::new(MockPlatform::full(true));
        let mounted = provider.install(mount(&platform).await);
        assert!(provider.facade().unwrap().status().is_ok());

        provider.unmount();
        assert_eq!(provider.facade().unwrap_err(), FacadeError::NoProvider);
        assert!(!mounted.is_mounted());
        assert_eq!(platform.active_listener_count(), 0);
    }
}
