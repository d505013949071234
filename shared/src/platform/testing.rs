//! In-memory platform for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use super::{
    CacheApi, ConnectionInfo, EventHub, ListenerId, ListenerTarget, NetworkApi, Platform,
    PlatformError, Registration, ServiceWorkerApi, WorkerId,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MockNetwork {
    online: AtomicBool,
    connection: Mutex<Option<ConnectionInfo>>,
}

impl NetworkApi for MockNetwork {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn connection(&self) -> Option<ConnectionInfo> {
        lock(&self.connection).clone()
    }
}

#[derive(Debug, Default)]
pub struct MockEventHub {
    next_id: AtomicU64,
    active: Mutex<HashMap<ListenerId, ListenerTarget>>,
    removal_errors: AtomicUsize,
    refuse: AtomicBool,
}

impl EventHub for MockEventHub {
    fn add_listener(&self, target: ListenerTarget) -> Result<ListenerId, PlatformError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PlatformError::Listener("injected refusal".into()));
        }
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.active).insert(id, target);
        Ok(id)
    }

    fn remove_listener(&self, id: ListenerId) -> Result<(), PlatformError> {
        if lock(&self.active).remove(&id).is_none() {
            self.removal_errors.fetch_add(1, Ordering::SeqCst);
            return Err(PlatformError::Listener(format!("listener {} not attached", id.0)));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockServiceWorker {
    registration: Mutex<Option<Registration>>,
    fail_lookup: AtomicBool,
    fail_post: AtomicBool,
    lookups: AtomicUsize,
    posted: Mutex<Vec<(WorkerId, serde_json::Value)>>,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
}

#[async_trait::async_trait]
impl ServiceWorkerApi for MockServiceWorker {
    async fn registration(&self) -> Result<Option<Registration>, PlatformError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        // Like the cache, a held lookup resolves with the registration as it
        // was when the lookup started.
        let result = if self.fail_lookup.load(Ordering::SeqCst) {
            Err(PlatformError::Lookup("injected failure".into()))
        } else {
            Ok(lock(&self.registration).clone())
        };
        let gate = lock(&self.gates).pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        result
    }

    fn post_message(
        &self,
        worker: WorkerId,
        message: &serde_json::Value,
    ) -> Result<(), PlatformError> {
        if self.fail_post.load(Ordering::SeqCst) {
            return Err(PlatformError::Post("injected failure".into()));
        }
        lock(&self.posted).push((worker, message.clone()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockCaches {
    entries: Mutex<Vec<String>>,
    fail: AtomicBool,
    queries: AtomicUsize,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
}

#[async_trait::async_trait]
impl CacheApi for MockCaches {
    async fn keys(&self, cache_name: &str) -> Result<Vec<String>, PlatformError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        // Contents are read when the query starts; a held query resolves with
        // what was cached at that moment.
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(PlatformError::Cache {
                cache_name: cache_name.to_string(),
                message: "injected failure".into(),
            })
        } else {
            Ok(lock(&self.entries).clone())
        };
        let gate = lock(&self.gates).pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        result
    }
}

#[derive(Debug)]
pub struct MockPlatform {
    network: MockNetwork,
    events: MockEventHub,
    service_worker: Option<MockServiceWorker>,
    caches: Option<MockCaches>,
}

impl MockPlatform {
    /// Every optional API present; a 4g connection, no registration, empty
    /// cache.
    pub fn full(online: bool) -> Self {
        let network = MockNetwork::default();
        network.online.store(online, Ordering::SeqCst);
        *lock(&network.connection) = Some(ConnectionInfo {
            effective_type: Some("4g".into()),
            downlink_mbps: Some(12.0),
        });
        Self {
            network,
            events: MockEventHub::default(),
            service_worker: Some(MockServiceWorker::default()),
            caches: Some(MockCaches::default()),
        }
    }

    /// Only online/offline events; no quality signal, worker, or cache API.
    pub fn bare(online: bool) -> Self {
        let network = MockNetwork::default();
        network.online.store(online, Ordering::SeqCst);
        Self {
            network,
            events: MockEventHub::default(),
            service_worker: None,
            caches: None,
        }
    }

    pub fn with_registration(self, registration: Registration) -> Self {
        self.set_registration(Some(registration));
        self
    }

    pub fn with_cache_entries(self, entries: &[&str]) -> Self {
        self.set_cache_entries(entries);
        self
    }

    pub fn set_online(&self, online: bool) {
        self.network.online.store(online, Ordering::SeqCst);
    }

    pub fn set_connection(&self, info: Option<ConnectionInfo>) {
        *lock(&self.network.connection) = info;
    }

    pub fn set_registration(&self, registration: Option<Registration>) {
        if let Some(sw) = &self.service_worker {
            *lock(&sw.registration) = registration;
        }
    }

    pub fn fail_registration_lookup(&self, fail: bool) {
        if let Some(sw) = &self.service_worker {
            sw.fail_lookup.store(fail, Ordering::SeqCst);
        }
    }

    pub fn fail_post(&self, fail: bool) {
        if let Some(sw) = &self.service_worker {
            sw.fail_post.store(fail, Ordering::SeqCst);
        }
    }

    /// Holds the next registration lookup open until the returned sender
    /// fires or is dropped.
    pub fn hold_next_registration_lookup(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        if let Some(sw) = &self.service_worker {
            lock(&sw.gates).push_back(rx);
        }
        tx
    }

    pub fn registration_lookups(&self) -> usize {
        self.service_worker
            .as_ref()
            .map_or(0, |sw| sw.lookups.load(Ordering::SeqCst))
    }

    pub fn posted_messages(&self) -> Vec<(WorkerId, serde_json::Value)> {
        self.service_worker
            .as_ref()
            .map(|sw| lock(&sw.posted).clone())
            .unwrap_or_default()
    }

    pub fn set_cache_entries(&self, entries: &[&str]) {
        if let Some(caches) = &self.caches {
            *lock(&caches.entries) = entries.iter().map(|e| (*e).to_string()).collect();
        }
    }

    pub fn fail_cache(&self, fail: bool) {
        if let Some(caches) = &self.caches {
            caches.fail.store(fail, Ordering::SeqCst);
        }
    }

    pub fn cache_queries(&self) -> usize {
        self.caches
            .as_ref()
            .map_or(0, |c| c.queries.load(Ordering::SeqCst))
    }

    /// Holds the next cache query open until the returned sender fires or is
    /// dropped.
    pub fn hold_next_cache_query(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        if let Some(caches) = &self.caches {
            lock(&caches.gates).push_back(rx);
        }
        tx
    }

    pub fn refuse_listeners(&self, refuse: bool) {
        self.events.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn active_listener_count(&self) -> usize {
        lock(&self.events.active).len()
    }

    pub fn active_listeners(&self) -> Vec<ListenerTarget> {
        lock(&self.events.active).values().copied().collect()
    }

    pub fn has_listener(&self, target: ListenerTarget) -> bool {
        lock(&self.events.active).values().any(|t| *t == target)
    }

    /// Removals of ids that were not attached (double removal included).
    pub fn removal_errors(&self) -> usize {
        self.events.removal_errors.load(Ordering::SeqCst)
    }
}

impl Platform for MockPlatform {
    fn network(&self) -> &dyn NetworkApi {
        &self.network
    }

    fn events(&self) -> &dyn EventHub {
        &self.events
    }

    fn service_worker(&self) -> Option<&dyn ServiceWorkerApi> {
        self.service_worker
            .as_ref()
            .map(|sw| sw as &dyn ServiceWorkerApi)
    }

    fn caches(&self) -> Option<&dyn CacheApi> {
        self.caches.as_ref().map(|c| c as &dyn CacheApi)
    }
}
