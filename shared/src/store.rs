use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::model::{ConnectionQuality, ConnectionStatus, StatusDraft, UnixTimeMs};
use crate::registry::CapabilityRegistry;

pub type StatusReceiver = watch::Receiver<Arc<ConnectionStatus>>;

/// Holds the one `ConnectionStatus` and republishes it whole on every write.
#[derive(Debug)]
pub struct StatusStore {
    tx: watch::Sender<Arc<ConnectionStatus>>,
    registry: CapabilityRegistry,
}

impl StatusStore {
    pub fn new(initial: StatusDraft, registry: CapabilityRegistry) -> Self {
        let snapshot = Self::build(initial, &registry);
        let (tx, _rx) = watch::channel(Arc::new(snapshot));
        Self { tx, registry }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<ConnectionStatus> {
        Arc::clone(&self.tx.borrow())
    }

    #[must_use]
    pub fn subscribe(&self) -> StatusReceiver {
        self.tx.subscribe()
    }

    /// Derives the next snapshot from the current one. The edit, the
    /// invariant fix-up, the capability recompute and the swap all happen
    /// under the channel lock; subscribers are only notified on change.
    pub fn apply<F>(&self, edit: F) -> Arc<ConnectionStatus>
    where
        F: FnOnce(&mut StatusDraft),
    {
        self.tx.send_if_modified(|slot| {
            let mut draft = slot.to_draft();
            edit(&mut draft);
            let next = Self::build(draft, &self.registry);
            if next == **slot {
                return false;
            }
            debug!(
                online = next.is_online,
                quality = %next.connection_quality,
                worker = %next.worker_lifecycle_state,
                crisis = next.crisis_resources_available,
                last_sync = next.last_sync.map(UnixTimeMs::as_millis),
                "status updated"
            );
            *slot = Arc::new(next);
            true
        });
        self.snapshot()
    }

    /// Re-derives capabilities from the current inputs without changing them.
    pub fn recompute(&self) -> Arc<ConnectionStatus> {
        self.apply(|_| {})
    }

    fn build(mut draft: StatusDraft, registry: &CapabilityRegistry) -> ConnectionStatus {
        if !draft.is_online {
            draft.connection_quality = ConnectionQuality::Offline;
        } else if draft.connection_quality == ConnectionQuality::Offline {
            draft.connection_quality = ConnectionQuality::Good;
        }
        draft.worker_registered = draft.worker_lifecycle_state.is_registered();
        let capabilities = registry.recompute(
            draft.is_online,
            draft.worker_lifecycle_state,
            draft.crisis_resources_available,
        );
        ConnectionStatus::from_draft(&draft, capabilities)
    }
}
