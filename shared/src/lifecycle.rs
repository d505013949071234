//! Service worker lifecycle as an explicit state machine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::model::WorkerLifecycleState;
use crate::platform::{
    EventHub, ListenerId, ListenerTarget, Platform, Registration, WorkerHandle, WorkerId,
    WorkerScriptState,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: WorkerLifecycleState,
        to: WorkerLifecycleState,
    },
}

/// Transition table for a single tracked worker.
///
/// `Redundant -> Installing` is the re-entry path once a replacement worker
/// shows up. Losing the registration is allowed from anywhere.
#[must_use]
pub fn can_transition(from: WorkerLifecycleState, to: WorkerLifecycleState) -> bool {
    use crate::model::WorkerLifecycleState::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (NotRegistered, Installing | Waiting | Active)
            | (Installing, Waiting | Active | Redundant)
            | (Waiting, Active | Redundant)
            | (Active, Redundant)
            | (Redundant, Installing)
            | (Installing | Waiting | Active | Redundant, NotRegistered)
    )
}

pub fn transition(
    from: WorkerLifecycleState,
    to: WorkerLifecycleState,
) -> Result<WorkerLifecycleState, LifecycleError> {
    if can_transition(from, to) {
        Ok(to)
    } else {
        Err(LifecycleError::InvalidTransition { from, to })
    }
}

/// Maps `ServiceWorker.state` onto the lifecycle. `activating` is not a
/// lifecycle step of its own and yields `None`.
#[must_use]
pub const fn lifecycle_for(state: WorkerScriptState) -> Option<WorkerLifecycleState> {
    match state {
        WorkerScriptState::Parsed | WorkerScriptState::Installing => {
            Some(WorkerLifecycleState::Installing)
        }
        WorkerScriptState::Installed => Some(WorkerLifecycleState::Waiting),
        WorkerScriptState::Activating => None,
        WorkerScriptState::Activated => Some(WorkerLifecycleState::Active),
        WorkerScriptState::Redundant => Some(WorkerLifecycleState::Redundant),
    }
}

/// The worker to follow and the lifecycle state implied by its slot.
#[must_use]
pub fn current_worker(
    registration: &Registration,
) -> Option<(WorkerHandle, WorkerLifecycleState)> {
    registration
        .installing
        .map(|w| (w, WorkerLifecycleState::Installing))
        .or_else(|| registration.waiting.map(|w| (w, WorkerLifecycleState::Waiting)))
        .or_else(|| registration.active.map(|w| (w, WorkerLifecycleState::Active)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeOutcome {
    /// Untracked worker, no lifecycle step, or a rejected transition.
    Ignored,
    Updated(WorkerLifecycleState),
    /// The tracked worker went redundant; the registration should be
    /// queried again for its replacement.
    Redundant,
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    worker: WorkerId,
    listener: Option<ListenerId>,
}

#[derive(Debug, Default)]
struct TrackerState {
    state: WorkerLifecycleState,
    tracked: Option<Tracked>,
}

/// Follows exactly one worker at a time and owns its `statechange` listener.
#[derive(Debug, Default)]
pub struct WorkerLifecycleTracker {
    inner: Mutex<TrackerState>,
    /// Bumped by every registration lookup; only the latest may apply.
    lookups: AtomicU64,
}

impl WorkerLifecycleTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> WorkerLifecycleState {
        self.lock().state
    }

    #[must_use]
    pub fn tracked_worker(&self) -> Option<WorkerId> {
        self.lock().tracked.map(|t| t.worker)
    }

    /// Looks up the registration and adopts its newest worker. Lookup
    /// failures and a missing worker API leave the state untouched, and so
    /// does a lookup overtaken by a later one.
    #[instrument(skip(self, platform))]
    pub async fn sync(&self, platform: &dyn Platform) -> WorkerLifecycleState {
        let Some(container) = platform.service_worker() else {
            debug!("service worker API unsupported");
            return self.state();
        };
        let lookup = self.lookups.fetch_add(1, Ordering::SeqCst) + 1;
        let registration = match container.registration().await {
            Ok(registration) => registration,
            Err(e) => {
                warn!(error = %e, "service worker registration lookup failed");
                return self.state();
            }
        };
        match registration.as_ref().and_then(current_worker) {
            Some((worker, slot_state)) => {
                self.adopt(platform.events(), lookup, worker, slot_state)
            }
            None => self.registration_lost(platform.events(), lookup),
        }
    }

    /// Checked under the state lock so a newer lookup cannot slip in
    /// between the check and the write.
    fn is_latest(&self, lookup: u64) -> bool {
        let latest = self.lookups.load(Ordering::SeqCst) == lookup;
        if !latest {
            debug!(lookup, "discarding superseded registration lookup");
        }
        latest
    }

    fn adopt(
        &self,
        hub: &dyn EventHub,
        lookup: u64,
        worker: WorkerHandle,
        slot_state: WorkerLifecycleState,
    ) -> WorkerLifecycleState {
        let mut st = self.lock();
        if !self.is_latest(lookup) {
            return st.state;
        }
        let same_worker = st.tracked.is_some_and(|t| t.worker == worker.id);

        if same_worker {
            match transition(st.state, slot_state) {
                Ok(next) => st.state = next,
                Err(e) => debug!(error = %e, "registration slot behind tracked state"),
            }
            return st.state;
        }

        // A different worker replaces the tracked one outright.
        if let Some(old) = st.tracked.take() {
            release_listener(hub, old.listener);
        }
        let listener = match hub.add_listener(ListenerTarget::WorkerStateChange(worker.id)) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(worker = worker.id.0, error = %e, "could not observe worker statechange");
                None
            }
        };
        st.tracked = Some(Tracked {
            worker: worker.id,
            listener,
        });
        info!(worker = worker.id.0, from = %st.state, to = %slot_state, "adopted service worker");
        st.state = slot_state;
        st.state
    }

    fn registration_lost(&self, hub: &dyn EventHub, lookup: u64) -> WorkerLifecycleState {
        let mut st = self.lock();
        if !self.is_latest(lookup) {
            return st.state;
        }
        if let Some(old) = st.tracked.take() {
            release_listener(hub, old.listener);
        }
        if st.state != WorkerLifecycleState::NotRegistered {
            info!(from = %st.state, "service worker registration gone");
        }
        st.state = WorkerLifecycleState::NotRegistered;
        st.state
    }

    /// Applies a `statechange` from the platform.
    pub fn on_state_change(
        &self,
        hub: &dyn EventHub,
        worker: WorkerId,
        script_state: WorkerScriptState,
    ) -> StateChangeOutcome {
        let mut st = self.lock();
        let Some(tracked) = st.tracked.filter(|t| t.worker == worker) else {
            debug!(worker = worker.0, "statechange from untracked worker");
            return StateChangeOutcome::Ignored;
        };
        let Some(target) = lifecycle_for(script_state) else {
            return StateChangeOutcome::Ignored;
        };
        match transition(st.state, target) {
            Ok(WorkerLifecycleState::Redundant) => {
                release_listener(hub, tracked.listener);
                st.tracked = None;
                st.state = WorkerLifecycleState::Redundant;
                info!(worker = worker.0, "service worker became redundant");
                StateChangeOutcome::Redundant
            }
            Ok(next) => {
                st.state = next;
                StateChangeOutcome::Updated(next)
            }
            Err(e) => {
                warn!(worker = worker.0, error = %e, "ignoring worker statechange");
                StateChangeOutcome::Ignored
            }
        }
    }

    /// Drops the tracked worker's listener. Idempotent.
    pub fn release(&self, hub: &dyn EventHub) {
        let tracked = self.lock().tracked.take();
        if let Some(old) = tracked {
            release_listener(hub, old.listener);
        }
    }
}

fn release_listener(hub: &dyn EventHub, listener: Option<ListenerId>) {
    if let Some(id) = listener {
        if let Err(e) = hub.remove_listener(id) {
            warn!(?id, error = %e, "could not remove statechange listener");
        }
    }
}
