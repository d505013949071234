use crate::platform::{WorkerId, WorkerScriptState};

/// Everything the host forwards to the facade. One variant per
/// [`crate::platform::ListenerTarget`] the facade may listen on.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    Online,
    Offline,
    /// `navigator.connection` fired `change`.
    ConnectionChange,
    WorkerStateChange {
        worker: WorkerId,
        state: WorkerScriptState,
    },
    /// `registration.onupdatefound`.
    UpdateFound,
    /// Raw `MessageEvent.data` from the worker.
    WorkerMessage(serde_json::Value),
    /// The periodic crisis cache re-check timer fired.
    RecheckTick,
}

impl PlatformEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::ConnectionChange => "connection_change",
            Self::WorkerStateChange { .. } => "worker_state_change",
            Self::UpdateFound => "update_found",
            Self::WorkerMessage(_) => "worker_message",
            Self::RecheckTick => "recheck_tick",
        }
    }
}
