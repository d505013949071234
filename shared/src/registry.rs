//! Named feature capabilities derived from the connection snapshot inputs.

use std::sync::Arc;

use crate::model::{OfflineCapability, WorkerLifecycleState};

pub const CRISIS_RESOURCES: &str = "Crisis Resources";
pub const SAFETY_PLAN: &str = "Safety Plan";
pub const COPING_STRATEGIES: &str = "Coping Strategies";
pub const COMMUNITY_POSTS: &str = "Community Posts";
pub const AI_ASSISTANT: &str = "AI Assistant";
pub const HELPER_CHAT: &str = "Helper Chat";

/// How a feature's availability follows from the inputs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AvailabilityRule {
    /// Needs a live network.
    Online,
    /// Needs every crisis manifest entry in the offline cache.
    CrisisResourcesCached,
    /// Served from the network, or from the worker's cache when offline.
    OnlineOrActiveWorker,
    /// Writes are queued by the worker for background sync.
    ActiveWorker,
}

/// The three inputs capabilities are allowed to depend on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CapabilityInputs {
    pub is_online: bool,
    pub worker_state: WorkerLifecycleState,
    pub crisis_available: bool,
}

impl AvailabilityRule {
    #[must_use]
    pub fn evaluate(self, inputs: CapabilityInputs) -> bool {
        let worker_active = inputs.worker_state == WorkerLifecycleState::Active;
        match self {
            Self::Online => inputs.is_online,
            Self::CrisisResourcesCached => inputs.crisis_available,
            Self::OnlineOrActiveWorker => inputs.is_online || worker_active,
            Self::ActiveWorker => worker_active,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapabilityDef {
    pub feature: &'static str,
    pub description: &'static str,
    pub fallback_action: &'static str,
    pub rule: AvailabilityRule,
}

#[must_use]
pub fn default_manifest() -> Vec<CapabilityDef> {
    vec![
        CapabilityDef {
            feature: CRISIS_RESOURCES,
            description: "Emergency hotlines and crisis support information",
            fallback_action: "Call 988 or your local emergency number directly",
            rule: AvailabilityRule::CrisisResourcesCached,
        },
        CapabilityDef {
            feature: SAFETY_PLAN,
            description: "Your personal safety plan",
            fallback_action: "Use a printed or written copy of your safety plan",
            rule: AvailabilityRule::OnlineOrActiveWorker,
        },
        CapabilityDef {
            feature: COPING_STRATEGIES,
            description: "Breathing exercises and grounding techniques",
            fallback_action: "Try slow breathing: in for 4, hold for 4, out for 6",
            rule: AvailabilityRule::OnlineOrActiveWorker,
        },
        CapabilityDef {
            feature: COMMUNITY_POSTS,
            description: "Read saved posts and queue new ones for later",
            fallback_action: "Write your post offline and share it when you reconnect",
            rule: AvailabilityRule::ActiveWorker,
        },
        CapabilityDef {
            feature: AI_ASSISTANT,
            description: "Conversational support assistant",
            fallback_action: "Use the offline coping strategies until you reconnect",
            rule: AvailabilityRule::Online,
        },
        CapabilityDef {
            feature: HELPER_CHAT,
            description: "Live chat with a trained peer helper",
            fallback_action: "Reach out to a trusted contact or call a crisis line",
            rule: AvailabilityRule::Online,
        },
    ]
}

/// Fixed manifest of features; only the `available` flags are recomputed.
#[derive(Clone, Debug)]
pub struct CapabilityRegistry {
    manifest: Arc<[CapabilityDef]>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new(default_manifest())
    }
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new(manifest: Vec<CapabilityDef>) -> Self {
        Self {
            manifest: manifest.into(),
        }
    }

    #[must_use]
    pub fn manifest(&self) -> &[CapabilityDef] {
        &self.manifest
    }

    /// Pure: same inputs, same list, in manifest order.
    #[must_use]
    pub fn recompute(
        &self,
        is_online: bool,
        worker_state: WorkerLifecycleState,
        crisis_available: bool,
    ) -> Vec<OfflineCapability> {
        let inputs = CapabilityInputs {
            is_online,
            worker_state,
            crisis_available,
        };
        self.manifest
            .iter()
            .map(|def| OfflineCapability {
                feature: def.feature.to_string(),
                available: def.rule.evaluate(inputs),
                description: def.description.to_string(),
                fallback_action: def.fallback_action.to_string(),
            })
            .collect()
    }
}

/// Case-insensitive lookup by feature name.
#[must_use]
pub fn find_capability<'a>(
    capabilities: &'a [OfflineCapability],
    feature: &str,
) -> Option<&'a OfflineCapability> {
    let wanted = feature.trim();
    capabilities
        .iter()
        .find(|c| c.feature.eq_ignore_ascii_case(wanted))
}

/// Unknown features are reported unavailable.
#[must_use]
pub fn is_feature_available(capabilities: &[OfflineCapability], feature: &str) -> bool {
    find_capability(capabilities, feature).is_some_and(|c| c.available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_STATES: [WorkerLifecycleState; 5] = [
        WorkerLifecycleState::NotRegistered,
        WorkerLifecycleState::Installing,
        WorkerLifecycleState::Waiting,
        WorkerLifecycleState::Active,
        WorkerLifecycleState::Redundant,
    ];

    fn available(list: &[OfflineCapability], feature: &str) -> bool {
        is_feature_available(list, feature)
    }

    #[test]
    fn manifest_has_six_entries_in_order() {
        let registry = CapabilityRegistry::default();
        let names: Vec<_> = registry.manifest().iter().map(|s| s.feature).collect();
        assert_eq!(
            names,
            vec![
                CRISIS_RESOURCES,
                SAFETY_PLAN,
                COPING_STRATEGIES,
                COMMUNITY_POSTS,
                AI_ASSISTANT,
                HELPER_CHAT
            ]
        );
        assert!(registry
            .manifest()
            .iter()
            .all(|s| !s.fallback_action.is_empty() && !s.description.is_empty()));
    }

    #[test]
    fn fully_degraded_has_nothing_available() {
        let registry = CapabilityRegistry::default();
        let list = registry.recompute(false, WorkerLifecycleState::NotRegistered, false);
        assert_eq!(list.len(), 6);
        assert!(list.iter().all(|c| !c.available));
    }

    #[test]
    fn chat_needs_network() {
        let registry = CapabilityRegistry::default();
        let offline = registry.recompute(false, WorkerLifecycleState::Active, true);
        assert!(!available(&offline, HELPER_CHAT));
        assert!(!available(&offline, AI_ASSISTANT));

        let online = registry.recompute(true, WorkerLifecycleState::NotRegistered, false);
        assert!(available(&online, HELPER_CHAT));
        assert!(available(&online, AI_ASSISTANT));
    }

    #[test]
    fn crisis_resources_follow_cache_only() {
        let registry = CapabilityRegistry::default();
        let online_uncached = registry.recompute(true, WorkerLifecycleState::Active, false);
        assert!(!available(&online_uncached, CRISIS_RESOURCES));

        let offline_cached = registry.recompute(false, WorkerLifecycleState::NotRegistered, true);
        assert!(available(&offline_cached, CRISIS_RESOURCES));
    }

    #[test]
    fn queued_writes_need_active_worker() {
        let registry = CapabilityRegistry::default();
        let waiting = registry.recompute(true, WorkerLifecycleState::Waiting, true);
        assert!(!available(&waiting, COMMUNITY_POSTS));

        let active = registry.recompute(false, WorkerLifecycleState::Active, false);
        assert!(available(&active, COMMUNITY_POSTS));
        assert!(available(&active, SAFETY_PLAN));
        assert!(available(&active, COPING_STRATEGIES));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = CapabilityRegistry::default();
        let list = registry.recompute(true, WorkerLifecycleState::Active, true);
        assert!(find_capability(&list, "helper chat").is_some());
        assert!(find_capability(&list, "  SAFETY PLAN ").is_some());
        assert!(find_capability(&list, "Video Calls").is_none());
        assert!(!is_feature_available(&list, "Video Calls"));
    }

    proptest! {
        #[test]
        fn recompute_is_deterministic(
            is_online in any::<bool>(),
            state_idx in 0usize..5,
            crisis in any::<bool>(),
        ) {
            let registry = CapabilityRegistry::default();
            let state = ALL_STATES[state_idx];
            let first = registry.recompute(is_online, state, crisis);
            let second = registry.recompute(is_online, state, crisis);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.len(), registry.manifest().len());
        }
    }
}
