//! Offline resilience and crisis-resource availability.
//!
//! Reconciles network reachability, the service worker lifecycle and the
//! crisis resource cache into one [`ConnectionStatus`] snapshot that
//! safety-critical UI reads through a [`ConnectionFacade`].

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod bridge;
pub mod cache_checker;
pub mod config;
pub mod event;
pub mod facade;
pub mod lifecycle;
pub mod model;
pub mod monitor;
pub mod platform;
pub mod registry;
pub mod store;

pub use bridge::{MessageType, WorkerMessage};
pub use cache_checker::{CrisisResourceCacheChecker, CrisisResourceManifest};
pub use config::{ConfigError, QualityTiers, ResilienceConfig};
pub use event::PlatformEvent;
pub use facade::{ConnectionFacade, ConnectionProvider, FacadeError};
pub use lifecycle::WorkerLifecycleTracker;
pub use model::{
    ConnectionQuality, ConnectionStatus, OfflineCapability, UnixTimeMs, WorkerLifecycleState,
};
pub use monitor::ConnectionMonitor;
pub use platform::{Platform, PlatformError, PlatformSupport};
pub use registry::CapabilityRegistry;
pub use store::StatusReceiver;
