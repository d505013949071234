use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{ConfigError, ResilienceConfig};
use crate::platform::CacheApi;

/// Path fragments that must all be cached before crisis resources count as
/// available offline. Never empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrisisResourceManifest {
    paths: Arc<[String]>,
}

impl CrisisResourceManifest {
    pub fn new(paths: Vec<String>) -> Result<Self, ConfigError> {
        if paths.is_empty() {
            return Err(ConfigError::Validation(
                "crisis manifest must list at least one path".into(),
            ));
        }
        if paths.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "crisis manifest entries must not be blank".into(),
            ));
        }
        Ok(Self {
            paths: paths.into(),
        })
    }

    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Manifest fragments with no matching cached path.
    #[must_use]
    pub fn missing<'a>(&'a self, cached_paths: &[String]) -> Vec<&'a str> {
        self.paths
            .iter()
            .filter(|fragment| !cached_paths.iter().any(|p| p.contains(fragment.as_str())))
            .map(String::as_str)
            .collect()
    }

    /// Conjunctive: one missing fragment fails the whole manifest.
    #[must_use]
    pub fn is_satisfied_by(&self, cached_paths: &[String]) -> bool {
        self.missing(cached_paths).is_empty()
    }
}

/// Path of a cached request URL. Relative keys are used as they are.
#[must_use]
pub fn entry_path(entry: &str) -> String {
    match Url::parse(entry) {
        Ok(url) => url.path().to_string(),
        Err(_) => entry.to_string(),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckToken(u64);

#[derive(Debug)]
pub struct CrisisResourceCacheChecker {
    cache_name: String,
    manifest: CrisisResourceManifest,
    sequence: AtomicU64,
}

impl CrisisResourceCacheChecker {
    pub fn new(cache_name: impl Into<String>, manifest: CrisisResourceManifest) -> Self {
        Self {
            cache_name: cache_name.into(),
            manifest,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Result<Self, ConfigError> {
        let manifest = CrisisResourceManifest::new(config.crisis_manifest.clone())?;
        Ok(Self::new(config.cache_name.clone(), manifest))
    }

    #[must_use]
    pub const fn manifest(&self) -> &CrisisResourceManifest {
        &self.manifest
    }

    /// Starts a check; every earlier token stops being current.
    pub fn begin(&self) -> CheckToken {
        CheckToken(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Invalidates every check in flight without starting a new one.
    pub fn supersede(&self) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_current(&self, token: CheckToken) -> bool {
        self.sequence.load(Ordering::SeqCst) == token.0
    }

    /// Whether every manifest entry is in the cache. Never fails: a missing
    /// cache API or any cache error reads as unavailable.
    #[instrument(skip(self, caches), fields(cache = %self.cache_name))]
    pub async fn check_availability(&self, caches: Option<&dyn CacheApi>) -> bool {
        let Some(caches) = caches else {
            debug!("cache storage unsupported");
            return false;
        };
        let entries = match caches.keys(&self.cache_name).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "crisis resource cache check failed");
                return false;
            }
        };
        let cached_paths: Vec<String> = entries.iter().map(|e| entry_path(e)).collect();
        let missing = self.manifest.missing(&cached_paths);
        if missing.is_empty() {
            true
        } else {
            debug!(?missing, "crisis resources not fully cached");
            false
        }
    }

    /// Runs a check under a fresh token. The caller publishes the result
    /// only while [`is_current`](Self::is_current) holds for the token.
    pub async fn check(&self, caches: Option<&dyn CacheApi>) -> (CheckToken, bool) {
        let token = self.begin();
        let available = self.check_availability(caches).await;
        (token, available)
    }
}
