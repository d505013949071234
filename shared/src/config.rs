use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ConnectionQuality;

pub const DEFAULT_CACHE_NAME: &str = "crisis-resources-v1";
pub const MIN_RECHECK_INTERVAL_MS: u64 = 1_000;

pub const DEFAULT_CRISIS_MANIFEST: &[&str] = &[
    "/crisis-support",
    "/offline.html",
    "/api/crisis-resources",
    "/api/emergency-contacts",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("malformed config: {0}")]
    Malformed(String),
}

/// One row of the effective-type table: a categorical bucket reported by the
/// platform (`4g`, `3g`, ...) and the tier it maps to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectiveTypeTier {
    pub effective_type: String,
    pub quality: ConnectionQuality,
}

/// Throughput fallback row: at least `min_downlink_mbps` maps to `quality`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownlinkTier {
    pub min_downlink_mbps: f64,
    pub quality: ConnectionQuality,
}

/// Coarse, best-effort classification policy. Replaceable as a whole.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityTiers {
    pub effective_types: Vec<EffectiveTypeTier>,
    /// Checked in order; the first row whose threshold is met wins.
    pub downlink: Vec<DownlinkTier>,
    /// Used when neither table yields a tier.
    pub fallback: ConnectionQuality,
}

impl Default for QualityTiers {
    fn default() -> Self {
        let et = |effective_type: &str, quality| EffectiveTypeTier {
            effective_type: effective_type.to_string(),
            quality,
        };
        Self {
            effective_types: vec![
                et("4g", ConnectionQuality::Excellent),
                et("3g", ConnectionQuality::Good),
                et("2g", ConnectionQuality::Poor),
                et("slow-2g", ConnectionQuality::Poor),
            ],
            downlink: vec![
                DownlinkTier {
                    min_downlink_mbps: 10.0,
                    quality: ConnectionQuality::Excellent,
                },
                DownlinkTier {
                    min_downlink_mbps: 1.5,
                    quality: ConnectionQuality::Good,
                },
                DownlinkTier {
                    min_downlink_mbps: 0.0,
                    quality: ConnectionQuality::Poor,
                },
            ],
            fallback: ConnectionQuality::Good,
        }
    }
}

impl QualityTiers {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let offline_tier = self
            .effective_types
            .iter()
            .map(|t| t.quality)
            .chain(self.downlink.iter().map(|t| t.quality))
            .chain(std::iter::once(self.fallback))
            .any(|q| q == ConnectionQuality::Offline);
        if offline_tier {
            return Err(ConfigError::Validation(
                "quality tiers cannot classify an online connection as offline".into(),
            ));
        }
        for tier in &self.downlink {
            if !tier.min_downlink_mbps.is_finite() || tier.min_downlink_mbps < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "invalid downlink threshold: {}",
                    tier.min_downlink_mbps
                )));
            }
        }
        let descending = self
            .downlink
            .windows(2)
            .all(|w| w[0].min_downlink_mbps >= w[1].min_downlink_mbps);
        if !descending {
            return Err(ConfigError::Validation(
                "downlink thresholds must be in descending order".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Name of the persistent cache the worker fills with crisis resources.
    pub cache_name: String,
    /// Path fragments that must all be cached for crisis resources to count
    /// as available offline.
    pub crisis_manifest: Vec<String>,
    pub quality_tiers: QualityTiers,
    /// Periodic re-check of the crisis cache. `None` disables the timer.
    pub recheck_interval_ms: Option<u64>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            crisis_manifest: DEFAULT_CRISIS_MANIFEST
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            quality_tiers: QualityTiers::default(),
            recheck_interval_ms: None,
        }
    }
}

impl ResilienceConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_name.trim().is_empty() {
            return Err(ConfigError::Validation("cache_name must not be empty".into()));
        }
        // An empty manifest would make the conjunctive check vacuously true.
        if self.crisis_manifest.is_empty() {
            return Err(ConfigError::Validation(
                "crisis_manifest must list at least one path".into(),
            ));
        }
        if self.crisis_manifest.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "crisis_manifest entries must not be blank".into(),
            ));
        }
        if let Some(interval) = self.recheck_interval_ms {
            if interval < MIN_RECHECK_INTERVAL_MS {
                return Err(ConfigError::Validation(format!(
                    "recheck_interval_ms should be at least {MIN_RECHECK_INTERVAL_MS}ms"
                )));
            }
        }
        self.quality_tiers.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ResilienceConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_manifest_rejected() {
        let config = ResilienceConfig {
            crisis_manifest: Vec::new(),
            ..ResilienceConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn blank_manifest_entry_rejected() {
        let config = ResilienceConfig {
            crisis_manifest: vec!["/crisis".into(), "  ".into()],
            ..ResilienceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn short_recheck_interval_rejected() {
        let config = ResilienceConfig {
            recheck_interval_ms: Some(10),
            ..ResilienceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn offline_tier_rejected() {
        let mut config = ResilienceConfig::default();
        config.quality_tiers.fallback = ConnectionQuality::Offline;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unordered_downlink_rejected() {
        let mut config = ResilienceConfig::default();
        config.quality_tiers.downlink.reverse();
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config =
            ResilienceConfig::from_json_str(r#"{"cache_name": "crisis-v2"}"#).unwrap();
        assert_eq!(config.cache_name, "crisis-v2");
        assert_eq!(config.crisis_manifest.len(), DEFAULT_CRISIS_MANIFEST.len());
        assert_eq!(config.recheck_interval_ms, None);
    }

    #[test]
    fn malformed_json_reported() {
        let err = ResilienceConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn json_validation_applies() {
        let err = ResilienceConfig::from_json_str(r#"{"crisis_manifest": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
