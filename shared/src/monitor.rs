use tracing::debug;

use crate::config::QualityTiers;
use crate::model::ConnectionQuality;
use crate::platform::{ConnectionInfo, NetworkApi};

/// Reads ambient network state and classifies it. Holds no state of its own;
/// results are written into the snapshot by the facade.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMonitor {
    tiers: QualityTiers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionReading {
    pub is_online: bool,
    pub quality: ConnectionQuality,
}

impl ConnectionMonitor {
    #[must_use]
    pub const fn new(tiers: QualityTiers) -> Self {
        Self { tiers }
    }

    /// Current reading straight from the platform.
    #[must_use]
    pub fn read(&self, network: &dyn NetworkApi) -> ConnectionReading {
        self.reading_for(network.is_online(), network)
    }

    /// Reading after an `online`/`offline` event. The event decides the
    /// online flag; the quality signal is re-read.
    #[must_use]
    pub fn reading_for(&self, is_online: bool, network: &dyn NetworkApi) -> ConnectionReading {
        let info = if is_online { network.connection() } else { None };
        let quality = self.classify(is_online, info.as_ref());
        debug!(is_online, %quality, "connection reading");
        ConnectionReading { is_online, quality }
    }

    #[must_use]
    pub fn classify(&self, is_online: bool, info: Option<&ConnectionInfo>) -> ConnectionQuality {
        if !is_online {
            return ConnectionQuality::Offline;
        }
        // No Network Information API: optimistic while online.
        let Some(info) = info else {
            return ConnectionQuality::Good;
        };

        let by_type = info.effective_type.as_deref().and_then(|effective| {
            self.tiers
                .effective_types
                .iter()
                .find(|t| t.effective_type.eq_ignore_ascii_case(effective.trim()))
                .map(|t| t.quality)
        });
        if let Some(quality) = by_type {
            return quality;
        }

        let by_downlink = info
            .downlink_mbps
            .filter(|d| d.is_finite() && *d >= 0.0)
            .and_then(|downlink| {
                self.tiers
                    .downlink
                    .iter()
                    .find(|t| downlink >= t.min_downlink_mbps)
                    .map(|t| t.quality)
            });
        by_downlink.unwrap_or(self.tiers.fallback)
    }
}
