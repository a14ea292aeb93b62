/// RSSI signal conditioning and exposure risk scoring
///
/// Pure, synchronous computation over chronological RSSI samples of one
/// peer epoch. Nothing here performs I/O or holds shared mutable state.
///
/// - **clipper**: replaces outlier peaks with the configured ceiling
/// - **risk**: softmax window averaging and per-window risk
/// - **filter**: the mode-driven acceptance pipeline
/// - **info_risk**: coarse per-minute score with Low/Medium/High bands
/// - **calibration**: device-specific RSSI correction

pub mod calibration;
pub mod clipper;
pub mod filter;
pub mod info_risk;
pub mod risk;

use crate::config::MAX_SCORING_DURATION_SECS;
use serde::{Deserialize, Serialize};

pub use calibration::{GainCalibration, RssiCalibration};
pub use clipper::{ClippedSeries, RssiClipper};
pub use filter::{apply_updates, AcceptedProximity, FilterMode, ProximityFilter, ProximityFilterOutput};
pub use info_risk::{ProximityInfoRiskComputer, RiskLevel};
pub use risk::{RiskComputer, RiskSummary};

/// Raw radio sample produced by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedRssi {
    pub id: String,
    /// Unix time in milliseconds
    pub timestamp: i64,
    pub rssi: i32,
}

impl TimestampedRssi {
    pub fn new(id: impl Into<String>, timestamp: i64, rssi: i32) -> Self {
        Self {
            id: id.into(),
            timestamp,
            rssi,
        }
    }
}

/// Span between first and last sample, in milliseconds
pub(crate) fn span_millis(samples: &[TimestampedRssi]) -> i64 {
    match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => last.timestamp.saturating_sub(first.timestamp),
        _ => 0,
    }
}

/// Requested duration clamped to what scoring covers
pub(crate) fn bounded_duration_secs(duration_secs: i64) -> i64 {
    duration_secs.min(MAX_SCORING_DURATION_SECS)
}
