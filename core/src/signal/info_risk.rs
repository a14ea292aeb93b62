//! Coarse, non-windowed risk classification.
//!
//! Sums per-minute risks over an explicit interval, each minute merged with
//! its successor, using the same per-window formula as the detailed
//! pipeline so both surfaces agree.

use super::risk::window_risk;
use super::{bounded_duration_secs, TimestampedRssi};
use crate::config::FilterConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MINUTE_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 3.0 {
            RiskLevel::Low
        } else if score < 7.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

pub struct ProximityInfoRiskComputer<'a> {
    config: &'a FilterConfig,
}

impl<'a> ProximityInfoRiskComputer<'a> {
    pub fn new(config: &'a FilterConfig) -> Self {
        Self { config }
    }

    /// Score over `[from, from + duration)`; 0 for a non-positive duration
    pub fn score(&self, samples: &[TimestampedRssi], from_ms: i64, duration_secs: i64) -> f64 {
        if duration_secs <= 0 {
            return 0.0;
        }
        let duration_secs = bounded_duration_secs(duration_secs);
        let minutes = duration_secs / 60 + i64::from(duration_secs % 60 != 0);

        let mut by_minute: BTreeMap<i64, Vec<i32>> = BTreeMap::new();
        for sample in samples.iter().filter(|s| s.timestamp >= from_ms) {
            let minute = sample.timestamp.saturating_sub(from_ms) / MINUTE_MS;
            by_minute.entry(minute).or_default().push(sample.rssi);
        }

        (0..minutes)
            .map(|minute| {
                let mut merged: Vec<i32> = by_minute.get(&minute).cloned().unwrap_or_default();
                if let Some(next) = by_minute.get(&(minute + 1)) {
                    merged.extend_from_slice(next);
                }
                window_risk(&merged, self.config)
            })
            .sum()
    }

    pub fn classify(
        &self,
        samples: &[TimestampedRssi],
        from_ms: i64,
        duration_secs: i64,
    ) -> (f64, RiskLevel) {
        let score = self.score(samples, from_ms, duration_secs);
        (score, RiskLevel::from_score(score))
    }
}
