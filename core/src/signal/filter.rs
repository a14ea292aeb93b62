//! Proximity filter: the mode-driven acceptance pipeline.
//!
//! 1. duration gate (all modes)
//! 2. peak clipping (medium, risks)
//! 3. windowed risk (medium, risks)
//! 4. aggregate risk and acceptance threshold (risks)

use super::clipper::RssiClipper;
use super::risk::RiskComputer;
use super::{bounded_duration_secs, span_millis, TimestampedRssi};
use crate::config::FilterConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Level of detail computed by [`ProximityFilter::filter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Acceptance test only
    Full,
    /// Plus clipped samples, peaks and per-window risk
    Medium,
    /// Plus aggregate risk and density
    Risks,
}

impl std::str::FromStr for FilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "medium" => Ok(Self::Medium),
            "risks" => Ok(Self::Risks),
            other => Err(format!("unknown filter mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedProximity {
    pub timestamped_rssis: Vec<TimestampedRssi>,
    pub are_updated: Vec<bool>,
    pub peak_count: Option<usize>,
    pub mean_peak: Option<f64>,
    pub window_risks: Option<Vec<f64>>,
    pub intermediate_risk: Option<f64>,
    pub risk: Option<f64>,
    pub risk_density: Option<usize>,
    pub duration_in_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProximityFilterOutput {
    Rejected,
    Accepted(Box<AcceptedProximity>),
}

impl ProximityFilterOutput {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn accepted(&self) -> Option<&AcceptedProximity> {
        match self {
            Self::Accepted(accepted) => Some(accepted),
            Self::Rejected => None,
        }
    }
}

pub struct ProximityFilter<'a> {
    config: &'a FilterConfig,
}

impl<'a> ProximityFilter<'a> {
    pub fn new(config: &'a FilterConfig) -> Self {
        Self { config }
    }

    /// Score one peer epoch.
    ///
    /// `samples` must be chronological. `epoch_start_ms` anchors the
    /// scoring windows and `duration_secs` is the epoch length to cover.
    pub fn filter(
        &self,
        samples: &[TimestampedRssi],
        epoch_start_ms: i64,
        duration_secs: i64,
        mode: FilterMode,
    ) -> ProximityFilterOutput {
        if duration_secs <= 0 || samples.is_empty() {
            return ProximityFilterOutput::Rejected;
        }
        let duration_secs = bounded_duration_secs(duration_secs);
        let span_ms = span_millis(samples);
        // the shorter of the observed span and the requested duration counts
        let covered_ms = span_ms.min(duration_secs.saturating_mul(1000));
        if covered_ms < self.config.duration_threshold_secs.saturating_mul(1000) {
            return ProximityFilterOutput::Rejected;
        }
        let duration_in_minutes = round_one_decimal(span_ms as f64 / 60_000.0);

        if mode == FilterMode::Full {
            return ProximityFilterOutput::Accepted(Box::new(AcceptedProximity {
                timestamped_rssis: samples.to_vec(),
                are_updated: vec![false; samples.len()],
                peak_count: None,
                mean_peak: None,
                window_risks: None,
                intermediate_risk: None,
                risk: None,
                risk_density: None,
                duration_in_minutes,
            }));
        }

        let clipped = RssiClipper::new(self.config.rssi_threshold).clip(samples);
        let computer = RiskComputer::new(self.config);
        let window_risks = computer.window_risks(&clipped.samples, epoch_start_ms, duration_secs);

        let mut accepted = AcceptedProximity {
            peak_count: Some(clipped.peak_count()),
            mean_peak: clipped.mean_peak(),
            timestamped_rssis: clipped.samples,
            are_updated: clipped.are_updated,
            window_risks: None,
            intermediate_risk: None,
            risk: None,
            risk_density: None,
            duration_in_minutes,
        };

        if mode == FilterMode::Medium {
            accepted.window_risks = Some(window_risks);
            return ProximityFilterOutput::Accepted(Box::new(accepted));
        }

        let summary = computer.aggregate(window_risks);
        if summary.risk < self.config.risk_threshold {
            return ProximityFilterOutput::Rejected;
        }
        accepted.window_risks = Some(summary.window_risks);
        accepted.intermediate_risk = Some(summary.intermediate_risk);
        accepted.risk = Some(summary.risk);
        accepted.risk_density = Some(summary.risk_density);
        ProximityFilterOutput::Accepted(Box::new(accepted))
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Merge re-scored samples back into stored history.
///
/// Samples flagged as updated replace the stored sample with the same id in
/// place; unseen ids are appended. Returns the number of samples touched.
pub fn apply_updates(stored: &mut Vec<TimestampedRssi>, output: &ProximityFilterOutput) -> usize {
    let accepted = match output.accepted() {
        Some(accepted) => accepted,
        None => return 0,
    };

    let index: HashMap<String, usize> = stored
        .iter()
        .enumerate()
        .map(|(i, sample)| (sample.id.clone(), i))
        .collect();

    let mut touched = 0;
    for (sample, updated) in accepted.timestamped_rssis.iter().zip(&accepted.are_updated) {
        match index.get(&sample.id) {
            Some(position) if *updated => {
                stored[*position] = sample.clone();
                touched += 1;
            }
            Some(_) => {}
            None => {
                stored.push(sample.clone());
                touched += 1;
            }
        }
    }
    touched
}
