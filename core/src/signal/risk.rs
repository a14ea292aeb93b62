/// Fading-compensated window averaging and per-window risk
///
/// Each window's samples are averaged with a log-sum-exp ("softmax")
/// average, `a * ln(mean(exp(rssi / a)))`.
/// The average is then mapped to `[0, 1]` against the reference power `p0`
/// using a delta picked from the decay table by sample count.

use super::{bounded_duration_secs, TimestampedRssi};
use crate::config::FilterConfig;
use serde::{Deserialize, Serialize};

/// Log-sum-exp average of `rssis`; `None` for an empty slice
pub fn softmax_average(rssis: &[i32], a: f64) -> Option<f64> {
    if rssis.is_empty() {
        return None;
    }
    let scaled: Vec<f64> = rssis.iter().map(|rssi| f64::from(*rssi) / a).collect();
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean_exp = scaled.iter().map(|x| (x - max).exp()).sum::<f64>() / scaled.len() as f64;
    Some(a * (max + mean_exp.ln()))
}

/// Risk in `[0, 1]` for the samples of one window; 0 for an empty window
pub fn window_risk(rssis: &[i32], config: &FilterConfig) -> f64 {
    let average = match softmax_average(rssis, config.a) {
        Some(average) => average,
        None => return 0.0,
    };
    let last = config.deltas.len().saturating_sub(1);
    let delta = match config.deltas.get((rssis.len() - 1).min(last)) {
        Some(delta) => *delta,
        None => return 0.0,
    };
    ((average - config.p0) / delta).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub window_risks: Vec<f64>,
    /// Power mean of the window risks with exponent `b`
    pub intermediate_risk: f64,
    /// Sum of the window risks
    pub risk: f64,
    /// Number of windows with a non-zero risk
    pub risk_density: usize,
}

pub struct RiskComputer<'a> {
    config: &'a FilterConfig,
}

impl<'a> RiskComputer<'a> {
    pub fn new(config: &'a FilterConfig) -> Self {
        Self { config }
    }

    /// Windowed risk over `[epoch_start, epoch_start + duration)`.
    ///
    /// Window `k` covers `[start + k * step, start + k * step + window)`; with
    /// a 120 s window and 60 s overlap that is minute `k` merged with minute
    /// `k + 1`.
    pub fn window_risks(
        &self,
        samples: &[TimestampedRssi],
        epoch_start_ms: i64,
        duration_secs: i64,
    ) -> Vec<f64> {
        let step_secs = self.config.window_step_secs();
        if duration_secs <= 0 || step_secs <= 0 {
            return Vec::new();
        }
        let duration_secs = bounded_duration_secs(duration_secs);
        let window_count = duration_secs / step_secs + i64::from(duration_secs % step_secs != 0);
        let step_ms = step_secs.saturating_mul(1000);
        let window_ms = self.config.time_window_secs.saturating_mul(1000);

        (0..window_count)
            .map(|k| {
                let start = epoch_start_ms.saturating_add(k.saturating_mul(step_ms));
                let end = start.saturating_add(window_ms);
                let rssis: Vec<i32> = samples
                    .iter()
                    .filter(|s| s.timestamp >= start && s.timestamp < end)
                    .map(|s| s.rssi)
                    .collect();
                window_risk(&rssis, self.config)
            })
            .collect()
    }

    pub fn compute(
        &self,
        samples: &[TimestampedRssi],
        epoch_start_ms: i64,
        duration_secs: i64,
    ) -> RiskSummary {
        let window_risks = self.window_risks(samples, epoch_start_ms, duration_secs);
        self.aggregate(window_risks)
    }

    pub fn aggregate(&self, window_risks: Vec<f64>) -> RiskSummary {
        let risk: f64 = window_risks.iter().sum();
        let risk_density = window_risks.iter().filter(|r| **r > 0.0).count();
        let intermediate_risk = power_mean(&window_risks, self.config.b);
        RiskSummary {
            window_risks,
            intermediate_risk,
            risk,
            risk_density,
        }
    }
}

fn power_mean(values: &[f64], exponent: f64) -> f64 {
    if values.is_empty() || exponent <= 0.0 {
        return 0.0;
    }
    let mean = values.iter().map(|v| v.max(0.0).powf(exponent)).sum::<f64>() / values.len() as f64;
    mean.powf(1.0 / exponent)
}
