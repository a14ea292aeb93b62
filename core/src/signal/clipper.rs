//! Peak clipping.
//!
//! Samples stronger than the threshold are flattened to it. Count and order
//! never change.

use super::TimestampedRssi;

#[derive(Debug, Clone, PartialEq)]
pub struct ClippedSeries {
    pub samples: Vec<TimestampedRssi>,
    /// `true` where the sample value was replaced
    pub are_updated: Vec<bool>,
    /// Original values of the replaced samples, in input order
    pub filtered_peaks: Vec<i32>,
}

impl ClippedSeries {
    pub fn peak_count(&self) -> usize {
        self.filtered_peaks.len()
    }

    pub fn mean_peak(&self) -> Option<f64> {
        if self.filtered_peaks.is_empty() {
            return None;
        }
        let sum: f64 = self.filtered_peaks.iter().map(|rssi| f64::from(*rssi)).sum();
        Some(sum / self.filtered_peaks.len() as f64)
    }
}

pub struct RssiClipper {
    threshold: i32,
}

impl RssiClipper {
    pub fn new(threshold: i32) -> Self {
        Self { threshold }
    }

    pub fn clip(&self, samples: &[TimestampedRssi]) -> ClippedSeries {
        let mut clipped = Vec::with_capacity(samples.len());
        let mut are_updated = Vec::with_capacity(samples.len());
        let mut filtered_peaks = Vec::new();

        for sample in samples {
            if sample.rssi > self.threshold {
                filtered_peaks.push(sample.rssi);
                are_updated.push(true);
                clipped.push(TimestampedRssi {
                    rssi: self.threshold,
                    ..sample.clone()
                });
            } else {
                are_updated.push(false);
                clipped.push(sample.clone());
            }
        }

        ClippedSeries {
            samples: clipped,
            are_updated,
            filtered_peaks,
        }
    }
}
