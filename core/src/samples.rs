//! Collected radio samples and where they go.

use crate::crypto::HelloMessage;
use crate::signal::TimestampedRssi;
use crate::transport::BleDevice;
use parking_lot::RwLock;
use std::collections::HashMap;

/// One received Hello with the radio conditions it arrived under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProximitySample {
    pub device: BleDevice,
    pub hello: HelloMessage,
    /// Raw reading as measured
    pub timestamped_rssi: TimestampedRssi,
    pub calibrated_rssi: i32,
}

impl ProximitySample {
    pub fn ebid(&self) -> [u8; 8] {
        self.hello.ebid
    }

    /// The sample as scored: calibrated value, original id and timestamp
    pub fn calibrated(&self) -> TimestampedRssi {
        TimestampedRssi::new(
            self.timestamped_rssi.id.clone(),
            self.timestamped_rssi.timestamp,
            self.calibrated_rssi,
        )
    }
}

/// Receives every sample the engine records
#[cfg_attr(test, mockall::automock)]
pub trait SampleSink: Send + Sync {
    fn record(&self, sample: ProximitySample);
}

/// Per-peer sample history held in memory, keyed by EBID
#[derive(Debug, Default)]
pub struct MemorySampleStore {
    peers: RwLock<HashMap<[u8; 8], Vec<TimestampedRssi>>>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chronological history for one peer
    pub fn history(&self, ebid: &[u8; 8]) -> Vec<TimestampedRssi> {
        self.peers.read().get(ebid).cloned().unwrap_or_default()
    }

    pub fn peers(&self) -> Vec<[u8; 8]> {
        let mut peers: Vec<[u8; 8]> = self.peers.read().keys().copied().collect();
        peers.sort_unstable();
        peers
    }

    pub fn sample_count(&self) -> usize {
        self.peers.read().values().map(Vec::len).sum()
    }

    /// Run `update` over a peer's stored history in place
    pub fn update_history<R>(
        &self,
        ebid: &[u8; 8],
        update: impl FnOnce(&mut Vec<TimestampedRssi>) -> R,
    ) -> Option<R> {
        self.peers.write().get_mut(ebid).map(update)
    }

    fn upsert(history: &mut Vec<TimestampedRssi>, sample: TimestampedRssi) {
        if let Some(existing) = history.iter_mut().find(|s| s.id == sample.id) {
            *existing = sample;
            return;
        }
        let position = history.partition_point(|s| s.timestamp <= sample.timestamp);
        history.insert(position, sample);
    }
}

impl SampleSink for MemorySampleStore {
    fn record(&self, sample: ProximitySample) {
        let mut peers = self.peers.write();
        let history = peers.entry(sample.ebid()).or_default();
        Self::upsert(history, sample.calibrated());
    }
}
