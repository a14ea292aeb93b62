//! Proximity engine: composition root of the core.
//!
//! Builds the outgoing Hello for each discovered peer, drives the GATT
//! coordinator, records received Hellos as calibrated samples and scores
//! stored history with the current configuration snapshot.

use crate::config::{ConfigError, ConfigHandle, ProximityConfig};
use crate::crypto::{
    build_hello, parse_hello, CryptoError, EphemeralIdentifier, EphemeralIdentifierStore,
    NtpTimestamp,
};
use crate::events::{EventId, EventLevel, EventSink, ProximityEvent};
use crate::samples::{ProximitySample, SampleSink};
use crate::signal::{
    apply_updates, FilterMode, ProximityFilter, ProximityFilterOutput, ProximityInfoRiskComputer,
    RiskLevel, RssiCalibration, TimestampedRssi,
};
use crate::transport::ble::{
    BleAdapter, BleDevice, GattCoordinator, GattError, PayloadResult, ProximityCallback,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("No ephemeral identifier valid right now")]
    NoIdentifier,
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Transport error: {0}")]
    Transport(#[from] GattError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Identifier in force plus the Hello key it is used with
pub struct IdentityMaterial {
    pub identifier: EphemeralIdentifier,
    pub key: Zeroizing<Vec<u8>>,
}

/// Supplies the local identifier for an instant
#[cfg_attr(test, mockall::automock)]
pub trait IdentitySource: Send + Sync {
    fn identity_at(&self, now: NtpTimestamp) -> Option<IdentityMaterial>;
}

/// Identifiers from the server tuple blob with a fixed Hello key
pub struct StoreIdentitySource {
    store: RwLock<EphemeralIdentifierStore>,
    key: Zeroizing<Vec<u8>>,
}

impl StoreIdentitySource {
    pub fn new(store: EphemeralIdentifierStore, key: &[u8]) -> Self {
        Self {
            store: RwLock::new(store),
            key: Zeroizing::new(key.to_vec()),
        }
    }

    /// Drop expired identifiers; returns how many went
    pub fn purge_expired(&self, now: NtpTimestamp) -> usize {
        self.store.write().purge_expired(now)
    }
}

impl IdentitySource for StoreIdentitySource {
    fn identity_at(&self, now: NtpTimestamp) -> Option<IdentityMaterial> {
        self.store
            .read()
            .identifier_at(now)
            .map(|identifier| IdentityMaterial {
                identifier: identifier.clone(),
                key: self.key.clone(),
            })
    }
}

fn unix_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy)]
struct ScanReading {
    rssi: i32,
    seen_at: Instant,
}

/// Turns received Hellos into calibrated samples
struct SampleRecorder {
    samples: Arc<dyn SampleSink>,
    calibration: Arc<dyn RssiCalibration>,
    events: Arc<dyn EventSink>,
    config: ConfigHandle,
    /// Last scan RSSI per device, used for inbound writes
    scan_rssi: RwLock<HashMap<BleDevice, ScanReading>>,
}

impl SampleRecorder {
    fn max_scan_age(&self) -> Duration {
        Duration::from_millis(self.config.current().ble.scan_rssi_max_age_ms)
    }

    /// Remember a scan reading, dropping readings that aged out
    fn note_scan(&self, device: &BleDevice, rssi: i32) {
        let max_age = self.max_scan_age();
        let now = Instant::now();
        let mut cache = self.scan_rssi.write();
        cache.retain(|_, reading| now.duration_since(reading.seen_at) < max_age);
        cache.insert(device.clone(), ScanReading { rssi, seen_at: now });
    }

    /// Scan RSSI still young enough to stand in for the link
    fn fresh_scan_rssi(&self, device: &BleDevice) -> Option<i32> {
        let max_age = self.max_scan_age();
        self.scan_rssi
            .read()
            .get(device)
            .filter(|reading| reading.seen_at.elapsed() < max_age)
            .map(|reading| reading.rssi)
    }

    fn record(&self, device: &BleDevice, payload: &[u8], rssi: i32) -> Result<ProximitySample, CryptoError> {
        let hello = parse_hello(payload)?;
        let sample = ProximitySample {
            device: device.clone(),
            hello,
            timestamped_rssi: TimestampedRssi::new(
                Uuid::new_v4().to_string(),
                unix_millis(SystemTime::now()),
                rssi,
            ),
            calibrated_rssi: self.calibration.calibrate(rssi),
        };
        self.samples.record(sample.clone());
        Ok(sample)
    }

    fn report_invalid(&self, device: &BleDevice, error: &CryptoError) {
        self.events.emit(
            ProximityEvent::new(
                EventLevel::Debug,
                EventId::InvalidPayload,
                format!("Invalid payload from {}", device),
            )
            .with_cause(error),
        );
    }
}

impl ProximityCallback for SampleRecorder {
    fn on_payload_received(&self, device: &BleDevice, payload: &[u8]) -> PayloadResult {
        if let Err(e) = parse_hello(payload) {
            self.report_invalid(device, &e);
            return PayloadResult::InvalidPayload;
        }
        match self.fresh_scan_rssi(device) {
            Some(rssi) => match self.record(device, payload, rssi) {
                Ok(_) => PayloadResult::PayloadHandled,
                Err(e) => {
                    self.report_invalid(device, &e);
                    PayloadResult::InvalidPayload
                }
            },
            None => PayloadResult::UnknownDeviceNeedsRssi,
        }
    }

    fn on_remote_rssi(&self, device: &BleDevice, payload: &[u8], result: Result<i32, GattError>) {
        match result {
            Ok(rssi) => {
                if let Err(e) = self.record(device, payload, rssi) {
                    self.report_invalid(device, &e);
                }
            }
            Err(e) => debug!("No RSSI for inbound payload from {}: {}", device, e),
        }
    }
}

pub struct ProximityEngine {
    coordinator: GattCoordinator,
    identities: Arc<dyn IdentitySource>,
    recorder: Arc<SampleRecorder>,
    config: ConfigHandle,
    events: Arc<dyn EventSink>,
    running: RwLock<bool>,
}

impl ProximityEngine {
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        identities: Arc<dyn IdentitySource>,
        samples: Arc<dyn SampleSink>,
        calibration: Arc<dyn RssiCalibration>,
        config: ConfigHandle,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            coordinator: GattCoordinator::new(adapter, config.clone(), Arc::clone(&events)),
            identities,
            recorder: Arc::new(SampleRecorder {
                samples,
                calibration,
                events: Arc::clone(&events),
                config: config.clone(),
                scan_rssi: RwLock::new(HashMap::new()),
            }),
            config,
            events,
            running: RwLock::new(false),
        }
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        if self.is_running() {
            return Ok(());
        }
        info!("Proximity engine starting...");
        if let Err(e) = self.coordinator.start(self.recorder.clone()).await {
            self.events.emit(
                ProximityEvent::new(
                    EventLevel::Error,
                    EventId::ServerStartFailed,
                    "GATT payload server failed to start",
                )
                .with_cause(&e),
            );
            self.coordinator.stop().await;
            return Err(e.into());
        }
        *self.running.write() = true;
        info!("Proximity engine started");
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.is_running() {
            return;
        }
        info!("Proximity engine stopping...");
        self.coordinator.stop().await;
        *self.running.write() = false;
        self.recorder.scan_rssi.write().clear();
        info!("Proximity engine stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    pub fn coordinator(&self) -> &GattCoordinator {
        &self.coordinator
    }

    /// Exchange Hellos with a peer found by the scanner.
    ///
    /// Returns the sample recorded from the peer's read-back, if any.
    pub async fn on_peer_discovered(
        &self,
        device: &BleDevice,
        scan_rssi: i32,
    ) -> Result<Option<ProximitySample>, EngineError> {
        self.recorder.note_scan(device, scan_rssi);

        let now = SystemTime::now();
        let identity = self
            .identities
            .identity_at(NtpTimestamp::from_system_time(now)?)
            .ok_or(EngineError::NoIdentifier)?;
        let hello = build_hello(&identity.identifier, &identity.key, now)?;
        drop(identity);

        let read_back = self.config.current().ble.read_remote_payload;
        let outcome = match self
            .coordinator
            .exchange_payload(device, &hello.to_bytes(), read_back)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.events.emit(
                    ProximityEvent::new(
                        EventLevel::Debug,
                        EventId::ExchangeFailed,
                        format!("Exchange with {} failed", device),
                    )
                    .with_cause(&e),
                );
                return Err(e.into());
            }
        };

        match outcome.remote {
            Some(remote) => Ok(Some(self.recorder.record(device, &remote.payload, remote.rssi)?)),
            None => Ok(None),
        }
    }

    /// Score one peer epoch with the current filter parameters
    pub fn score_epoch(
        &self,
        samples: &[TimestampedRssi],
        epoch_start_ms: i64,
        duration_secs: i64,
        mode: FilterMode,
    ) -> ProximityFilterOutput {
        let config = self.config.current();
        ProximityFilter::new(&config.filter).filter(samples, epoch_start_ms, duration_secs, mode)
    }

    /// Score stored history and merge clipped samples back into it
    pub fn rescore(
        &self,
        stored: &mut Vec<TimestampedRssi>,
        epoch_start_ms: i64,
        duration_secs: i64,
        mode: FilterMode,
    ) -> ProximityFilterOutput {
        let output = self.score_epoch(stored, epoch_start_ms, duration_secs, mode);
        let touched = apply_updates(stored, &output);
        debug!("Rescore touched {} stored samples", touched);
        output
    }

    pub fn info_risk(
        &self,
        samples: &[TimestampedRssi],
        from_ms: i64,
        duration_secs: i64,
    ) -> (f64, RiskLevel) {
        let config = self.config.current();
        ProximityInfoRiskComputer::new(&config.filter).classify(samples, from_ms, duration_secs)
    }

    /// Swap in a new configuration snapshot
    pub fn update_config(&self, config: ProximityConfig) -> Result<(), EngineError> {
        let version = config.version;
        self.config.replace(config)?;
        self.events.emit(ProximityEvent::new(
            EventLevel::Info,
            EventId::ConfigReplaced,
            format!("Configuration v{} applied", version),
        ));
        Ok(())
    }
}
