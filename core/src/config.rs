//! Runtime configuration for the proximity core
//!
//! All numeric scoring parameters and the BLE service layout are data, not
//! constants: the configuration source can push a new versioned snapshot at
//! any time and every component reads the current one per invocation.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid filter parameter: {0}")]
    InvalidFilter(String),

    #[error("Invalid BLE parameter: {0}")]
    InvalidBle(String),

    #[error("Stale configuration: version {offered} is older than {current}")]
    StaleVersion { offered: u32, current: u32 },

    #[error("Configuration parse error: {0}")]
    Parse(String),
}

// ============================================================================
// SIGNAL FILTER PARAMETERS
// ============================================================================

/// Longest stretch the scoring pipeline covers; longer durations are clamped
pub const MAX_SCORING_DURATION_SECS: i64 = 7 * 24 * 60 * 60;

/// Parameters of the RSSI clipping and risk scoring pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Minimum sample span (seconds) for an epoch to be considered at all
    pub duration_threshold_secs: i64,
    /// Samples above this value are clipped down to it
    pub rssi_threshold: i32,
    /// Decay table ranked by sample count: more samples, smaller delta
    pub deltas: Vec<f64>,
    /// Reference power (dBm)
    pub p0: f64,
    /// Softmax constant
    pub a: f64,
    /// Exponent of the intermediate power-mean aggregation
    pub b: f64,
    /// Scoring window width (seconds)
    pub time_window_secs: i64,
    /// Overlap between consecutive windows (seconds)
    pub time_overlap_secs: i64,
    /// Minimum aggregate risk for an epoch to be accepted in risk mode
    pub risk_threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            duration_threshold_secs: 120,
            rssi_threshold: 0,
            deltas: vec![39.0, 27.0, 23.0, 21.0, 20.0, 15.0],
            p0: -66.0,
            a: 10.0 / std::f64::consts::LN_10,
            b: 0.1,
            time_window_secs: 120,
            time_overlap_secs: 60,
            risk_threshold: 0.2,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deltas.is_empty() {
            return Err(ConfigError::InvalidFilter("deltas must not be empty".into()));
        }
        if self.deltas.iter().any(|delta| !(delta.is_finite() && *delta > 0.0)) {
            return Err(ConfigError::InvalidFilter(
                "deltas must be finite and > 0".into(),
            ));
        }
        if !(self.a.is_finite() && self.a > 0.0) {
            return Err(ConfigError::InvalidFilter(format!("a must be > 0, got {}", self.a)));
        }
        if !(self.b.is_finite() && self.b > 0.0) {
            return Err(ConfigError::InvalidFilter(format!("b must be > 0, got {}", self.b)));
        }
        if !self.p0.is_finite() {
            return Err(ConfigError::InvalidFilter("p0 must be finite".into()));
        }
        if self.time_overlap_secs < 0 || self.time_window_secs <= self.time_overlap_secs {
            return Err(ConfigError::InvalidFilter(format!(
                "time window ({}) must exceed overlap ({}) >= 0",
                self.time_window_secs, self.time_overlap_secs
            )));
        }
        if self.time_window_secs > MAX_SCORING_DURATION_SECS {
            return Err(ConfigError::InvalidFilter(format!(
                "time window must be <= {} s",
                MAX_SCORING_DURATION_SECS
            )));
        }
        if !(0..=MAX_SCORING_DURATION_SECS).contains(&self.duration_threshold_secs) {
            return Err(ConfigError::InvalidFilter(format!(
                "duration threshold must be within 0..={} s",
                MAX_SCORING_DURATION_SECS
            )));
        }
        Ok(())
    }

    /// Distance between two consecutive window starts
    pub fn window_step_secs(&self) -> i64 {
        self.time_window_secs.saturating_sub(self.time_overlap_secs)
    }
}

// ============================================================================
// BLE PARAMETERS
// ============================================================================

/// ROBERT payload service (16-bit 0xFD64 in the Bluetooth base UUID)
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FD64_0000_1000_8000_00805F9B34FB);

/// Payload characteristic under [`DEFAULT_SERVICE_UUID`]
pub const DEFAULT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xA8F12D00_AE83_4F2A_9A8E_1F0B1AE6C4CA);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub connection_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
    /// Consecutive 133 failures before Bluetooth is reported unhealthy
    pub unhealthy_threshold: u32,
    /// Read the remote payload back after writing ours
    pub read_remote_payload: bool,
    /// How long a scan RSSI may be used for a peer's inbound write
    pub scan_rssi_max_age_ms: u64,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            service_uuid: DEFAULT_SERVICE_UUID,
            characteristic_uuid: DEFAULT_CHARACTERISTIC_UUID,
            connection_timeout_ms: 5_000,
            operation_timeout_ms: 3_000,
            disconnect_timeout_ms: 1_000,
            unhealthy_threshold: 3,
            read_remote_payload: true,
            scan_rssi_max_age_ms: 30_000,
        }
    }
}

impl BleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_timeout_ms == 0
            || self.operation_timeout_ms == 0
            || self.disconnect_timeout_ms == 0
        {
            return Err(ConfigError::InvalidBle("timeouts must be > 0".into()));
        }
        if self.scan_rssi_max_age_ms == 0 {
            return Err(ConfigError::InvalidBle(
                "scan RSSI max age must be > 0".into(),
            ));
        }
        if self.unhealthy_threshold == 0 {
            return Err(ConfigError::InvalidBle(
                "unhealthy threshold must be > 0".into(),
            ));
        }
        if self.service_uuid.is_nil() || self.characteristic_uuid.is_nil() {
            return Err(ConfigError::InvalidBle("UUIDs must not be nil".into()));
        }
        Ok(())
    }

    pub fn timeouts(&self) -> TransportTimeouts {
        TransportTimeouts {
            connection: Duration::from_millis(self.connection_timeout_ms),
            operation: Duration::from_millis(self.operation_timeout_ms),
            disconnect: Duration::from_millis(self.disconnect_timeout_ms),
        }
    }
}

/// Bounds applied to every suspension point of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTimeouts {
    pub connection: Duration,
    pub operation: Duration,
    pub disconnect: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        BleConfig::default().timeouts()
    }
}

// ============================================================================
// CALIBRATION
// ============================================================================

/// Device-specific RSSI correction gains (dB)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub tx_compensation_gain: i32,
    pub rx_compensation_gain: i32,
}

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    pub version: u32,
    pub filter: FilterConfig,
    pub ble: BleConfig,
    pub calibration: CalibrationConfig,
}

impl ProximityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.filter.validate()?;
        self.ble.validate()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Shared, hot-swappable configuration snapshot
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<ProximityConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: ProximityConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// Snapshot in effect right now; later swaps don't affect it
    pub fn current(&self) -> Arc<ProximityConfig> {
        Arc::clone(&self.current.read())
    }

    /// Install a new snapshot. Versions must not go backwards.
    pub fn replace(&self, config: ProximityConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let mut current = self.current.write();
        if config.version < current.version {
            return Err(ConfigError::StaleVersion {
                offered: config.version,
                current: current.version,
            });
        }
        tracing::info!(
            "Proximity configuration updated: v{} -> v{}",
            current.version,
            config.version
        );
        *current = Arc::new(config);
        Ok(())
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(ProximityConfig::default()))),
        }
    }
}
