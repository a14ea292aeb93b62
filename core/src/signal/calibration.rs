//! Device-specific RSSI correction applied before samples reach storage.

use crate::config::CalibrationConfig;

/// Collaborator correcting raw RSSI for the local and remote radio gains
#[cfg_attr(test, mockall::automock)]
pub trait RssiCalibration: Send + Sync {
    fn calibrate(&self, rssi: i32) -> i32;
}

/// Subtracts the configured transmit and receive compensation gains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GainCalibration {
    pub tx_compensation_gain: i32,
    pub rx_compensation_gain: i32,
}

impl GainCalibration {
    pub fn new(tx_compensation_gain: i32, rx_compensation_gain: i32) -> Self {
        Self {
            tx_compensation_gain,
            rx_compensation_gain,
        }
    }
}

impl From<&CalibrationConfig> for GainCalibration {
    fn from(config: &CalibrationConfig) -> Self {
        Self::new(config.tx_compensation_gain, config.rx_compensation_gain)
    }
}

impl RssiCalibration for GainCalibration {
    fn calibrate(&self, rssi: i32) -> i32 {
        rssi - self.tx_compensation_gain - self.rx_compensation_gain
    }
}
