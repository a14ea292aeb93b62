// Input files for robert-cli
//
// Sample files are JSON arrays of `{"id", "timestamp", "rssi"}` with Unix
// millisecond timestamps. Config files are `ProximityConfig` JSON; missing
// fields take their defaults.

use anyhow::{bail, Context, Result};
use robert_core::{ProximityConfig, TimestampedRssi};
use std::path::Path;

pub fn load_samples(path: &Path) -> Result<Vec<TimestampedRssi>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read samples from {}", path.display()))?;
    let mut samples: Vec<TimestampedRssi> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse samples in {}", path.display()))?;
    // scoring assumes chronological input
    samples.sort_by_key(|sample| sample.timestamp);
    Ok(samples)
}

pub fn load_config(path: Option<&Path>) -> Result<ProximityConfig> {
    match path {
        None => Ok(ProximityConfig::default()),
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            ProximityConfig::from_json(&raw)
                .with_context(|| format!("Invalid config in {}", path.display()))
        }
    }
}

pub fn decode_hex(label: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim()).with_context(|| format!("{} is not valid hex", label))
}

pub fn decode_hex_array<const N: usize>(label: &str, value: &str) -> Result<[u8; N]> {
    let bytes = decode_hex(label, value)?;
    match <[u8; N]>::try_from(bytes.as_slice()) {
        Ok(array) => Ok(array),
        Err(_) => bail!("{} must be {} bytes, got {}", label, N, bytes.len()),
    }
}
