// Cryptography module: rolling identifiers and authenticated ROBERT messages
//
// Every MAC in the protocol is HMAC-SHA256 keyed with the registration
// secret (kA), computed over a one-byte purpose prefix followed by the
// message fields.

pub mod hello;
pub mod identifier;
pub mod ssu;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub use hello::{build_hello, parse_hello, HelloBuilder, HelloMessage, HELLO_SIZE};
pub use identifier::{EphemeralIdentifier, EphemeralIdentifierStore, EPOCH_DURATION_SECS};
pub use ssu::{build_ssu, build_ssu_at, SsuMessage};

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Seconds between the NTP era origin (1900-01-01) and the Unix epoch.
pub const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// Errors raised by the rolling-identifier layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Identifier for epoch {epoch_id} is not valid at NTP time {ntp_seconds}")]
    IdentifierNotValidForTime { epoch_id: u64, ntp_seconds: u64 },
    #[error("Malformed Hello: expected {expected} bytes, got {actual}")]
    MalformedHello { expected: usize, actual: usize },
    #[error("Invalid key material")]
    InvalidKey,
    #[error("Invalid identifier tuples: {0}")]
    InvalidTuples(String),
    #[error("Identifier for epoch {0} overlaps an existing identifier")]
    OverlappingIdentifier(u64),
    #[error("System time error: {0}")]
    SystemTimeError(String),
}

/// Purpose prefix prepended to every MAC input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessagePrefix {
    Hello = 0x01,
    Status = 0x02,
    Unregister = 0x03,
    DeleteHistory = 0x04,
}

impl MessagePrefix {
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// Seconds elapsed since the NTP era origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NtpTimestamp(pub u64);

impl NtpTimestamp {
    pub fn from_unix_secs(unix_secs: u64) -> Self {
        Self(unix_secs + NTP_UNIX_OFFSET_SECS)
    }

    pub fn from_system_time(time: SystemTime) -> Result<Self, CryptoError> {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(|e| CryptoError::SystemTimeError(e.to_string()))?;
        Ok(Self::from_unix_secs(since_epoch.as_secs()))
    }

    pub fn now() -> Result<Self, CryptoError> {
        Self::from_system_time(SystemTime::now())
    }

    pub fn seconds(self) -> u64 {
        self.0
    }

    pub fn to_unix_secs(self) -> u64 {
        self.0.saturating_sub(NTP_UNIX_OFFSET_SECS)
    }

    /// 16 least significant bits, as carried in a Hello
    pub fn truncated_16(self) -> [u8; 2] {
        ((self.0 & 0xFFFF) as u16).to_be_bytes()
    }

    /// 32 least significant bits, as carried in an SSU
    pub fn truncated_32(self) -> [u8; 4] {
        ((self.0 & 0xFFFF_FFFF) as u32).to_be_bytes()
    }
}

/// Keyed HMAC over `prefix || parts...`
pub(crate) fn keyed_mac(
    key: &[u8],
    prefix: MessagePrefix,
    parts: &[&[u8]],
) -> Result<HmacSha256, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;
    mac.update(&[prefix.byte()]);
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ntp_conversion_roundtrip() {
        let ntp = NtpTimestamp::from_unix_secs(1_600_000_000);
        assert_eq!(ntp.seconds(), 1_600_000_000 + NTP_UNIX_OFFSET_SECS);
        assert_eq!(ntp.to_unix_secs(), 1_600_000_000);
    }

    #[test]
    fn test_ntp_from_system_time() {
        let time = UNIX_EPOCH + Duration::from_secs(42);
        let ntp = NtpTimestamp::from_system_time(time).expect("after epoch");
        assert_eq!(ntp.seconds(), 42 + NTP_UNIX_OFFSET_SECS);
    }

    #[test]
    fn test_truncation_is_big_endian() {
        let ntp = NtpTimestamp(0x1234_5678_9ABC);
        assert_eq!(ntp.truncated_16(), [0x9A, 0xBC]);
        assert_eq!(ntp.truncated_32(), [0x56, 0x78, 0x9A, 0xBC]);
    }

    #[test]
    fn test_prefix_bytes() {
        assert_eq!(MessagePrefix::Hello.byte(), 1);
        assert_eq!(MessagePrefix::Status.byte(), 2);
        assert_eq!(MessagePrefix::Unregister.byte(), 3);
        assert_eq!(MessagePrefix::DeleteHistory.byte(), 4);
    }

    #[test]
    fn test_prefix_changes_mac() {
        let key = [7u8; 32];
        let hello = keyed_mac(&key, MessagePrefix::Hello, &[b"abc".as_slice()])
            .expect("key accepted")
            .finalize()
            .into_bytes();
        let status = keyed_mac(&key, MessagePrefix::Status, &[b"abc".as_slice()])
            .expect("key accepted")
            .finalize()
            .into_bytes();
        assert_ne!(hello, status);
    }
}
