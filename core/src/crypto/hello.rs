/// Hello message construction, parsing and verification
///
/// Wire layout (16 bytes, exchanged over BLE):
///
/// ```text
/// | ecc (1) | ebid (8) | time (2, BE) | mac (5) |
/// ```
///
/// `mac` is HMAC-SHA256(kA, 0x01 || ecc || ebid || time) truncated to its
/// first five bytes.

use super::identifier::{EphemeralIdentifier, EBID_SIZE};
use super::{keyed_mac, CryptoError, MessagePrefix, NtpTimestamp};
use hmac::Mac;
use std::time::SystemTime;
use zeroize::Zeroizing;

/// Size of a Hello on the wire
pub const HELLO_SIZE: usize = 16;

/// Truncated MAC length
pub const HELLO_MAC_SIZE: usize = 5;

const ECC_OFFSET: usize = 0;
const EBID_OFFSET: usize = 1;
const TIME_OFFSET: usize = EBID_OFFSET + EBID_SIZE;
const MAC_OFFSET: usize = TIME_OFFSET + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HelloMessage {
    pub ecc: u8,
    pub ebid: [u8; EBID_SIZE],
    pub time: [u8; 2],
    pub mac: [u8; HELLO_MAC_SIZE],
}

impl HelloMessage {
    pub fn to_bytes(&self) -> [u8; HELLO_SIZE] {
        let mut bytes = [0u8; HELLO_SIZE];
        bytes[ECC_OFFSET] = self.ecc;
        bytes[EBID_OFFSET..TIME_OFFSET].copy_from_slice(&self.ebid);
        bytes[TIME_OFFSET..MAC_OFFSET].copy_from_slice(&self.time);
        bytes[MAC_OFFSET..].copy_from_slice(&self.mac);
        bytes
    }

    /// Time field as the 16 least significant NTP seconds
    pub fn time_u16(&self) -> u16 {
        u16::from_be_bytes(self.time)
    }

    /// Constant-time check of the truncated MAC against `key`
    pub fn verify(&self, key: &[u8]) -> Result<bool, CryptoError> {
        let mac = keyed_mac(
            key,
            MessagePrefix::Hello,
            &[&[self.ecc], &self.ebid, &self.time],
        )?;
        Ok(mac.verify_truncated_left(&self.mac).is_ok())
    }
}

/// Decode a 16-byte Hello
pub fn parse_hello(bytes: &[u8]) -> Result<HelloMessage, CryptoError> {
    if bytes.len() != HELLO_SIZE {
        return Err(CryptoError::MalformedHello {
            expected: HELLO_SIZE,
            actual: bytes.len(),
        });
    }

    let mut ebid = [0u8; EBID_SIZE];
    ebid.copy_from_slice(&bytes[EBID_OFFSET..TIME_OFFSET]);
    let mut time = [0u8; 2];
    time.copy_from_slice(&bytes[TIME_OFFSET..MAC_OFFSET]);
    let mut mac = [0u8; HELLO_MAC_SIZE];
    mac.copy_from_slice(&bytes[MAC_OFFSET..]);

    Ok(HelloMessage {
        ecc: bytes[ECC_OFFSET],
        ebid,
        time,
        mac,
    })
}

/// Single-use Hello builder. The key copy is wiped when `build` returns.
///
/// The HMAC state keyed from it is not: `hmac` 0.12 has no zeroize support,
/// so the derived inner and outer pads are dropped without being cleared.
pub struct HelloBuilder<'a> {
    identifier: &'a EphemeralIdentifier,
    key: Zeroizing<Vec<u8>>,
}

impl<'a> HelloBuilder<'a> {
    pub fn new(identifier: &'a EphemeralIdentifier, key: &[u8]) -> Self {
        Self {
            identifier,
            key: Zeroizing::new(key.to_vec()),
        }
    }

    pub fn build(self, now: SystemTime) -> Result<HelloMessage, CryptoError> {
        self.build_at(NtpTimestamp::from_system_time(now)?)
    }

    pub fn build_at(self, now: NtpTimestamp) -> Result<HelloMessage, CryptoError> {
        let identifier = self.identifier;
        if !identifier.is_valid_at(now) {
            return Err(CryptoError::IdentifierNotValidForTime {
                epoch_id: identifier.epoch_id,
                ntp_seconds: now.seconds(),
            });
        }

        let time = now.truncated_16();
        let digest = keyed_mac(
            &self.key,
            MessagePrefix::Hello,
            &[&[identifier.ecc], &identifier.ebid, &time],
        )?
        .finalize()
        .into_bytes();
        drop(self.key);

        let mut mac = [0u8; HELLO_MAC_SIZE];
        mac.copy_from_slice(&digest[..HELLO_MAC_SIZE]);

        Ok(HelloMessage {
            ecc: identifier.ecc,
            ebid: identifier.ebid,
            time,
            mac,
        })
    }
}

/// Convenience wrapper over [`HelloBuilder`]
pub fn build_hello(
    identifier: &EphemeralIdentifier,
    key: &[u8],
    now: SystemTime,
) -> Result<HelloMessage, CryptoError> {
    HelloBuilder::new(identifier, key).build(now)
}
