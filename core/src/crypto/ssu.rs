//! Status-update (SSU) messages for server queries.
//!
//! Same construction as a Hello but over `prefix || ebid || time32` with
//! the full 32-byte digest. Never exchanged over BLE. No validity check:
//! status queries may use an expired identifier.

use super::identifier::EphemeralIdentifier;
use super::{keyed_mac, CryptoError, MessagePrefix, NtpTimestamp};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::Mac;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use zeroize::Zeroizing;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsuMessage {
    pub ebid: String,
    pub time: String,
    pub mac: String,
}

impl SsuMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub fn build_ssu(
    identifier: &EphemeralIdentifier,
    key: &[u8],
    now: SystemTime,
    prefix: MessagePrefix,
) -> Result<SsuMessage, CryptoError> {
    build_ssu_at(identifier, key, NtpTimestamp::from_system_time(now)?, prefix)
}

pub fn build_ssu_at(
    identifier: &EphemeralIdentifier,
    key: &[u8],
    now: NtpTimestamp,
    prefix: MessagePrefix,
) -> Result<SsuMessage, CryptoError> {
    let key = Zeroizing::new(key.to_vec());
    let time = now.truncated_32();
    let digest = keyed_mac(&key, prefix, &[&identifier.ebid, &time])?
        .finalize()
        .into_bytes();

    Ok(SsuMessage {
        ebid: STANDARD.encode(identifier.ebid),
        time: STANDARD.encode(time),
        mac: STANDARD.encode(digest),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{HmacSha256, EPOCH_DURATION_SECS};

    fn identifier() -> EphemeralIdentifier {
        EphemeralIdentifier {
            epoch_id: 3,
            valid_from: 3_900_000_000,
            valid_to: 3_900_000_000 + EPOCH_DURATION_SECS,
            ecc: 0x01,
            ebid: [9, 8, 7, 6, 5, 4, 3, 2],
        }
    }

    #[test]
    fn test_ssu_fields_are_base64() {
        let id = identifier();
        let at = NtpTimestamp(id.valid_from + 1);
        let ssu = build_ssu_at(&id, b"kA", at, MessagePrefix::Status).expect("build");

        assert_eq!(STANDARD.decode(&ssu.ebid).expect("b64"), id.ebid.to_vec());
        assert_eq!(STANDARD.decode(&ssu.time).expect("b64"), at.truncated_32().to_vec());
        assert_eq!(STANDARD.decode(&ssu.mac).expect("b64").len(), 32);
    }

    #[test]
    fn test_ssu_mac_matches_independent_hmac() {
        let id = identifier();
        let at = NtpTimestamp(id.valid_from + 1);
        let ssu = build_ssu_at(&id, b"kA", at, MessagePrefix::Unregister).expect("build");

        let mut mac = <HmacSha256 as Mac>::new_from_slice(b"kA").expect("key");
        mac.update(&[0x03]);
        mac.update(&id.ebid);
        mac.update(&at.truncated_32());
        let expected = mac.finalize().into_bytes();

        assert_eq!(STANDARD.decode(&ssu.mac).expect("b64"), expected.to_vec());
    }

    #[test]
    fn test_ssu_allows_expired_identifier() {
        let id = identifier();
        let long_after = NtpTimestamp(id.valid_to + 10 * EPOCH_DURATION_SECS);
        assert!(build_ssu_at(&id, b"kA", long_after, MessagePrefix::Status).is_ok());
    }

    #[test]
    fn test_ssu_prefix_separates_operations() {
        let id = identifier();
        let at = NtpTimestamp(id.valid_from);
        let status = build_ssu_at(&id, b"kA", at, MessagePrefix::Status).expect("build");
        let delete = build_ssu_at(&id, b"kA", at, MessagePrefix::DeleteHistory).expect("build");
        assert_ne!(status.mac, delete.mac);
        assert_eq!(status.ebid, delete.ebid);
    }

    #[test]
    fn test_ssu_json_shape() {
        let id = identifier();
        let ssu = build_ssu_at(&id, b"kA", NtpTimestamp(id.valid_from), MessagePrefix::Status)
            .expect("build");
        let value: serde_json::Value =
            serde_json::from_str(&ssu.to_json().expect("json")).expect("parse");
        assert!(value.get("ebid").is_some());
        assert!(value.get("time").is_some());
        assert!(value.get("mac").is_some());
    }
}
