/// Per-epoch ephemeral Bluetooth identifiers
///
/// The backend issues one identifier per 15-minute epoch. Identifiers are
/// ordered by epoch, never overlap, and are only ever read by the crypto
/// layer once issued.

use super::{CryptoError, NtpTimestamp};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Epoch length in seconds (15 minutes)
pub const EPOCH_DURATION_SECS: u64 = 15 * 60;

/// Size of an EBID in bytes
pub const EBID_SIZE: usize = 8;

/// One issued identifier, valid over `[valid_from, valid_to)` in NTP seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralIdentifier {
    pub epoch_id: u64,
    pub valid_from: u64,
    pub valid_to: u64,
    pub ecc: u8,
    pub ebid: [u8; EBID_SIZE],
}

impl EphemeralIdentifier {
    pub fn is_valid_at(&self, time: NtpTimestamp) -> bool {
        self.valid_from <= time.seconds() && time.seconds() < self.valid_to
    }

    pub fn is_expired_at(&self, time: NtpTimestamp) -> bool {
        self.valid_to <= time.seconds()
    }

    fn overlaps(&self, other: &EphemeralIdentifier) -> bool {
        self.valid_from < other.valid_to && other.valid_from < self.valid_to
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TupleEntry {
    epoch_id: u64,
    key: TupleKey,
}

#[derive(Debug, Deserialize)]
struct TupleKey {
    ebid: String,
    ecc: String,
}

/// In-memory identifier set keyed by epoch
#[derive(Debug, Default, Clone)]
pub struct EphemeralIdentifierStore {
    identifiers: BTreeMap<u64, EphemeralIdentifier>,
}

impl EphemeralIdentifierStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the server tuple blob.
    ///
    /// `time_start` is the service start in NTP seconds; epoch `n` is valid
    /// over `[time_start + n * 900, time_start + (n + 1) * 900)`.
    pub fn from_tuples_json(tuples: &[u8], time_start: u64) -> Result<Self, CryptoError> {
        let entries: Vec<TupleEntry> = serde_json::from_slice(tuples)
            .map_err(|e| CryptoError::InvalidTuples(e.to_string()))?;

        let mut store = Self::new();
        for entry in entries {
            let ebid_bytes = STANDARD
                .decode(&entry.key.ebid)
                .map_err(|e| CryptoError::InvalidTuples(e.to_string()))?;
            let ecc_bytes = STANDARD
                .decode(&entry.key.ecc)
                .map_err(|e| CryptoError::InvalidTuples(e.to_string()))?;

            let ebid: [u8; EBID_SIZE] = ebid_bytes.as_slice().try_into().map_err(|_| {
                CryptoError::InvalidTuples(format!(
                    "ebid for epoch {} has {} bytes",
                    entry.epoch_id,
                    ebid_bytes.len()
                ))
            })?;
            let ecc = match ecc_bytes.as_slice() {
                [ecc] => *ecc,
                other => {
                    return Err(CryptoError::InvalidTuples(format!(
                        "ecc for epoch {} has {} bytes",
                        entry.epoch_id,
                        other.len()
                    )))
                }
            };

            let (valid_from, valid_to) = entry
                .epoch_id
                .checked_mul(EPOCH_DURATION_SECS)
                .and_then(|offset| time_start.checked_add(offset))
                .and_then(|from| Some((from, from.checked_add(EPOCH_DURATION_SECS)?)))
                .ok_or_else(|| {
                    CryptoError::InvalidTuples(format!(
                        "epoch {} is out of range",
                        entry.epoch_id
                    ))
                })?;
            store.insert(EphemeralIdentifier {
                epoch_id: entry.epoch_id,
                valid_from,
                valid_to,
                ecc,
                ebid,
            })?;
        }
        Ok(store)
    }

    /// Add an identifier; re-inserting the same epoch with identical content is a no-op
    pub fn insert(&mut self, identifier: EphemeralIdentifier) -> Result<(), CryptoError> {
        if let Some(existing) = self.identifiers.get(&identifier.epoch_id) {
            if *existing == identifier {
                return Ok(());
            }
            return Err(CryptoError::OverlappingIdentifier(identifier.epoch_id));
        }
        if self.identifiers.values().any(|other| other.overlaps(&identifier)) {
            return Err(CryptoError::OverlappingIdentifier(identifier.epoch_id));
        }
        self.identifiers.insert(identifier.epoch_id, identifier);
        Ok(())
    }

    pub fn identifier_at(&self, time: NtpTimestamp) -> Option<&EphemeralIdentifier> {
        self.identifiers.values().find(|id| id.is_valid_at(time))
    }

    /// Identifier with the highest epoch
    pub fn latest(&self) -> Option<&EphemeralIdentifier> {
        self.identifiers.values().next_back()
    }

    /// Drop identifiers whose validity ended before `now`, always keeping the most recent
    pub fn purge_expired(&mut self, now: NtpTimestamp) -> usize {
        let latest_epoch = match self.identifiers.keys().next_back() {
            Some(epoch) => *epoch,
            None => return 0,
        };
        let before = self.identifiers.len();
        self.identifiers
            .retain(|epoch, id| *epoch == latest_epoch || !id.is_expired_at(now));
        before - self.identifiers.len()
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}
