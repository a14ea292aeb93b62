// ROBERT proximity core
//
// Detects nearby devices over BLE, exchanges rolling identifiers and scores
// the collected radio samples into an exposure risk. Everything touching
// the radio goes through an injected adapter; the crypto and scoring
// layers are pure.

pub mod config;
pub mod crypto;
pub mod engine;
pub mod events;
pub mod samples;
pub mod signal;
pub mod transport;

pub use config::{
    BleConfig, CalibrationConfig, ConfigError, ConfigHandle, FilterConfig, ProximityConfig,
    TransportTimeouts,
};
pub use crypto::{
    build_hello, build_ssu, parse_hello, CryptoError, EphemeralIdentifier,
    EphemeralIdentifierStore, HelloMessage, MessagePrefix, NtpTimestamp, SsuMessage,
};
pub use engine::{EngineError, IdentityMaterial, IdentitySource, ProximityEngine, StoreIdentitySource};
pub use events::{EventId, EventLevel, EventSink, ProximityEvent, TracingEventSink};
pub use samples::{MemorySampleStore, ProximitySample, SampleSink};
pub use signal::{
    apply_updates, FilterMode, GainCalibration, ProximityFilter, ProximityFilterOutput,
    ProximityInfoRiskComputer, RiskLevel, RssiCalibration, TimestampedRssi,
};
pub use transport::{
    BleAdapter, BleDevice, ConnectionState, ExchangeOutcome, GattCoordinator, GattError,
    GattTransport, PayloadResult, ProximityCallback, RemotePayload,
};
