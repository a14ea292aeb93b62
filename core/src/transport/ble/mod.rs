/// BLE (Bluetooth Low Energy) Transport Module
///
/// This module provides the connection-level machinery for the proximity
/// exchange. It includes:
///
/// - **platform**: the injected adapter capability and its wire-level types
/// - **gatt**: one GATT client link as an async state machine
/// - **coordinator**: the local payload server plus outgoing exchanges
///
/// Platform-specific implementations (Swift/Kotlin) handle the actual radio
/// and report completions back; the core logic here is testable without
/// BLE hardware.

pub mod coordinator;
pub mod gatt;
pub mod platform;

#[cfg(test)]
pub(crate) mod fake;

pub use coordinator::{
    ExchangeOutcome, GattCoordinator, PayloadResult, ProximityCallback, RemotePayload,
};
pub use gatt::{ConnectionState, GattError, GattEventSink, GattTransport, OperationKind};
pub use platform::{
    BleAdapter, BleDevice, CharacteristicProperties, GattCharacteristicInfo, GattCompletion,
    GattHandle, GattServerCallbacks, GattServerHandle, GattServiceInfo, WriteRequest,
    GATT_APP_ERROR_UNKNOWN_DEVICE, GATT_ERROR_133, GATT_FAILURE, GATT_INVALID_OFFSET,
    GATT_SUCCESS,
};
