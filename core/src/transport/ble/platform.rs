/// Platform BLE capability
///
/// The radio is reached only through an injected [`BleAdapter`]; nothing in
/// the core touches an ambient Bluetooth singleton. Platform bindings
/// (Kotlin/Swift) implement these traits and report completions through a
/// [`GattEventSink`] from their own callback thread.
///
/// Characteristic values cross this boundary as owned byte buffers; there
/// is no shared mutable characteristic object.

use super::gatt::{GattError, GattEventSink, OperationKind};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Platform status for a successful GATT operation
pub const GATT_SUCCESS: i32 = 0;
/// Write with a non-zero offset
pub const GATT_INVALID_OFFSET: i32 = 0x07;
/// Generic stack error signalling an unhealthy radio stack
pub const GATT_ERROR_133: i32 = 133;
/// Generic GATT failure
pub const GATT_FAILURE: i32 = 0x101;
/// Application error: payload accepted but the sender needs an RSSI read
pub const GATT_APP_ERROR_UNKNOWN_DEVICE: i32 = 0x80;

/// Remote BLE device, identified by its (possibly random) address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BleDevice {
    pub address: String,
}

impl BleDevice {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl fmt::Display for BleDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_no_response: bool,
}

impl CharacteristicProperties {
    pub fn is_writable(&self) -> bool {
        self.write || self.write_no_response
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// Service as discovered on a remote peer, or registered locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristicInfo>,
}

impl GattServiceInfo {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristicInfo> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Completion reported by the platform for one outstanding operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattCompletion {
    ConnectionState { status: i32, connected: bool },
    ServicesDiscovered { status: i32 },
    RemoteRssi { status: i32, rssi: i32 },
    CharacteristicWrite { status: i32 },
    CharacteristicRead { status: i32, value: Vec<u8> },
}

impl GattCompletion {
    pub fn status(&self) -> i32 {
        match self {
            Self::ConnectionState { status, .. }
            | Self::ServicesDiscovered { status }
            | Self::RemoteRssi { status, .. }
            | Self::CharacteristicWrite { status }
            | Self::CharacteristicRead { status, .. } => *status,
        }
    }

    /// Operation this completion answers; connection events are routed by the transport
    pub fn kind(&self) -> Option<OperationKind> {
        match self {
            Self::ConnectionState { .. } => None,
            Self::ServicesDiscovered { .. } => Some(OperationKind::DiscoverServices),
            Self::RemoteRssi { .. } => Some(OperationKind::ReadRemoteRssi),
            Self::CharacteristicWrite { .. } => Some(OperationKind::WriteCharacteristic),
            Self::CharacteristicRead { .. } => Some(OperationKind::ReadCharacteristic),
        }
    }
}

/// One live platform connection. Primitives return `false` when the
/// platform refused to start the operation.
pub trait GattHandle: Send + Sync {
    fn discover_services(&self) -> bool;
    /// Services found by the last successful discovery
    fn services(&self) -> Vec<GattServiceInfo>;
    fn read_remote_rssi(&self) -> bool;
    fn write_characteristic(&self, service: Uuid, characteristic: Uuid, value: &[u8]) -> bool;
    fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool;
    fn disconnect(&self);
    /// Drop the platform's cached attribute table for this device
    fn refresh_device_cache(&self) -> bool;
    /// Release the native handle; called exactly once per handle
    fn close(&self);
}

/// Incoming write on the local payload characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub device: BleDevice,
    pub request_id: i32,
    pub characteristic: Uuid,
    pub prepared_write: bool,
    pub response_needed: bool,
    pub offset: usize,
    pub value: Vec<u8>,
}

/// Callbacks the local GATT server delivers on the platform thread
pub trait GattServerCallbacks: Send + Sync {
    fn on_characteristic_write_request(&self, request: WriteRequest);
}

/// The local GATT server, owned exclusively by the coordinator
pub trait GattServerHandle: Send + Sync {
    fn clear_services(&self);
    fn add_service(&self, service: &GattServiceInfo) -> bool;
    fn send_response(
        &self,
        device: &BleDevice,
        request_id: i32,
        status: i32,
        offset: usize,
        value: &[u8],
    ) -> bool;
    fn close(&self);
}

/// Injected Bluetooth adapter capability
pub trait BleAdapter: Send + Sync {
    /// Start connecting to `device`; completions go to `events`
    fn connect_gatt(
        &self,
        device: &BleDevice,
        events: GattEventSink,
    ) -> Result<Arc<dyn GattHandle>, GattError>;

    fn open_gatt_server(
        &self,
        callbacks: Arc<dyn GattServerCallbacks>,
    ) -> Result<Arc<dyn GattServerHandle>, GattError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_status_and_kind() {
        let read = GattCompletion::CharacteristicRead {
            status: 3,
            value: vec![1],
        };
        assert_eq!(read.status(), 3);
        assert_eq!(read.kind(), Some(OperationKind::ReadCharacteristic));

        let connection = GattCompletion::ConnectionState {
            status: GATT_SUCCESS,
            connected: true,
        };
        assert_eq!(connection.kind(), None);
    }

    #[test]
    fn test_service_lookup() {
        let characteristic = Uuid::from_u128(2);
        let service = GattServiceInfo {
            uuid: Uuid::from_u128(1),
            characteristics: vec![GattCharacteristicInfo {
                uuid: characteristic,
                properties: CharacteristicProperties {
                    write: true,
                    ..Default::default()
                },
            }],
        };
        let found = service.characteristic(characteristic).expect("present");
        assert!(found.properties.is_writable());
        assert!(!found.properties.read);
        assert!(service.characteristic(Uuid::from_u128(3)).is_none());
    }
}
