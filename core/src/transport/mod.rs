// Transport module: BLE proximity exchange

pub mod ble;

pub use ble::{
    BleAdapter, BleDevice, ConnectionState, ExchangeOutcome, GattCoordinator, GattError,
    GattTransport, PayloadResult, ProximityCallback, RemotePayload,
};
