/// GATT coordinator: local payload server plus outgoing exchanges
///
/// The coordinator exclusively owns the local GATT server handle and
/// creates one short-lived [`GattTransport`] per outgoing exchange. Every
/// transport it creates is closed before the exchange returns, on success
/// and failure alike.
///
/// Incoming writes arrive on the platform thread. They are answered
/// synchronously; the optional RSSI follow-up runs on the runtime captured
/// at `start`.

use super::gatt::{GattError, GattTransport};
use super::platform::{
    BleAdapter, BleDevice, CharacteristicProperties, GattCharacteristicInfo, GattServerCallbacks,
    GattServerHandle, GattServiceInfo, WriteRequest, GATT_APP_ERROR_UNKNOWN_DEVICE,
    GATT_FAILURE, GATT_INVALID_OFFSET, GATT_SUCCESS,
};
use crate::config::{BleConfig, ConfigHandle};
use crate::events::{EventId, EventLevel, EventSink, ProximityEvent};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Verdict on a payload written by a remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadResult {
    InvalidPayload,
    /// Accepted, but the peer is unknown and its RSSI must be read
    UnknownDeviceNeedsRssi,
    PayloadHandled,
}

/// Application callbacks for inbound exchanges
#[cfg_attr(test, mockall::automock)]
pub trait ProximityCallback: Send + Sync {
    fn on_payload_received(&self, device: &BleDevice, payload: &[u8]) -> PayloadResult;

    fn on_remote_rssi(&self, device: &BleDevice, payload: &[u8], result: Result<i32, GattError>);
}

/// What the remote peer gave back during an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePayload {
    pub rssi: i32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    /// `None` when the read-back wasn't requested or the peer isn't readable
    pub remote: Option<RemotePayload>,
}

#[derive(Default)]
struct HealthState {
    consecutive_133: u32,
    unhealthy: bool,
}

struct Dispatch {
    callback: Arc<dyn ProximityCallback>,
    server: Arc<dyn GattServerHandle>,
    characteristic: Uuid,
    runtime: Handle,
}

struct CoordinatorShared {
    adapter: Arc<dyn BleAdapter>,
    config: ConfigHandle,
    events: Arc<dyn EventSink>,
    /// Serializes start/stop
    server: tokio::sync::Mutex<Option<Arc<dyn GattServerHandle>>>,
    /// Read from the platform thread
    dispatch: RwLock<Option<Arc<Dispatch>>>,
    health: Mutex<HealthState>,
}

/// Adapter between the platform server callbacks and the coordinator
struct ServerCallbacks {
    shared: Weak<CoordinatorShared>,
}

impl GattServerCallbacks for ServerCallbacks {
    fn on_characteristic_write_request(&self, request: WriteRequest) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_characteristic_write_request(request);
        }
    }
}

fn payload_service(ble: &BleConfig) -> GattServiceInfo {
    GattServiceInfo {
        uuid: ble.service_uuid,
        characteristics: vec![GattCharacteristicInfo {
            uuid: ble.characteristic_uuid,
            properties: CharacteristicProperties {
                read: true,
                write: true,
                write_no_response: false,
            },
        }],
    }
}

impl CoordinatorShared {
    fn on_characteristic_write_request(self: &Arc<Self>, request: WriteRequest) {
        let current = self.dispatch.read().clone();
        let dispatch = match current {
            Some(dispatch) => dispatch,
            None => {
                debug!("Write from {} while the server is stopped", request.device);
                return;
            }
        };

        let status = if request.characteristic != dispatch.characteristic {
            debug!(
                "Write from {} to unknown characteristic {}",
                request.device, request.characteristic
            );
            GATT_FAILURE
        } else if request.offset != 0 {
            debug!("Write from {} at offset {}", request.device, request.offset);
            GATT_INVALID_OFFSET
        } else {
            match dispatch
                .callback
                .on_payload_received(&request.device, &request.value)
            {
                PayloadResult::InvalidPayload => GATT_FAILURE,
                PayloadResult::PayloadHandled => GATT_SUCCESS,
                PayloadResult::UnknownDeviceNeedsRssi => {
                    self.spawn_rssi_follow_up(&dispatch, &request);
                    GATT_APP_ERROR_UNKNOWN_DEVICE
                }
            }
        };

        if request.response_needed
            && !dispatch
                .server
                .send_response(&request.device, request.request_id, status, 0, &[])
        {
            warn!("Failed to answer write request from {}", request.device);
        }
    }

    fn spawn_rssi_follow_up(self: &Arc<Self>, dispatch: &Dispatch, request: &WriteRequest) {
        let shared = Arc::clone(self);
        let callback = Arc::clone(&dispatch.callback);
        let device = request.device.clone();
        let payload = request.value.clone();
        dispatch.runtime.spawn(async move {
            let result = shared.request_remote_rssi(&device).await;
            callback.on_remote_rssi(&device, &payload, result);
        });
    }

    fn transport(&self, device: &BleDevice) -> GattTransport {
        let timeouts = self.config.current().ble.timeouts();
        GattTransport::new(Arc::clone(&self.adapter), device.clone(), timeouts)
    }

    async fn open_tracked(&self, transport: &GattTransport) -> Result<(), GattError> {
        let result = transport.open().await;
        self.record_connection(&result);
        result
    }

    fn record_connection(&self, result: &Result<(), GattError>) {
        let raised = {
            let mut health = self.health.lock();
            match result {
                Ok(()) => {
                    health.consecutive_133 = 0;
                    health.unhealthy = false;
                    None
                }
                Err(e) if e.is_unhealthy_stack() => {
                    health.consecutive_133 += 1;
                    let threshold = self.config.current().ble.unhealthy_threshold;
                    if health.consecutive_133 >= threshold {
                        health.consecutive_133 = 0;
                        health.unhealthy = true;
                        Some(e.clone())
                    } else {
                        None
                    }
                }
                Err(_) => None,
            }
        };

        if let Some(cause) = raised {
            warn!("Bluetooth stack reported unhealthy after repeated 133 failures");
            self.events.emit(
                ProximityEvent::new(
                    EventLevel::Error,
                    EventId::UnhealthyBluetooth,
                    "Bluetooth stack is unhealthy, a restart is required",
                )
                .with_cause(cause),
            );
        }
    }

    async fn request_remote_rssi(&self, device: &BleDevice) -> Result<i32, GattError> {
        let transport = self.transport(device);
        let result = match self.open_tracked(&transport).await {
            Ok(()) => transport.read_remote_rssi().await,
            Err(e) => Err(e),
        };
        transport.close().await;
        result
    }

    async fn exchange(
        &self,
        transport: &GattTransport,
        ble: &BleConfig,
        value: &[u8],
        should_read_remote_payload: bool,
    ) -> Result<ExchangeOutcome, GattError> {
        self.open_tracked(transport).await?;

        let services = transport.discover_services().await?;
        let characteristic = services
            .iter()
            .find(|service| service.uuid == ble.service_uuid)
            .and_then(|service| service.characteristic(ble.characteristic_uuid))
            .filter(|characteristic| characteristic.properties.is_writable())
            .ok_or(GattError::IncorrectPayloadService)?;
        let readable = characteristic.properties.read;

        transport
            .write_characteristic(ble.service_uuid, ble.characteristic_uuid, value)
            .await?;

        if !(should_read_remote_payload && readable) {
            return Ok(ExchangeOutcome { remote: None });
        }

        let rssi = transport.read_remote_rssi().await?;
        let payload = transport
            .read_characteristic(ble.service_uuid, ble.characteristic_uuid)
            .await?;
        Ok(ExchangeOutcome {
            remote: Some(RemotePayload { rssi, payload }),
        })
    }
}

/// Owns the local GATT server and runs outgoing payload exchanges
pub struct GattCoordinator {
    shared: Arc<CoordinatorShared>,
}

impl GattCoordinator {
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        config: ConfigHandle,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            shared: Arc::new(CoordinatorShared {
                adapter,
                config,
                events,
                server: tokio::sync::Mutex::new(None),
                dispatch: RwLock::new(None),
                health: Mutex::new(HealthState::default()),
            }),
        }
    }

    /// Register the payload service and start answering writes.
    ///
    /// Restart-safe: a running server is torn down first. On failure the
    /// coordinator is left stopped.
    pub async fn start(&self, callback: Arc<dyn ProximityCallback>) -> Result<(), GattError> {
        let mut server_slot = self.shared.server.lock().await;
        self.teardown_server(&mut server_slot);

        let ble = self.shared.config.current().ble.clone();
        let callbacks = Arc::new(ServerCallbacks {
            shared: Arc::downgrade(&self.shared),
        });
        let server = self.shared.adapter.open_gatt_server(callbacks)?;
        server.clear_services();

        if !server.add_service(&payload_service(&ble)) {
            warn!("Failed to register payload service {}", ble.service_uuid);
            server.close();
            return Err(GattError::Platform(format!(
                "payload service {} could not be registered",
                ble.service_uuid
            )));
        }

        *self.shared.dispatch.write() = Some(Arc::new(Dispatch {
            callback,
            server: Arc::clone(&server),
            characteristic: ble.characteristic_uuid,
            runtime: Handle::current(),
        }));
        *server_slot = Some(server);
        info!("GATT payload server started on service {}", ble.service_uuid);
        Ok(())
    }

    pub async fn stop(&self) {
        let mut server_slot = self.shared.server.lock().await;
        if self.teardown_server(&mut server_slot) {
            info!("GATT payload server stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.shared.dispatch.read().is_some()
    }

    fn teardown_server(&self, server_slot: &mut Option<Arc<dyn GattServerHandle>>) -> bool {
        self.shared.dispatch.write().take();
        match server_slot.take() {
            Some(server) => {
                server.clear_services();
                server.close();
                true
            }
            None => false,
        }
    }

    /// Write `value` to the peer and optionally read its payload back
    pub async fn exchange_payload(
        &self,
        device: &BleDevice,
        value: &[u8],
        should_read_remote_payload: bool,
    ) -> Result<ExchangeOutcome, GattError> {
        let ble = self.shared.config.current().ble.clone();
        let transport = self.shared.transport(device);
        let result = self
            .shared
            .exchange(&transport, &ble, value, should_read_remote_payload)
            .await;
        transport.close().await;

        if let Err(e) = &result {
            debug!("Payload exchange with {} failed: {}", device, e);
        }
        result
    }

    pub async fn request_remote_rssi(&self, device: &BleDevice) -> Result<i32, GattError> {
        self.shared.request_remote_rssi(device).await
    }

    /// Latched after repeated 133 faults until a connection succeeds
    pub fn is_bluetooth_unhealthy(&self) -> bool {
        self.shared.health.lock().unhealthy
    }
}
