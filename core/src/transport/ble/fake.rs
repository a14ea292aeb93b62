//! Scripted in-memory Bluetooth adapter for transport and coordinator tests.
//!
//! Completions are delivered synchronously from inside the platform call,
//! which is the tightest ordering a real stack can produce.

use super::gatt::{GattError, GattEventSink};
use super::platform::{
    BleAdapter, BleDevice, CharacteristicProperties, GattCharacteristicInfo, GattHandle,
    GattServerCallbacks, GattServerHandle, GattServiceInfo, WriteRequest, GATT_SUCCESS,
};
use crate::config::{DEFAULT_CHARACTERISTIC_UUID, DEFAULT_SERVICE_UUID};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Remote-initiated disconnect reason
const REMOTE_USER_TERMINATED: i32 = 0x13;

#[derive(Debug, Clone)]
pub(crate) struct Script {
    /// Consumed one per connection attempt; success once exhausted
    pub connect_statuses: Vec<i32>,
    pub connect_error: Option<GattError>,
    pub silent_connect: bool,
    pub silent_disconnect: bool,
    pub silent_operations: bool,
    pub services: Vec<GattServiceInfo>,
    pub discover_status: i32,
    pub rssi: i32,
    pub rssi_status: i32,
    pub write_status: i32,
    pub read_status: i32,
    pub remote_payload: Vec<u8>,
}

pub(crate) fn payload_service(service: Uuid, characteristic: Uuid) -> GattServiceInfo {
    GattServiceInfo {
        uuid: service,
        characteristics: vec![GattCharacteristicInfo {
            uuid: characteristic,
            properties: CharacteristicProperties {
                read: true,
                write: true,
                write_no_response: false,
            },
        }],
    }
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect_statuses: Vec::new(),
            connect_error: None,
            silent_connect: false,
            silent_disconnect: false,
            silent_operations: false,
            services: vec![payload_service(DEFAULT_SERVICE_UUID, DEFAULT_CHARACTERISTIC_UUID)],
            discover_status: GATT_SUCCESS,
            rssi: -60,
            rssi_status: GATT_SUCCESS,
            write_status: GATT_SUCCESS,
            read_status: GATT_SUCCESS,
            remote_payload: vec![0xAB; 16],
        }
    }
}

struct FakeHandle {
    device: BleDevice,
    events: GattEventSink,
    script: Script,
    closes: AtomicUsize,
    log: Arc<FakeLog>,
}

#[derive(Default)]
struct FakeLog {
    cache_refreshes: AtomicUsize,
    disconnects: AtomicUsize,
    written: Mutex<Vec<Vec<u8>>>,
    reads: AtomicUsize,
    rssi_reads: AtomicUsize,
}

impl GattHandle for FakeHandle {
    fn discover_services(&self) -> bool {
        if !self.script.silent_operations {
            self.events.on_services_discovered(self.script.discover_status);
        }
        true
    }

    fn services(&self) -> Vec<GattServiceInfo> {
        self.script.services.clone()
    }

    fn read_remote_rssi(&self) -> bool {
        self.log.rssi_reads.fetch_add(1, Ordering::SeqCst);
        if !self.script.silent_operations {
            self.events
                .on_read_remote_rssi(self.script.rssi, self.script.rssi_status);
        }
        true
    }

    fn write_characteristic(&self, _service: Uuid, _characteristic: Uuid, value: &[u8]) -> bool {
        self.log.written.lock().push(value.to_vec());
        if !self.script.silent_operations {
            self.events.on_characteristic_write(self.script.write_status);
        }
        true
    }

    fn read_characteristic(&self, _service: Uuid, _characteristic: Uuid) -> bool {
        self.log.reads.fetch_add(1, Ordering::SeqCst);
        if !self.script.silent_operations {
            self.events.on_characteristic_read(
                self.script.remote_payload.clone(),
                self.script.read_status,
            );
        }
        true
    }

    fn disconnect(&self) {
        self.log.disconnects.fetch_add(1, Ordering::SeqCst);
        if !self.script.silent_disconnect {
            self.events.on_connection_state_change(GATT_SUCCESS, false);
        }
    }

    fn refresh_device_cache(&self) -> bool {
        self.log.cache_refreshes.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentResponse {
    pub device: BleDevice,
    pub request_id: i32,
    pub status: i32,
    pub offset: usize,
    pub value: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct FakeGattServer {
    services: Mutex<Vec<GattServiceInfo>>,
    responses: Mutex<Vec<SentResponse>>,
    closes: AtomicUsize,
}

impl FakeGattServer {
    pub fn services(&self) -> Vec<GattServiceInfo> {
        self.services.lock().clone()
    }

    pub fn responses(&self) -> Vec<SentResponse> {
        self.responses.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl GattServerHandle for FakeGattServer {
    fn clear_services(&self) {
        self.services.lock().clear();
    }

    fn add_service(&self, service: &GattServiceInfo) -> bool {
        self.services.lock().push(service.clone());
        true
    }

    fn send_response(
        &self,
        device: &BleDevice,
        request_id: i32,
        status: i32,
        offset: usize,
        value: &[u8],
    ) -> bool {
        self.responses.lock().push(SentResponse {
            device: device.clone(),
            request_id,
            status,
            offset,
            value: value.to_vec(),
        });
        true
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct FakeBleAdapter {
    script: Script,
    connect_statuses: Mutex<VecDeque<i32>>,
    handles: Mutex<Vec<Arc<FakeHandle>>>,
    log: Arc<FakeLog>,
    server: Arc<FakeGattServer>,
    server_callbacks: Mutex<Option<Arc<dyn GattServerCallbacks>>>,
    servers_opened: AtomicUsize,
}

impl FakeBleAdapter {
    pub fn new(script: Script) -> Self {
        Self {
            connect_statuses: Mutex::new(script.connect_statuses.iter().copied().collect()),
            script,
            handles: Mutex::new(Vec::new()),
            log: Arc::new(FakeLog::default()),
            server: Arc::new(FakeGattServer::default()),
            server_callbacks: Mutex::new(None),
            servers_opened: AtomicUsize::new(0),
        }
    }

    pub fn handles_created(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn every_handle_closed_once(&self) -> bool {
        self.handles
            .lock()
            .iter()
            .all(|handle| handle.closes.load(Ordering::SeqCst) == 1)
    }

    pub fn connected_devices(&self) -> Vec<BleDevice> {
        self.handles.lock().iter().map(|h| h.device.clone()).collect()
    }

    pub fn cache_refreshes(&self) -> usize {
        self.log.cache_refreshes.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.log.disconnects.load(Ordering::SeqCst)
    }

    pub fn remote_reads(&self) -> usize {
        self.log.reads.load(Ordering::SeqCst)
    }

    pub fn rssi_reads(&self) -> usize {
        self.log.rssi_reads.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.log.written.lock().clone()
    }

    pub fn server(&self) -> Arc<FakeGattServer> {
        Arc::clone(&self.server)
    }

    pub fn servers_opened(&self) -> usize {
        self.servers_opened.load(Ordering::SeqCst)
    }

    /// Remote side drops the most recent link
    pub fn drop_link(&self) {
        let latest = self.handles.lock().last().cloned();
        if let Some(handle) = latest {
            handle
                .events
                .on_connection_state_change(REMOTE_USER_TERMINATED, false);
        }
    }

    /// Remote peer writes to the local payload characteristic
    pub fn incoming_write(&self, request: WriteRequest) {
        let callbacks = self.server_callbacks.lock().clone();
        if let Some(callbacks) = callbacks {
            callbacks.on_characteristic_write_request(request);
        }
    }
}

impl BleAdapter for FakeBleAdapter {
    fn connect_gatt(
        &self,
        device: &BleDevice,
        events: GattEventSink,
    ) -> Result<Arc<dyn GattHandle>, GattError> {
        if let Some(error) = self.script.connect_error.clone() {
            return Err(error);
        }
        let status = self
            .connect_statuses
            .lock()
            .pop_front()
            .unwrap_or(GATT_SUCCESS);

        let handle = Arc::new(FakeHandle {
            device: device.clone(),
            events: events.clone(),
            script: self.script.clone(),
            closes: AtomicUsize::new(0),
            log: Arc::clone(&self.log),
        });
        self.handles.lock().push(Arc::clone(&handle));

        if !self.script.silent_connect {
            events.on_connection_state_change(status, status == GATT_SUCCESS);
        }
        Ok(handle)
    }

    fn open_gatt_server(
        &self,
        callbacks: Arc<dyn GattServerCallbacks>,
    ) -> Result<Arc<dyn GattServerHandle>, GattError> {
        self.servers_opened.fetch_add(1, Ordering::SeqCst);
        *self.server_callbacks.lock() = Some(callbacks);
        Ok(self.server.clone())
    }
}
