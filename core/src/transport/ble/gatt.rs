/// Per-peer GATT client connection
///
/// A [`GattTransport`] owns exactly one platform connection handle to one
/// remote device and exposes the GATT primitives as timeout-bounded async
/// operations. Platform callbacks fulfil single-slot completions keyed by
/// operation kind; the awaiting task suspends, the platform thread never
/// blocks.
///
/// States:
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
///        \___________\_____________\______________\__________-> Closed
/// ```

use super::platform::{
    BleAdapter, BleDevice, GattCompletion, GattHandle, GattServiceInfo, GATT_ERROR_133,
    GATT_FAILURE, GATT_SUCCESS,
};
use crate::config::TransportTimeouts;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Closed,
}

/// Kind of an awaited platform completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Connect,
    Disconnect,
    DiscoverServices,
    ReadRemoteRssi,
    WriteCharacteristic,
    ReadCharacteristic,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Disconnect => write!(f, "disconnect"),
            Self::DiscoverServices => write!(f, "discoverServices"),
            Self::ReadRemoteRssi => write!(f, "readRemoteRssi"),
            Self::WriteCharacteristic => write!(f, "writeCharacteristic"),
            Self::ReadCharacteristic => write!(f, "readCharacteristic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GattError {
    #[error("Connection failed with status {status}")]
    ConnectionFailed { status: i32 },
    #[error("{kind} failed with status {status}")]
    OperationFailed { kind: OperationKind, status: i32 },
    #[error("Remote peer does not expose the payload service")]
    IncorrectPayloadService,
    #[error("Not connected")]
    NotConnected,
    #[error("Transport already closed")]
    AlreadyClosed,
    #[error("Timed out waiting for {0}")]
    Timeout(OperationKind),
    #[error("Platform error: {0}")]
    Platform(String),
}

impl GattError {
    /// Connection failure caused by the 133 stack fault
    pub fn is_unhealthy_stack(&self) -> bool {
        matches!(self, GattError::ConnectionFailed { status } if *status == GATT_ERROR_133)
    }
}

struct Inner {
    state: ConnectionState,
    closing: bool,
    pending: HashMap<OperationKind, oneshot::Sender<GattCompletion>>,
    handle: Option<Arc<dyn GattHandle>>,
}

struct TransportShared {
    device: BleDevice,
    adapter: Arc<dyn BleAdapter>,
    timeouts: TransportTimeouts,
    inner: Mutex<Inner>,
    /// Serializes operations; teardown never takes it
    op_lock: tokio::sync::Mutex<()>,
    teardown_lock: tokio::sync::Mutex<()>,
}

/// Routes platform callbacks to the transport that issued the operation
#[derive(Clone)]
pub struct GattEventSink {
    shared: Weak<TransportShared>,
}

impl GattEventSink {
    pub fn deliver(&self, completion: GattCompletion) {
        if let Some(shared) = self.shared.upgrade() {
            shared.deliver(completion);
        }
    }

    pub fn on_connection_state_change(&self, status: i32, connected: bool) {
        self.deliver(GattCompletion::ConnectionState { status, connected });
    }

    pub fn on_services_discovered(&self, status: i32) {
        self.deliver(GattCompletion::ServicesDiscovered { status });
    }

    pub fn on_read_remote_rssi(&self, rssi: i32, status: i32) {
        self.deliver(GattCompletion::RemoteRssi { status, rssi });
    }

    pub fn on_characteristic_write(&self, status: i32) {
        self.deliver(GattCompletion::CharacteristicWrite { status });
    }

    pub fn on_characteristic_read(&self, value: Vec<u8>, status: i32) {
        self.deliver(GattCompletion::CharacteristicRead { status, value });
    }
}

impl TransportShared {
    fn deliver(&self, completion: GattCompletion) {
        let mut inner = self.inner.lock();
        let sender = match (&completion, completion.kind()) {
            (GattCompletion::ConnectionState { connected, .. }, None) => {
                if let Some(sender) = inner.pending.remove(&OperationKind::Connect) {
                    Some(sender)
                } else if *connected {
                    None
                } else if let Some(sender) = inner.pending.remove(&OperationKind::Disconnect) {
                    Some(sender)
                } else {
                    if inner.state == ConnectionState::Connected {
                        debug!("{} dropped the connection", self.device);
                        inner.state = ConnectionState::Disconnected;
                        // in-flight operations observe a dropped sender
                        inner.pending.clear();
                    }
                    None
                }
            }
            (_, Some(kind)) => inner.pending.remove(&kind),
            _ => None,
        };
        drop(inner);

        match sender {
            Some(sender) => {
                let _ = sender.send(completion);
            }
            None => debug!("Uncorrelated GATT completion from {}: {:?}", self.device, completion),
        }
    }

    fn register(&self, kind: OperationKind) -> Result<oneshot::Receiver<GattCompletion>, GattError> {
        let mut inner = self.inner.lock();
        let allowed = match kind {
            OperationKind::Disconnect => inner.state == ConnectionState::Disconnecting,
            _ if inner.closing || inner.state == ConnectionState::Closed => {
                return Err(GattError::AlreadyClosed)
            }
            OperationKind::Connect => inner.state == ConnectionState::Connecting,
            _ => inner.state == ConnectionState::Connected,
        };
        if !allowed {
            return Err(GattError::NotConnected);
        }
        let (sender, receiver) = oneshot::channel();
        inner.pending.insert(kind, sender);
        Ok(receiver)
    }

    fn cancel(&self, kind: OperationKind) {
        self.inner.lock().pending.remove(&kind);
    }

    fn current_handle(&self) -> Result<Arc<dyn GattHandle>, GattError> {
        let inner = self.inner.lock();
        if inner.closing {
            return Err(GattError::AlreadyClosed);
        }
        inner.handle.clone().ok_or(GattError::NotConnected)
    }

    /// Error for a completion slot whose sender vanished
    fn abandoned_error(&self) -> GattError {
        if self.inner.lock().closing {
            GattError::AlreadyClosed
        } else {
            GattError::NotConnected
        }
    }

    fn set_state(&self, from: ConnectionState, to: ConnectionState) -> Result<(), GattError> {
        let mut inner = self.inner.lock();
        if inner.closing {
            return Err(GattError::AlreadyClosed);
        }
        if inner.state != from {
            return Err(GattError::NotConnected);
        }
        inner.state = to;
        Ok(())
    }

    fn install_handle(&self, handle: Arc<dyn GattHandle>) -> Result<(), GattError> {
        let (rejected, previous) = {
            let mut inner = self.inner.lock();
            if inner.closing {
                (Some(handle), None)
            } else {
                (None, inner.handle.replace(handle))
            }
        };
        if let Some(previous) = previous {
            previous.close();
        }
        match rejected {
            Some(handle) => {
                handle.close();
                Err(GattError::AlreadyClosed)
            }
            None => Ok(()),
        }
    }

    /// Take the handle out and release it; returns whether one was held
    fn release_handle(&self) -> bool {
        let handle = self.inner.lock().handle.take();
        match handle {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    async fn connect_once(self: &Arc<Self>) -> Result<(), GattError> {
        let receiver = self.register(OperationKind::Connect)?;
        let sink = GattEventSink {
            shared: Arc::downgrade(self),
        };
        let handle = match self.adapter.connect_gatt(&self.device, sink) {
            Ok(handle) => handle,
            Err(e) => {
                self.cancel(OperationKind::Connect);
                return Err(e);
            }
        };
        self.install_handle(handle)?;

        let completion = match timeout(self.timeouts.connection, receiver).await {
            Err(_) => {
                self.cancel(OperationKind::Connect);
                return Err(GattError::Timeout(OperationKind::Connect));
            }
            Ok(Err(_)) => return Err(self.abandoned_error()),
            Ok(Ok(completion)) => completion,
        };

        match completion {
            GattCompletion::ConnectionState {
                status: GATT_SUCCESS,
                connected: true,
            } => self.set_state(ConnectionState::Connecting, ConnectionState::Connected),
            GattCompletion::ConnectionState { status, .. } => Err(GattError::ConnectionFailed {
                status: if status == GATT_SUCCESS { GATT_FAILURE } else { status },
            }),
            other => Err(GattError::Platform(format!(
                "unexpected completion while connecting: {:?}",
                other
            ))),
        }
    }

    /// Drop the faulted handle so the retry starts from a clean stack state
    fn invalidate_handle(&self) {
        let handle = self.inner.lock().handle.take();
        if let Some(handle) = handle {
            if !handle.refresh_device_cache() {
                debug!("Device cache refresh unavailable for {}", self.device);
            }
            handle.close();
        }
    }

    async fn run_op<F>(
        &self,
        kind: OperationKind,
        start: F,
    ) -> Result<GattCompletion, GattError>
    where
        F: FnOnce(&dyn GattHandle) -> bool,
    {
        let _op = self.op_lock.lock().await;
        let receiver = self.register(kind)?;
        let handle = match self.current_handle() {
            Ok(handle) => handle,
            Err(e) => {
                self.cancel(kind);
                return Err(e);
            }
        };
        if !start(handle.as_ref()) {
            self.cancel(kind);
            return Err(GattError::OperationFailed {
                kind,
                status: GATT_FAILURE,
            });
        }

        let completion = match timeout(self.timeouts.operation, receiver).await {
            Err(_) => {
                self.cancel(kind);
                return Err(GattError::Timeout(kind));
            }
            Ok(Err(_)) => return Err(self.abandoned_error()),
            Ok(Ok(completion)) => completion,
        };

        match completion.status() {
            GATT_SUCCESS => Ok(completion),
            status => Err(GattError::OperationFailed { kind, status }),
        }
    }

    async fn teardown(self: Arc<Self>) {
        let _teardown = self.teardown_lock.lock().await;
        let was_connected = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Closed {
                return;
            }
            inner.closing = true;
            inner.pending.clear();
            let was_connected = inner.state == ConnectionState::Connected;
            if was_connected {
                inner.state = ConnectionState::Disconnecting;
            }
            was_connected
        };

        if was_connected {
            let handle = self.inner.lock().handle.clone();
            if let (Ok(receiver), Some(handle)) = (self.register(OperationKind::Disconnect), handle)
            {
                handle.disconnect();
                if timeout(self.timeouts.disconnect, receiver).await.is_err() {
                    debug!("No disconnect confirmation from {}, forcing close", self.device);
                }
            }
        }

        self.release_handle();
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.state = ConnectionState::Closed;
    }
}

/// One BLE GATT client link to one remote device
pub struct GattTransport {
    shared: Arc<TransportShared>,
}

impl GattTransport {
    pub fn new(adapter: Arc<dyn BleAdapter>, device: BleDevice, timeouts: TransportTimeouts) -> Self {
        Self {
            shared: Arc::new(TransportShared {
                device,
                adapter,
                timeouts,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    closing: false,
                    pending: HashMap::new(),
                    handle: None,
                }),
                op_lock: tokio::sync::Mutex::new(()),
                teardown_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn device(&self) -> &BleDevice {
        &self.shared.device
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Connect, retrying exactly once after a 133 fault
    pub async fn open(&self) -> Result<(), GattError> {
        let shared = &self.shared;
        let _op = shared.op_lock.lock().await;
        {
            let mut inner = shared.inner.lock();
            if inner.closing || inner.state == ConnectionState::Closed {
                return Err(GattError::AlreadyClosed);
            }
            match inner.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected => inner.state = ConnectionState::Connecting,
                _ => return Err(GattError::NotConnected),
            }
        }

        let result = match shared.connect_once().await {
            Err(e) if e.is_unhealthy_stack() => {
                warn!(
                    "GATT 133 connecting to {}, invalidating handle and retrying once",
                    shared.device
                );
                shared.invalidate_handle();
                shared.connect_once().await
            }
            other => other,
        };

        if result.is_err() {
            let mut inner = shared.inner.lock();
            if !inner.closing && inner.state == ConnectionState::Connecting {
                inner.state = ConnectionState::Disconnected;
            }
        }
        result
    }

    pub async fn discover_services(&self) -> Result<Vec<GattServiceInfo>, GattError> {
        self.shared
            .run_op(OperationKind::DiscoverServices, |handle| handle.discover_services())
            .await?;
        Ok(self.shared.current_handle()?.services())
    }

    pub async fn read_remote_rssi(&self) -> Result<i32, GattError> {
        match self
            .shared
            .run_op(OperationKind::ReadRemoteRssi, |handle| handle.read_remote_rssi())
            .await?
        {
            GattCompletion::RemoteRssi { rssi, .. } => Ok(rssi),
            other => Err(GattError::Platform(format!("unexpected completion: {:?}", other))),
        }
    }

    pub async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), GattError> {
        self.shared
            .run_op(OperationKind::WriteCharacteristic, |handle| {
                handle.write_characteristic(service, characteristic, value)
            })
            .await
            .map(|_| ())
    }

    pub async fn read_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, GattError> {
        match self
            .shared
            .run_op(OperationKind::ReadCharacteristic, |handle| {
                handle.read_characteristic(service, characteristic)
            })
            .await?
        {
            GattCompletion::CharacteristicRead { value, .. } => Ok(value),
            other => Err(GattError::Platform(format!("unexpected completion: {:?}", other))),
        }
    }

    /// Disconnect and release the handle. Idempotent; always ends `Closed`.
    ///
    /// Teardown runs on its own task, so dropping this future mid-way
    /// doesn't interrupt it.
    pub async fn close(&self) {
        let shared = Arc::clone(&self.shared);
        if let Err(e) = tokio::spawn(shared.teardown()).await {
            warn!("Transport teardown for {} failed: {}", self.shared.device, e);
        }
    }
}

impl Drop for GattTransport {
    fn drop(&mut self) {
        let handle = {
            let mut inner = self.shared.inner.lock();
            if inner.state == ConnectionState::Closed {
                return;
            }
            inner.closing = true;
            inner.pending.clear();
            inner.handle.take()
        };
        if let Some(handle) = handle {
            debug!("Transport for {} dropped unclosed, releasing handle", self.shared.device);
            handle.close();
        }
    }
}
