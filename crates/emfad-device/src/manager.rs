//! Device discovery and connection management.
//!
//! The manager owns at most one [`DeviceSession`]. Connection state and the
//! last status report are observable through polling accessors and through
//! subscription channels that receive every transition.

use std::fmt;
use std::sync::{Arc, Weak};

use crossbeam_channel::{unbounded, Receiver, Sender};
use emfad_protocol::{Command, DeviceStatus, Response};
use emfad_transport::{DeviceIdentifiers, RawDevice, Transport, TransportError, TransportKind};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CloseReason, ConnectError};
use crate::session::{DeviceSession, SessionConfig};

/// Link quality reported for a wired connection.
pub const USB_CONNECTION_QUALITY: f64 = 0.95;

/// Platform enumerator and opener for one link type.
pub trait DeviceProvider: Send + Sync {
    /// Link type this provider handles.
    fn kind(&self) -> TransportKind;

    /// List attached or advertising devices, unfiltered.
    fn enumerate(&self) -> Result<Vec<RawDevice>, TransportError>;

    /// Build an unopened transport for `device`.
    fn transport(
        &self,
        device: &RawDevice,
        ids: &DeviceIdentifiers,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// A device that passed the identifier filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateDevice {
    /// Display name.
    pub name: String,
    /// Link type.
    pub kind: TransportKind,
    /// Discovery record used to open the device.
    pub raw: RawDevice,
}

impl CandidateDevice {
    /// Address used to open the device.
    pub fn address(&self) -> &str {
        self.raw.address()
    }
}

/// Connection state owned by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// A connect is in progress.
    Connecting,
    /// A session is open.
    Connected,
    /// The session was lost; call `disconnect` to reset.
    Error(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

struct ManagerState {
    connection: ConnectionState,
    session: Option<Arc<DeviceSession>>,
    device: Option<CandidateDevice>,
    status: Option<DeviceStatus>,
}

struct Inner {
    providers: Vec<Box<dyn DeviceProvider>>,
    ids: DeviceIdentifiers,
    session_config: SessionConfig,
    state: RwLock<ManagerState>,
    state_subscribers: Mutex<Vec<Sender<ConnectionState>>>,
    status_subscribers: Mutex<Vec<Sender<DeviceStatus>>>,
}

impl Inner {
    fn publish_state(&self, state: ConnectionState) {
        self.state_subscribers
            .lock()
            .retain(|tx| tx.send(state.clone()).is_ok());
    }

    fn publish_status(&self, status: DeviceStatus) {
        self.status_subscribers
            .lock()
            .retain(|tx| tx.send(status).is_ok());
    }

    /// Move to `next` and notify subscribers.
    fn transition(&self, guard: &mut ManagerState, next: ConnectionState) {
        if guard.connection != next {
            debug!("connection {} -> {}", guard.connection, next);
            guard.connection = next.clone();
            self.publish_state(next);
        }
    }

    fn on_session_closed(&self, session: &Weak<DeviceSession>, reason: &CloseReason) {
        let mut state = self.state.write();
        let is_current = state
            .session
            .as_ref()
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), session.as_ptr()));
        if is_current && state.connection == ConnectionState::Connected {
            warn!("connection lost: {}", reason);
            self.transition(&mut state, ConnectionState::Error(reason.to_string()));
        }
    }
}

/// Discovers instruments and manages the single active session.
#[derive(Clone)]
pub struct DeviceManager {
    inner: Arc<Inner>,
}

impl DeviceManager {
    /// Create a manager over the given providers.
    pub fn new(
        providers: Vec<Box<dyn DeviceProvider>>,
        ids: DeviceIdentifiers,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                providers,
                ids,
                session_config,
                state: RwLock::new(ManagerState {
                    connection: ConnectionState::Disconnected,
                    session: None,
                    device: None,
                    status: None,
                }),
                state_subscribers: Mutex::new(Vec::new()),
                status_subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Enumerate every provider and keep devices matching the identifiers.
    ///
    /// A failing provider is logged and skipped.
    pub fn scan(&self) -> Vec<CandidateDevice> {
        let ids = &self.inner.ids;
        let mut found: Vec<CandidateDevice> = Vec::new();
        for provider in &self.inner.providers {
            let devices = match provider.enumerate() {
                Ok(devices) => devices,
                Err(e) => {
                    warn!(kind = %provider.kind(), "device enumeration failed: {}", e);
                    continue;
                }
            };
            for raw in devices {
                let matches = match &raw {
                    RawDevice::Usb {
                        vendor_id,
                        product_id,
                        ..
                    } => ids.matches_usb(*vendor_id, *product_id),
                    RawDevice::Ble { name, .. } => ids.matches_ble_name(name.as_deref()),
                };
                if !matches || found.iter().any(|c| c.raw.address() == raw.address()) {
                    continue;
                }
                found.push(CandidateDevice {
                    name: raw.display_name(),
                    kind: raw.kind(),
                    raw,
                });
            }
        }
        info!(count = found.len(), "scan complete");
        found
    }

    /// Open a session to `candidate`.
    ///
    /// On failure the manager returns to Disconnected after publishing
    /// `Error(reason)`.
    pub fn connect(&self, candidate: &CandidateDevice) -> Result<(), ConnectError> {
        {
            let mut state = self.inner.state.write();
            match state.connection {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    return Err(ConnectError::AlreadyConnected)
                }
                ConnectionState::Disconnected | ConnectionState::Error(_) => {}
            }
            let stale = state.session.take();
            state.device = None;
            state.status = None;
            self.inner.transition(&mut state, ConnectionState::Connecting);
            drop(state);
            if let Some(session) = stale {
                session.close();
            }
        }
        info!(device = %candidate.name, kind = %candidate.kind, "connecting");

        match self.open_session(candidate) {
            Ok(session) => {
                let mut state = self.inner.state.write();
                if state.connection != ConnectionState::Connecting {
                    drop(state);
                    session.close();
                    return Err(ConnectError::Cancelled);
                }
                state.session = Some(session);
                state.device = Some(candidate.clone());
                self.inner.transition(&mut state, ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                warn!(device = %candidate.name, "connect failed: {}", e);
                let mut state = self.inner.state.write();
                if state.connection == ConnectionState::Connecting {
                    self.inner
                        .transition(&mut state, ConnectionState::Error(e.to_string()));
                    self.inner.transition(&mut state, ConnectionState::Disconnected);
                }
                Err(e)
            }
        }
    }

    fn open_session(&self, candidate: &CandidateDevice) -> Result<Arc<DeviceSession>, ConnectError> {
        let provider = self
            .inner
            .providers
            .iter()
            .find(|p| p.kind() == candidate.kind)
            .ok_or_else(|| ConnectError::NoDeviceFound(format!("no {} provider", candidate.kind)))?;

        let transport = provider
            .transport(&candidate.raw, &self.inner.ids)
            .map_err(|e| ConnectError::NoDeviceFound(e.to_string()))?;

        let session = Arc::new(DeviceSession::new(
            transport,
            candidate.name.clone(),
            self.inner.session_config,
        ));
        let weak_inner = Arc::downgrade(&self.inner);
        let weak_session = Arc::downgrade(&session);
        session.set_close_hook(Box::new(move |reason| {
            if *reason == CloseReason::Requested {
                return;
            }
            if let Some(inner) = weak_inner.upgrade() {
                inner.on_session_closed(&weak_session, reason);
            }
        }));

        session.open().map_err(|e| match e {
            crate::SessionError::HandshakeFailed(msg) => ConnectError::HandshakeFailed(msg),
            other => ConnectError::Session(other),
        })?;
        Ok(session)
    }

    /// Close the session, if any, and return to Disconnected. Idempotent.
    ///
    /// The session is shut down in order: a command in flight is allowed to
    /// finish, an active measurement run is stopped, then Disconnect is sent.
    pub fn disconnect(&self) {
        let session = {
            let mut state = self.inner.state.write();
            let session = state.session.take();
            state.device = None;
            state.status = None;
            self.inner.transition(&mut state, ConnectionState::Disconnected);
            session
        };
        if let Some(session) = session {
            session.shutdown();
            info!("disconnected");
        }
    }

    /// Send a command through the active session.
    pub fn send_command(&self, cmd: &Command) -> Result<Response, ConnectError> {
        let session = self.session().ok_or(ConnectError::NotConnected)?;
        Ok(session.send_command(cmd)?)
    }

    /// Query the status report and publish it to status subscribers.
    pub fn refresh_status(&self) -> Result<DeviceStatus, ConnectError> {
        let session = self.session().ok_or(ConnectError::NotConnected)?;
        let status = session.read_status()?;
        {
            let mut state = self.inner.state.write();
            if state
                .session
                .as_ref()
                .is_some_and(|s| Arc::ptr_eq(s, &session))
            {
                state.status = Some(status);
            }
        }
        self.inner.publish_status(status);
        Ok(status)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.read().connection.clone()
    }

    /// Whether a session is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The connected device, if any.
    pub fn current_device(&self) -> Option<CandidateDevice> {
        self.inner.state.read().device.clone()
    }

    /// Last status report, if one was read in this connection.
    pub fn latest_status(&self) -> Option<DeviceStatus> {
        self.inner.state.read().status
    }

    /// The active session, for consumers such as the measurement pipeline.
    pub fn session(&self) -> Option<Arc<DeviceSession>> {
        let state = self.inner.state.read();
        match state.connection {
            ConnectionState::Connected => state.session.clone(),
            _ => None,
        }
    }

    /// Link quality in `0.0..=1.0`.
    ///
    /// 0 when not connected, fixed for USB, and the last reported signal
    /// quality for BLE.
    pub fn connection_quality(&self) -> f64 {
        let state = self.inner.state.read();
        if state.connection != ConnectionState::Connected {
            return 0.0;
        }
        match state.device.as_ref().map(|d| d.kind) {
            Some(TransportKind::Usb) => USB_CONNECTION_QUALITY,
            Some(TransportKind::Ble) => state
                .status
                .map(|s| (f64::from(s.signal_quality) / 100.0).clamp(0.0, 1.0))
                .unwrap_or(0.0),
            None => 0.0,
        }
    }

    /// Receive every subsequent connection state transition.
    pub fn subscribe_state(&self) -> Receiver<ConnectionState> {
        let (tx, rx) = unbounded();
        self.inner.state_subscribers.lock().push(tx);
        rx
    }

    /// Receive every subsequent status report.
    pub fn subscribe_status(&self) -> Receiver<DeviceStatus> {
        let (tx, rx) = unbounded();
        self.inner.status_subscribers.lock().push(tx);
        rx
    }
}
