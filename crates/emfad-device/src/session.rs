//! Device session: one transport, one command in flight.
//!
//! ```text
//! Idle ──open──▶ Opening ──handshake ok──▶ Ready ◀──▶ Busy
//!                   │                        │         │
//!                   └────── any failure ─────┴─────────┴──▶ Closed(reason)
//! ```
//!
//! A session serializes all command/response traffic. A call made while
//! another is outstanding fails with [`SessionError::Busy`] without waiting.
//! Any transport failure closes the session for good.
//!
//! [`shutdown`](DeviceSession::shutdown) is the orderly close: it waits for
//! the command in flight, stops an active measurement run and says goodbye
//! before releasing the transport.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use emfad_metrics::{metric_defs, metrics, MetricLabels};
use emfad_protocol::{
    decode_ack, Command, DecodeError, DeviceStatus, Frame, FrameCodec, RawTelemetry, ReplyKind,
    Response, ResponseCode, DATA_TYPE_CALIBRATION, DATA_TYPE_SIGNAL, DATA_TYPE_STATUS,
    MAX_PACKET_SIZE,
};
use emfad_transport::{Transport, TransportError, TransportKind, COMMAND_TIMEOUT, CONNECT_TIMEOUT};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::error::{CloseReason, SessionError};

/// How often `shutdown` re-checks a busy session.
const BUSY_POLL: Duration = Duration::from_millis(2);

/// Session lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet opened.
    Idle,
    /// Handshake in progress.
    Opening,
    /// Open and idle.
    Ready,
    /// A command is in flight.
    Busy,
    /// Closed; the session cannot be reused.
    Closed(CloseReason),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Opening => f.write_str("opening"),
            SessionState::Ready => f.write_str("ready"),
            SessionState::Busy => f.write_str("busy"),
            SessionState::Closed(reason) => write!(f, "closed ({})", reason),
        }
    }
}

/// Session timeouts.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Deadline for the transport handshake and the Connect round trip.
    pub connect_timeout: Duration,
    /// Deadline for each command round trip.
    pub command_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            command_timeout: COMMAND_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// Callback invoked once when a session closes.
pub type CloseHook = Box<dyn Fn(&CloseReason) + Send + Sync>;

/// A command/response session over one transport.
pub struct DeviceSession {
    transport: Box<dyn Transport>,
    config: SessionConfig,
    labels: MetricLabels,
    state: RwLock<SessionState>,
    busy: AtomicBool,
    measuring: AtomicBool,
    closing: AtomicBool,
    codec: Mutex<FrameCodec>,
    close_hook: Mutex<Option<CloseHook>>,
}

/// Clears the busy flag when a command finishes, however it finishes.
struct BusyGuard<'a> {
    session: &'a DeviceSession,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.session.state.write();
            if *state == SessionState::Busy {
                *state = SessionState::Ready;
            }
        }
        self.session.busy.store(false, Ordering::Release);
    }
}

impl DeviceSession {
    /// Create an idle session that owns `transport`.
    pub fn new(
        transport: Box<dyn Transport>,
        device_name: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        let labels = MetricLabels::new(device_name, transport.kind().to_string());
        Self {
            transport,
            config,
            labels,
            state: RwLock::new(SessionState::Idle),
            busy: AtomicBool::new(false),
            measuring: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            codec: Mutex::new(FrameCodec::new()),
            close_hook: Mutex::new(None),
        }
    }

    /// Register a callback fired once when the session closes.
    pub fn set_close_hook(&self, hook: CloseHook) {
        *self.close_hook.lock() = Some(hook);
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Link type of the underlying transport.
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Device name used in logs and metric labels.
    pub fn device_name(&self) -> &str {
        &self.labels.device
    }

    /// Whether the session is Ready or Busy.
    pub fn is_open(&self) -> bool {
        matches!(*self.state.read(), SessionState::Ready | SessionState::Busy)
    }

    /// Whether the instrument acknowledged StartMeasurement and has not yet
    /// acknowledged StopMeasurement.
    pub fn is_measuring(&self) -> bool {
        self.measuring.load(Ordering::Acquire)
    }

    /// Close reason, if closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        match &*self.state.read() {
            SessionState::Closed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Run the handshake: transport open, then a Connect round trip over USB.
    ///
    /// On failure the session is closed and the transport released.
    pub fn open(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.write();
            match &*state {
                SessionState::Idle => *state = SessionState::Opening,
                SessionState::Closed(reason) => return Err(SessionError::Closed(reason.clone())),
                other => return Err(SessionError::NotReady(other.to_string())),
            }
        }
        debug!(device = %self.labels.device, kind = %self.kind(), "opening session");

        if let Err(e) = self.transport.open(self.config.connect_timeout) {
            let msg = e.to_string();
            self.close_with(CloseReason::HandshakeFailed(msg.clone()));
            return Err(SessionError::HandshakeFailed(msg));
        }

        if self.kind() == TransportKind::Usb {
            // The bulk interface gives no link-level ack; the firmware must answer Connect
            self.busy.store(true, Ordering::Release);
            let result = self.exchange(&Command::Connect, self.config.connect_timeout);
            self.busy.store(false, Ordering::Release);
            let failure = match result {
                Ok(Response::Ack(ack)) if ack.code.is_ok() => None,
                Ok(Response::Ack(ack)) => Some(format!("connect answered {}", ack.code)),
                Ok(other) => Some(format!("connect answered with {}", other.name())),
                Err(e) => Some(e.to_string()),
            };
            if let Some(msg) = failure {
                self.close_with(CloseReason::HandshakeFailed(msg.clone()));
                return Err(SessionError::HandshakeFailed(msg));
            }
        }

        let mut state = self.state.write();
        if *state != SessionState::Opening {
            // Closed from another thread mid-handshake
            return Err(match &*state {
                SessionState::Closed(reason) => SessionError::Closed(reason.clone()),
                other => SessionError::NotReady(other.to_string()),
            });
        }
        *state = SessionState::Ready;
        info!(device = %self.labels.device, kind = %self.kind(), "session ready");
        Ok(())
    }

    /// Send one command and wait for its reply.
    ///
    /// Fails immediately with [`SessionError::Busy`] if another command is in
    /// flight. A non-OK acknowledgement is returned as a `Response::Ack`; use
    /// [`command_ok`](Self::command_ok) to treat it as an error.
    pub fn send_command(&self, cmd: &Command) -> Result<Response, SessionError> {
        let _guard = self.acquire()?;
        let result = self.exchange(cmd, self.config.command_timeout);
        self.track_run(cmd, &result);
        result
    }

    /// Send a command that must be acknowledged with RESP_OK.
    pub fn command_ok(&self, cmd: &Command) -> Result<(), SessionError> {
        match self.send_command(cmd)? {
            Response::Ack(ack) if ack.code.is_ok() => Ok(()),
            Response::Ack(ack) => Err(SessionError::Rejected {
                command: cmd.code(),
                code: ack.code,
            }),
            other => Err(unexpected_reply(cmd, &other)),
        }
    }

    /// Issue ReadData and decode one signal sample.
    pub fn read_telemetry(&self) -> Result<RawTelemetry, SessionError> {
        match self.send_command(&Command::ReadData)? {
            Response::Signal(t) => Ok(t),
            other => Err(unexpected_reply(&Command::ReadData, &other)),
        }
    }

    /// Issue GetStatus and decode the status report.
    pub fn read_status(&self) -> Result<DeviceStatus, SessionError> {
        match self.send_command(&Command::GetStatus)? {
            Response::Status(s) => Ok(s),
            other => Err(unexpected_reply(&Command::GetStatus, &other)),
        }
    }

    /// Close the session. Wakes any blocked call. Idempotent.
    pub fn close(&self) {
        self.close_with(CloseReason::Requested);
    }

    /// Orderly close.
    ///
    /// New commands are refused from here on. Waits up to the command
    /// timeout for the command in flight, sends StopMeasurement if a run is
    /// active, then Disconnect, then closes. Each step is best effort.
    pub fn shutdown(&self) {
        if self.closing.swap(true, Ordering::AcqRel) || !self.is_open() {
            self.close();
            return;
        }
        if self.is_measuring() {
            match self.final_command(&Command::StopMeasurement) {
                Ok(_) => debug!(device = %self.labels.device, "measurement stopped before close"),
                Err(e) => warn!(device = %self.labels.device, "stop measurement failed: {}", e),
            }
        }
        if self.is_open() {
            if let Err(e) = self.final_command(&Command::Disconnect) {
                debug!("disconnect command failed: {}", e);
            }
        }
        self.close();
    }

    /// Send `cmd` once the session is free, bypassing the closing gate.
    fn final_command(&self, cmd: &Command) -> Result<Response, SessionError> {
        let timeout = self.config.command_timeout;
        let deadline = Instant::now() + timeout;
        let _guard = loop {
            match self.try_acquire() {
                Err(SessionError::Busy) if Instant::now() < deadline => thread::sleep(BUSY_POLL),
                other => break other?,
            }
        };
        let result = self.exchange(cmd, timeout);
        self.track_run(cmd, &result);
        result
    }

    fn track_run(&self, cmd: &Command, result: &Result<Response, SessionError>) {
        let Ok(Response::Ack(ack)) = result else {
            return;
        };
        match cmd {
            Command::StartMeasurement { .. } if ack.code.is_ok() => {
                self.measuring.store(true, Ordering::Release)
            }
            Command::StopMeasurement => self.measuring.store(false, Ordering::Release),
            _ => {}
        }
    }

    fn acquire(&self) -> Result<BusyGuard<'_>, SessionError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(SessionError::Closed(CloseReason::Requested));
        }
        self.try_acquire()
    }

    fn try_acquire(&self) -> Result<BusyGuard<'_>, SessionError> {
        {
            let state = self.state.read();
            match &*state {
                SessionState::Ready | SessionState::Busy => {}
                SessionState::Closed(reason) => return Err(SessionError::Closed(reason.clone())),
                other => return Err(SessionError::NotReady(other.to_string())),
            }
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::Busy);
        }
        let guard = BusyGuard { session: self };
        let mut state = self.state.write();
        match &*state {
            SessionState::Ready => {
                *state = SessionState::Busy;
                Ok(guard)
            }
            SessionState::Closed(reason) => Err(SessionError::Closed(reason.clone())),
            other => Err(SessionError::NotReady(other.to_string())),
        }
    }

    fn close_with(&self, reason: CloseReason) {
        {
            let mut state = self.state.write();
            if matches!(*state, SessionState::Closed(_)) {
                return;
            }
            *state = SessionState::Closed(reason.clone());
        }
        self.transport.close();
        self.codec.lock().clear();

        metrics::counter!(
            metric_defs::SESSION_CLOSURES.name,
            &self.labels.with(&[("reason", reason.label().to_string())])
        )
        .increment(1);
        match &reason {
            CloseReason::Requested => info!(device = %self.labels.device, "session closed"),
            other => warn!(device = %self.labels.device, "session closed: {}", other),
        }

        if let Some(hook) = self.close_hook.lock().take() {
            hook(&reason);
        }
    }

    fn fail(&self, err: TransportError) -> SessionError {
        if let Some(reason) = self.close_reason() {
            // Closed locally while this call was blocked
            return SessionError::Closed(reason);
        }
        self.close_with(CloseReason::Transport(err.clone()));
        SessionError::Transport(err)
    }

    /// Write one command and read frames until its reply arrives.
    fn exchange(&self, cmd: &Command, timeout: Duration) -> Result<Response, SessionError> {
        let labels = self.labels.with(&[("command", cmd.name().to_string())]);
        let start = Instant::now();
        let result = self.exchange_inner(cmd, timeout);
        match &result {
            Ok(_) => {
                metrics::histogram!(metric_defs::COMMAND_LATENCY.name, &labels)
                    .record(start.elapsed().as_secs_f64() * 1000.0);
            }
            Err(e) => {
                metrics::counter!(metric_defs::COMMAND_FAILURES.name, &labels).increment(1);
                debug!(command = cmd.name(), "command failed: {}", e);
            }
        }
        result
    }

    fn exchange_inner(&self, cmd: &Command, timeout: Duration) -> Result<Response, SessionError> {
        let bytes = cmd.encode();
        let deadline = Instant::now() + timeout;

        self.transport
            .send(&bytes, timeout)
            .map_err(|e| self.fail(e))?;
        metrics::counter!(
            metric_defs::COMMANDS_SENT.name,
            &self.labels.with(&[("command", cmd.name().to_string())])
        )
        .increment(1);
        trace!(command = cmd.name(), len = bytes.len(), "command sent");

        let expected = cmd.expected_reply();
        loop {
            let frame = self.next_frame(deadline, timeout)?;
            match self.match_reply(cmd, expected, &frame) {
                Ok(Some(response)) => return Ok(response),
                Ok(None) => {
                    debug!(
                        command = cmd.name(),
                        tag = frame.get(2).copied().unwrap_or_default(),
                        "discarding unrelated frame"
                    );
                }
                Err(e @ SessionError::Decode(_)) => {
                    metrics::counter!(metric_defs::FRAMES_REJECTED.name, &self.labels.to_labels())
                        .increment(1);
                    // Anything buffered behind a bad frame is suspect
                    self.codec.lock().clear();
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Next complete frame from the codec, reading from the transport as needed.
    fn next_frame(&self, deadline: Instant, timeout: Duration) -> Result<Vec<u8>, SessionError> {
        loop {
            if let Some(frame) = self.codec.lock().decode() {
                return Ok(frame);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.fail(TransportError::Timeout {
                    operation: "reply",
                    timeout,
                }));
            }
            let chunk = self
                .transport
                .receive(MAX_PACKET_SIZE, remaining)
                .map_err(|e| self.fail(e))?;
            self.codec.lock().push(&chunk);
        }
    }

    /// Decide whether `frame` answers `cmd`.
    ///
    /// Returns `Ok(None)` for frames that belong to something else (for
    /// instance samples pushed in auto mode while waiting for an ack).
    fn match_reply(
        &self,
        cmd: &Command,
        expected: ReplyKind,
        frame: &[u8],
    ) -> Result<Option<Response>, SessionError> {
        // Reject corrupt frames before trusting the tag byte
        let parsed = Frame::parse(frame)?;
        let tag = parsed.command();

        let data_tag = match expected {
            ReplyKind::Ack => None,
            ReplyKind::Signal => Some(DATA_TYPE_SIGNAL),
            ReplyKind::Status => Some(DATA_TYPE_STATUS),
            ReplyKind::Calibration => Some(DATA_TYPE_CALIBRATION),
        };

        match data_tag {
            None if tag == cmd.code() => Ok(Some(Response::decode(frame, ReplyKind::Ack)?)),
            Some(t) if tag == t => Ok(Some(Response::decode(frame, expected)?)),
            Some(t) if tag == cmd.code() => {
                // Firmware refuses a data request with an ack carrying the error
                let ack = decode_ack(frame)?;
                if ack.code == ResponseCode::Ok {
                    Err(SessionError::Decode(DecodeError::UnexpectedType {
                        expected: t,
                        actual: tag,
                    }))
                } else {
                    Err(SessionError::Rejected {
                        command: cmd.code(),
                        code: ack.code,
                    })
                }
            }
            _ => Ok(None),
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn unexpected_reply(cmd: &Command, response: &Response) -> SessionError {
    SessionError::Decode(DecodeError::InvalidData(format!(
        "{} answered with {}",
        cmd.name(),
        response.name()
    )))
}
