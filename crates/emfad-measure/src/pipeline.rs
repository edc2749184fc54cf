//! Single-step and continuous acquisition.
//!
//! A continuous run owns one worker thread. The thread polls the session on
//! the configured cadence, turns each sample into a [`MeasurementRecord`] and
//! reports progress as [`PipelineEvent`]s. Every run ends with exactly one
//! `Stopped` (after [`MeasurementPipeline::stop`]) or `Terminated` (the
//! session closed underneath it).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use emfad_device::{DeviceManager, DeviceSession, SessionError};
use emfad_metrics::{metric_defs, metrics, MetricLabels};
use emfad_protocol::{Command, DecodeError, RawTelemetry, Response, ResponseCode};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collaborators::{
    MaterialClassifier, PatternClassifier, PositionSource, StateSink, StorageSink,
};
use crate::config::MeasurementConfig;
use crate::error::MeasureError;
use crate::formulas::anomaly_depth;
use crate::record::MeasurementRecord;

/// Progress of a continuous run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The worker started polling.
    Started,
    /// A sample was recorded.
    Record(MeasurementRecord),
    /// A sample failed; polling continues after the backoff.
    SampleFailed(String),
    /// The run ended on request.
    Stopped,
    /// The session closed and the run ended.
    Terminated(String),
}

impl PipelineEvent {
    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Stopped | PipelineEvent::Terminated(_))
    }
}

/// Snapshot handed to the [`StateSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    /// Whether a continuous run is active.
    pub running: bool,
    /// Samples recorded since the pipeline was created.
    pub recorded: u64,
    /// Samples that failed since the pipeline was created.
    pub failed: u64,
    /// Records currently held.
    pub history_len: usize,
    /// Newest record.
    pub latest: Option<MeasurementRecord>,
}

/// External collaborators of a pipeline.
#[derive(Clone)]
pub struct Collaborators {
    /// Material classifier; defaults to [`PatternClassifier`].
    pub classifier: Arc<dyn MaterialClassifier>,
    /// Record storage.
    pub storage: Option<Arc<dyn StorageSink>>,
    /// Status observer.
    pub state_sink: Option<Arc<dyn StateSink>>,
    /// Position tagging.
    pub position: Option<Arc<dyn PositionSource>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            classifier: Arc::new(PatternClassifier::default()),
            storage: None,
            state_sink: None,
            position: None,
        }
    }
}

impl Collaborators {
    /// Replace the classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn MaterialClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Attach a storage sink.
    pub fn with_storage(mut self, storage: Arc<dyn StorageSink>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Attach a status sink.
    pub fn with_state_sink(mut self, sink: Arc<dyn StateSink>) -> Self {
        self.state_sink = Some(sink);
        self
    }

    /// Attach a position source.
    pub fn with_position(mut self, position: Arc<dyn PositionSource>) -> Self {
        self.position = Some(position);
        self
    }
}

struct Shared {
    config: RwLock<MeasurementConfig>,
    history: Mutex<VecDeque<MeasurementRecord>>,
    collaborators: Collaborators,
    subscribers: Mutex<Vec<Sender<PipelineEvent>>>,
    running: AtomicBool,
    recorded: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    fn emit(&self, event: PipelineEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn status(&self) -> PipelineStatus {
        let history = self.history.lock();
        PipelineStatus {
            running: self.running.load(Ordering::Acquire),
            recorded: self.recorded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            history_len: history.len(),
            latest: history.back().cloned(),
        }
    }

    fn publish_status(&self) {
        if let Some(sink) = &self.collaborators.state_sink {
            sink.publish(&self.status());
        }
    }

    /// Turn one sample into a record, classify it against the history and
    /// hand it to the collaborators.
    fn record(
        &self,
        telemetry: &RawTelemetry,
        config: &MeasurementConfig,
        labels: &MetricLabels,
    ) -> MeasurementRecord {
        let position = self
            .collaborators
            .position
            .as_ref()
            .and_then(|p| p.current());
        let mut record = MeasurementRecord::from_telemetry(telemetry, config, position);

        // The classifier runs outside the history lock
        let cap = config.history_cap.max(1);
        let mut window: Vec<MeasurementRecord> = {
            let history = self.history.lock();
            let skip = (history.len() + 1).saturating_sub(cap);
            history.iter().skip(skip).cloned().collect()
        };
        window.push(record.clone());
        let (material, confidence) = self.collaborators.classifier.classify(&window);
        record.material = material;
        record.confidence = confidence.clamp(0.0, 1.0);

        let history_len = {
            let mut history = self.history.lock();
            history.push_back(record.clone());
            while history.len() > cap {
                history.pop_front();
            }
            history.len()
        };

        if let Some(storage) = &self.collaborators.storage {
            if let Err(e) = storage.save(&record) {
                warn!("failed to store record: {}", e);
            }
        }

        self.recorded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric_defs::SAMPLES_RECORDED.name, &labels.to_labels()).increment(1);
        metrics::gauge!(metric_defs::HISTORY_SIZE.name).set(history_len as f64);
        debug!(
            signal = record.signal_strength,
            depth = record.depth,
            material = %record.material,
            "sample recorded"
        );

        self.emit(PipelineEvent::Record(record.clone()));
        self.publish_status();
        record
    }

    fn sample_failed(&self, labels: &MetricLabels, err: &SessionError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric_defs::SAMPLE_FAILURES.name, &labels.to_labels()).increment(1);
        warn!("sample failed: {}", err);
        self.emit(PipelineEvent::SampleFailed(err.to_string()));
        self.publish_status();
    }
}

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Acquisition front end over the manager's active session.
pub struct MeasurementPipeline {
    manager: DeviceManager,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl MeasurementPipeline {
    /// Pipeline with the default classifier and no sinks.
    pub fn new(manager: DeviceManager, config: MeasurementConfig) -> Self {
        Self::with_collaborators(manager, config, Collaborators::default())
    }

    /// Pipeline with explicit collaborators.
    pub fn with_collaborators(
        manager: DeviceManager,
        config: MeasurementConfig,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            manager,
            shared: Arc::new(Shared {
                config: RwLock::new(config),
                history: Mutex::new(VecDeque::new()),
                collaborators,
                subscribers: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                recorded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> MeasurementConfig {
        self.shared.config.read().clone()
    }

    /// Replace the configuration. A running acquisition keeps the settings
    /// it started with.
    pub fn set_config(&self, config: MeasurementConfig) -> Result<(), MeasureError> {
        config.validate()?;
        *self.shared.config.write() = config;
        Ok(())
    }

    /// Send the configuration to the instrument.
    pub fn configure(&self) -> Result<(), MeasureError> {
        let session = self.session()?;
        configure_session(&session, &self.config())
    }

    /// Configure the instrument, read one sample and record it.
    pub fn perform_step(&self) -> Result<MeasurementRecord, MeasureError> {
        if self.is_running() {
            return Err(MeasureError::AlreadyRunning);
        }
        let config = self.config();
        config.validate()?;
        let session = self.session()?;
        configure_session(&session, &config)?;

        let labels = session_labels(&session);
        match session.read_telemetry() {
            Ok(telemetry) => Ok(self.shared.record(&telemetry, &config, &labels)),
            Err(e) => {
                self.shared.sample_failed(&labels, &e);
                Err(e.into())
            }
        }
    }

    /// Start continuous acquisition.
    ///
    /// Configures the instrument and sends StartMeasurement on the calling
    /// thread, then polls on a worker thread until [`stop`](Self::stop) or
    /// until the session closes.
    pub fn start(&self) -> Result<(), MeasureError> {
        let mut slot = self.worker.lock();
        if let Some(worker) = slot.take() {
            if !worker.handle.is_finished() {
                *slot = Some(worker);
                return Err(MeasureError::AlreadyRunning);
            }
            // Previous run ended on its own; reap it
            let _ = worker.handle.join();
        }

        let config = self.config();
        config.validate()?;
        let session = self.session()?;
        configure_session(&session, &config)?;
        session.command_ok(&config.start_command())?;

        let (stop_tx, stop_rx) = bounded(1);
        let shared = self.shared.clone();
        shared.running.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name("emfad-acquisition".to_string())
            .spawn({
                let session = session.clone();
                move || run_continuous(shared, session, config, stop_rx)
            });
        match spawned {
            Ok(handle) => {
                *slot = Some(Worker { stop_tx, handle });
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                let _ = session.send_command(&Command::StopMeasurement);
                Err(MeasureError::Spawn(e))
            }
        }
    }

    /// Stop continuous acquisition and wait for the worker to finish.
    ///
    /// StopMeasurement is sent best-effort. Returns whether a run was active.
    pub fn stop(&self) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return false;
        };
        let was_active = !worker.handle.is_finished();
        let _ = worker.stop_tx.send(());
        if worker.handle.join().is_err() {
            warn!("acquisition thread panicked");
        }
        was_active
    }

    /// Whether a continuous run is active.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Receive every subsequent pipeline event.
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Copy of the recorded history, oldest first.
    pub fn history(&self) -> Vec<MeasurementRecord> {
        self.shared.history.lock().iter().cloned().collect()
    }

    /// Newest record.
    pub fn latest(&self) -> Option<MeasurementRecord> {
        self.shared.history.lock().back().cloned()
    }

    /// Drop all recorded history.
    pub fn clear_history(&self) {
        self.shared.history.lock().clear();
        debug!("history cleared");
    }

    /// Counters and newest record.
    pub fn status(&self) -> PipelineStatus {
        self.shared.status()
    }

    /// Anomaly depth over the recorded history, at the band of its first record.
    pub fn anomaly_depth(&self) -> f64 {
        let history = self.shared.history.lock();
        let Some(first) = history.front() else {
            return 0.0;
        };
        let signals: Vec<f64> = history.iter().map(|r| r.signal_strength).collect();
        anomaly_depth(&signals, first.frequency)
    }

    /// Run the instrument's calibration and return its response code.
    pub fn calibrate(&self) -> Result<ResponseCode, MeasureError> {
        if self.is_running() {
            return Err(MeasureError::AlreadyRunning);
        }
        let session = self.session()?;
        match session.send_command(&Command::Calibrate)? {
            Response::Ack(ack) => {
                info!(code = %ack.code, "calibration finished");
                Ok(ack.code)
            }
            other => Err(MeasureError::Session(SessionError::Decode(
                DecodeError::InvalidData(format!("calibrate answered with {}", other.name())),
            ))),
        }
    }

    fn session(&self) -> Result<Arc<DeviceSession>, MeasureError> {
        self.manager.session().ok_or(MeasureError::NotConnected)
    }
}

impl Drop for MeasurementPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn session_labels(session: &DeviceSession) -> MetricLabels {
    MetricLabels::new(session.device_name(), session.kind().to_string())
}

fn configure_session(session: &DeviceSession, config: &MeasurementConfig) -> Result<(), MeasureError> {
    for cmd in config.setup_commands() {
        session.command_ok(&cmd)?;
    }
    debug!(
        frequency = %config.frequency,
        mode = %config.mode,
        gain = config.gain,
        offset = config.offset,
        "instrument configured"
    );
    Ok(())
}

fn run_continuous(
    shared: Arc<Shared>,
    session: Arc<DeviceSession>,
    config: MeasurementConfig,
    stop_rx: Receiver<()>,
) {
    let labels = session_labels(&session);
    let poll = config.poll_interval();
    let backoff = config.error_backoff();
    info!(device = %labels.device, interval_ms = config.poll_interval_ms, "acquisition started");
    shared.emit(PipelineEvent::Started);

    let mut wait = Duration::ZERO;
    let terminated = loop {
        match stop_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break None,
        }
        let started = Instant::now();
        match session.read_telemetry() {
            Ok(telemetry) => {
                shared.record(&telemetry, &config, &labels);
                wait = poll.saturating_sub(started.elapsed());
            }
            Err(e) if e.is_terminal() => break Some(e),
            Err(e) => {
                shared.sample_failed(&labels, &e);
                wait = backoff;
            }
        }
    };

    let event = match terminated {
        None => {
            if session.is_open() {
                if let Err(e) = session.command_ok(&Command::StopMeasurement) {
                    debug!("stop measurement failed: {}", e);
                }
            }
            info!(device = %labels.device, "acquisition stopped");
            PipelineEvent::Stopped
        }
        Some(e) => {
            warn!(device = %labels.device, "acquisition terminated: {}", e);
            PipelineEvent::Terminated(e.to_string())
        }
    };
    shared.running.store(false, Ordering::Release);
    shared.emit(event);
    shared.publish_status();
}
