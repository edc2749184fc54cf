//! Pipeline runs against a simulated instrument.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use approx::assert_relative_eq;
use crossbeam_channel::{bounded, Receiver, Sender};
use emfad_device::{ConnectionState, DeviceManager, SessionConfig};
use emfad_measure::{
    anomaly_depth, conductivity, depth, Collaborators, GeoPosition, MaterialClassifier,
    MeasureError, MeasurementConfig, MeasurementPipeline, MeasurementRecord, PipelineEvent,
    PipelineStatus, PositionSource, SinkError, StateSink, StorageSink,
};
use emfad_protocol::{
    Frequency, Mode, ResponseCode, CMD_CONNECT, CMD_READ_DATA, CMD_SET_FREQUENCY, CMD_SET_GAIN,
    CMD_SET_MODE, CMD_SET_OFFSET, CMD_START_MEASUREMENT, CMD_STOP_MEASUREMENT,
};
use emfad_sim::{SimConfig, SimDevice, SimProvider};
use emfad_spectrum::MaterialType;
use emfad_transport::DeviceIdentifiers;
use parking_lot::Mutex;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn connected(config: SimConfig) -> (Arc<SimDevice>, DeviceManager) {
    let device = SimDevice::new(config);
    let manager = DeviceManager::new(
        vec![Box::new(SimProvider::usb(
            device.clone(),
            DeviceIdentifiers::default(),
        ))],
        DeviceIdentifiers::default(),
        SessionConfig::default().with_command_timeout(Duration::from_millis(500)),
    );
    let candidate = manager.scan().remove(0);
    manager.connect(&candidate).expect("sim should connect");
    (device, manager)
}

fn quiet() -> SimConfig {
    SimConfig {
        noise: 0.0,
        ..Default::default()
    }
}

fn fast_config() -> MeasurementConfig {
    MeasurementConfig {
        poll_interval_ms: 10,
        error_backoff_ms: 30,
        ..Default::default()
    }
}

fn next_event(events: &Receiver<PipelineEvent>) -> PipelineEvent {
    events
        .recv_timeout(EVENT_TIMEOUT)
        .expect("pipeline event should arrive")
}

/// Receive until `pred` matches, returning everything seen.
fn events_until(
    events: &Receiver<PipelineEvent>,
    pred: impl Fn(&PipelineEvent) -> bool,
) -> Vec<PipelineEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events);
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

// ============================================================================
// Single step
// ============================================================================

#[test]
fn test_step_produces_record() {
    let (device, manager) = connected(quiet());
    let pipeline = MeasurementPipeline::new(manager, fast_config());

    let record = pipeline.perform_step().expect("step should succeed");
    assert_relative_eq!(record.signal_strength, 250.0);
    assert_relative_eq!(record.depth, depth(250.0));
    assert_relative_eq!(record.conductivity, conductivity(250.0, 19_000.0, Mode::A));
    assert_relative_eq!(record.temperature, 23.5);
    assert_eq!(record.frequency, Frequency::F19k);
    assert_eq!(record.metadata.get("gain"), Some(&1.0));
    assert_eq!(record.metadata.get("filter_level"), Some(&3.0));
    assert_relative_eq!(record.phase().unwrap_or_default(), 45.0);
    assert!(record.position.is_none());

    assert_eq!(
        device.received_commands(),
        vec![
            CMD_CONNECT,
            CMD_SET_FREQUENCY,
            CMD_SET_MODE,
            CMD_SET_GAIN,
            CMD_SET_OFFSET,
            CMD_READ_DATA
        ]
    );
    assert_eq!(pipeline.latest(), Some(record));
    assert_eq!(pipeline.history().len(), 1);
}

#[test]
fn test_step_applies_configuration() {
    let (device, manager) = connected(quiet());
    let pipeline = MeasurementPipeline::new(manager, fast_config());
    pipeline
        .set_config(MeasurementConfig {
            frequency: Frequency::F76k,
            mode: Mode::B,
            gain: 2.0,
            ..fast_config()
        })
        .unwrap();

    let record = pipeline.perform_step().unwrap();
    assert_eq!(device.with_instrument(|i| i.frequency()), Frequency::F76k);
    assert_eq!(device.with_instrument(|i| i.gain_raw()), 200);
    assert_relative_eq!(record.signal_strength, 500.0);
    assert_relative_eq!(record.conductivity, 500.0 / 76_000.0 * 1000.0 * 0.8, epsilon = 1e-9);
}

#[test]
fn test_step_without_device() {
    let device = SimDevice::new(quiet());
    let manager = DeviceManager::new(
        vec![Box::new(SimProvider::usb(device, DeviceIdentifiers::default()))],
        DeviceIdentifiers::default(),
        SessionConfig::default(),
    );
    let pipeline = MeasurementPipeline::new(manager, fast_config());
    assert!(matches!(
        pipeline.perform_step(),
        Err(MeasureError::NotConnected)
    ));
    assert!(matches!(pipeline.start(), Err(MeasureError::NotConnected)));
}

#[test]
fn test_rejected_step_records_nothing() {
    let (device, manager) = connected(quiet());
    let pipeline = MeasurementPipeline::new(manager, fast_config());
    device.inject(|f| f.fail_reads = 1);

    assert!(matches!(
        pipeline.perform_step(),
        Err(MeasureError::Session(_))
    ));
    assert!(pipeline.history().is_empty());
    assert_eq!(pipeline.status().failed, 1);
}

#[test]
fn test_history_cap_evicts_oldest() {
    let (_device, manager) = connected(quiet());
    let pipeline = MeasurementPipeline::new(
        manager,
        MeasurementConfig {
            history_cap: 3,
            ..fast_config()
        },
    );

    let records: Vec<MeasurementRecord> = (0..5)
        .map(|_| pipeline.perform_step().expect("step"))
        .collect();
    let history = pipeline.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history, records[2..].to_vec());
    assert_eq!(pipeline.status().recorded, 5);

    pipeline.clear_history();
    assert!(pipeline.history().is_empty());
    assert!(pipeline.latest().is_none());
    assert_eq!(pipeline.anomaly_depth(), 0.0);
}

#[test]
fn test_anomaly_depth_over_history() {
    let (_device, manager) = connected(SimConfig {
        noise: 20.0,
        ..Default::default()
    });
    let pipeline = MeasurementPipeline::new(manager, fast_config());
    for _ in 0..4 {
        pipeline.perform_step().unwrap();
    }
    let signals: Vec<f64> = pipeline
        .history()
        .iter()
        .map(|r| r.signal_strength)
        .collect();
    assert_relative_eq!(
        pipeline.anomaly_depth(),
        anomaly_depth(&signals, Frequency::F19k)
    );
}

#[test]
fn test_calibrate() {
    let (device, manager) = connected(SimConfig {
        calibrated: false,
        ..quiet()
    });
    let pipeline = MeasurementPipeline::new(manager, fast_config());

    // Uncalibrated instruments refuse to start
    assert!(matches!(pipeline.start(), Err(MeasureError::Session(_))));
    assert!(!pipeline.is_running());

    assert_eq!(pipeline.calibrate().unwrap(), ResponseCode::Ok);
    assert!(device.received_commands().contains(&emfad_protocol::CMD_CALIBRATE));
    pipeline.start().expect("start after calibration");
    assert!(pipeline.stop());
}

// ============================================================================
// Continuous
// ============================================================================

#[test]
fn test_continuous_run_and_stop() {
    let (device, manager) = connected(quiet());
    let pipeline = MeasurementPipeline::new(manager, fast_config());
    let events = pipeline.subscribe();

    pipeline.start().expect("start");
    assert!(pipeline.is_running());
    assert!(matches!(
        pipeline.start(),
        Err(MeasureError::AlreadyRunning)
    ));
    assert!(matches!(
        pipeline.perform_step(),
        Err(MeasureError::AlreadyRunning)
    ));

    assert_eq!(next_event(&events), PipelineEvent::Started);
    let mut records = 0;
    while records < 3 {
        if let PipelineEvent::Record(_) = next_event(&events) {
            records += 1;
        }
    }

    assert!(pipeline.stop());
    assert!(!pipeline.is_running());
    let tail: Vec<PipelineEvent> = events.try_iter().collect();
    let terminal: Vec<&PipelineEvent> = tail.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal, vec![&PipelineEvent::Stopped]);
    assert_eq!(tail.last(), Some(&PipelineEvent::Stopped));

    let sent = device.received_commands();
    assert_eq!(
        sent.iter().filter(|&&c| c == CMD_START_MEASUREMENT).count(),
        1
    );
    assert_eq!(sent.last(), Some(&CMD_STOP_MEASUREMENT));
    assert!(!device.with_instrument(|i| i.is_measuring()));
    assert!(!pipeline.stop());
}

#[test]
fn test_failed_samples_back_off_and_recover() {
    let (device, manager) = connected(quiet());
    let pipeline = MeasurementPipeline::new(manager, fast_config());
    let events = pipeline.subscribe();
    device.inject(|f| f.fail_reads = 2);

    pipeline.start().unwrap();
    let seen = events_until(&events, |e| matches!(e, PipelineEvent::Record(_)));
    pipeline.stop();

    let failures = seen
        .iter()
        .filter(|e| matches!(e, PipelineEvent::SampleFailed(_)))
        .count();
    assert_eq!(failures, 2);
    assert_eq!(pipeline.status().failed, 2);
}

#[test]
fn test_lost_device_terminates_once() {
    let (device, manager) = connected(quiet());
    let pipeline = MeasurementPipeline::new(manager.clone(), fast_config());
    let events = pipeline.subscribe();

    pipeline.start().unwrap();
    events_until(&events, |e| matches!(e, PipelineEvent::Record(_)));

    device.drop_connection();
    let seen = events_until(&events, PipelineEvent::is_terminal);
    assert!(matches!(seen.last(), Some(PipelineEvent::Terminated(_))));

    // Give a stray second terminal event time to show up
    thread::sleep(Duration::from_millis(200));
    assert!(events.try_iter().all(|e| !e.is_terminal()));
    assert!(!pipeline.is_running());
    assert!(matches!(manager.state(), ConnectionState::Error(_)));

    // The worker already exited; stopping reports no active run
    assert!(!pipeline.stop());
}

#[test]
fn test_disconnect_terminates_run() {
    let (device, manager) = connected(quiet());
    let pipeline = MeasurementPipeline::new(manager.clone(), fast_config());
    let events = pipeline.subscribe();

    pipeline.start().unwrap();
    events_until(&events, |e| matches!(e, PipelineEvent::Record(_)));
    manager.disconnect();

    let seen = events_until(&events, PipelineEvent::is_terminal);
    assert!(matches!(seen.last(), Some(PipelineEvent::Terminated(_))));
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // The run is stopped on the instrument before the link goes away
    let sent = device.received_commands();
    let stop = sent.iter().position(|&c| c == CMD_STOP_MEASUREMENT);
    let bye = sent.iter().position(|&c| c == emfad_protocol::CMD_DISCONNECT);
    assert!(stop.is_some(), "sent: {:02X?}", sent);
    assert!(stop < bye);
    assert_eq!(sent.last(), Some(&emfad_protocol::CMD_DISCONNECT));
    assert!(!device.with_instrument(|i| i.is_measuring()));
}

// ============================================================================
// Collaborators
// ============================================================================

#[derive(Default)]
struct MemoryStorage {
    saved: Mutex<Vec<MeasurementRecord>>,
}

impl StorageSink for MemoryStorage {
    fn save(&self, record: &MeasurementRecord) -> Result<(), SinkError> {
        self.saved.lock().push(record.clone());
        Ok(())
    }
}

struct FailingStorage;

impl StorageSink for FailingStorage {
    fn save(&self, _record: &MeasurementRecord) -> Result<(), SinkError> {
        Err("disk full".into())
    }
}

#[derive(Default)]
struct LastStatus(Mutex<Option<PipelineStatus>>);

impl StateSink for LastStatus {
    fn publish(&self, status: &PipelineStatus) {
        *self.0.lock() = Some(status.clone());
    }
}

struct FixedPosition;

impl PositionSource for FixedPosition {
    fn current(&self) -> Option<GeoPosition> {
        Some(GeoPosition {
            latitude: 47.5,
            longitude: 8.25,
            altitude: None,
        })
    }
}

#[test]
fn test_collaborators_receive_records() {
    let (_device, manager) = connected(quiet());
    let storage = Arc::new(MemoryStorage::default());
    let state = Arc::new(LastStatus::default());
    let pipeline = MeasurementPipeline::with_collaborators(
        manager,
        fast_config(),
        Collaborators::default()
            .with_storage(storage.clone())
            .with_state_sink(state.clone())
            .with_position(Arc::new(FixedPosition)),
    );

    let record = pipeline.perform_step().unwrap();
    assert_eq!(storage.saved.lock().as_slice(), &[record.clone()]);
    assert_eq!(record.position.map(|p| p.latitude), Some(47.5));

    let status = state.0.lock().clone().expect("status published");
    assert_eq!(status.recorded, 1);
    assert_eq!(status.latest, Some(record));
    assert!(!status.running);
}

/// Holds each classification until released.
struct GatedClassifier {
    entered: Sender<usize>,
    release: Receiver<()>,
}

impl MaterialClassifier for GatedClassifier {
    fn classify(&self, records: &[MeasurementRecord]) -> (MaterialType, f64) {
        let _ = self.entered.send(records.len());
        let _ = self.release.recv_timeout(EVENT_TIMEOUT);
        (MaterialType::Crystal, 0.75)
    }
}

#[test]
fn test_history_readable_while_classifying() {
    let (_device, manager) = connected(quiet());
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let pipeline = MeasurementPipeline::with_collaborators(
        manager,
        fast_config(),
        Collaborators::default().with_classifier(Arc::new(GatedClassifier {
            entered: entered_tx,
            release: release_rx,
        })),
    );
    let p = &pipeline;

    thread::scope(|s| {
        let step = s.spawn(|| p.perform_step());
        assert_eq!(entered_rx.recv_timeout(EVENT_TIMEOUT), Ok(1));

        let (len_tx, len_rx) = bounded(1);
        s.spawn(move || {
            let _ = len_tx.send(p.history().len());
        });
        let seen = len_rx.recv_timeout(Duration::from_secs(1));
        release_tx.send(()).unwrap();
        assert_eq!(seen, Ok(0), "history blocked by the classifier");

        let record = step.join().unwrap().expect("step should succeed");
        assert_eq!(record.material, MaterialType::Crystal);
        assert_relative_eq!(record.confidence, 0.75);
    });
    assert_eq!(pipeline.history().len(), 1);
    assert_eq!(pipeline.history()[0].material, MaterialType::Crystal);
}

#[test]
fn test_storage_failure_is_not_fatal() {
    let (_device, manager) = connected(quiet());
    let pipeline = MeasurementPipeline::with_collaborators(
        manager,
        fast_config(),
        Collaborators::default().with_storage(Arc::new(FailingStorage)),
    );
    assert!(pipeline.perform_step().is_ok());
    assert_eq!(pipeline.history().len(), 1);
}

#[test]
fn test_records_serialize() {
    let (_device, manager) = connected(quiet());
    let pipeline = MeasurementPipeline::new(manager, fast_config());
    let record = pipeline.perform_step().unwrap();

    let json = serde_json::to_value(PipelineEvent::Record(record)).unwrap();
    assert_eq!(json["event"], "record");
    // 250 of 1000 reads as a weak response
    assert_eq!(json["data"]["material"], "organic");

    let yaml = serde_yaml::to_string(&pipeline.config()).unwrap();
    let back: MeasurementConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(back, pipeline.config());
}
