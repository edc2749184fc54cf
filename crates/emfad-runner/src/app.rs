//! Subcommand implementations.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use crossbeam_channel::{after, never, select, Receiver};
use emfad_device::{CandidateDevice, DeviceManager, DeviceProvider};
use emfad_measure::{MeasureError, MeasurementPipeline, PipelineEvent};
use emfad_sim::{SimDevice, SimProvider};
use emfad_spectrum::{analyze, analyze_material, find_peaks, SpectrumError};
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::input::SweepInput;
use crate::output::{Reporter, RunSummary, SpectrumReport, StatusReport};

/// Device manager plus the settings every subcommand runs with.
pub struct App {
    config: RunnerConfig,
    manager: DeviceManager,
    simulator: Option<Arc<SimDevice>>,
}

/// Disconnects when the subcommand finishes, however it finishes.
struct Link<'a> {
    manager: &'a DeviceManager,
    device: CandidateDevice,
}

impl Drop for Link<'_> {
    fn drop(&mut self) {
        self.manager.disconnect();
        debug!("disconnected from {}", self.device.name);
    }
}

impl App {
    /// Build the manager. With `simulate` a simulated instrument is reachable
    /// over both USB and BLE; otherwise no backends are registered.
    pub fn new(config: RunnerConfig, simulate: bool) -> Self {
        let mut providers: Vec<Box<dyn DeviceProvider>> = Vec::new();
        let simulator = simulate.then(|| {
            let device = SimDevice::new(config.simulator.clone());
            providers.push(Box::new(SimProvider::usb(
                device.clone(),
                config.identifiers.clone(),
            )));
            providers.push(Box::new(SimProvider::ble(
                device.clone(),
                config.identifiers.clone(),
            )));
            device
        });
        let manager = DeviceManager::new(
            providers,
            config.identifiers.clone(),
            config.session_config(),
        );
        Self {
            config,
            manager,
            simulator,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The device manager.
    pub fn manager(&self) -> &DeviceManager {
        &self.manager
    }

    /// The simulated instrument, in `--simulate` mode.
    pub fn simulator(&self) -> Option<&Arc<SimDevice>> {
        self.simulator.as_ref()
    }

    /// List matching instruments. Returns how many were found.
    pub fn scan<W: Write>(&self, out: &mut Reporter<W>) -> anyhow::Result<usize> {
        let found = self.manager.scan();
        if found.is_empty() {
            warn!("{}", self.nothing_found());
        }
        for device in &found {
            out.device(device)?;
        }
        Ok(found.len())
    }

    /// Connect and report the instrument's status.
    pub fn status<W: Write>(&self, out: &mut Reporter<W>) -> anyhow::Result<StatusReport> {
        let link = self.connect()?;
        let status = self
            .manager
            .refresh_status()
            .context("reading instrument status")?;
        let report = StatusReport {
            device: link.device.name.clone(),
            transport: link.device.kind,
            quality: self.manager.connection_quality(),
            firmware: status.firmware_string(),
            status,
        };
        out.status(&report)?;
        Ok(report)
    }

    /// Take `count` single measurements.
    ///
    /// Failed samples are reported and skipped; a lost session ends the
    /// sequence with an error.
    pub fn step<W: Write>(&self, count: u32, out: &mut Reporter<W>) -> anyhow::Result<RunSummary> {
        let _link = self.connect()?;
        let pipeline =
            MeasurementPipeline::new(self.manager.clone(), self.config.measurement.clone());
        let mut recorded = 0;
        let mut failed = 0;
        for _ in 0..count {
            match pipeline.perform_step() {
                Ok(record) => {
                    recorded += 1;
                    out.record(&record)?;
                }
                Err(MeasureError::Session(e)) if !e.is_terminal() => {
                    failed += 1;
                    out.sample_failed(&e.to_string())?;
                }
                Err(e) => return Err(e).context("measurement step failed"),
            }
        }
        let summary = RunSummary {
            recorded,
            failed,
            anomaly_depth: pipeline.anomaly_depth(),
            ended: None,
        };
        out.summary(&summary)?;
        Ok(summary)
    }

    /// Measure continuously until `duration` elapses, `stop` fires or the
    /// session is lost.
    pub fn measure<W: Write>(
        &self,
        duration: Option<Duration>,
        stop: &Receiver<()>,
        out: &mut Reporter<W>,
    ) -> anyhow::Result<RunSummary> {
        let _link = self.connect()?;
        let pipeline =
            MeasurementPipeline::new(self.manager.clone(), self.config.measurement.clone());
        let events = pipeline.subscribe();
        pipeline.start().context("starting acquisition")?;

        let timer = duration.map(after).unwrap_or_else(never);
        let idle_stop = never::<()>();
        let idle_timer = never::<Instant>();
        let mut stopping = false;
        let ended = loop {
            let (stop_rx, timer_rx) = if stopping {
                (&idle_stop, &idle_timer)
            } else {
                (stop, &timer)
            };
            select! {
                recv(events) -> event => match event {
                    Ok(PipelineEvent::Started) => debug!("acquisition started"),
                    Ok(PipelineEvent::Record(record)) => out.record(&record)?,
                    Ok(PipelineEvent::SampleFailed(reason)) => out.sample_failed(&reason)?,
                    Ok(PipelineEvent::Stopped) => break "stopped".to_string(),
                    Ok(PipelineEvent::Terminated(reason)) => break format!("terminated: {}", reason),
                    Err(_) => break "event stream closed".to_string(),
                },
                recv(stop_rx) -> _ => {
                    info!("interrupted, stopping acquisition");
                    stopping = true;
                    pipeline.stop();
                },
                recv(timer_rx) -> _ => {
                    info!("measurement duration elapsed");
                    stopping = true;
                    pipeline.stop();
                },
            }
        };

        let status = pipeline.status();
        let summary = RunSummary {
            recorded: status.recorded,
            failed: status.failed,
            anomaly_depth: pipeline.anomaly_depth(),
            ended: Some(ended),
        };
        out.summary(&summary)?;
        Ok(summary)
    }

    fn connect(&self) -> anyhow::Result<Link<'_>> {
        let found = self.manager.scan();
        let candidate = match self.config.transport {
            Some(kind) => found.into_iter().find(|d| d.kind == kind),
            None => found.into_iter().next(),
        };
        let Some(device) = candidate else {
            bail!("{}", self.nothing_found());
        };
        self.manager
            .connect(&device)
            .with_context(|| format!("connecting to {} over {}", device.name, device.kind))?;
        info!("connected to {} over {}", device.name, device.kind);
        Ok(Link {
            manager: &self.manager,
            device,
        })
    }

    fn nothing_found(&self) -> String {
        let mut message = match self.config.transport {
            Some(kind) => format!("no EMFAD instrument found over {}", kind),
            None => "no EMFAD instrument found".to_string(),
        };
        if self.simulator.is_none() {
            message.push_str("; this build has no hardware backends, run with --simulate");
        }
        message
    }
}

/// Window and analyze a sweep, locate its peaks and guess the material.
///
/// Peaks are located on the raw samples; power and material on the
/// windowed spectrum.
pub fn analyze_sweep(input: &SweepInput) -> Result<SpectrumReport, SpectrumError> {
    let spectrum = analyze(&input.samples, &input.frequencies)?;
    let peaks = find_peaks(&input.samples, &input.frequencies)?;
    let material = analyze_material(&spectrum, &input.samples);
    Ok(SpectrumReport {
        points: spectrum.len(),
        peak_frequency: spectrum.peak_frequency(),
        peak_amplitude: spectrum.peak_amplitude(),
        total_power: spectrum.total_power(),
        peaks,
        material,
    })
}
