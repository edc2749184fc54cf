//! Metric catalogue for the EMFAD device link.
//!
//! Session and pipeline code record through the re-exported `metrics`
//! facade using the names declared in [`metric_defs`], so a dashboard can be
//! built from this one file. Nothing is exported unless a recorder is
//! installed; with the `prometheus` feature [`install_prometheus_exporter`]
//! installs one.
//!
//! ```rust
//! use emfad_metrics::{metric_defs, metrics, MetricLabels};
//!
//! let labels = MetricLabels::new("EMFAD-UG12", "ble");
//! metrics::counter!(metric_defs::COMMANDS_SENT.name, &labels.with(&[("command", "read_data".to_string())]))
//!     .increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// Recorder primitive backing a [`Metric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// Name, primitive, unit and label keys of one metric.
///
/// ```rust
/// use emfad_metrics::{Metric, MetricKind};
/// use emfad_metrics::metrics::Unit;
///
/// const READS: Metric = Metric::counter("emfad.test.reads", Unit::Count, "Reads issued")
///     .labelled(&["device"]);
///
/// assert_eq!(READS.kind, MetricKind::Counter);
/// assert_eq!(READS.labels, &["device"]);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Dotted name, e.g. `emfad.session.commands_sent`.
    pub name: &'static str,
    pub kind: MetricKind,
    pub unit: Unit,
    /// Help text shown by exporters.
    pub description: &'static str,
    /// Label keys every sample carries.
    pub labels: &'static [&'static str],
}

impl Metric {
    pub const fn counter(name: &'static str, unit: Unit, description: &'static str) -> Self {
        Self::declare(name, MetricKind::Counter, unit, description)
    }

    pub const fn gauge(name: &'static str, unit: Unit, description: &'static str) -> Self {
        Self::declare(name, MetricKind::Gauge, unit, description)
    }

    pub const fn histogram(name: &'static str, unit: Unit, description: &'static str) -> Self {
        Self::declare(name, MetricKind::Histogram, unit, description)
    }

    const fn declare(
        name: &'static str,
        kind: MetricKind,
        unit: Unit,
        description: &'static str,
    ) -> Self {
        Metric {
            name,
            kind,
            unit,
            description,
            labels: &[],
        }
    }

    /// Attach the label keys.
    pub const fn labelled(self, labels: &'static [&'static str]) -> Self {
        Metric { labels, ..self }
    }

    /// Hand name, unit and help text to the installed recorder.
    pub fn describe(&self) {
        let (name, unit, help) = (self.name, self.unit, self.description);
        match self.kind {
            MetricKind::Counter => describe_counter!(name, unit, help),
            MetricKind::Gauge => describe_gauge!(name, unit, help),
            MetricKind::Histogram => describe_histogram!(name, unit, help),
        }
    }
}

/// Every metric the workspace emits.
pub mod metric_defs {
    use super::{Metric, Unit};

    const DEVICE: &[&str] = &["device", "transport"];
    const PER_COMMAND: &[&str] = &["device", "transport", "command"];

    pub const COMMANDS_SENT: Metric = Metric::counter(
        "emfad.session.commands_sent",
        Unit::Count,
        "Commands written to the instrument",
    )
    .labelled(PER_COMMAND);

    /// Transport error, undecodable reply or timeout.
    pub const COMMAND_FAILURES: Metric = Metric::counter(
        "emfad.session.command_failures",
        Unit::Count,
        "Commands that did not produce a valid reply",
    )
    .labelled(PER_COMMAND);

    /// Write to decoded reply.
    pub const COMMAND_LATENCY: Metric = Metric::histogram(
        "emfad.session.command_latency_ms",
        Unit::Milliseconds,
        "Command round-trip time in milliseconds",
    )
    .labelled(PER_COMMAND);

    pub const FRAMES_REJECTED: Metric = Metric::counter(
        "emfad.codec.frames_rejected",
        Unit::Count,
        "Received frames that failed validation",
    )
    .labelled(DEVICE);

    /// Carries a `reason` label next to the device labels.
    pub const SESSION_CLOSURES: Metric =
        Metric::counter("emfad.session.closures", Unit::Count, "Sessions closed")
            .labelled(&["device", "transport", "reason"]);

    pub const SAMPLES_RECORDED: Metric = Metric::counter(
        "emfad.pipeline.samples_recorded",
        Unit::Count,
        "Measurement records produced",
    )
    .labelled(DEVICE);

    pub const SAMPLE_FAILURES: Metric = Metric::counter(
        "emfad.pipeline.sample_failures",
        Unit::Count,
        "Samples that could not be read",
    )
    .labelled(DEVICE);

    /// Unlabelled; one pipeline per process.
    pub const HISTORY_SIZE: Metric = Metric::gauge(
        "emfad.pipeline.history_size",
        Unit::Count,
        "Measurement records held in history",
    );

    pub const ALL: [&Metric; 8] = [
        &COMMANDS_SENT,
        &COMMAND_FAILURES,
        &COMMAND_LATENCY,
        &FRAMES_REJECTED,
        &SESSION_CLOSURES,
        &SAMPLES_RECORDED,
        &SAMPLE_FAILURES,
        &HISTORY_SIZE,
    ];
}

/// `device` and `transport` label values of one session.
#[derive(Debug, Clone)]
pub struct MetricLabels {
    pub device: String,
    /// `usb` or `ble`.
    pub transport: String,
}

impl MetricLabels {
    pub fn new(device: impl Into<String>, transport: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            transport: transport.into(),
        }
    }

    /// Label pairs for a `metrics` macro.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        self.with(&[])
    }

    /// Device labels followed by `extra`.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        [
            ("device", self.device.clone()),
            ("transport", self.transport.clone()),
        ]
        .into_iter()
        .chain(extra.iter().cloned())
        .collect()
    }
}

/// Register help text for every metric. Call after installing a recorder.
pub fn describe_metrics() {
    metric_defs::ALL.iter().for_each(|m| m.describe());
}

/// Install a Prometheus recorder serving `/metrics` on `addr`.
///
/// The exporter runs on its own background runtime. Call
/// [`describe_metrics`] afterwards.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_exporter(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
}
