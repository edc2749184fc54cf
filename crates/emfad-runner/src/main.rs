//! `emfad` command-line tool.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use emfad_runner::{analyze_sweep, App, OutputFormat, Reporter, RunnerConfig, SweepInput};
use emfad_transport::TransportKind;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "emfad", version, about = "Talk to EMFAD electromagnetic field instruments")]
struct Cli {
    /// YAML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use the built-in simulated instrument.
    #[arg(long, global = true)]
    simulate: bool,

    /// Preferred link when several instruments are found.
    #[arg(long, global = true, value_enum)]
    transport: Option<Link>,

    /// Output encoding.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Serve Prometheus metrics on this address.
    #[cfg(feature = "prometheus")]
    #[arg(long, global = true)]
    metrics_addr: Option<std::net::SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List reachable instruments.
    Scan,
    /// Connect and print the instrument status.
    Status,
    /// Take single measurements.
    Step {
        /// Number of measurements.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Measure continuously until the duration elapses or Ctrl-C.
    Measure {
        /// Run time in seconds.
        #[arg(short, long)]
        duration: Option<f64>,
    },
    /// Analyze a sweep file of `frequency,sample` lines.
    Spectrum {
        /// Sweep file.
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Link {
    Usb,
    Ble,
}

impl From<Link> for TransportKind {
    fn from(link: Link) -> Self {
        match link {
            Link::Usb => TransportKind::Usb,
            Link::Ble => TransportKind::Ble,
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    #[cfg(feature = "prometheus")]
    if let Some(addr) = cli.metrics_addr {
        emfad_metrics::install_prometheus_exporter(addr)
            .context("starting Prometheus exporter")?;
        tracing::info!("serving metrics on {}", addr);
    }
    emfad_metrics::describe_metrics();

    let mut config = match &cli.config {
        Some(path) => RunnerConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RunnerConfig::default(),
    };
    if let Some(link) = cli.transport {
        config.transport = Some(link.into());
    }

    let stdout = io::stdout();
    let mut out = Reporter::new(stdout.lock(), cli.format);

    let app = App::new(config, cli.simulate);
    match cli.command {
        Command::Scan => {
            app.scan(&mut out)?;
        }
        Command::Status => {
            app.status(&mut out)?;
        }
        Command::Step { count } => {
            app.step(count, &mut out)?;
        }
        Command::Measure { duration } => {
            let duration = duration
                .map(Duration::try_from_secs_f64)
                .transpose()
                .context("invalid --duration")?;
            let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
            ctrlc::set_handler(move || {
                let _ = stop_tx.try_send(());
            })
            .context("installing Ctrl-C handler")?;
            app.measure(duration, &stop_rx, &mut out)?;
        }
        Command::Spectrum { input } => {
            let sweep = SweepInput::load(&input)
                .with_context(|| format!("reading sweep from {}", input.display()))?;
            let report = analyze_sweep(&sweep).context("analyzing sweep")?;
            out.spectrum(&report)?;
        }
    }
    Ok(())
}
