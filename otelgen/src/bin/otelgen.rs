use std::{
    fmt::{self, Display},
    io::Read,
    net::SocketAddr,
};

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use otelgen::{
    config::{self, File, RawConfig},
    driver::Report,
    metrics::{self, Generator, counter, histogram, up_down_counter},
};
use tokio::{runtime::Builder, signal, time::Duration};
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Metric generation failed: {0}")]
    Metrics(#[from] metrics::Error),
    #[error("Invalid configuration: {0}")]
    Config(#[from] config::Error),
    #[error("Failed to deserialize otelgen config: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("Parsing Prometheus address failed: {0}")]
    PrometheusAddr(#[from] std::net::AddrParseError),
    #[error("Failed to install Prometheus exporter: {0}")]
    Prometheus(#[from] BuildError),
}

fn default_config_path() -> String {
    "/etc/otelgen/otelgen.yaml".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(level)
    }
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// log level used when RUST_LOG is not set
    #[clap(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
    /// address to bind the prometheus exporter for otelgen's own metrics
    #[clap(long, global = true)]
    prometheus_addr: Option<String>,
    /// the maximum time to wait, in seconds, for controlled shutdown
    #[clap(long, global = true, default_value_t = 30)]
    max_shutdown_delay: u16,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate synthetic metrics
    Metrics(Box<MetricsCommand>),
    /// Run every generator in a configuration file concurrently
    Run(RunCommand),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckCommand),
}

#[derive(Args)]
struct MetricsCommand {
    #[command(flatten)]
    otel: OtelArgs,
    #[command(subcommand)]
    kind: MetricsKind,
}

#[derive(Subcommand)]
enum MetricsKind {
    /// Add different labels ("hits" and "misses") to a counter
    #[command(visible_alias = "cwl")]
    CounterWithLabels(CounterArgs),
    /// Measure a distribution of values
    #[command(visible_alias = "hist")]
    Histogram(HistogramArgs),
    /// Record a value that rises and falls
    #[command(visible_alias = "udc")]
    UpDownCounter(UpDownCounterArgs),
    /// Deprecated, use up-down-counter
    #[command(hide = true)]
    Counter(UpDownCounterArgs),
}

// Shared arguments of every metrics kind
#[derive(Args)]
#[clap(group(
     ArgGroup::new("run-duration")
           .required(false)
           .args(&["duration", "duration_infinite"]),
))]
struct OtelArgs {
    /// the OTLP endpoint to export to
    #[clap(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otel_exporter_otlp_endpoint: Option<String>,
    /// the OTLP transport, grpc or http
    #[clap(long, default_value = "grpc")]
    protocol: String,
    /// disable TLS towards the endpoint
    #[clap(long)]
    insecure: bool,
    /// the service.name resource attribute, also the metric name prefix
    #[clap(long, env = "OTEL_SERVICE_NAME", default_value = "otelgen")]
    service_name: String,
    /// the time, in seconds, between ticks and between exports
    #[clap(long, default_value_t = 1.0)]
    rate: f64,
    /// the time, in seconds, to generate for
    #[clap(long, default_value_t = 60.0)]
    duration: f64,
    /// flag to generate until interrupted
    #[clap(long)]
    duration_infinite: bool,
    /// the seed for random operations, drawn from the OS when absent
    #[clap(long)]
    seed: Option<u64>,
    /// do not require the endpoint to accept a connection before generating
    #[clap(long)]
    lazy_connect: bool,
    /// the time, in seconds, to wait for the endpoint to accept a connection
    #[clap(long, default_value_t = 5)]
    connect_timeout: u64,
}

impl OtelArgs {
    fn to_raw(&self) -> RawConfig {
        RawConfig {
            endpoint: self.otel_exporter_otlp_endpoint.clone(),
            protocol: self.protocol.clone(),
            insecure: self.insecure,
            service_name: self.service_name.clone(),
            rate_seconds: self.rate,
            duration_seconds: (!self.duration_infinite).then_some(self.duration),
            lazy_connect: self.lazy_connect,
            connect_timeout_seconds: self.connect_timeout,
            seed: self.seed,
        }
    }
}

#[derive(Args)]
struct CounterArgs {
    /// export temporality, delta or cumulative
    #[clap(long, default_value = "cumulative")]
    temporality: String,
    /// increments are drawn from 1 to this value inclusive
    #[clap(long, default_value_t = 10)]
    max_increment: u64,
    /// relative weight of the "hits" label, switches to weighted random labels
    #[clap(long)]
    hits_weight: Option<u32>,
    /// relative weight of the "misses" label, switches to weighted random labels
    #[clap(long)]
    misses_weight: Option<u32>,
}

impl CounterArgs {
    fn to_raw(&self) -> counter::RawConfig {
        let label_policy = match (self.hits_weight, self.misses_weight) {
            (None, None) => counter::LabelPolicy::RoundRobin,
            (hits, misses) => counter::LabelPolicy::Weighted {
                hits: hits.unwrap_or(1),
                misses: misses.unwrap_or(1),
            },
        };
        counter::RawConfig {
            name: None,
            temporality: self.temporality.clone(),
            label_policy,
            max_increment: self.max_increment,
        }
    }
}

#[derive(Args)]
struct HistogramArgs {
    /// export temporality, delta or cumulative
    #[clap(long, default_value = "cumulative")]
    temporality: String,
    /// unit of the recorded samples
    #[clap(long, default_value = "ms")]
    unit: String,
    /// attributes to add to the histogram, format KEY=VALUE, repeatable
    #[clap(long = "attribute")]
    attributes: Vec<String>,
    /// explicit bucket bounds, comma separated
    #[clap(
        long,
        value_delimiter = ',',
        default_value = "1,5,10,25,50,100,250,500,1000"
    )]
    bounds: Vec<f64>,
    /// record min and max values
    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    record_minmax: bool,
}

impl HistogramArgs {
    fn to_raw(&self) -> histogram::RawConfig {
        histogram::RawConfig {
            unit: self.unit.clone(),
            attributes: self.attributes.clone(),
            temporality: self.temporality.clone(),
            bounds: self.bounds.clone(),
            record_min_max: self.record_minmax,
            ..histogram::RawConfig::default()
        }
    }
}

#[derive(Args)]
struct UpDownCounterArgs {
    /// export temporality, delta or cumulative; the SDK exports up/down
    /// counters as running totals under either choice
    #[clap(long, default_value = "delta")]
    temporality: String,
    /// alternate +N and -N instead of drawing random deltas
    #[clap(long)]
    alternate: Option<u32>,
    /// largest random delta magnitude
    #[clap(long, default_value_t = 5)]
    max_magnitude: u32,
}

impl UpDownCounterArgs {
    fn to_raw(&self) -> up_down_counter::RawConfig {
        let policy = match self.alternate {
            Some(magnitude) => up_down_counter::DeltaPolicy::Alternating { magnitude },
            None => up_down_counter::DeltaPolicy::Random {
                max_magnitude: self.max_magnitude,
            },
        };
        up_down_counter::RawConfig {
            name: None,
            temporality: self.temporality.clone(),
            policy,
        }
    }
}

#[derive(Args)]
struct RunCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

fn load_config_contents(config_path: &str) -> Result<String, Error> {
    debug!("Attempting to open configuration file at: {config_path}");
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(config_path)
        .map_err(|err| {
            error!("Could not read config file '{config_path}': {err}");
            err
        })?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

fn parse_config(contents: &str) -> Result<File, Error> {
    let file: File = serde_yaml::from_str(contents).map_err(|err| {
        error!("Configuration validation failed: {err}");
        Error::SerdeYaml(err)
    })?;
    file.check().map_err(|err| {
        error!("Configuration validation failed: {err}");
        Error::Config(err)
    })?;
    Ok(file)
}

fn validate_config(config_path: &str) -> Result<File, Error> {
    let contents = load_config_contents(config_path)?;
    let file = parse_config(&contents)?;
    info!("Configuration file is valid");
    Ok(file)
}

fn plan(command: Commands) -> Result<File, Error> {
    match command {
        Commands::Metrics(cmd) => {
            let generator = match &cmd.kind {
                MetricsKind::CounterWithLabels(args) => Generator::CounterWithLabels(args.to_raw()),
                MetricsKind::Histogram(args) => Generator::Histogram(args.to_raw()),
                MetricsKind::UpDownCounter(args) => Generator::UpDownCounter(args.to_raw()),
                MetricsKind::Counter(args) => {
                    warn!("The 'counter' command is deprecated, use 'up-down-counter' instead");
                    Generator::UpDownCounter(args.to_raw())
                }
            };
            Ok(File {
                run: cmd.otel.to_raw(),
                generator: vec![generator],
            })
        }
        Commands::Run(cmd) => validate_config(&cmd.config_path),
        Commands::ConfigCheck(cmd) => validate_config(&cmd.config_path),
    }
}

fn install_prometheus(addr: &str) -> Result<(), Error> {
    let addr: SocketAddr = addr.parse()?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!("serving otelgen metrics on {addr}");
    Ok(())
}

async fn inner_main(file: File, prometheus_addr: Option<String>) -> Result<(), Error> {
    if let Some(addr) = prometheus_addr {
        install_prometheus(&addr)?;
    }

    let (shutdown_watcher, shutdown_broadcast) = otelgen_signal::signal();

    let mut runs = tokio::task::JoinSet::new();
    for (id, generator) in file.generator.into_iter().enumerate() {
        let raw = file.run.clone();
        let watcher = shutdown_watcher.clone();
        let span = info_span!("generator", id, kind = generator.kind().as_str());
        runs.spawn(async move { generator.run(&raw, watcher).await }.instrument(span));
    }
    // A watcher left alive here would hold `signal_and_wait` open forever.
    drop(shutdown_watcher);

    let mut res = Ok(());
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received ctrl-c");
                break;
            },
            joined = runs.join_next() => {
                match joined {
                    None => break,
                    Some(Ok(Ok(report))) => log_report(&report),
                    Some(Ok(Err(err))) => {
                        error!("Generator shut down unexpectedly: {err}");
                        res = Err(Error::Metrics(err));
                        break;
                    }
                    Some(Err(err)) => error!("Could not join the spawned generator task: {err}"),
                }
            },
        }
    }
    shutdown_broadcast.signal_and_wait().await;
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok(Ok(report)) => log_report(&report),
            Ok(Err(err)) => error!("Generator shut down unexpectedly: {err}"),
            Err(err) => error!("Could not join the spawned generator task: {err}"),
        }
    }
    res
}

fn log_report(report: &Report) {
    if report.cancelled {
        info!("generator cancelled after {ticks} ticks", ticks = report.ticks);
    } else {
        info!("generator completed {ticks} ticks", ticks = report.ticks);
    }
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting otelgen {version} run.");

    if let Commands::ConfigCheck(cmd) = &cli.command {
        return validate_config(&cmd.config_path).map(drop);
    }
    let max_shutdown_delay = Duration::from_secs(cli.max_shutdown_delay.into());
    let file = plan(cli.command)?;

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(file, cli.prometheus_addr));
    info!(
        "Shutting down runtime with a {} second delay. May leave orphaned tasks.",
        max_shutdown_delay.as_secs(),
    );
    runtime.shutdown_timeout(max_shutdown_delay);
    info!("Bye. :)");
    res
}
