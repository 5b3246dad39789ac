//! Metric generation runs
//!
//! A run pushes one instrument kind through its own exporter and provider
//! for as long as the driver keeps ticking. There is one entry point per
//! instrument kind. Each validates its configuration before any exporter or
//! network resource is created, then hands the assembled simulator to the
//! [`Driver`].

use opentelemetry::metrics::Meter;
use otelgen_signal::Watcher;
use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, info, info_span};

use crate::{
    config::{self, Config, RawConfig, Temporality},
    driver::{Driver, Report, Tick},
    exporter,
    provider::{self, HistogramView, Settings},
};

pub mod counter;
pub mod histogram;
pub mod up_down_counter;

pub use histogram::Config as HistogramConfig;

/// Errors produced by the metric entry points.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// See [`crate::config::Error`] for details.
    #[error(transparent)]
    Config(#[from] config::Error),
    /// See [`crate::exporter::Error`] for details.
    #[error(transparent)]
    ExporterInit(#[from] exporter::Error),
    /// See [`otelgen_throttle::Error`] for details.
    #[error(transparent)]
    Cadence(#[from] otelgen_throttle::Error),
}

/// The instrument kind a run generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A monotonic counter split across labels
    CounterWithLabels,
    /// A histogram of synthetic latencies
    Histogram,
    /// A counter that rises and falls
    UpDownCounter,
}

impl Kind {
    /// Stable name used for spans and self-telemetry labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CounterWithLabels => "counter_with_labels",
            Self::Histogram => "histogram",
            Self::UpDownCounter => "up_down_counter",
        }
    }
}

/// One configured generation run, as listed in a configuration file.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Generator {
    /// See [`counter::RawConfig`] for details.
    CounterWithLabels(counter::RawConfig),
    /// See [`histogram::RawConfig`] for details.
    Histogram(histogram::RawConfig),
    /// See [`up_down_counter::RawConfig`] for details.
    UpDownCounter(up_down_counter::RawConfig),
}

impl Generator {
    /// The instrument kind this entry generates.
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Self::CounterWithLabels(_) => Kind::CounterWithLabels,
            Self::Histogram(_) => Kind::Histogram,
            Self::UpDownCounter(_) => Kind::UpDownCounter,
        }
    }

    /// Validate the instrument options.
    ///
    /// # Errors
    ///
    /// Returns the configuration error of the instrument options, if any.
    pub fn check(&self, service_name: &str) -> Result<(), config::Error> {
        match self {
            Self::CounterWithLabels(raw) => counter::Config::resolve(raw, service_name).map(drop),
            Self::Histogram(raw) => HistogramConfig::resolve(raw, service_name).map(drop),
            Self::UpDownCounter(raw) => {
                up_down_counter::Config::resolve(raw, service_name).map(drop)
            }
        }
    }

    /// Run this generator to completion, deferring to the entry point of its
    /// instrument kind.
    ///
    /// # Errors
    ///
    /// See the entry point of each instrument kind.
    pub async fn run(&self, raw: &RawConfig, shutdown: Watcher) -> Result<Report, Error> {
        match self {
            Self::CounterWithLabels(counter) => {
                run_counter_with_labels(raw, counter, shutdown).await
            }
            Self::Histogram(histogram) => run_histogram(raw, histogram, shutdown).await,
            Self::UpDownCounter(up_down) => run_up_down_counter(raw, up_down, shutdown).await,
        }
    }
}

/// Records one instrument's observations, once per tick.
pub trait Simulator {
    /// Generate and record the observation for `tick`.
    fn observe(&mut self, tick: Tick);
}

/// Generate a labelled monotonic counter until the run ends.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the exporter cannot be
/// built. Failures releasing the exporter are carried in the [`Report`].
pub async fn run_counter_with_labels(
    raw: &RawConfig,
    counter: &counter::RawConfig,
    shutdown: Watcher,
) -> Result<Report, Error> {
    let config = Config::resolve(raw)?;
    let counter = counter::Config::resolve(counter, &config.service_name)?;
    let temporality = counter.temporality;

    run(
        Kind::CounterWithLabels,
        &config,
        temporality,
        None,
        shutdown,
        move |meter, rng| counter::CounterWithLabels::new(meter, counter, rng),
    )
    .await
}

/// Generate histogram samples until the run ends.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the exporter cannot be
/// built. Failures releasing the exporter are carried in the [`Report`].
pub async fn run_histogram(
    raw: &RawConfig,
    histogram: &histogram::RawConfig,
    shutdown: Watcher,
) -> Result<Report, Error> {
    let config = Config::resolve(raw)?;
    let histogram = HistogramConfig::resolve(histogram, &config.service_name)?;
    let view = HistogramView {
        name: histogram.name.clone(),
        bounds: histogram.bounds.clone(),
        record_min_max: histogram.record_min_max,
    };
    let temporality = histogram.temporality;

    run(
        Kind::Histogram,
        &config,
        temporality,
        Some(view),
        shutdown,
        move |meter, rng| histogram::Histogram::new(meter, histogram, rng),
    )
    .await
}

/// Generate up/down counter changes until the run ends.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the exporter cannot be
/// built. Failures releasing the exporter are carried in the [`Report`].
pub async fn run_up_down_counter(
    raw: &RawConfig,
    up_down: &up_down_counter::RawConfig,
    shutdown: Watcher,
) -> Result<Report, Error> {
    let config = Config::resolve(raw)?;
    let up_down = up_down_counter::Config::resolve(up_down, &config.service_name)?;
    let temporality = up_down.temporality;

    run(
        Kind::UpDownCounter,
        &config,
        temporality,
        None,
        shutdown,
        move |meter, rng| up_down_counter::UpDownCounter::new(meter, up_down, rng),
    )
    .await
}

async fn run<S, F>(
    kind: Kind,
    config: &Config,
    temporality: Temporality,
    histogram: Option<HistogramView>,
    shutdown: Watcher,
    build: F,
) -> Result<Report, Error>
where
    S: Simulator + Send,
    F: FnOnce(&Meter, SmallRng) -> S + Send,
{
    let span = info_span!("metrics", kind = kind.as_str());
    async move {
        let driver = Driver::new(config, kind)?;
        let exporter = exporter::build(config, temporality).await?;
        let settings = Settings {
            interval: config.rate,
            service_name: config.service_name.clone(),
            histogram,
        };
        let lifecycle = provider::new_provider(exporter, &settings);
        let meter = provider::meter(lifecycle.get(), &config.service_name);
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        let mut simulator = build(&meter, rng);

        info!(
            "generating to {endpoint} over {transport} every {rate:?}",
            endpoint = config.endpoint,
            transport = config.transport,
            rate = config.rate,
        );
        Ok(driver.run(&mut simulator, lifecycle, shutdown).await)
    }
    .instrument(span)
    .await
}
