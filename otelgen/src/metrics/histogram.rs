//! Histogram simulator.
//!
//! Each tick draws one synthetic latency and records it with the configured
//! attribute set. Samples are drawn across the whole configured range, with
//! some headroom past the last bound so the overflow bucket sees data too.

use opentelemetry::{
    KeyValue,
    metrics::{Histogram as OtelHistogram, Meter},
};
use rand::{Rng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::Simulator;
use crate::{
    config::{self, Attributes, BucketBounds, Temporality},
    driver::Tick,
};

fn default_description() -> String {
    "Histogram demonstrates how to measure a distribution of values".to_string()
}

fn default_unit() -> String {
    "ms".to_string()
}

fn default_temporality() -> String {
    "cumulative".to_string()
}

fn default_bounds() -> Vec<f64> {
    vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]
}

fn default_record_min_max() -> bool {
    true
}

/// Histogram options as supplied by the user.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// Instrument name. Defaults to `<service>.metrics.histogram`.
    #[serde(default)]
    pub name: Option<String>,
    /// Instrument description
    #[serde(default = "default_description")]
    pub description: String,
    /// Unit string of recorded samples
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Attributes recorded with every sample, as `key=value`
    #[serde(default)]
    pub attributes: Vec<String>,
    /// `delta` or `cumulative`
    #[serde(default = "default_temporality")]
    pub temporality: String,
    /// Explicit bucket bounds, strictly ascending
    #[serde(default = "default_bounds")]
    pub bounds: Vec<f64>,
    /// Track min and max alongside bucket counts
    #[serde(default = "default_record_min_max")]
    pub record_min_max: bool,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            name: None,
            description: default_description(),
            unit: default_unit(),
            attributes: Vec::new(),
            temporality: default_temporality(),
            bounds: default_bounds(),
            record_min_max: default_record_min_max(),
        }
    }
}

/// Validated histogram options.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Instrument name
    pub name: String,
    /// Instrument description
    pub description: String,
    /// Unit string
    pub unit: String,
    /// Attributes recorded with every sample
    pub attributes: Attributes,
    /// Export temporality
    pub temporality: Temporality,
    /// Bucket bounds
    pub bounds: BucketBounds,
    /// Track min and max
    pub record_min_max: bool,
}

impl Config {
    /// Validate `raw`, naming the instrument after `service_name` unless a
    /// name is given.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed attributes, an unknown temporality or
    /// invalid bucket bounds.
    pub fn resolve(raw: &RawConfig, service_name: &str) -> Result<Self, config::Error> {
        Ok(Self {
            name: raw
                .name
                .clone()
                .unwrap_or_else(|| format!("{service_name}.metrics.histogram")),
            description: raw.description.clone(),
            unit: raw.unit.clone(),
            attributes: Attributes::parse(&raw.attributes)?,
            temporality: Temporality::parse(&raw.temporality)?,
            bounds: BucketBounds::new(raw.bounds.clone())?,
            record_min_max: raw.record_min_max,
        })
    }
}

/// What has been recorded so far, bucketed the way the exporter buckets it.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    /// Per-bucket counts, the last being the overflow bucket
    pub counts: Vec<u64>,
    /// Total observations
    pub count: u64,
    /// Sum of all samples
    pub sum: f64,
    /// Smallest sample, when min/max are tracked
    pub min: Option<f64>,
    /// Largest sample, when min/max are tracked
    pub max: Option<f64>,
}

impl Distribution {
    fn new(buckets: usize) -> Self {
        Self {
            counts: vec![0; buckets],
            count: 0,
            sum: 0.0,
            min: None,
            max: None,
        }
    }
}

/// Records one pseudo-random sample per tick.
#[derive(Debug)]
pub struct Histogram {
    histogram: OtelHistogram<f64>,
    attributes: Vec<KeyValue>,
    config: Config,
    rng: SmallRng,
    low: f64,
    high: f64,
    distribution: Distribution,
}

impl Histogram {
    /// Create the histogram instrument on `meter`.
    #[must_use]
    pub fn new(meter: &Meter, config: Config, rng: SmallRng) -> Self {
        let histogram = meter
            .f64_histogram(config.name.clone())
            .with_description(config.description.clone())
            .with_unit(config.unit.clone())
            .with_boundaries(config.bounds.as_slice().to_vec())
            .build();
        let low = config.bounds.as_slice()[0].min(0.0);
        let last = config.bounds.last();
        // Halved so that bounds near f64::MAX cannot overflow the headroom.
        let headroom = ((0.5 * last - 0.5 * low) * 0.5).max(0.25);
        let high = (last + headroom).min(f64::MAX);

        Self {
            histogram,
            attributes: config.attributes.to_key_values(),
            distribution: Distribution::new(config.bounds.buckets()),
            config,
            rng,
            low,
            high,
        }
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    fn sample(&mut self) -> f64 {
        if (self.high - self.low).is_finite() {
            self.rng.random_range(self.low..self.high)
        } else {
            // The span itself overflows, interpolate between the ends.
            let t: f64 = self.rng.random();
            (self.low * (1.0 - t) + self.high * t).clamp(self.low, self.high)
        }
    }

    fn tally(&mut self, sample: f64) {
        let bucket = self.config.bounds.bucket_index(sample);
        let dist = &mut self.distribution;
        dist.counts[bucket] += 1;
        dist.count += 1;
        dist.sum += sample;
        if self.config.record_min_max {
            dist.min = Some(dist.min.map_or(sample, |min| min.min(sample)));
            dist.max = Some(dist.max.map_or(sample, |max| max.max(sample)));
        }
    }
}

impl Simulator for Histogram {
    fn observe(&mut self, tick: Tick) {
        let sample = self.sample();
        self.histogram.record(sample, &self.attributes);
        self.tally(sample);
        trace!("tick {seq}: recorded {sample:.3}", seq = tick.seq);
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry_sdk::metrics::{
        InMemoryMetricExporter,
        data::{AggregatedMetrics, MetricData},
    };
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};

    use super::{Config, Histogram, RawConfig};
    use crate::{
        config::{self, Temporality},
        driver::Tick,
        metrics::Simulator,
        provider::{self, HistogramView, Settings, tests::settings},
    };

    #[test]
    fn defaults_resolve() {
        let config = Config::resolve(&RawConfig::default(), "svc").expect("valid config");
        assert_eq!(config.name, "svc.metrics.histogram");
        assert_eq!(config.unit, "ms");
        assert_eq!(config.temporality, Temporality::Cumulative);
        assert_eq!(config.bounds.buckets(), 10);
        assert!(config.record_min_max);
        assert!(config.attributes.is_empty());
    }

    #[test]
    fn malformed_attributes_are_rejected() {
        let raw = RawConfig {
            attributes: vec!["env".to_string()],
            ..RawConfig::default()
        };
        assert_eq!(
            Config::resolve(&raw, "svc"),
            Err(config::Error::MalformedAttribute("env".to_string()))
        );
    }

    #[test]
    fn exported_count_matches_ticks() {
        let raw = RawConfig {
            attributes: vec!["env=test".to_string()],
            ..RawConfig::default()
        };
        let config = Config::resolve(&raw, "svc").expect("valid config");
        let exporter = InMemoryMetricExporter::default();
        let mut lifecycle = provider::new_provider(
            exporter.clone(),
            &Settings {
                histogram: Some(HistogramView {
                    name: config.name.clone(),
                    bounds: config.bounds.clone(),
                    record_min_max: config.record_min_max,
                }),
                ..settings()
            },
        );
        let mut sim = Histogram::new(
            &provider::meter(lifecycle.get(), "svc"),
            config,
            SmallRng::seed_from_u64(3),
        );
        for seq in 0..25 {
            sim.observe(Tick { seq });
        }
        lifecycle.get().force_flush().expect("flush");
        let batches = exporter.get_finished_metrics().expect("finished metrics");
        lifecycle.shutdown().expect("shutdown");

        let mut exported = None;
        for batch in &batches {
            for scope in batch.scope_metrics() {
                for metric in scope.metrics() {
                    if let AggregatedMetrics::F64(MetricData::Histogram(hist)) = metric.data() {
                        assert_eq!(metric.unit(), "ms");
                        let point = hist.data_points().next().expect("one data point");
                        exported = Some((point.count(), point.bucket_counts().collect::<Vec<_>>()));
                    }
                }
            }
        }
        let (count, buckets) = exported.expect("histogram was exported");
        assert_eq!(count, 25);
        assert_eq!(buckets, sim.distribution().counts);
    }

    #[test]
    fn extreme_bounds_still_sample() {
        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().build();
        let raw = RawConfig {
            bounds: vec![-1e308, 1e308],
            ..RawConfig::default()
        };
        let config = Config::resolve(&raw, "svc").expect("finite ascending bounds");
        let mut sim = Histogram::new(
            &provider::meter(&provider, "svc"),
            config,
            SmallRng::seed_from_u64(11),
        );
        for seq in 0..100 {
            sim.observe(Tick { seq });
        }
        let dist = sim.distribution();
        assert_eq!(dist.count, 100);
        let min = dist.min.expect("min tracked");
        let max = dist.max.expect("max tracked");
        assert!(min.is_finite() && min >= -1e308);
        assert!(max.is_finite());
    }

    #[test]
    fn near_maximum_bound_still_samples() {
        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().build();
        let raw = RawConfig {
            bounds: vec![1.0, f64::MAX],
            ..RawConfig::default()
        };
        let config = Config::resolve(&raw, "svc").expect("finite ascending bounds");
        let mut sim = Histogram::new(
            &provider::meter(&provider, "svc"),
            config,
            SmallRng::seed_from_u64(12),
        );
        for seq in 0..100 {
            sim.observe(Tick { seq });
        }
        assert_eq!(sim.distribution().count, 100);
        assert!(sim.distribution().max.expect("max tracked").is_finite());
    }

    proptest! {
        #[test]
        fn every_sample_lands_in_one_bucket(seed: u64, ticks in 0..500_u64) {
            let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().build();
            let config = Config::resolve(&RawConfig::default(), "svc").expect("valid config");
            let mut sim = Histogram::new(
                &provider::meter(&provider, "svc"),
                config,
                SmallRng::seed_from_u64(seed),
            );
            for seq in 0..ticks {
                sim.observe(Tick { seq });
            }
            let dist = sim.distribution();
            prop_assert_eq!(dist.count, ticks);
            prop_assert_eq!(dist.counts.iter().sum::<u64>(), ticks);
            if ticks > 0 {
                let min = dist.min.expect("min tracked");
                let max = dist.max.expect("max tracked");
                prop_assert!(min >= 0.0);
                prop_assert!(max < 1_250.0);
            }
        }
    }
}
