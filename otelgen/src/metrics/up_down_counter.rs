//! Up/down counter simulator.
//!
//! Each tick adds one signed delta to an `i64` up/down counter. The running
//! value is free to go negative.

use opentelemetry::metrics::{Meter, UpDownCounter as OtelUpDownCounter};
use rand::{Rng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::Simulator;
use crate::{
    config::{self, Temporality},
    driver::Tick,
};

fn default_temporality() -> String {
    "delta".to_string()
}

/// How each tick picks its delta.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum DeltaPolicy {
    /// `+magnitude`, `-magnitude`, `+magnitude`, ...
    Alternating {
        /// Size of every step
        magnitude: u32,
    },
    /// A uniformly drawn magnitude in `1..=max_magnitude` with a random sign.
    Random {
        /// Largest step
        max_magnitude: u32,
    },
    /// Replay the given deltas, cycling when exhausted.
    Sequence {
        /// Deltas in order
        deltas: Vec<i64>,
    },
}

impl Default for DeltaPolicy {
    fn default() -> Self {
        Self::Random { max_magnitude: 5 }
    }
}

/// Up/down counter options as supplied by the user.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// Instrument name. Defaults to `<service>.metrics.up_down_counter`.
    #[serde(default)]
    pub name: Option<String>,
    /// `delta` or `cumulative`
    #[serde(default = "default_temporality")]
    pub temporality: String,
    /// Delta selection policy
    #[serde(default)]
    pub policy: DeltaPolicy,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            name: None,
            temporality: default_temporality(),
            policy: DeltaPolicy::default(),
        }
    }
}

/// Validated up/down counter options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Instrument name
    pub name: String,
    /// Requested export temporality
    pub temporality: Temporality,
    /// Delta selection policy
    pub policy: DeltaPolicy,
}

impl Config {
    /// Validate `raw`, naming the instrument after `service_name` unless a
    /// name is given.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown temporality, a zero magnitude or an
    /// empty delta sequence.
    pub fn resolve(raw: &RawConfig, service_name: &str) -> Result<Self, config::Error> {
        let temporality = Temporality::parse(&raw.temporality)?;
        match &raw.policy {
            DeltaPolicy::Alternating { magnitude: 0 } => {
                return Err(config::Error::ZeroMaximum("magnitude"));
            }
            DeltaPolicy::Random { max_magnitude: 0 } => {
                return Err(config::Error::ZeroMaximum("max_magnitude"));
            }
            DeltaPolicy::Sequence { deltas } if deltas.is_empty() => {
                return Err(config::Error::EmptyDeltas);
            }
            _ => {}
        }
        Ok(Self {
            name: raw
                .name
                .clone()
                .unwrap_or_else(|| format!("{service_name}.metrics.up_down_counter")),
            temporality,
            policy: raw.policy.clone(),
        })
    }
}

/// Adds one signed delta per tick.
#[derive(Debug)]
pub struct UpDownCounter {
    counter: OtelUpDownCounter<i64>,
    config: Config,
    rng: SmallRng,
    value: i64,
}

impl UpDownCounter {
    /// Create the up/down counter instrument on `meter`.
    #[must_use]
    pub fn new(meter: &Meter, config: Config, rng: SmallRng) -> Self {
        let counter = meter
            .i64_up_down_counter(config.name.clone())
            .with_description("Up/down counter demonstrates a value that rises and falls")
            .build();
        Self {
            counter,
            config,
            rng,
            value: 0,
        }
    }

    /// The running value, the sum of every delta recorded.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.value
    }

    fn delta(&mut self, tick: Tick) -> i64 {
        match &self.config.policy {
            DeltaPolicy::Alternating { magnitude } => {
                let magnitude = i64::from(*magnitude);
                if tick.seq % 2 == 0 { magnitude } else { -magnitude }
            }
            DeltaPolicy::Random { max_magnitude } => {
                let magnitude = i64::from(self.rng.random_range(1..=*max_magnitude));
                if self.rng.random_bool(0.5) {
                    magnitude
                } else {
                    -magnitude
                }
            }
            DeltaPolicy::Sequence { deltas } => {
                let len = deltas.len() as u64;
                #[allow(clippy::cast_possible_truncation)]
                let index = (tick.seq % len) as usize;
                deltas[index]
            }
        }
    }
}

impl Simulator for UpDownCounter {
    fn observe(&mut self, tick: Tick) {
        let delta = self.delta(tick);
        self.counter.add(delta, &[]);
        self.value = self.value.saturating_add(delta);
        trace!(
            "tick {seq}: {delta:+} -> {value}",
            seq = tick.seq,
            value = self.value
        );
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry_sdk::metrics::{
        InMemoryMetricExporterBuilder, SdkMeterProvider, Temporality as SdkTemporality,
        data::{AggregatedMetrics, MetricData},
    };
    use rand::{SeedableRng, rngs::SmallRng};

    use super::{Config, DeltaPolicy, RawConfig, UpDownCounter};
    use crate::{
        config::{self, Temporality},
        driver::Tick,
        metrics::Simulator,
        provider::{self, tests::settings},
    };

    fn config(policy: DeltaPolicy) -> Config {
        Config::resolve(
            &RawConfig {
                policy,
                ..RawConfig::default()
            },
            "svc",
        )
        .expect("valid config")
    }

    #[test]
    fn defaults_resolve() {
        let config = Config::resolve(&RawConfig::default(), "svc").expect("valid config");
        assert_eq!(config.name, "svc.metrics.up_down_counter");
        assert_eq!(config.temporality, Temporality::Delta);
        assert_eq!(config.policy, DeltaPolicy::Random { max_magnitude: 5 });
    }

    #[test]
    fn degenerate_policies_are_rejected() {
        let empty = RawConfig {
            policy: DeltaPolicy::Sequence { deltas: vec![] },
            ..RawConfig::default()
        };
        assert_eq!(
            Config::resolve(&empty, "svc"),
            Err(config::Error::EmptyDeltas)
        );
        let zero = RawConfig {
            policy: DeltaPolicy::Alternating { magnitude: 0 },
            ..RawConfig::default()
        };
        assert_eq!(
            Config::resolve(&zero, "svc"),
            Err(config::Error::ZeroMaximum("magnitude"))
        );
    }

    #[test]
    fn value_may_go_negative() {
        let exporter = InMemoryMetricExporterBuilder::new()
            .with_temporality(SdkTemporality::Delta)
            .build();
        let mut lifecycle = provider::new_provider(exporter.clone(), &settings());
        let config = config(DeltaPolicy::Sequence {
            deltas: vec![-1, -1, 1],
        });
        let name = config.name.clone();
        let mut sim = UpDownCounter::new(
            &provider::meter(lifecycle.get(), "svc"),
            config,
            SmallRng::seed_from_u64(0),
        );
        for seq in 0..3 {
            sim.observe(Tick { seq });
        }
        assert_eq!(sim.value(), -1);

        lifecycle.get().force_flush().expect("flush");
        let batches = exporter.get_finished_metrics().expect("finished metrics");
        lifecycle.shutdown().expect("shutdown");
        let mut exported = Vec::new();
        for batch in &batches {
            for scope in batch.scope_metrics() {
                for metric in scope.metrics() {
                    if metric.name() != name {
                        continue;
                    }
                    if let AggregatedMetrics::I64(MetricData::Sum(sum)) = metric.data() {
                        exported.extend(sum.data_points().map(|point| point.value()));
                    }
                }
            }
        }
        assert_eq!(exported, vec![-1]);
    }

    #[test]
    fn alternating_policy_returns_to_zero() {
        let provider = SdkMeterProvider::builder().build();
        let mut sim = UpDownCounter::new(
            &provider::meter(&provider, "svc"),
            config(DeltaPolicy::Alternating { magnitude: 3 }),
            SmallRng::seed_from_u64(0),
        );
        sim.observe(Tick { seq: 0 });
        assert_eq!(sim.value(), 3);
        sim.observe(Tick { seq: 1 });
        assert_eq!(sim.value(), 0);
    }

    #[test]
    fn random_policy_stays_within_magnitude() {
        let provider = SdkMeterProvider::builder().build();
        let mut sim = UpDownCounter::new(
            &provider::meter(&provider, "svc"),
            config(DeltaPolicy::Random { max_magnitude: 2 }),
            SmallRng::seed_from_u64(42),
        );
        let mut previous = sim.value();
        for seq in 0..100 {
            sim.observe(Tick { seq });
            let step = (sim.value() - previous).abs();
            assert!((1..=2).contains(&step));
            previous = sim.value();
        }
    }
}
