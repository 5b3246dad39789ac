//! Counter-with-labels simulator.
//!
//! One monotonic `u64` counter whose increments are split across the label
//! values `hits` and `misses` of the `outcome` key.

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Meter},
};
use rand::{Rng, distr::weighted::WeightedIndex, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::Simulator;
use crate::{
    config::{self, Temporality},
    driver::Tick,
};

/// Attribute key every increment is recorded under.
pub const LABEL_KEY: &str = "outcome";
/// The label values increments are split across.
pub const LABEL_VALUES: [&str; 2] = ["hits", "misses"];

fn default_temporality() -> String {
    "cumulative".to_string()
}

fn default_max_increment() -> u64 {
    10
}

/// How each tick picks its label value.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum LabelPolicy {
    /// Alternate `hits`, `misses`, `hits`, ...
    #[default]
    RoundRobin,
    /// Pick at random with the given relative weights.
    Weighted {
        /// Weight of `hits`
        hits: u32,
        /// Weight of `misses`
        misses: u32,
    },
}

/// Counter options as supplied by the user.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// Instrument name. Defaults to `<service>.metrics.counter_with_labels`.
    #[serde(default)]
    pub name: Option<String>,
    /// `delta` or `cumulative`
    #[serde(default = "default_temporality")]
    pub temporality: String,
    /// Label selection policy
    #[serde(default)]
    pub label_policy: LabelPolicy,
    /// Increments are drawn uniformly from `1..=max_increment`
    #[serde(default = "default_max_increment")]
    pub max_increment: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            name: None,
            temporality: default_temporality(),
            label_policy: LabelPolicy::default(),
            max_increment: default_max_increment(),
        }
    }
}

#[derive(Debug, Clone)]
enum Selector {
    RoundRobin,
    Weighted(WeightedIndex<u32>),
}

/// Validated counter options.
#[derive(Debug, Clone)]
pub struct Config {
    /// Instrument name
    pub name: String,
    /// Export temporality
    pub temporality: Temporality,
    selector: Selector,
    max_increment: u64,
}

impl Config {
    /// Validate `raw`, naming the instrument after `service_name` unless a
    /// name is given.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown temporality, all-zero label weights
    /// or a zero maximum increment.
    pub fn resolve(raw: &RawConfig, service_name: &str) -> Result<Self, config::Error> {
        let temporality = Temporality::parse(&raw.temporality)?;
        if raw.max_increment == 0 {
            return Err(config::Error::ZeroMaximum("increment"));
        }
        let selector = match raw.label_policy {
            LabelPolicy::RoundRobin => Selector::RoundRobin,
            LabelPolicy::Weighted { hits, misses } => Selector::Weighted(
                WeightedIndex::new([hits, misses]).map_err(|_| config::Error::ZeroWeights)?,
            ),
        };
        let name = raw
            .name
            .clone()
            .unwrap_or_else(|| format!("{service_name}.metrics.counter_with_labels"));

        Ok(Self {
            name,
            temporality,
            selector,
            max_increment: raw.max_increment,
        })
    }
}

/// Records a strictly positive increment against one label value per tick.
#[derive(Debug)]
pub struct CounterWithLabels {
    counter: Counter<u64>,
    labels: [KeyValue; 2],
    config: Config,
    rng: SmallRng,
    totals: [u64; 2],
}

impl CounterWithLabels {
    /// Create the counter instrument on `meter`.
    #[must_use]
    pub fn new(meter: &Meter, config: Config, rng: SmallRng) -> Self {
        let counter = meter
            .u64_counter(config.name.clone())
            .with_description("Counter with labels demonstrates splitting a count across labels")
            .build();
        Self {
            counter,
            labels: LABEL_VALUES.map(|value| KeyValue::new(LABEL_KEY, value)),
            config,
            rng,
            totals: [0; 2],
        }
    }

    /// Running total per label value, in [`LABEL_VALUES`] order.
    #[must_use]
    pub fn totals(&self) -> [u64; 2] {
        self.totals
    }

    fn step(&mut self, tick: Tick) -> (usize, u64) {
        let label = match &self.config.selector {
            Selector::RoundRobin => usize::from(tick.seq % 2 == 1),
            Selector::Weighted(index) => self.rng.sample(index),
        };
        let increment = self.rng.random_range(1..=self.config.max_increment);
        (label, increment)
    }
}

impl Simulator for CounterWithLabels {
    fn observe(&mut self, tick: Tick) {
        let (label, increment) = self.step(tick);
        self.counter
            .add(increment, std::slice::from_ref(&self.labels[label]));
        self.totals[label] = self.totals[label].saturating_add(increment);
        trace!(
            "tick {seq}: {value} += {increment}",
            seq = tick.seq,
            value = LABEL_VALUES[label],
        );
    }
}
