//! Meter provider construction.
//!
//! One provider serves exactly one run. [`new_provider`] takes the exporter
//! by value, so a second provider over the same exporter, which would
//! collect and export every observation twice, cannot be built.

use std::time::Duration;

use opentelemetry::{InstrumentationScope, KeyValue, metrics::Meter, metrics::MeterProvider};
use opentelemetry_sdk::{
    Resource,
    metrics::{
        Aggregation, Instrument, PeriodicReader, SdkMeterProvider, Stream,
        exporter::PushMetricExporter,
    },
};
use tracing::debug;

use crate::{config::BucketBounds, exporter::Lifecycle};

/// Aggregation override for the run's histogram instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramView {
    /// Instrument name the view applies to
    pub name: String,
    /// Explicit bucket bounds
    pub bounds: BucketBounds,
    /// Whether min and max are tracked alongside bucket counts
    pub record_min_max: bool,
}

/// Settings for [`new_provider`].
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Periodic export interval, equal to the run's tick rate
    pub interval: Duration,
    /// The `service.name` resource attribute
    pub service_name: String,
    /// Histogram aggregation, when the run records a histogram
    pub histogram: Option<HistogramView>,
}

/// Wrap `exporter` in a periodic reader and build the run's provider.
///
/// The reader owns pushing, and retrying, exports on its interval; nothing
/// else in a run calls the exporter.
pub fn new_provider<E>(exporter: E, settings: &Settings) -> Lifecycle<SdkMeterProvider>
where
    E: PushMetricExporter,
{
    let reader = PeriodicReader::builder(exporter)
        .with_interval(settings.interval)
        .build();
    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.name", settings.service_name.clone()))
        .build();

    let mut builder = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource);
    if let Some(view) = settings.histogram.clone() {
        debug!(
            "histogram view for {name}: {bounds} bounds, record_min_max={record}",
            name = view.name,
            bounds = view.bounds.as_slice().len(),
            record = view.record_min_max,
        );
        builder = builder.with_view(move |instrument: &Instrument| {
            if instrument.name() != view.name {
                return None;
            }
            Stream::builder()
                .with_aggregation(Aggregation::ExplicitBucketHistogram {
                    boundaries: view.bounds.as_slice().to_vec(),
                    record_min_max: view.record_min_max,
                })
                .build()
                .ok()
        });
    }

    Lifecycle::new(builder.build())
}

/// The meter for a run, scoped by service name.
pub fn meter(provider: &SdkMeterProvider, service_name: &str) -> Meter {
    provider.meter_with_scope(InstrumentationScope::builder(service_name.to_string()).build())
}
