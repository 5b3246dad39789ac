//! The otelgen synthetic OpenTelemetry metrics generator.
//!
//! This library supports the otelgen binary found elsewhere in this project.
//! A run resolves its configuration, builds an OTLP exporter, wraps it in a
//! meter provider and drives one instrument simulator at a fixed cadence
//! until the run length is exhausted or it is told to stop.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod driver;
pub mod exporter;
pub mod metrics;
pub mod provider;
