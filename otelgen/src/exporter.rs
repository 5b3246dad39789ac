//! OTLP metric exporter construction and lifecycle.
//!
//! An exporter is built once per run from the resolved [`Config`]: the
//! transport and security variants are matched here and nowhere else. Once
//! wrapped by a provider the exporter is released through a [`Lifecycle`],
//! which guarantees the flush-then-shutdown sequence happens exactly once
//! no matter how the run ends.

use std::time::Duration;

use opentelemetry_otlp::{
    ExporterBuildError, MetricExporter, Protocol, WithExportConfig, WithTonicConfig,
};
use opentelemetry_sdk::{error::OTelSdkError, metrics::SdkMeterProvider};
use tokio::net::TcpStream;
use tonic::transport::ClientTlsConfig;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConnectPolicy, Endpoint, Security, Temporality, Transport};

/// Errors produced while building an exporter.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The OTLP exporter builder rejected its configuration.
    #[error("Failed to build OTLP {transport} exporter: {source}")]
    Build {
        /// Transport that was being built
        transport: Transport,
        /// Underlying builder error
        #[source]
        source: ExporterBuildError,
    },
    /// The endpoint refused the connection.
    #[error("OTLP endpoint {endpoint} is unreachable: {source}")]
    Unreachable {
        /// The endpoint
        endpoint: String,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
    /// The endpoint did not accept a connection in time.
    #[error("OTLP endpoint {endpoint} did not accept a connection within {timeout:?}")]
    ConnectTimeout {
        /// The endpoint
        endpoint: String,
        /// How long was waited
        timeout: Duration,
    },
}

/// Errors produced while releasing an exporter. These are reported, never
/// allowed to fail an otherwise successful run.
#[derive(thiserror::Error, Debug)]
pub enum ShutdownError {
    /// Flushing buffered metrics failed.
    #[error("Failed to flush metrics: {0}")]
    Flush(OTelSdkError),
    /// Shutting the provider and its exporter down failed.
    #[error("Failed to stop the exporter: {0}")]
    Shutdown(OTelSdkError),
    /// The task draining the exporter did not complete.
    #[error("Exporter shutdown task failed: {0}")]
    Join(String),
}

/// Build an OTLP metric exporter for `config`.
///
/// With [`ConnectPolicy::Blocking`] the endpoint must accept a TCP
/// connection first; the exporter itself connects lazily.
///
/// # Errors
///
/// Returns an error if the endpoint is unreachable under a blocking policy
/// or the OTLP builder fails.
pub async fn build(config: &Config, temporality: Temporality) -> Result<MetricExporter, Error> {
    if let ConnectPolicy::Blocking { timeout } = config.connect {
        probe(&config.endpoint, timeout).await?;
    }

    let endpoint = config.endpoint.uri().to_string();
    let builder = MetricExporter::builder().with_temporality(temporality.into());
    let built = match config.transport {
        Transport::Grpc => {
            info!("starting gRPC exporter");
            let builder = builder.with_tonic().with_endpoint(endpoint);
            match config.security {
                Security::Tls => builder
                    .with_tls_config(ClientTlsConfig::new().with_enabled_roots())
                    .build(),
                Security::Insecure => builder.build(),
            }
        }
        Transport::Http => {
            info!("starting HTTP exporter");
            // The scheme of the endpoint carries the security choice.
            builder
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .with_endpoint(endpoint)
                .build()
        }
    };

    built.map_err(|source| Error::Build {
        transport: config.transport,
        source,
    })
}

/// Check that `endpoint` accepts a TCP connection within `timeout`.
///
/// # Errors
///
/// Returns [`Error::Unreachable`] or [`Error::ConnectTimeout`].
pub async fn probe(endpoint: &Endpoint, timeout: Duration) -> Result<(), Error> {
    let host = endpoint
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']');
    debug!("probing {host}:{port}", port = endpoint.port());

    match tokio::time::timeout(timeout, TcpStream::connect((host, endpoint.port()))).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(source)) => Err(Error::Unreachable {
            endpoint: endpoint.to_string(),
            source: Box::new(source),
        }),
        Err(_) => Err(Error::ConnectTimeout {
            endpoint: endpoint.to_string(),
            timeout,
        }),
    }
}

/// Something holding an exporter that can be flushed and released.
pub trait Release {
    /// Push any buffered metric data to the exporter.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> Result<(), ShutdownError>;

    /// Shut the exporter down. Called at most once.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    fn release(&self) -> Result<(), ShutdownError>;
}

impl Release for SdkMeterProvider {
    fn flush(&self) -> Result<(), ShutdownError> {
        self.force_flush().map_err(ShutdownError::Flush)
    }

    fn release(&self) -> Result<(), ShutdownError> {
        self.shutdown().map_err(ShutdownError::Shutdown)
    }
}

/// Lifecycle phase of an exporter held by a [`Lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Exporting on the reader's schedule
    Started,
    /// Flushing and releasing
    ShuttingDown,
    /// Released. Terminal.
    ShutDown,
}

/// Owns an exporter (through its provider) and releases it exactly once.
///
/// `shutdown` takes `&mut self`, so only the owner drives phase changes.
/// If the owner never calls it, as on an early return or a panic unwinding
/// the run, `Drop` does.
#[derive(Debug)]
pub struct Lifecycle<R>
where
    R: Release,
{
    inner: R,
    phase: Phase,
}

impl<R> Lifecycle<R>
where
    R: Release,
{
    /// Take ownership of a started exporter holder.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            phase: Phase::Started,
        }
    }

    /// The wrapped holder.
    pub fn get(&self) -> &R {
        &self.inner
    }

    /// The current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Flush pending data then release the exporter. Calls after the first
    /// are no-ops returning `Ok`.
    ///
    /// A flush failure does not prevent the release. The first error seen
    /// is returned.
    ///
    /// # Errors
    ///
    /// See documentation in [`ShutdownError`].
    pub fn shutdown(&mut self) -> Result<(), ShutdownError> {
        if self.phase != Phase::Started {
            return Ok(());
        }
        self.phase = Phase::ShuttingDown;
        info!("stopping the exporter");

        let flushed = self.inner.flush();
        let released = self.inner.release();
        self.phase = Phase::ShutDown;
        flushed.and(released)
    }
}

impl<R> Drop for Lifecycle<R>
where
    R: Release,
{
    fn drop(&mut self) {
        if self.phase == Phase::Started {
            warn!("exporter dropped while running, shutting it down");
            if let Err(err) = self.shutdown() {
                error!("{err}");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use opentelemetry_sdk::error::OTelSdkError;
    use tokio::net::TcpListener;

    use super::{Error, Lifecycle, Phase, Release, ShutdownError, probe};
    use crate::config::{Config, RawConfig};

    /// Counts calls instead of talking to a backend.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct CountingRelease {
        pub(crate) flushes: Arc<AtomicUsize>,
        pub(crate) releases: Arc<AtomicUsize>,
        pub(crate) fail_flush: bool,
    }

    impl Release for CountingRelease {
        fn flush(&self) -> Result<(), ShutdownError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            if self.fail_flush {
                return Err(ShutdownError::Flush(OTelSdkError::InternalFailure(
                    "flush refused".to_string(),
                )));
            }
            Ok(())
        }

        fn release(&self) -> Result<(), ShutdownError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn shutdown_is_idempotent() {
        let counts = CountingRelease::default();
        let mut lifecycle = Lifecycle::new(counts.clone());
        assert_eq!(lifecycle.phase(), Phase::Started);

        lifecycle.shutdown().expect("first shutdown");
        lifecycle.shutdown().expect("repeat shutdown is a no-op");
        assert_eq!(lifecycle.phase(), Phase::ShutDown);
        drop(lifecycle);

        assert_eq!(counts.flushes.load(Ordering::SeqCst), 1);
        assert_eq!(counts.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_shuts_down_once() {
        let counts = CountingRelease::default();
        drop(Lifecycle::new(counts.clone()));
        assert_eq!(counts.flushes.load(Ordering::SeqCst), 1);
        assert_eq!(counts.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_flush_still_releases() {
        let counts = CountingRelease {
            fail_flush: true,
            ..CountingRelease::default()
        };
        let mut lifecycle = Lifecycle::new(counts.clone());
        assert!(matches!(lifecycle.shutdown(), Err(ShutdownError::Flush(_))));
        assert_eq!(lifecycle.phase(), Phase::ShutDown);
        assert_eq!(counts.releases.load(Ordering::SeqCst), 1);
    }

    fn local_config(port: u16) -> Config {
        Config::resolve(&RawConfig {
            endpoint: Some(format!("127.0.0.1:{port}")),
            insecure: true,
            ..RawConfig::default()
        })
        .expect("valid config")
    }

    #[tokio::test]
    async fn probe_accepts_listening_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let config = local_config(port);
        probe(&config.endpoint, Duration::from_secs(1))
            .await
            .expect("endpoint is listening");
    }

    #[tokio::test]
    async fn probe_rejects_closed_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);

        let config = local_config(port);
        let err = probe(&config.endpoint, Duration::from_secs(1))
            .await
            .expect_err("nothing listens on the port");
        assert!(matches!(
            err,
            Error::Unreachable { .. } | Error::ConnectTimeout { .. }
        ));
    }
}
