//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Every run parameter is
//! validated here, before any exporter or network resource exists, and
//! resolved into closed variants so nothing downstream branches on strings.

use std::{fmt, time::Duration};

use http::{Uri, uri::Scheme};
use opentelemetry::KeyValue;
use otelgen_throttle::Limit;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Default gRPC OTLP port.
pub const DEFAULT_GRPC_PORT: u16 = 4317;
/// Default HTTP OTLP port.
pub const DEFAULT_HTTP_PORT: u16 = 4318;
/// Path the OTLP/HTTP metrics endpoint is served on.
pub const HTTP_METRICS_PATH: &str = "/v1/metrics";

/// Errors produced by [`Config`] and instrument config resolution.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// No OTLP endpoint was given.
    #[error("'otel-exporter-otlp-endpoint' must be set")]
    MissingEndpoint,
    /// The OTLP endpoint is not a valid URI.
    #[error("Invalid OTLP endpoint {endpoint}: {reason}")]
    InvalidEndpoint {
        /// The endpoint as given
        endpoint: String,
        /// Why it was rejected
        reason: String,
    },
    /// The transport is neither grpc nor http.
    #[error("Unknown transport protocol '{0}', expected one of: grpc, http")]
    UnknownTransport(String),
    /// The endpoint scheme disagrees with the insecure flag.
    #[error("Endpoint scheme '{scheme}' contradicts insecure={insecure}")]
    ContradictorySecurity {
        /// Scheme found in the endpoint
        scheme: String,
        /// The insecure flag
        insecure: bool,
    },
    /// The rate between ticks is zero.
    #[error("Rate must be greater than zero")]
    ZeroRate,
    /// The rate between ticks is not a representable number of seconds.
    #[error("Rate of {0} seconds is not a valid duration")]
    InvalidRate(String),
    /// Temporality is neither delta nor cumulative.
    #[error("Unknown temporality '{0}', expected one of: delta, cumulative")]
    UnknownTemporality(String),
    /// An attribute is not of the form `key=value`.
    #[error("Attribute '{0}' must be of the form key=value")]
    MalformedAttribute(String),
    /// An attribute key appears more than once.
    #[error("Attribute key '{0}' given more than once")]
    DuplicateAttribute(String),
    /// Histogram bucket bounds are empty.
    #[error("Histogram bounds must not be empty")]
    EmptyBounds,
    /// A histogram bucket bound is NaN or infinite.
    #[error("Histogram bound {0} is not finite")]
    NonFiniteBound(f64),
    /// Histogram bucket bounds are not strictly ascending.
    #[error("Histogram bounds must be strictly ascending, {previous} is followed by {next}")]
    UnorderedBounds {
        /// The earlier bound
        previous: f64,
        /// The bound that does not exceed it
        next: f64,
    },
    /// A label weight configuration sums to zero.
    #[error("Label weights must not all be zero")]
    ZeroWeights,
    /// An increment or magnitude range is empty.
    #[error("Maximum {0} must be greater than zero")]
    ZeroMaximum(&'static str),
    /// A fixed delta sequence has no entries.
    #[error("Delta sequence must not be empty")]
    EmptyDeltas,
}

fn default_protocol() -> String {
    "grpc".to_string()
}

fn default_service_name() -> String {
    "otelgen".to_string()
}

fn default_rate_seconds() -> f64 {
    1.0
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

/// Run parameters as supplied by the user, before validation.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// The OTLP endpoint, with or without scheme
    #[serde(default)]
    pub endpoint: Option<String>,
    /// The OTLP transport, one of `grpc` or `http`
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Disable TLS towards the endpoint
    #[serde(default)]
    pub insecure: bool,
    /// The `service.name` resource attribute, also the metric name prefix
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Seconds between ticks, also the export interval
    #[serde(default = "default_rate_seconds")]
    pub rate_seconds: f64,
    /// Seconds to generate for. Absent means run until cancelled.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    /// Skip the reachability check of the endpoint before generating
    #[serde(default)]
    pub lazy_connect: bool,
    /// Seconds to wait for the endpoint to accept a connection
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    /// The seed for random operations. Absent means seed from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            protocol: default_protocol(),
            insecure: false,
            service_name: default_service_name(),
            rate_seconds: default_rate_seconds(),
            duration_seconds: None,
            lazy_connect: false,
            connect_timeout_seconds: default_connect_timeout_seconds(),
            seed: None,
        }
    }
}

/// A configuration file: shared run parameters plus one entry per
/// concurrent generation run.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub struct File {
    /// Parameters shared by every run
    #[serde(default)]
    pub run: RawConfig,
    /// The generators to run, each with its own exporter and provider
    #[serde(default)]
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub generator: Vec<crate::metrics::Generator>,
}

impl File {
    /// Validate the shared parameters and every generator entry without
    /// creating any exporter.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn check(&self) -> Result<(), Error> {
        Config::resolve(&self.run)?;
        for generator in &self.generator {
            generator.check(&self.run.service_name)?;
        }
        Ok(())
    }
}

/// The OTLP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// OTLP over gRPC
    Grpc,
    /// OTLP over HTTP, binary protobuf bodies
    Http,
}

impl Transport {
    fn default_port(self) -> u16 {
        match self {
            Self::Grpc => DEFAULT_GRPC_PORT,
            Self::Http => DEFAULT_HTTP_PORT,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grpc => f.write_str("grpc"),
            Self::Http => f.write_str("http"),
        }
    }
}

/// Whether the connection to the endpoint is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS using the platform's root certificates
    Tls,
    /// Plaintext
    Insecure,
}

/// How the exporter treats the endpoint before the run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPolicy {
    /// Connect on first export; an unreachable endpoint surfaces as export
    /// errors during the run.
    Lazy,
    /// Require the endpoint to accept a connection within `timeout` before
    /// any tick runs.
    Blocking {
        /// How long to wait for the endpoint
        timeout: Duration,
    },
}

/// A validated OTLP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    uri: Uri,
    host: String,
    port: u16,
}

impl Endpoint {
    /// The full endpoint URI handed to the exporter.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The host part of the endpoint.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port of the endpoint, defaulted by transport when absent.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    fn resolve(raw: &str, transport: Transport, insecure: bool) -> Result<(Self, Security), Error> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::MissingEndpoint);
        }
        let invalid = |reason: String| Error::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason,
        };

        let security = if insecure {
            Security::Insecure
        } else {
            Security::Tls
        };
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            match security {
                Security::Insecure => format!("http://{raw}"),
                Security::Tls => format!("https://{raw}"),
            }
        };

        let uri: Uri = with_scheme
            .parse()
            .map_err(|err: http::uri::InvalidUri| invalid(err.to_string()))?;
        let scheme = uri
            .scheme()
            .cloned()
            .ok_or_else(|| invalid("missing scheme".to_string()))?;
        if (scheme == Scheme::HTTPS && insecure) || (scheme == Scheme::HTTP && !insecure) {
            return Err(Error::ContradictorySecurity {
                scheme: scheme.to_string(),
                insecure,
            });
        }
        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return Err(invalid(format!("unsupported scheme {scheme}")));
        }

        let authority = uri
            .authority()
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let host = authority.host().to_string();
        if host.is_empty() {
            return Err(invalid("missing host".to_string()));
        }
        let port = authority
            .port_u16()
            .unwrap_or_else(|| transport.default_port());

        let path = match (transport, uri.path()) {
            (Transport::Http, "" | "/") => HTTP_METRICS_PATH,
            (_, path) => path,
        };
        let uri = Uri::builder()
            .scheme(scheme)
            .authority(format!("{host}:{port}").as_str())
            .path_and_query(path)
            .build()
            .map_err(|err| invalid(err.to_string()))?;

        Ok((Self { uri, host, port }, security))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// The validated, immutable configuration of one generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// The OTLP endpoint
    pub endpoint: Endpoint,
    /// The OTLP transport
    pub transport: Transport,
    /// Plaintext or TLS
    pub security: Security,
    /// The `service.name` resource attribute
    pub service_name: String,
    /// Time between ticks, also the periodic export interval
    pub rate: Duration,
    /// How long the run lasts
    pub limit: Limit,
    /// Endpoint reachability policy
    pub connect: ConnectPolicy,
    /// The seed for random operations, if fixed
    pub seed: Option<u64>,
}

impl Config {
    /// Validate `raw` into a [`Config`].
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is missing or malformed, the
    /// transport is unknown, security settings contradict each other or the
    /// rate is not a positive, representable duration.
    pub fn resolve(raw: &RawConfig) -> Result<Self, Error> {
        let endpoint = raw.endpoint.as_deref().ok_or(Error::MissingEndpoint)?;
        let transport = match raw.protocol.trim().to_ascii_lowercase().as_str() {
            "grpc" => Transport::Grpc,
            "http" => Transport::Http,
            _ => return Err(Error::UnknownTransport(raw.protocol.clone())),
        };
        let (endpoint, security) = Endpoint::resolve(endpoint, transport, raw.insecure)?;

        let rate = match seconds(raw.rate_seconds) {
            Some(rate) if !rate.is_zero() => rate,
            Some(_) => return Err(Error::ZeroRate),
            None if raw.rate_seconds <= 0.0 => return Err(Error::ZeroRate),
            None => return Err(Error::InvalidRate(raw.rate_seconds.to_string())),
        };
        let limit = match raw.duration_seconds {
            // Negative and NaN durations collapse to an empty run.
            Some(secs) => Limit::Bounded(seconds(secs).unwrap_or(Duration::ZERO)),
            None => Limit::Indefinite,
        };
        let connect = if raw.lazy_connect {
            ConnectPolicy::Lazy
        } else {
            ConnectPolicy::Blocking {
                timeout: Duration::from_secs(raw.connect_timeout_seconds),
            }
        };

        Ok(Self {
            endpoint,
            transport,
            security,
            service_name: raw.service_name.clone(),
            rate,
            limit,
            connect,
            seed: raw.seed,
        })
    }
}

fn seconds(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Aggregation temporality of exported metric streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temporality {
    /// Each export carries the change since the previous export
    Delta,
    /// Each export carries the running total since the start of the run
    Cumulative,
}

impl Temporality {
    /// Parse `delta` or `cumulative`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemporality`] for any other value.
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "delta" => Ok(Self::Delta),
            "cumulative" => Ok(Self::Cumulative),
            _ => Err(Error::UnknownTemporality(value.to_string())),
        }
    }
}

impl From<Temporality> for opentelemetry_sdk::metrics::Temporality {
    fn from(value: Temporality) -> Self {
        match value {
            Temporality::Delta => Self::Delta,
            Temporality::Cumulative => Self::Cumulative,
        }
    }
}

/// An ordered attribute set with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pairs: Vec<(String, String)>,
}

impl Attributes {
    /// Parse `key=value` strings, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry has no `=`, an empty key, or repeats a
    /// key.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, Error> {
        let mut seen = FxHashSet::default();
        let mut pairs = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.as_ref();
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| Error::MalformedAttribute(entry.to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::MalformedAttribute(entry.to_string()));
            }
            if !seen.insert(key.to_string()) {
                return Err(Error::DuplicateAttribute(key.to_string()));
            }
            pairs.push((key.to_string(), value.trim().to_string()));
        }
        Ok(Self { pairs })
    }

    /// Iterate the pairs in the order given.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The attribute set as OpenTelemetry key-values.
    #[must_use]
    pub fn to_key_values(&self) -> Vec<KeyValue> {
        self.pairs
            .iter()
            .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
            .collect()
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Strictly ascending, finite, non-empty histogram bucket bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketBounds(Vec<f64>);

impl BucketBounds {
    /// Validate `bounds`.
    ///
    /// # Errors
    ///
    /// Returns an error if `bounds` is empty, holds a non-finite value or is
    /// not strictly ascending.
    pub fn new(bounds: Vec<f64>) -> Result<Self, Error> {
        if bounds.is_empty() {
            return Err(Error::EmptyBounds);
        }
        if let Some(bad) = bounds.iter().find(|b| !b.is_finite()) {
            return Err(Error::NonFiniteBound(*bad));
        }
        if let Some(pair) = bounds.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(Error::UnorderedBounds {
                previous: pair[0],
                next: pair[1],
            });
        }
        Ok(Self(bounds))
    }

    /// The bucket a sample falls into.
    ///
    /// For bounds `b0 < b1 < ... < bn-1` a sample `v` lands in bucket `i`
    /// where `b(i-1) < v <= bi`, bucket 0 when `v <= b0`, and in the
    /// overflow bucket `n` when `v > b(n-1)`.
    #[must_use]
    pub fn bucket_index(&self, sample: f64) -> usize {
        self.0.partition_point(|bound| *bound < sample)
    }

    /// Number of buckets including the overflow bucket.
    #[must_use]
    pub fn buckets(&self) -> usize {
        self.0.len() + 1
    }

    /// The largest bound.
    #[must_use]
    pub fn last(&self) -> f64 {
        // Non-empty by construction.
        self.0[self.0.len() - 1]
    }

    /// The bounds as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use otelgen_throttle::Limit;

    use super::{
        Attributes, BucketBounds, Config, ConnectPolicy, Error, File, RawConfig, Security,
        Temporality, Transport,
    };
    use crate::metrics::{Generator, counter, up_down_counter};

    fn raw(endpoint: &str) -> RawConfig {
        RawConfig {
            endpoint: Some(endpoint.to_string()),
            ..RawConfig::default()
        }
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        assert_eq!(
            Config::resolve(&RawConfig::default()),
            Err(Error::MissingEndpoint)
        );
        assert_eq!(Config::resolve(&raw("   ")), Err(Error::MissingEndpoint));
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let mut cfg = raw("localhost:4317");
        cfg.protocol = "udp".to_string();
        assert_eq!(
            Config::resolve(&cfg),
            Err(Error::UnknownTransport("udp".to_string()))
        );
    }

    #[test]
    fn bare_endpoint_takes_scheme_from_insecure_flag() {
        let mut cfg = raw("collector:4317");
        cfg.insecure = true;
        let config = Config::resolve(&cfg).expect("valid config");
        assert_eq!(config.transport, Transport::Grpc);
        assert_eq!(config.security, Security::Insecure);
        assert_eq!(config.endpoint.uri().scheme_str(), Some("http"));
        assert_eq!(config.endpoint.host(), "collector");
        assert_eq!(config.endpoint.port(), 4317);

        let config = Config::resolve(&raw("collector")).expect("valid config");
        assert_eq!(config.security, Security::Tls);
        assert_eq!(config.endpoint.uri().scheme_str(), Some("https"));
        assert_eq!(config.endpoint.port(), 4317);
    }

    #[test]
    fn http_endpoint_gets_metrics_path_and_port() {
        let mut cfg = raw("collector");
        cfg.protocol = "HTTP".to_string();
        cfg.insecure = true;
        let config = Config::resolve(&cfg).expect("valid config");
        assert_eq!(config.transport, Transport::Http);
        assert_eq!(
            config.endpoint.to_string(),
            "http://collector:4318/v1/metrics"
        );

        cfg.endpoint = Some("http://collector:9000/custom".to_string());
        let config = Config::resolve(&cfg).expect("valid config");
        assert_eq!(config.endpoint.to_string(), "http://collector:9000/custom");
    }

    #[test]
    fn scheme_contradicting_insecure_is_rejected() {
        let mut cfg = raw("https://collector:4317");
        cfg.insecure = true;
        assert!(matches!(
            Config::resolve(&cfg),
            Err(Error::ContradictorySecurity { insecure: true, .. })
        ));
        assert!(matches!(
            Config::resolve(&raw("http://collector:4317")),
            Err(Error::ContradictorySecurity {
                insecure: false,
                ..
            })
        ));
    }

    #[test]
    fn zero_rate_is_rejected() {
        let mut cfg = raw("localhost");
        cfg.rate_seconds = 0.0;
        assert_eq!(Config::resolve(&cfg), Err(Error::ZeroRate));
        cfg.rate_seconds = -1.0;
        assert_eq!(Config::resolve(&cfg), Err(Error::ZeroRate));
    }

    #[test]
    fn unrepresentable_rate_is_invalid_not_zero() {
        let mut cfg = raw("localhost");
        cfg.rate_seconds = 1e20;
        assert_eq!(
            Config::resolve(&cfg),
            Err(Error::InvalidRate("100000000000000000000".to_string()))
        );
        cfg.rate_seconds = f64::NAN;
        assert!(matches!(Config::resolve(&cfg), Err(Error::InvalidRate(_))));
    }

    #[test]
    fn run_length_is_explicit() {
        let mut cfg = raw("localhost");
        assert_eq!(
            Config::resolve(&cfg).expect("valid").limit,
            Limit::Indefinite
        );
        cfg.duration_seconds = Some(0.0);
        assert_eq!(
            Config::resolve(&cfg).expect("valid").limit,
            Limit::Bounded(Duration::ZERO)
        );
        cfg.duration_seconds = Some(2.5);
        assert_eq!(
            Config::resolve(&cfg).expect("valid").limit,
            Limit::Bounded(Duration::from_millis(2_500))
        );
    }

    #[test]
    fn connect_policy_defaults_to_blocking() {
        let mut cfg = raw("localhost");
        assert_eq!(
            Config::resolve(&cfg).expect("valid").connect,
            ConnectPolicy::Blocking {
                timeout: Duration::from_secs(5)
            }
        );
        cfg.lazy_connect = true;
        assert_eq!(
            Config::resolve(&cfg).expect("valid").connect,
            ConnectPolicy::Lazy
        );
    }

    #[test]
    fn raw_config_deserializes_with_defaults() {
        let contents = r#"
endpoint: "localhost:4317"
insecure: true
duration_seconds: 10
"#;
        let cfg: RawConfig = serde_yaml::from_str(contents).expect("valid yaml");
        assert_eq!(cfg.protocol, "grpc");
        assert_eq!(cfg.service_name, "otelgen");
        assert!((cfg.rate_seconds - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.duration_seconds, Some(10.0));

        let unknown = "endpoint: x\nbogus: 1\n";
        assert!(serde_yaml::from_str::<RawConfig>(unknown).is_err());
    }

    #[test]
    fn file_lists_generators() {
        let contents = r#"
run:
  endpoint: "localhost:4317"
  insecure: true
  duration_seconds: 30
generator:
  - counter_with_labels:
      label_policy:
        weighted:
          hits: 3
          misses: 1
  - histogram:
      bounds: [1, 5, 10]
      attributes: ["env=test"]
  - up_down_counter:
      policy:
        sequence:
          deltas: [-1, -1, 1]
"#;
        let file: File = serde_yaml::from_str(contents).expect("valid yaml");
        assert_eq!(file.generator.len(), 3);
        assert!(matches!(
            &file.generator[0],
            Generator::CounterWithLabels(counter::RawConfig {
                label_policy: counter::LabelPolicy::Weighted { hits: 3, misses: 1 },
                ..
            })
        ));
        assert!(matches!(
            &file.generator[2],
            Generator::UpDownCounter(up_down_counter::RawConfig {
                policy: up_down_counter::DeltaPolicy::Sequence { deltas },
                ..
            }) if *deltas == [-1, -1, 1]
        ));
        assert_eq!(file.run.duration_seconds, Some(30.0));
        file.check().expect("valid file");

        let bad = r#"
run:
  endpoint: "localhost:4317"
  insecure: true
generator:
  - histogram:
      bounds: []
"#;
        let file: File = serde_yaml::from_str(bad).expect("valid yaml");
        assert_eq!(file.check(), Err(Error::EmptyBounds));
    }

    #[test]
    fn temporality_parses_known_values() {
        assert_eq!(Temporality::parse("delta"), Ok(Temporality::Delta));
        assert_eq!(
            Temporality::parse("Cumulative"),
            Ok(Temporality::Cumulative)
        );
        assert_eq!(
            Temporality::parse("lowmemory"),
            Err(Error::UnknownTemporality("lowmemory".to_string()))
        );
    }

    #[test]
    fn attributes_keep_order_and_reject_duplicates() {
        let attrs = Attributes::parse(&["env=prod", "region = eu", "empty="]).expect("valid");
        let pairs: Vec<_> = attrs.iter().collect();
        assert_eq!(pairs, vec![("env", "prod"), ("region", "eu"), ("empty", "")]);

        assert_eq!(
            Attributes::parse(&["env=prod", "env=dev"]),
            Err(Error::DuplicateAttribute("env".to_string()))
        );
        assert_eq!(
            Attributes::parse(&["novalue"]),
            Err(Error::MalformedAttribute("novalue".to_string()))
        );
        assert_eq!(
            Attributes::parse(&["=value"]),
            Err(Error::MalformedAttribute("=value".to_string()))
        );
    }

    #[test]
    fn bounds_must_be_strictly_ascending() {
        assert_eq!(BucketBounds::new(vec![]), Err(Error::EmptyBounds));
        assert_eq!(
            BucketBounds::new(vec![1.0, 5.0, 5.0]),
            Err(Error::UnorderedBounds {
                previous: 5.0,
                next: 5.0
            })
        );
        assert!(matches!(
            BucketBounds::new(vec![1.0, f64::INFINITY]),
            Err(Error::NonFiniteBound(_))
        ));
    }

    #[test]
    fn samples_partition_into_buckets() {
        let bounds = BucketBounds::new(vec![1.0, 5.0, 10.0]).expect("valid bounds");
        assert_eq!(bounds.buckets(), 4);
        assert_eq!(bounds.bucket_index(0.0), 0);
        assert_eq!(bounds.bucket_index(1.0), 0);
        assert_eq!(bounds.bucket_index(1.5), 1);
        assert_eq!(bounds.bucket_index(3.0), 1);
        assert_eq!(bounds.bucket_index(5.0), 1);
        assert_eq!(bounds.bucket_index(10.0), 2);
        assert_eq!(bounds.bucket_index(12.0), 3);
    }
}
