//! The generation driver
//!
//! The driver owns a run end to end. It pulls ticks from its [`Ticker`],
//! hands each one to the run's simulator and, once the run length is
//! exhausted or the shutdown signal fires, drains the exporter exactly once.
//!
//! ## Metrics
//!
//! `otelgen.ticks`: Ticks executed
//! `otelgen.cancelled`: Runs ended by the shutdown signal
//! `otelgen.running`: 1 while a run is ticking, 0 once stopped
//!
//! All metrics are labelled with the instrument `kind`.

use ::metrics::{counter, gauge};
use otelgen_signal::Watcher;
use otelgen_throttle::{Clock, RealClock, Ticker};
use tracing::{debug, error, info};

use crate::{
    config::Config,
    exporter::{Lifecycle, Release, ShutdownError},
    metrics::{Kind, Simulator},
};

/// One generation-and-record step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick {
    /// Position of this tick in the run, starting at zero
    pub seq: u64,
}

/// Where a [`Driver`] is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Built, not yet ticking
    Idle,
    /// Executing ticks
    Running,
    /// Flushing and releasing the exporter
    Draining,
    /// Done. Terminal.
    Stopped,
}

/// The outcome of a completed run.
#[derive(Debug)]
pub struct Report {
    /// Ticks executed
    pub ticks: u64,
    /// Whether the shutdown signal ended the run early
    pub cancelled: bool,
    /// Outcome of releasing the exporter. A failure here is reported, it
    /// does not make the run itself fail.
    pub shutdown: Result<(), ShutdownError>,
}

/// Runs a simulator at the configured cadence.
#[derive(Debug)]
pub struct Driver<C = RealClock> {
    ticker: Ticker<C>,
    kind: Kind,
    state: State,
}

impl Driver<RealClock> {
    /// Create a driver on the real clock for `config`.
    ///
    /// # Errors
    ///
    /// See documentation in [`otelgen_throttle::Error`].
    pub fn new(config: &Config, kind: Kind) -> Result<Self, otelgen_throttle::Error> {
        Ok(Self::with_ticker(Ticker::new(config.rate, config.limit)?, kind))
    }
}

impl<C> Driver<C>
where
    C: Clock + Send + Sync,
{
    /// Create a driver pulling ticks from `ticker`.
    pub fn with_ticker(ticker: Ticker<C>, kind: Kind) -> Self {
        Self {
            ticker,
            kind,
            state: State::Idle,
        }
    }

    /// The driver's current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    fn transition(&mut self, next: State) {
        debug!("{from:?} -> {next:?}", from = self.state);
        self.state = next;
    }

    /// Tick until the run length is exhausted or `shutdown` fires, then
    /// drain `lifecycle`.
    ///
    /// Ticks run one after another on this task. A tick only records into
    /// the provider; exports happen on the provider's reader, so a slow or
    /// failing backend never delays the next tick.
    pub async fn run<S, R>(
        mut self,
        simulator: &mut S,
        lifecycle: Lifecycle<R>,
        shutdown: Watcher,
    ) -> Report
    where
        S: Simulator,
        R: Release + Send + 'static,
    {
        let labels = vec![("kind".to_string(), self.kind.as_str().to_string())];
        gauge!("otelgen.running", &labels).set(1.0);
        self.transition(State::Running);

        let shutdown_wait = shutdown.recv();
        tokio::pin!(shutdown_wait);
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;

                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    counter!("otelgen.cancelled", &labels).increment(1);
                    cancelled = true;
                    break;
                }
                tick = self.ticker.tick() => {
                    let Some(seq) = tick else {
                        info!("run length reached");
                        break;
                    };
                    simulator.observe(Tick { seq });
                    counter!("otelgen.ticks", &labels).increment(1);
                }
            }
        }

        self.transition(State::Draining);
        let ticks = self.ticker.ticks();
        info!(
            "ran {ticks} ticks in {elapsed:?}",
            elapsed = self.ticker.elapsed()
        );
        let shutdown = drain(lifecycle).await;

        gauge!("otelgen.running", &labels).set(0.0);
        self.transition(State::Stopped);
        Report {
            ticks,
            cancelled,
            shutdown,
        }
    }
}

/// Flush and release on the blocking pool; the SDK's flush and shutdown
/// block the calling thread until the reader has exported.
async fn drain<R>(mut lifecycle: Lifecycle<R>) -> Result<(), ShutdownError>
where
    R: Release + Send + 'static,
{
    let result = match tokio::task::spawn_blocking(move || lifecycle.shutdown()).await {
        Ok(result) => result,
        Err(err) => Err(ShutdownError::Join(err.to_string())),
    };
    if let Err(err) = &result {
        error!("{err}");
    }
    result
}
