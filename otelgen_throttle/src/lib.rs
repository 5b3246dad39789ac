//! The otelgen tick throttle
//!
//! This library turns a generation rate and a run length into a bounded
//! sequence of ticks for the rest of the otelgen project. Time is read
//! through the [`Clock`] trait so the schedule can be driven by a real clock
//! or by a test clock.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]

use async_trait::async_trait;
use tokio::time::{self, Duration, Instant};

pub mod cadence;

pub use cadence::{Cadence, Limit, Step};

/// Errors produced by [`Ticker`].
#[derive(thiserror::Error, Debug, Clone, Copy)]
pub enum Error {
    /// See [`cadence::Error`] for details.
    #[error(transparent)]
    Cadence(#[from] cadence::Error),
}

#[async_trait]
/// The `Clock` used for every ticker
pub trait Clock {
    /// Time elapsed since the clock was created
    fn elapsed(&self) -> Duration;
    /// Wait for `duration` amount of time
    async fn wait(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
/// A clock that operates with respect to real-clock time.
pub struct RealClock {
    start: Instant,
}

impl Default for RealClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for RealClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    async fn wait(&self, duration: Duration) {
        time::sleep(duration).await;
    }
}

/// Drives a [`Cadence`] against a [`Clock`], sleeping between ticks.
#[derive(Debug)]
pub struct Ticker<C = RealClock> {
    cadence: Cadence,
    clock: C,
}

impl Ticker<RealClock> {
    /// Create a new `Ticker` on a real-time clock that starts now.
    ///
    /// # Errors
    ///
    /// See documentation in [`cadence::Error`].
    pub fn new(rate: Duration, limit: Limit) -> Result<Self, Error> {
        Self::with_clock(rate, limit, RealClock::default())
    }
}

impl<C> Ticker<C>
where
    C: Clock + Send + Sync,
{
    /// Create a new `Ticker` on the given clock.
    ///
    /// # Errors
    ///
    /// See documentation in [`cadence::Error`].
    pub fn with_clock(rate: Duration, limit: Limit, clock: C) -> Result<Self, Error> {
        Ok(Self {
            cadence: Cadence::new(rate, limit)?,
            clock,
        })
    }

    /// Wait for the next tick, returning its sequence number, or `None` once
    /// the run length is exhausted.
    ///
    /// Cancel-safe: dropping the future while it sleeps loses no tick.
    pub async fn tick(&mut self) -> Option<u64> {
        loop {
            match self.cadence.poll(self.clock.elapsed()) {
                Step::Tick(seq) => return Some(seq),
                Step::Wait(slop) => self.clock.wait(slop).await,
                Step::Done => return None,
            }
        }
    }

    /// The number of ticks emitted so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.cadence.ticks()
    }

    /// Time elapsed on the underlying clock.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }
}
