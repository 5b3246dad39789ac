//! Tick cadence
//!
//! The cadence answers one question for a caller that knows how much time
//! has elapsed since the run began: is the next tick due, and if not, how
//! long until it is. It holds no clock of its own, which keeps it free of
//! async and easy to make claims about.

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// Errors produced by [`Cadence`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The rate between ticks was zero.
    #[error("Tick rate must be greater than zero")]
    ZeroRate,
}

/// How long a run lasts.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// Stop once this much time has elapsed. A zero duration runs no ticks.
    Bounded(Duration),
    /// Run until cancelled.
    Indefinite,
}

/// The outcome of a [`Cadence::poll`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Step {
    /// A tick is due now, carrying its sequence number.
    Tick(u64),
    /// No tick is due; wait this long before polling again.
    Wait(Duration),
    /// The run length is exhausted. Every later poll returns `Done` too.
    Done,
}

/// Converts a (rate, limit) pair into a sequence of ticks.
///
/// Tick slots sit at whole multiples of the rate from the start of the
/// run. A caller that falls behind is not given a burst of catch-up ticks:
/// missed slots are skipped and the sequence numbers stay consecutive.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    rate: Duration,
    limit: Limit,
    /// The slot index of the next tick.
    slot: u64,
    /// The sequence number of the next tick.
    seq: u64,
    done: bool,
}

impl Cadence {
    /// Create a new `Cadence`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroRate`] if `rate` is zero.
    pub fn new(rate: Duration, limit: Limit) -> Result<Self, Error> {
        if rate.is_zero() {
            return Err(Error::ZeroRate);
        }
        Ok(Self {
            rate,
            limit,
            slot: 0,
            seq: 0,
            done: false,
        })
    }

    /// The number of ticks a run of this cadence plans, `None` if
    /// indefinite.
    #[must_use]
    pub fn planned(&self) -> Option<u64> {
        match self.limit {
            Limit::Bounded(limit) => Some(slots_before(limit, self.rate)),
            Limit::Indefinite => None,
        }
    }

    /// The number of ticks handed out so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.seq
    }

    /// For an `elapsed` time, measured from the start of the run, report
    /// whether a tick is due.
    ///
    /// Note that `elapsed` must be an absolute value.
    pub fn poll(&mut self, elapsed: Duration) -> Step {
        if self.done {
            return Step::Done;
        }

        let rate = self.rate.as_nanos();
        let elapsed_nanos = elapsed.as_nanos();
        let due = rate * u128::from(self.slot);
        if let Limit::Bounded(limit) = self.limit {
            // The run ends at its limit even if a slot before it was never
            // reached because the caller was late.
            let limit = limit.as_nanos();
            if elapsed_nanos >= limit || due >= limit {
                self.done = true;
                return Step::Done;
            }
        }

        if elapsed_nanos < due {
            return Step::Wait(from_nanos(due - elapsed_nanos));
        }

        // The next slot is the first one that starts after now. For an
        // on-time caller this is simply `slot + 1`.
        self.slot = saturate(elapsed_nanos / rate).saturating_add(1);

        let seq = self.seq;
        self.seq += 1;
        Step::Tick(seq)
    }
}

/// The number of slots of width `rate` that begin strictly before `limit`.
fn slots_before(limit: Duration, rate: Duration) -> u64 {
    saturate(limit.as_nanos().div_ceil(rate.as_nanos()))
}

#[allow(clippy::cast_possible_truncation)]
fn saturate(value: u128) -> u64 {
    if value > u128::from(u64::MAX) {
        u64::MAX
    } else {
        value as u64
    }
}

fn from_nanos(nanos: u128) -> Duration {
    Duration::from_nanos(saturate(nanos))
}
