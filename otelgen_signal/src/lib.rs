//! Module to signal run phase changes in otelgen.
//!
//! A generation run is bounded by its own schedule but may be cut short from
//! the outside: an operator interrupt, or a sibling run failing when several
//! runs share a process. This crate provides the one-shot mechanism used to
//! carry that cancellation.
//!
//! The mechanism has two components, a `Broadcaster` and a `Watcher`. The
//! `Broadcaster` signals every `Watcher` exactly once. Each `Watcher`, and
//! every clone of one, is a peer that the `Broadcaster` can wait on, so
//! the caller that cancels a set of runs can also learn when they have all
//! drained.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

use tokio::sync::watch;
use tracing::info;

/// Construct a `Watcher` and `Broadcaster` pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let (sender, receiver) = watch::channel(false);
    (
        Watcher {
            receiver,
            signal_received: false,
        },
        Broadcaster { sender },
    )
}

#[derive(Debug)]
/// Mechanism to notify one or more `Watcher` instances that a phase has been
/// achieved.
pub struct Broadcaster {
    sender: watch::Sender<bool>,
}

impl Broadcaster {
    /// Send the signal through any `Watcher` instances.
    ///
    /// Function will NOT block until all peers have acknowledged the signal.
    pub fn signal(self) {
        // `send_replace` stores the value even when no receiver is left.
        self.sender.send_replace(true);
    }

    /// Send the signal through to any `Watcher` instances.
    ///
    /// Function WILL block until every peer has been dropped, which for a
    /// generation run means it has drained and shut its exporter down.
    pub async fn signal_and_wait(self) {
        self.sender.send_replace(true);

        let peers = self.sender.receiver_count();
        if peers > 0 {
            info!("Waiting for {peers} peers");
        }
        self.sender.closed().await;
    }

    /// The number of `Watcher` instances still alive.
    #[must_use]
    pub fn peers(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug, Clone)]
/// Mechanism to watch for phase changes, typically used to cancel a run.
pub struct Watcher {
    receiver: watch::Receiver<bool>,
    /// Used to track if the signal has been received without synchronization.
    signal_received: bool,
}

impl Watcher {
    /// Receive the signal. This function will block if the signal has not
    /// already been sent.
    ///
    /// A `Broadcaster` that is dropped without signalling counts as a signal:
    /// nothing is left that could ever release the watcher otherwise.
    pub async fn recv(mut self) {
        if self.signal_received {
            // Once received, yield so that a `select!` polling this future
            // does not starve its other arms.
            tokio::task::yield_now().await;
            return;
        }

        // Both outcomes end the phase: the value flipped or the sender is gone.
        let _ = self.receiver.wait_for(|signalled| *signalled).await;
        self.signal_received = true;
    }

    /// Check if the signal has been sent without blocking.
    pub fn try_recv(&mut self) -> bool {
        if self.signal_received {
            return true;
        }

        let signalled = match self.receiver.has_changed() {
            Ok(_) => *self.receiver.borrow_and_update(),
            Err(_) => true,
        };
        self.signal_received = signalled;
        signalled
    }
}
