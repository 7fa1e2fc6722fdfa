//! Shutdown signalling for the nflow generator.
//!
//! A `Broadcaster` announces shutdown, exactly once. Any number of `Watcher`
//! instances wait for that announcement, each one derived from another with
//! `Watcher::register`.
//!
//! `Broadcaster::signal_and_wait` blocks until every `Watcher` has observed
//! the signal or been dropped, which is what lets shutdown wait on in-flight
//! flow sessions. Dropping a `Broadcaster` without signalling counts as a
//! signal.

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

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use tokio::sync::{Notify, watch};
use tracing::info;

/// Construct a `Watcher` and `Broadcaster` pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let (sender, receiver) = watch::channel(false);
    let peers = Arc::new(AtomicU32::new(1));
    let notify = Arc::new(Notify::new());

    let w = Watcher {
        receiver,
        peers: Arc::clone(&peers),
        notify: Arc::clone(&notify),
        released: false,
    };
    let b = Broadcaster {
        sender,
        peers,
        notify,
    };

    (w, b)
}

#[derive(Debug)]
/// Announces shutdown to every `Watcher`.
pub struct Broadcaster {
    sender: watch::Sender<bool>,
    /// Count of `Watcher` instances that have not yet released.
    peers: Arc<AtomicU32>,
    /// Pinged by each `Watcher` as it releases.
    notify: Arc<Notify>,
}

impl Broadcaster {
    /// Send the signal and wait until every `Watcher` has observed it or been
    /// dropped.
    pub async fn signal_and_wait(self) {
        self.sender.send_replace(true);

        loop {
            // Register interest before reading the count, otherwise a release
            // between the load and the await is lost.
            let notified = self.notify.notified();
            let peers = self.peers.load(Ordering::SeqCst);
            if peers == 0 {
                break;
            }
            info!("waiting for {peers} peers");
            notified.await;
        }
    }
}

/// Errors for `Watcher::register`.
#[derive(thiserror::Error, Debug, Clone, Copy)]
pub enum RegisterError {
    /// The signal was already sent.
    #[error("signal has been sent")]
    SignalReceived,
}

#[derive(Debug)]
/// Waits for the signal from a `Broadcaster`.
pub struct Watcher {
    receiver: watch::Receiver<bool>,
    peers: Arc<AtomicU32>,
    notify: Arc<Notify>,
    /// Whether this instance already decremented `peers`.
    released: bool,
}

impl Watcher {
    fn release(&mut self) {
        if self.released {
            return;
        }
        // Saturate at zero rather than wrap.
        let _ = self
            .peers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| p.checked_sub(1));
        self.released = true;
        self.notify.notify_waiters();
    }

    /// Wait for the signal. Returns immediately if the signal was already sent
    /// or the `Broadcaster` has been dropped.
    pub async fn recv(mut self) {
        // An error here means the sender is gone, which is also a signal.
        let _ = self.receiver.wait_for(|reached| *reached).await;
        self.release();
    }

    /// Create a new `Watcher`. The `Broadcaster` will wait for it in
    /// `signal_and_wait`.
    ///
    /// # Errors
    ///
    /// Returns `RegisterError::SignalReceived` if the signal was already sent
    /// or the `Broadcaster` is gone.
    pub fn register(&self) -> Result<Self, RegisterError> {
        if *self.receiver.borrow() || self.receiver.has_changed().is_err() {
            return Err(RegisterError::SignalReceived);
        }
        self.peers.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            receiver: self.receiver.clone(),
            peers: Arc::clone(&self.peers),
            notify: Arc::clone(&self.notify),
            released: false,
        })
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.release();
    }
}
