//! Cancellable deferred task backing the election timeout.

use std::io;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;

/// Runs a callback once after a delay unless cancelled first.
///
/// The callback runs on a dedicated background thread. Dropping the timer
/// cancels it; a cancelled timer never runs its callback unless the delay
/// had already elapsed, so callbacks must check their own staleness.
#[derive(Debug)]
pub struct ElectionTimer {
    cancel: Option<mpsc::Sender<()>>,
}

impl ElectionTimer {
    /// Starts a timer that calls `on_expire` after `delay`.
    pub fn arm<F>(name: String, delay: Duration, on_expire: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        thread::Builder::new().name(name).spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(delay) {
                on_expire();
            }
        })?;

        Ok(Self { cancel: Some(tx) })
    }

    /// Cancels the timer. Equivalent to dropping it.
    pub fn cancel(mut self) {
        self.cancel.take();
    }
}

impl Drop for ElectionTimer {
    fn drop(&mut self) {
        // Closing the channel wakes the timer thread with `Disconnected`.
        self.cancel.take();
    }
}
