//! Fixed-interval background schedule.
//!
//! [`start`] runs a callback on a dedicated thread once per interval until
//! the callback returns `false` or the returned [`StopHandle`] is stopped or
//! dropped.  Only one invocation runs at a time: ticks that elapse while the
//! callback is busy are coalesced into at most one pending tick.
//!
//! # Example
//! ```
//! use std::time::Duration;
//!
//! let mut remaining = 3;
//! let handle = bloomlru::ticker::start(Duration::from_millis(5), move |_now| {
//!     remaining -= 1;
//!     remaining > 0
//! })
//! .unwrap();
//! handle.join();
//! ```

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

/// Controls a running schedule.  Dropping the handle stops the schedule.
pub struct StopHandle {
    stop_tx: Mutex<Option<Sender<()>>>,
    thread: Option<JoinHandle<()>>,
}

impl StopHandle {
    /// Signals the schedule to stop.  Safe to call any number of times; an
    /// invocation already in flight finishes, no further one starts.
    pub fn stop(&self) {
        // Disconnecting the channel wakes the schedule thread immediately.
        self.stop_tx.lock().take();
    }

    /// Returns `true` while the schedule thread is alive.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Waits for the schedule to end on its own (callback returned `false`)
    /// or after [`stop`](Self::stop).
    ///
    /// Blocks forever if neither happens: a callback that always returns
    /// `true` needs an explicit `stop` first, or use
    /// [`stop_and_join`](Self::stop_and_join).
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Stops the schedule and waits for its thread to exit.
    pub fn stop_and_join(self) {
        self.stop();
        self.join();
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts invoking `work(now)` every `interval`.
///
/// A zero `interval` yields a schedule that never fires and only waits to be
/// stopped.
pub fn start<F>(interval: Duration, mut work: F) -> io::Result<StopHandle>
where
    F: FnMut(Instant) -> bool + Send + 'static,
{
    let (stop_tx, stop_rx): (Sender<()>, Receiver<()>) = bounded(1);
    // `tick` keeps at most one undelivered tick, which gives coalescing.
    let ticks = if interval.is_zero() { never() } else { tick(interval) };

    let thread = thread::Builder::new()
        .name("bloomlru-ticker".into())
        .spawn(move || {
            loop {
                select! {
                    recv(ticks) -> now => {
                        let Ok(now) = now else { break };
                        if !work(now) {
                            break;
                        }
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
            debug!("ticker stopped");
        })?;

    Ok(StopHandle {
        stop_tx: Mutex::new(Some(stop_tx)),
        thread: Some(thread),
    })
}
