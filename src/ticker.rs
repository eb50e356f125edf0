//! Cancellable repeating tick task.
//!
//! One background thread per ticker. The callback decides when to stop by
//! returning `ControlFlow::Break`; the owner can also cancel at any time.
//! Dropping a `Ticker` cancels it and joins the thread, so no tick can fire
//! after its owner is gone.

use std::io;
use std::ops::ControlFlow;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub struct Ticker {
    cancel_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Spawn a thread calling `on_tick` every `interval` until it breaks or is cancelled.
    ///
    /// Deadlines are computed from the start instant so a slow callback does
    /// not push later ticks back.
    pub fn spawn<F>(interval: Duration, mut on_tick: F) -> io::Result<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("session-tick".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut ticks: u32 = 0;
                loop {
                    ticks = ticks.saturating_add(1);
                    let deadline = started + interval * ticks;
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match cancel_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            if on_tick().is_break() {
                                break;
                            }
                        }
                        // Cancelled, or the owner went away
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::trace!(ticks, "tick task exited");
            })?;

        Ok(Self {
            cancel_tx: Some(cancel_tx),
            handle: Some(handle),
        })
    }

    /// True once the thread has exited on its own or been cancelled
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop ticking and wait for the thread to exit
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("tick task panicked");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel();
    }
}
