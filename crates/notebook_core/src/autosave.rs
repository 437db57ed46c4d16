//! Periodic autosave worker.
//!
//! # Responsibility
//! - Save the currently open page on a fixed interval.
//!
//! # Invariants
//! - Every tick goes through the session mutex, so a tick that fires while
//!   another write is in flight waits for it instead of racing it.
//! - Ticks are never dropped or merged; each one re-checks the draft.
//! - The worker thread exits on `stop()` or when the handle is dropped.

use crate::session::SharedSession;
use log::{debug, error, info};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// Handle to the background autosave thread.
pub struct Autosaver {
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    interval: Duration,
}

impl Autosaver {
    /// Starts ticking every `interval` against `session`.
    pub fn spawn(session: SharedSession, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker = std::thread::Builder::new()
            .name("notebook-autosave".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => run_tick(&session),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        info!(
            "event=autosave_start module=autosave status=ok interval_ms={}",
            interval.as_millis()
        );
        Ok(Self {
            stop_tx: Some(stop_tx),
            worker: Some(worker),
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stops the worker and waits for an in-flight tick to finish.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("event=autosave_stop module=autosave status=error reason=worker_panicked");
            } else {
                info!("event=autosave_stop module=autosave status=ok");
            }
        }
    }
}

impl Drop for Autosaver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_tick(session: &SharedSession) {
    match session.autosave() {
        Ok(true) => debug!("event=autosave_tick module=autosave status=ok saved=true"),
        Ok(false) => {}
        Err(err) => error!("event=autosave_tick module=autosave status=error error={err}"),
    }
}
