//! The acquisition worker – one dedicated thread per acquiring session.
//!
//! Each iteration checks the `finished` signal, then, if the session is
//! connected and acquiring, pulls one raw frame through
//! [`DeviceGate::capture`][camctl_kernel::DeviceGate::capture], assembles it
//! with the cached channel levels, swaps it into the last-frame slot and
//! emits [`ChangeReason::NewFrame`].  Iterations that capture nothing sleep
//! for the configured idle interval.
//!
//! A failed capture is logged and counted, the worker sleeps for the idle
//! interval, and the loop carries on.
//!
//! Stopping is signal-then-join: [`AcquisitionWorker::signal`] sets the
//! flag, [`AcquisitionWorker::join`] waits for the thread, so the worker is
//! gone before the device is closed.  Latency is bounded by one capture
//! cycle.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use camctl_hal::assemble_rgb;
use camctl_types::{CamError, ChangeReason};
use tracing::{debug, info, warn};

use crate::session::Shared;

/// A failing device is reported at `warn` once per this many consecutive
/// failures; the rest go to `debug`.
const FAILURE_LOG_EVERY: u64 = 100;

/// Identifies the session whose worker runs on the current thread.
struct WorkerMark {
    session: usize,
    finished: Arc<AtomicBool>,
}

thread_local! {
    static CURRENT_WORKER: RefCell<Option<WorkerMark>> = const { RefCell::new(None) };
}

fn session_key(shared: &Arc<Shared>) -> usize {
    Arc::as_ptr(shared) as usize
}

/// If the current thread is `shared`'s acquisition worker, return its stop
/// signal.
pub(crate) fn worker_signal_for(shared: &Arc<Shared>) -> Option<Arc<AtomicBool>> {
    let key = session_key(shared);
    CURRENT_WORKER.with(|slot| {
        slot.borrow()
            .as_ref()
            .filter(|mark| mark.session == key)
            .map(|mark| Arc::clone(&mark.finished))
    })
}

/// Handle to a running acquisition thread.
pub(crate) struct AcquisitionWorker {
    finished: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl AcquisitionWorker {
    /// # Errors
    ///
    /// [`CamError::AcquisitionThread`] if the OS refuses to spawn a thread.
    pub(crate) fn spawn(shared: Arc<Shared>) -> Result<Self, CamError> {
        let finished = Arc::new(AtomicBool::new(false));
        let signal = Arc::clone(&finished);
        let handle = thread::Builder::new()
            .name("camctl-acquisition".to_string())
            .spawn(move || run(shared, signal))
            .map_err(|e| CamError::AcquisitionThread(format!("spawn failed: {e}")))?;
        Ok(Self { finished, handle })
    }

    pub(crate) fn signal(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    /// Not yet signalled and still running.
    pub(crate) fn is_alive(&self) -> bool {
        !self.finished.load(Ordering::SeqCst) && !self.handle.is_finished()
    }

    pub(crate) fn join(self) {
        if self.handle.join().is_err() {
            warn!("acquisition worker panicked");
        }
    }
}

fn run(shared: Arc<Shared>, finished: Arc<AtomicBool>) {
    CURRENT_WORKER.with(|slot| {
        *slot.borrow_mut() = Some(WorkerMark {
            session: session_key(&shared),
            finished: Arc::clone(&finished),
        });
    });
    info!("acquisition worker started");

    let mut failure_streak: u64 = 0;
    while !finished.load(Ordering::SeqCst) {
        match capture_once(&shared) {
            Ok(true) => {
                if failure_streak > 0 {
                    info!(failures = failure_streak, "capture recovered");
                    failure_streak = 0;
                }
            }
            Ok(false) => thread::sleep(shared.config.idle_interval),
            Err(e) => {
                shared.capture_failures.fetch_add(1, Ordering::Relaxed);
                failure_streak += 1;
                if failure_streak == 1 || failure_streak % FAILURE_LOG_EVERY == 0 {
                    warn!(error = %e, streak = failure_streak, "capture failed; continuing");
                } else {
                    debug!(error = %e, streak = failure_streak, "capture failed");
                }
                thread::sleep(shared.config.idle_interval);
            }
        }
    }

    CURRENT_WORKER.with(|slot| slot.borrow_mut().take());
    info!("acquisition worker stopped");
}

/// Run one capture cycle.  Returns `Ok(false)` when there was nothing to
/// capture.
fn capture_once(shared: &Shared) -> Result<bool, CamError> {
    {
        let st = shared.state.lock();
        if !(st.connected && st.acquiring) {
            return Ok(false);
        }
    }

    // Geometry and levels are read under the device lock so a concurrent
    // resize cannot slip in between the grab and its decoding parameters.
    let grabbed = shared.gate.capture(|dev| {
        let raw = dev.grab_raw_frame()?;
        let st = shared.state.lock();
        Ok((raw, st.properties.width, st.properties.height, st.properties.levels))
    })?;
    let Some((raw, width, height, levels)) = grabbed else {
        return Ok(false);
    };

    let sequence = shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
    let frame = assemble_rgb(&raw, width, height, levels, sequence)?;
    *shared.last_frame.lock() = Some(frame);
    shared.state.lock().frames_captured += 1;
    debug!(sequence, width, height, "frame captured");

    shared.emit(ChangeReason::NewFrame);
    Ok(true)
}
