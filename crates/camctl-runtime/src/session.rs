//! [`CameraSession`] – connection lifecycle and the session state shared
//! with the acquisition worker.
//!
//! # State machine
//!
//! ```text
//! Disconnected ──connect──▶ Connected(idle) ──start──▶ Connected(acquiring)
//!      ▲                        │    ▲                        │
//!      └──────disconnect────────┘    └──────────stop──────────┘
//! ```
//!
//! Illegal transitions (start while acquiring, stop while idle, connect
//! while connected, ...) are no-ops.  `acquiring ⇒ connected` holds in
//! every reachable state: `disconnect` stops acquisition before it clears
//! `connected`, and `start_acquisition` refuses to run while disconnected.
//!
//! # Locking
//!
//! | Lock | Guards | Order |
//! |------|--------|-------|
//! | lifecycle | the worker handle; serialises connect/disconnect/start/stop | 1 |
//! | device gate | the [`DeviceBinding`][camctl_hal::DeviceBinding] | 2 |
//! | state | connected / acquiring / model / cached properties | 3 |
//! | last frame | the most recent [`RgbFrame`] | 3 |
//!
//! No lock is held while a [`ChangeEvent`][camctl_types::ChangeEvent] is
//! delivered, so subscribers may call back into the session.  Lifecycle
//! calls made from a subscriber running on the acquisition worker follow
//! special rules:
//!
//! - `stop_acquisition` only signals the worker; it cannot join itself.
//! - `connect`, `disconnect` and `start_acquisition` fail with
//!   [`CamError::AcquisitionThread`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use camctl_hal::DeviceBinding;
use camctl_kernel::{BusyPolicy, DeviceGate};
use camctl_middleware::{ChangeNotifier, EventStream, ReasonFilter, SubscriptionId};
use camctl_types::{
    CamError, CameraProperties, ChangeEvent, ChangeReason, RgbFrame, SessionSnapshot,
};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::acquisition::{AcquisitionWorker, worker_signal_for};
use crate::properties::read_device_properties;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Timing knobs for a [`CameraSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How often momentary control re-checks a busy device.
    pub busy_poll_interval: Duration,
    /// Upper bound on the busy wait before [`CamError::BusyTimeout`].
    pub busy_timeout: Duration,
    /// Sleep between acquisition loop iterations that did not capture.
    pub idle_interval: Duration,
    /// Buffer size of each [`EventStream`].
    pub stream_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let busy = BusyPolicy::default();
        Self {
            busy_poll_interval: busy.poll_interval,
            busy_timeout: busy.timeout,
            idle_interval: Duration::from_millis(5),
            stream_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// # Errors
    ///
    /// [`CamError::InvalidConfig`] for a zero poll interval, a busy timeout
    /// shorter than the poll interval, a zero idle interval or a zero stream
    /// capacity.
    pub fn validate(&self) -> Result<(), CamError> {
        if self.busy_poll_interval.is_zero() {
            return Err(CamError::InvalidConfig(
                "busy poll interval must be non-zero".to_string(),
            ));
        }
        if self.busy_timeout < self.busy_poll_interval {
            return Err(CamError::InvalidConfig(format!(
                "busy timeout ({} ms) is shorter than the poll interval ({} ms)",
                self.busy_timeout.as_millis(),
                self.busy_poll_interval.as_millis()
            )));
        }
        if self.idle_interval.is_zero() {
            return Err(CamError::InvalidConfig(
                "idle interval must be non-zero".to_string(),
            ));
        }
        if self.stream_capacity == 0 {
            return Err(CamError::InvalidConfig(
                "event stream capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn busy_policy(&self) -> BusyPolicy {
        BusyPolicy {
            poll_interval: self.busy_poll_interval,
            timeout: self.busy_timeout,
        }
    }
}

/// Counters describing a session's activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_captured: u64,
    /// Capture cycles that failed and were skipped.
    pub capture_failures: u64,
    pub workers_spawned: u64,
    pub busy_timeouts: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) connected: bool,
    pub(crate) acquiring: bool,
    pub(crate) model: Option<String>,
    pub(crate) properties: CameraProperties,
    pub(crate) frames_captured: u64,
}

/// Everything the acquisition worker and the session handle share.
pub(crate) struct Shared {
    pub(crate) gate: DeviceGate,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) last_frame: Mutex<Option<RgbFrame>>,
    pub(crate) notifier: ChangeNotifier,
    pub(crate) config: SessionConfig,
    pub(crate) sequence: AtomicU64,
    pub(crate) capture_failures: AtomicU64,
    pub(crate) workers_spawned: AtomicU64,
}

impl Shared {
    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let st = self.state.lock();
        SessionSnapshot {
            connected: st.connected,
            acquiring: st.acquiring,
            model: st.model.clone(),
            properties: st.properties.clone(),
            frames_captured: st.frames_captured,
        }
    }

    /// Publish `reason` with a fresh snapshot.  Must be called with no
    /// session lock held.
    pub(crate) fn emit(&self, reason: ChangeReason) {
        let snapshot = self.snapshot();
        self.notifier.emit(reason, snapshot);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CameraSession
// ─────────────────────────────────────────────────────────────────────────────

/// A camera control session.
///
/// All methods take `&self`; share the session between threads with an
/// [`Arc`].  Dropping the session performs a best-effort
/// [`disconnect`][CameraSession::disconnect].
pub struct CameraSession {
    pub(crate) shared: Arc<Shared>,
    lifecycle: Mutex<Option<AcquisitionWorker>>,
}

impl CameraSession {
    /// Build a session around `binding` and initialise its driver.
    ///
    /// The session starts disconnected.
    ///
    /// # Errors
    ///
    /// - [`CamError::InvalidConfig`] if `config` fails validation.
    /// - [`CamError::DriverLoad`] if the binding cannot be initialised.
    pub fn new(binding: Box<dyn DeviceBinding>, config: SessionConfig) -> Result<Self, CamError> {
        config.validate()?;
        let gate = DeviceGate::new(binding, config.busy_policy());
        gate.initialize()?;
        debug!(?config, "camera session created");

        Ok(Self {
            shared: Arc::new(Shared {
                gate,
                state: Mutex::new(SessionState::default()),
                last_frame: Mutex::new(None),
                notifier: ChangeNotifier::new(config.stream_capacity),
                config,
                sequence: AtomicU64::new(0),
                capture_failures: AtomicU64::new(0),
                workers_spawned: AtomicU64::new(0),
            }),
            lifecycle: Mutex::new(None),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Open the device, read its model identifier and prime the property
    /// cache, then emit [`ChangeReason::Connection`].
    ///
    /// Connecting a connected session is a no-op.
    ///
    /// # Errors
    ///
    /// [`CamError::Connection`] if the device fails to open, reports an
    /// empty model identifier or cannot be read while priming.  The device
    /// is closed again on a best-effort basis and the session stays
    /// disconnected.
    #[instrument(skip(self))]
    pub fn connect(&self) -> Result<(), CamError> {
        self.reject_on_worker("connect")?;
        let lifecycle = self.lifecycle.lock();
        if self.shared.state.lock().connected {
            return Ok(());
        }

        let gate = &self.shared.gate;
        if let Err(e) = gate.arm_and_open() {
            if let Err(close_err) = gate.disarm_and_close() {
                warn!(error = %close_err, "closing device after failed open");
            }
            warn!(error = %e, "connect failed");
            return Err(into_connection_error(e));
        }

        let mut properties = self.shared.state.lock().properties.clone();
        let primed = gate.with_device("connect", |dev| {
            let model = dev.model_id()?;
            if model.trim().is_empty() {
                return Err(CamError::Connection(
                    "device reported an empty model identifier".to_string(),
                ));
            }
            read_device_properties(dev, &mut properties)?;
            Ok(model)
        });

        let model = match primed {
            Ok(model) => model,
            Err(e) => {
                if let Err(close_err) = gate.disarm_and_close() {
                    warn!(error = %close_err, "closing device after failed connect");
                }
                warn!(error = %e, "connect failed");
                return Err(into_connection_error(e));
            }
        };

        {
            let mut st = self.shared.state.lock();
            st.connected = true;
            st.model = Some(model.clone());
            st.properties = properties;
        }
        drop(lifecycle);

        info!(%model, "camera connected");
        self.shared.emit(ChangeReason::Connection);
        Ok(())
    }

    /// Stop acquisition (joining the worker), close the device and emit
    /// [`ChangeReason::Connection`].
    ///
    /// If acquisition was running an [`ChangeReason::Acquisition`] event is
    /// emitted first.  Disconnecting a disconnected session is a no-op.  A
    /// failure to close the device is logged; the session ends up
    /// disconnected regardless.
    ///
    /// # Errors
    ///
    /// [`CamError::AcquisitionThread`] when called from the acquisition
    /// worker.
    #[instrument(skip(self))]
    pub fn disconnect(&self) -> Result<(), CamError> {
        self.reject_on_worker("disconnect")?;
        let mut lifecycle = self.lifecycle.lock();

        let was_acquiring = {
            let mut st = self.shared.state.lock();
            if !st.connected {
                return Ok(());
            }
            std::mem::replace(&mut st.acquiring, false)
        };

        // The worker must be gone before the handle is closed.
        if let Some(worker) = lifecycle.take() {
            worker.signal();
            worker.join();
        }
        if let Err(e) = self.shared.gate.disarm_and_close() {
            warn!(error = %e, "device close failed during disconnect");
        }

        {
            let mut st = self.shared.state.lock();
            st.connected = false;
            st.model = None;
        }
        drop(lifecycle);

        info!("camera disconnected");
        if was_acquiring {
            self.shared.emit(ChangeReason::Acquisition);
        }
        self.shared.emit(ChangeReason::Connection);
        Ok(())
    }

    /// Begin continuous acquisition and emit [`ChangeReason::Acquisition`].
    ///
    /// A worker is spawned only if none is alive.  No-op unless the session
    /// is connected and idle.
    ///
    /// # Errors
    ///
    /// [`CamError::AcquisitionThread`] when called from the acquisition
    /// worker or when the worker thread cannot be spawned.
    #[instrument(skip(self))]
    pub fn start_acquisition(&self) -> Result<(), CamError> {
        self.reject_on_worker("start_acquisition")?;
        let mut lifecycle = self.lifecycle.lock();

        {
            let mut st = self.shared.state.lock();
            if !st.connected || st.acquiring {
                return Ok(());
            }
            st.acquiring = true;
        }

        let alive = lifecycle.as_ref().is_some_and(AcquisitionWorker::is_alive);
        if !alive {
            // A worker stopped from its own thread leaves its handle behind.
            if let Some(stale) = lifecycle.take() {
                stale.join();
            }
            match AcquisitionWorker::spawn(Arc::clone(&self.shared)) {
                Ok(worker) => {
                    *lifecycle = Some(worker);
                    self.shared.workers_spawned.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.shared.state.lock().acquiring = false;
                    return Err(e);
                }
            }
        }
        drop(lifecycle);

        info!("acquisition started");
        self.shared.emit(ChangeReason::Acquisition);
        Ok(())
    }

    /// Stop continuous acquisition and emit [`ChangeReason::Acquisition`].
    ///
    /// Blocks until the worker has exited, except when called from the
    /// worker itself, in which case the worker is only signalled and exits
    /// once the current iteration completes.  No-op unless the session is
    /// connected and acquiring.
    #[instrument(skip(self))]
    pub fn stop_acquisition(&self) -> Result<(), CamError> {
        if let Some(finished) = worker_signal_for(&self.shared) {
            let changed = self.clear_acquiring();
            finished.store(true, Ordering::SeqCst);
            if changed {
                info!("acquisition stopped from the worker thread");
                self.shared.emit(ChangeReason::Acquisition);
            }
            return Ok(());
        }

        let mut lifecycle = self.lifecycle.lock();
        if !self.clear_acquiring() {
            return Ok(());
        }
        if let Some(worker) = lifecycle.take() {
            worker.signal();
            worker.join();
        }
        drop(lifecycle);

        info!("acquisition stopped");
        self.shared.emit(ChangeReason::Acquisition);
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Model identifier, read from the device under momentary control.
    ///
    /// # Errors
    ///
    /// [`CamError::NotConnected`] when disconnected, or the device error.
    pub fn camera_info(&self) -> Result<String, CamError> {
        self.require_connected()?;
        let model = self.shared.gate.with_device("model_id", |dev| dev.model_id())?;
        self.shared.state.lock().model = Some(model.clone());
        Ok(model)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    /// A copy of the most recent frame, or `None` before the first capture.
    pub fn snapshot_last_frame(&self) -> Option<RgbFrame> {
        self.shared.last_frame.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    pub fn is_acquiring(&self) -> bool {
        self.shared.state.lock().acquiring
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_captured: self.shared.state.lock().frames_captured,
            capture_failures: self.shared.capture_failures.load(Ordering::Relaxed),
            workers_spawned: self.shared.workers_spawned.load(Ordering::Relaxed),
            busy_timeouts: self.shared.gate.stats().busy_timeouts,
        }
    }

    // ── Notification ────────────────────────────────────────────────────

    /// Register a synchronous callback.  See
    /// [`ChangeNotifier`][camctl_middleware::ChangeNotifier] for the
    /// delivery contract: callbacks run on the emitting thread and a slow
    /// callback slows the emitter down.
    pub fn subscribe<F>(&self, filter: impl Into<ReasonFilter>, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.shared.notifier.subscribe(filter, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.notifier.unsubscribe(id)
    }

    /// Open an async event stream.
    pub fn subscribe_stream(&self, filter: impl Into<ReasonFilter>) -> EventStream {
        self.shared.notifier.subscribe_stream(filter)
    }

    // ── Internals ───────────────────────────────────────────────────────

    pub(crate) fn require_connected(&self) -> Result<(), CamError> {
        if self.shared.state.lock().connected {
            Ok(())
        } else {
            Err(CamError::NotConnected)
        }
    }

    /// Clear `acquiring` if the session is connected and acquiring.
    /// Returns whether anything changed.
    fn clear_acquiring(&self) -> bool {
        let mut st = self.shared.state.lock();
        if st.connected && st.acquiring {
            st.acquiring = false;
            true
        } else {
            false
        }
    }

    fn reject_on_worker(&self, op: &str) -> Result<(), CamError> {
        if worker_signal_for(&self.shared).is_some() {
            return Err(CamError::AcquisitionThread(format!(
                "{op} cannot run on the acquisition worker"
            )));
        }
        Ok(())
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if worker_signal_for(&self.shared).is_some() {
            // Dropped from a subscriber on our own worker: signal and detach.
            if let Some(worker) = self.lifecycle.get_mut().take() {
                worker.signal();
            }
            if let Err(e) = self.shared.gate.disarm_and_close() {
                warn!(error = %e, "device close failed while dropping session");
            }
            return;
        }
        if let Err(e) = self.disconnect() {
            warn!(error = %e, "disconnect on drop failed");
        }
    }
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("snapshot", &self.snapshot())
            .field("stats", &self.stats())
            .finish()
    }
}

fn into_connection_error(e: CamError) -> CamError {
    match e {
        CamError::Connection(_) => e,
        other => CamError::Connection(other.to_string()),
    }
}
