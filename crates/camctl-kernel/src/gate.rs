//! [`DeviceGate`] – the single interception point between the session and
//! the [`DeviceBinding`].
//!
//! A binding tolerates one outstanding operation at a time, yet two parties
//! want it: the acquisition loop (continuous grabs) and control requests
//! (property reads/writes from any thread).  The gate owns the binding
//! outright and hands out access through two entry points:
//!
//! | Entry point | Caller | Behaviour |
//! |-------------|--------|-----------|
//! | [`with_device`][DeviceGate::with_device] | control requests | pause capture, take the device, ensure open, wait for idle, run |
//! | [`capture`][DeviceGate::capture] | acquisition loop | skip if paused or disarmed, otherwise take the device and run |
//!
//! # Momentary control
//!
//! `with_device` raises a suspension count before contending for the device
//! lock.  While the count is non-zero, `capture` returns `Ok(None)` without
//! touching the binding, so a control request never waits behind more than
//! the one grab already in flight.  The count is lowered by a drop guard,
//! which restores capture on every exit path: success, error, busy timeout
//! and panic alike.
//!
//! Busy waiting is bounded by [`BusyPolicy::timeout`]; a device that stays
//! busy yields [`CamError::BusyTimeout`] instead of hanging the caller.
//!
//! # Example
//!
//! ```
//! use camctl_hal::SimCamera;
//! use camctl_kernel::{BusyPolicy, DeviceGate};
//!
//! let gate = DeviceGate::new(Box::new(SimCamera::new("sim-1")), BusyPolicy::default());
//! gate.arm_and_open().unwrap();
//!
//! let model = gate.with_device("model_id", |dev| dev.model_id()).unwrap();
//! assert_eq!(model, "sim-1");
//!
//! let raw = gate.capture(|dev| dev.grab_raw_frame()).unwrap();
//! assert!(raw.is_some());
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use camctl_hal::DeviceBinding;
use camctl_types::CamError;
use parking_lot::Mutex;
use tracing::{debug, warn};

// ────────────────────────────────────────────────────────────────────────────
// Policy and stats
// ────────────────────────────────────────────────────────────────────────────

/// How long, and how often, a control request waits for a busy device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for BusyPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(2000),
        }
    }
}

/// Counters describing gate traffic since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    /// Control requests that reached the device.
    pub operations: u64,
    /// Grabs the acquisition loop was allowed to run.
    pub captures: u64,
    /// Capture attempts skipped because control was pending or the device
    /// was disarmed.
    pub skipped_captures: u64,
    pub busy_timeouts: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// DeviceGate
// ────────────────────────────────────────────────────────────────────────────

struct DeviceCell {
    binding: Box<dyn DeviceBinding>,
    /// Set while a session is connected.  A disarmed gate refuses control
    /// requests and skips captures.
    armed: bool,
}

/// Exclusive owner of a [`DeviceBinding`].
pub struct DeviceGate {
    cell: Mutex<DeviceCell>,
    suspend: AtomicUsize,
    policy: BusyPolicy,
    operations: AtomicU64,
    captures: AtomicU64,
    skipped_captures: AtomicU64,
    busy_timeouts: AtomicU64,
}

/// Holds capture off for as long as it lives.
struct Suspension<'a> {
    count: &'a AtomicUsize,
}

impl<'a> Suspension<'a> {
    fn raise(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count }
    }
}

impl Drop for Suspension<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DeviceGate {
    pub fn new(binding: Box<dyn DeviceBinding>, policy: BusyPolicy) -> Self {
        Self {
            cell: Mutex::new(DeviceCell {
                binding,
                armed: false,
            }),
            suspend: AtomicUsize::new(0),
            policy,
            operations: AtomicU64::new(0),
            captures: AtomicU64::new(0),
            skipped_captures: AtomicU64::new(0),
            busy_timeouts: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> BusyPolicy {
        self.policy
    }

    /// Initialise the vendor library.
    ///
    /// # Errors
    ///
    /// Any failure is reported as [`CamError::DriverLoad`].
    pub fn initialize(&self) -> Result<(), CamError> {
        let mut cell = self.cell.lock();
        cell.binding.initialize().map_err(|e| match e {
            CamError::DriverLoad(_) => e,
            other => CamError::DriverLoad(other.to_string()),
        })
    }

    /// Open the device and start accepting requests.
    ///
    /// # Errors
    ///
    /// Propagates the binding's `open` failure; the gate stays disarmed.
    pub fn arm_and_open(&self) -> Result<(), CamError> {
        let _pause = Suspension::raise(&self.suspend);
        let mut cell = self.cell.lock();
        if !cell.binding.is_open() {
            cell.binding.open()?;
        }
        cell.armed = true;
        debug!("device gate armed");
        Ok(())
    }

    /// Stop accepting requests and close the device.
    ///
    /// The gate is disarmed even if `close` fails.  `close` is always
    /// attempted, so a device left half-open by a failed `open` is released.
    ///
    /// # Errors
    ///
    /// Propagates the binding's `close` failure.
    pub fn disarm_and_close(&self) -> Result<(), CamError> {
        let _pause = Suspension::raise(&self.suspend);
        let mut cell = self.cell.lock();
        cell.armed = false;
        debug!(open = cell.binding.is_open(), "device gate disarmed");
        cell.binding.close()
    }

    pub fn is_armed(&self) -> bool {
        self.cell.lock().armed
    }

    /// `true` while at least one control request is pending or running.
    pub fn is_suspended(&self) -> bool {
        self.suspend.load(Ordering::SeqCst) > 0
    }

    /// Run one control request against the device.
    ///
    /// Capture is paused for the whole call.  The device is reopened if it
    /// was found closed, and the request waits (per [`BusyPolicy`]) until
    /// the device reports idle.
    ///
    /// # Errors
    ///
    /// - [`CamError::NotConnected`] when the gate is disarmed.
    /// - [`CamError::BusyTimeout`] when the device stays busy too long.
    /// - Whatever `open`, `is_busy` or `f` return.
    pub fn with_device<T>(
        &self,
        op: &str,
        f: impl FnOnce(&mut dyn DeviceBinding) -> Result<T, CamError>,
    ) -> Result<T, CamError> {
        let _pause = Suspension::raise(&self.suspend);
        let mut cell = self.cell.lock();
        if !cell.armed {
            return Err(CamError::NotConnected);
        }

        let dev: &mut dyn DeviceBinding = cell.binding.as_mut();
        if !dev.is_open() {
            debug!(op, "reopening device for control request");
            dev.open()?;
        }
        self.wait_idle(op, dev)?;

        self.operations.fetch_add(1, Ordering::Relaxed);
        f(dev)
    }

    /// Run one grab for the acquisition loop.
    ///
    /// Returns `Ok(None)` without touching the device when a control request
    /// is pending or the gate is disarmed.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns.
    pub fn capture<T>(
        &self,
        f: impl FnOnce(&mut dyn DeviceBinding) -> Result<T, CamError>,
    ) -> Result<Option<T>, CamError> {
        if self.is_suspended() {
            self.skipped_captures.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        let mut cell = self.cell.lock();
        // A control request may have arrived while we waited for the lock.
        if self.is_suspended() || !cell.armed {
            self.skipped_captures.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        self.captures.fetch_add(1, Ordering::Relaxed);
        f(cell.binding.as_mut()).map(Some)
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            operations: self.operations.load(Ordering::Relaxed),
            captures: self.captures.load(Ordering::Relaxed),
            skipped_captures: self.skipped_captures.load(Ordering::Relaxed),
            busy_timeouts: self.busy_timeouts.load(Ordering::Relaxed),
        }
    }

    fn wait_idle(&self, op: &str, dev: &mut dyn DeviceBinding) -> Result<(), CamError> {
        let started = Instant::now();
        while dev.is_busy()? {
            let waited = started.elapsed();
            if waited >= self.policy.timeout {
                self.busy_timeouts.fetch_add(1, Ordering::Relaxed);
                let waited_ms = waited.as_millis() as u64;
                warn!(op, waited_ms, "device stayed busy; giving up");
                return Err(CamError::BusyTimeout { waited_ms });
            }
            thread::sleep(self.policy.poll_interval);
        }
        Ok(())
    }
}

impl std::fmt::Debug for DeviceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceGate")
            .field("suspended", &self.is_suspended())
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .finish()
    }
}
