//! In-process simulated camera for headless runs and tests.
//!
//! [`SimCamera`] implements [`DeviceBinding`] over an in-memory property
//! store and synthesises RGB frames.  A cloneable [`SimProbe`] handle stays
//! with the caller after the camera is boxed into a session, so tests can
//! inject faults and inspect what the device saw:
//!
//! | Probe query | Meaning |
//! |---|---|
//! | [`SimProbe::overlapping_ops`] | operations that started while another was in flight |
//! | [`SimProbe::grabs_after_close`] | grab attempts on a closed device |
//! | [`SimProbe::opens`] / [`SimProbe::closes`] | open/close transitions |
//! | [`SimProbe::ops`] | ordered log of every non-grab operation |
//!
//! # Example
//!
//! ```rust
//! use camctl_hal::sim::SimCamera;
//! use camctl_hal::DeviceBinding;
//!
//! let mut camera = SimCamera::new("sim-1300").with_resolution(4, 2);
//! let probe = camera.probe();
//!
//! camera.open().unwrap();
//! let raw = camera.grab_raw_frame().unwrap();
//! assert_eq!(raw.len(), 4 * 2 * 3);
//! assert_eq!(probe.frames_grabbed(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use camctl_types::{AutoMode, CamError, LightSourcePreset, Limits};
use parking_lot::Mutex;
use tracing::debug;

use crate::device::DeviceBinding;

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

/// Device-side property values held by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct SimSettings {
    pub exposure_time_us: u32,
    pub exposure_auto: AutoMode,
    pub gain_db: f64,
    pub gain_auto: AutoMode,
    pub sharpness: f64,
    pub gamma: f64,
    pub white_balance_auto: AutoMode,
    pub light_source: LightSourcePreset,
    pub width: u32,
    pub height: u32,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            exposure_time_us: 10_000,
            exposure_auto: AutoMode::Off,
            gain_db: 0.0,
            gain_auto: AutoMode::Off,
            sharpness: 0.0,
            gamma: 1.0,
            white_balance_auto: AutoMode::Off,
            light_source: LightSourcePreset::Daylight5000K,
            width: 8,
            height: 6,
        }
    }
}

/// Limits reported by the simulator.
pub const SIM_EXPOSURE_LIMITS: Limits<u32> = Limits {
    min: 10,
    max: 1_000_000,
};
pub const SIM_GAIN_LIMITS: Limits<f64> = Limits { min: 0.0, max: 24.0 };
pub const SIM_SHARPNESS_LIMITS: Limits<f64> = Limits { min: 0.0, max: 1.0 };
pub const SIM_GAMMA_LIMITS: Limits<f64> = Limits { min: 0.25, max: 4.0 };

/// Entries kept in the operation log; older ones are dropped first.
pub const SIM_OPS_LOG_CAPACITY: usize = 1024;

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

struct SimState {
    model: String,
    defaults: SimSettings,
    current: SimSettings,
    open: bool,
    opens: u32,
    closes: u32,
    close_attempts: u32,
    fail_initialize: Option<String>,
    fail_open: Option<String>,
    /// A failed open still leaves the handle open, like a vendor SDK that
    /// allocated the device before erroring.
    half_open_on_failure: bool,
    grab_delay: Duration,
    frames_grabbed: u64,
    failing_grabs: u32,
    short_grabs: u32,
    busy_polls: u32,
    stuck_busy: bool,
    rejected: Vec<String>,
    grabs_after_close: u64,
    fill: Option<[u8; 3]>,
    ops: VecDeque<&'static str>,
}

impl SimState {
    fn record(&mut self, op: &'static str) {
        if self.ops.len() == SIM_OPS_LOG_CAPACITY {
            self.ops.pop_front();
        }
        self.ops.push_back(op);
    }
}

struct SimShared {
    state: Mutex<SimState>,
    active_ops: AtomicUsize,
    overlapping_ops: AtomicU64,
}

impl SimShared {
    fn enter(&self) -> OpGuard<'_> {
        if self.active_ops.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapping_ops.fetch_add(1, Ordering::SeqCst);
        }
        OpGuard { shared: self }
    }
}

/// Marks one device operation as in flight for overlap detection.
struct OpGuard<'a> {
    shared: &'a SimShared,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.shared.active_ops.fetch_sub(1, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimCamera
// ────────────────────────────────────────────────────────────────────────────

/// A simulated camera.  Always succeeds unless a fault was injected through
/// its [`SimProbe`].
pub struct SimCamera {
    shared: Arc<SimShared>,
}

impl SimCamera {
    /// Create a simulated camera reporting `model` as its identifier.
    pub fn new(model: impl Into<String>) -> Self {
        let defaults = SimSettings::default();
        Self {
            shared: Arc::new(SimShared {
                state: Mutex::new(SimState {
                    model: model.into(),
                    current: defaults.clone(),
                    defaults,
                    open: false,
                    opens: 0,
                    closes: 0,
                    close_attempts: 0,
                    fail_initialize: None,
                    fail_open: None,
                    half_open_on_failure: false,
                    grab_delay: Duration::ZERO,
                    frames_grabbed: 0,
                    failing_grabs: 0,
                    short_grabs: 0,
                    busy_polls: 0,
                    stuck_busy: false,
                    rejected: Vec::new(),
                    grabs_after_close: 0,
                    fill: None,
                    ops: VecDeque::new(),
                }),
                active_ops: AtomicUsize::new(0),
                overlapping_ops: AtomicU64::new(0),
            }),
        }
    }

    /// Set the sensor resolution (also the factory default).
    pub fn with_resolution(self, width: u32, height: u32) -> Self {
        {
            let mut st = self.shared.state.lock();
            st.defaults.width = width;
            st.defaults.height = height;
            st.current.width = width;
            st.current.height = height;
        }
        self
    }

    /// Make every grab take `delay` of wall-clock time.
    pub fn with_grab_delay(self, delay: Duration) -> Self {
        self.shared.state.lock().grab_delay = delay;
        self
    }

    /// Produce frames where every pixel is the given `[r, g, b]` triple
    /// instead of the default gradient.
    pub fn with_fill(self, rgb: [u8; 3]) -> Self {
        self.shared.state.lock().fill = Some(rgb);
        self
    }

    /// Return a probe sharing this camera's state.
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    fn read<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&SimState) -> T,
    ) -> Result<T, CamError> {
        let _op = self.shared.enter();
        let st = self.shared.state.lock();
        if !st.open {
            return Err(CamError::device(op, "device not open"));
        }
        Ok(f(&st))
    }

    fn write(
        &mut self,
        op: &'static str,
        property: &str,
        f: impl FnOnce(&mut SimState) -> Result<(), CamError>,
    ) -> Result<(), CamError> {
        let _op = self.shared.enter();
        let mut st = self.shared.state.lock();
        if !st.open {
            return Err(CamError::device(op, "device not open"));
        }
        if st.rejected.iter().any(|p| p == property) {
            return Err(CamError::PropertyRejected {
                property: property.to_string(),
                details: "rejected by device".to_string(),
            });
        }
        st.record(op);
        f(&mut st)
    }
}

fn check_range(property: &str, value: f64, limits: Limits<f64>) -> Result<(), CamError> {
    if limits.contains(value) {
        Ok(())
    } else {
        Err(CamError::PropertyRejected {
            property: property.to_string(),
            details: format!("{value} outside [{}, {}]", limits.min, limits.max),
        })
    }
}

impl DeviceBinding for SimCamera {
    fn initialize(&mut self) -> Result<(), CamError> {
        match self.shared.state.lock().fail_initialize.clone() {
            Some(reason) => Err(CamError::DriverLoad(reason)),
            None => Ok(()),
        }
    }

    fn open(&mut self) -> Result<(), CamError> {
        let _op = self.shared.enter();
        let mut st = self.shared.state.lock();
        if let Some(reason) = st.fail_open.clone() {
            if st.half_open_on_failure {
                st.open = true;
            }
            return Err(CamError::device("open", reason));
        }
        if !st.open {
            st.open = true;
            st.opens += 1;
            st.record("open");
            debug!(model = %st.model, "sim camera opened");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), CamError> {
        let _op = self.shared.enter();
        let mut st = self.shared.state.lock();
        st.close_attempts += 1;
        if st.open {
            st.open = false;
            st.closes += 1;
            st.record("close");
            debug!(model = %st.model, "sim camera closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    fn model_id(&mut self) -> Result<String, CamError> {
        self.read("model_id", |st| st.model.clone())
    }

    fn is_busy(&mut self) -> Result<bool, CamError> {
        let _op = self.shared.enter();
        let mut st = self.shared.state.lock();
        if st.stuck_busy {
            return Ok(true);
        }
        if st.busy_polls > 0 {
            st.busy_polls -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn grab_raw_frame(&mut self) -> Result<Vec<u8>, CamError> {
        let _op = self.shared.enter();
        let (width, height, delay, fill, seq, short) = {
            let mut st = self.shared.state.lock();
            if !st.open {
                st.grabs_after_close += 1;
                return Err(CamError::device("grab_raw_frame", "device not open"));
            }
            if st.failing_grabs > 0 {
                st.failing_grabs -= 1;
                return Err(CamError::CaptureFailed("simulated grab failure".to_string()));
            }
            let short = if st.short_grabs > 0 {
                st.short_grabs -= 1;
                true
            } else {
                false
            };
            (
                st.current.width,
                st.current.height,
                st.grab_delay,
                st.fill,
                st.frames_grabbed,
                short,
            )
        };

        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut raw = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                match fill {
                    Some(rgb) => raw.extend_from_slice(&rgb),
                    None => raw.extend_from_slice(&[
                        (x % 256) as u8,
                        (y % 256) as u8,
                        (seq % 256) as u8,
                    ]),
                }
            }
        }
        if short {
            raw.truncate(raw.len() / 2);
        }

        self.shared.state.lock().frames_grabbed += 1;
        Ok(raw)
    }

    fn frame_width(&mut self) -> Result<u32, CamError> {
        self.read("frame_width", |st| st.current.width)
    }

    fn frame_height(&mut self) -> Result<u32, CamError> {
        self.read("frame_height", |st| st.current.height)
    }

    fn set_frame_width(&mut self, width: u32) -> Result<(), CamError> {
        self.write("set_frame_width", "width", |st| {
            if width == 0 {
                return Err(CamError::PropertyRejected {
                    property: "width".to_string(),
                    details: "width must be non-zero".to_string(),
                });
            }
            st.current.width = width;
            Ok(())
        })
    }

    fn set_frame_height(&mut self, height: u32) -> Result<(), CamError> {
        self.write("set_frame_height", "height", |st| {
            if height == 0 {
                return Err(CamError::PropertyRejected {
                    property: "height".to_string(),
                    details: "height must be non-zero".to_string(),
                });
            }
            st.current.height = height;
            Ok(())
        })
    }

    fn exposure_time_us(&mut self) -> Result<u32, CamError> {
        self.read("exposure_time_us", |st| st.current.exposure_time_us)
    }

    fn set_exposure_time_us(&mut self, exposure_us: u32) -> Result<(), CamError> {
        self.write("set_exposure_time_us", "exposure_time_us", |st| {
            if !SIM_EXPOSURE_LIMITS.contains(exposure_us) {
                return Err(CamError::PropertyRejected {
                    property: "exposure_time_us".to_string(),
                    details: format!("{exposure_us} out of range"),
                });
            }
            st.current.exposure_time_us = exposure_us;
            Ok(())
        })
    }

    fn exposure_limits(&mut self) -> Result<Limits<u32>, CamError> {
        self.read("exposure_limits", |_| SIM_EXPOSURE_LIMITS)
    }

    fn exposure_auto(&mut self) -> Result<AutoMode, CamError> {
        self.read("exposure_auto", |st| st.current.exposure_auto)
    }

    fn set_exposure_auto(&mut self, mode: AutoMode) -> Result<(), CamError> {
        self.write("set_exposure_auto", "exposure_auto", |st| {
            st.current.exposure_auto = mode;
            Ok(())
        })
    }

    fn gain_db(&mut self) -> Result<f64, CamError> {
        self.read("gain_db", |st| st.current.gain_db)
    }

    fn set_gain_db(&mut self, gain_db: f64) -> Result<(), CamError> {
        self.write("set_gain_db", "gain_db", |st| {
            check_range("gain_db", gain_db, SIM_GAIN_LIMITS)?;
            st.current.gain_db = gain_db;
            Ok(())
        })
    }

    fn gain_limits(&mut self) -> Result<Limits<f64>, CamError> {
        self.read("gain_limits", |_| SIM_GAIN_LIMITS)
    }

    fn gain_auto(&mut self) -> Result<AutoMode, CamError> {
        self.read("gain_auto", |st| st.current.gain_auto)
    }

    fn set_gain_auto(&mut self, mode: AutoMode) -> Result<(), CamError> {
        self.write("set_gain_auto", "gain_auto", |st| {
            st.current.gain_auto = mode;
            Ok(())
        })
    }

    fn sharpness(&mut self) -> Result<f64, CamError> {
        self.read("sharpness", |st| st.current.sharpness)
    }

    fn set_sharpness(&mut self, level: f64) -> Result<(), CamError> {
        self.write("set_sharpness", "sharpness", |st| {
            check_range("sharpness", level, SIM_SHARPNESS_LIMITS)?;
            st.current.sharpness = level;
            Ok(())
        })
    }

    fn sharpness_limits(&mut self) -> Result<Limits<f64>, CamError> {
        self.read("sharpness_limits", |_| SIM_SHARPNESS_LIMITS)
    }

    fn gamma(&mut self) -> Result<f64, CamError> {
        self.read("gamma", |st| st.current.gamma)
    }

    fn set_gamma(&mut self, gamma: f64) -> Result<(), CamError> {
        self.write("set_gamma", "gamma", |st| {
            check_range("gamma", gamma, SIM_GAMMA_LIMITS)?;
            st.current.gamma = gamma;
            Ok(())
        })
    }

    fn gamma_limits(&mut self) -> Result<Limits<f64>, CamError> {
        self.read("gamma_limits", |_| SIM_GAMMA_LIMITS)
    }

    fn white_balance_auto(&mut self) -> Result<AutoMode, CamError> {
        self.read("white_balance_auto", |st| st.current.white_balance_auto)
    }

    fn set_white_balance_auto(&mut self, mode: AutoMode) -> Result<(), CamError> {
        self.write("set_white_balance_auto", "white_balance_auto", |st| {
            st.current.white_balance_auto = mode;
            Ok(())
        })
    }

    fn light_source(&mut self) -> Result<LightSourcePreset, CamError> {
        self.read("light_source", |st| st.current.light_source)
    }

    fn set_light_source(&mut self, preset: LightSourcePreset) -> Result<(), CamError> {
        self.write("set_light_source", "light_source", |st| {
            st.current.light_source = preset;
            Ok(())
        })
    }

    fn reset_factory_defaults(&mut self) -> Result<(), CamError> {
        self.write("reset_factory_defaults", "factory_defaults", |st| {
            st.current = st.defaults.clone();
            Ok(())
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimProbe
// ────────────────────────────────────────────────────────────────────────────

/// Inspection and fault-injection handle for a [`SimCamera`].
#[derive(Clone)]
pub struct SimProbe {
    shared: Arc<SimShared>,
}

impl SimProbe {
    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    pub fn opens(&self) -> u32 {
        self.shared.state.lock().opens
    }

    pub fn closes(&self) -> u32 {
        self.shared.state.lock().closes
    }

    /// Every call to `close`, including ones on an already closed device.
    pub fn close_attempts(&self) -> u32 {
        self.shared.state.lock().close_attempts
    }

    pub fn frames_grabbed(&self) -> u64 {
        self.shared.state.lock().frames_grabbed
    }

    /// Grab attempts that reached a closed device.
    pub fn grabs_after_close(&self) -> u64 {
        self.shared.state.lock().grabs_after_close
    }

    /// Operations that started while another operation was still running.
    pub fn overlapping_ops(&self) -> u64 {
        self.shared.overlapping_ops.load(Ordering::SeqCst)
    }

    /// Ordered log of open/close/set operations (grabs and reads excluded),
    /// holding at most [`SIM_OPS_LOG_CAPACITY`] of the most recent entries.
    pub fn ops(&self) -> Vec<&'static str> {
        self.shared.state.lock().ops.iter().copied().collect()
    }

    /// Number of times `op` appears in [`ops`][Self::ops].
    pub fn op_count(&self, op: &str) -> usize {
        self.shared.state.lock().ops.iter().filter(|o| **o == op).count()
    }

    pub fn settings(&self) -> SimSettings {
        self.shared.state.lock().current.clone()
    }

    /// Change device-side settings behind the session's back.
    pub fn update_settings(&self, f: impl FnOnce(&mut SimSettings)) {
        f(&mut self.shared.state.lock().current);
    }

    pub fn set_model(&self, model: impl Into<String>) {
        self.shared.state.lock().model = model.into();
    }

    /// Make [`DeviceBinding::initialize`] fail with `reason`.
    pub fn fail_initialize(&self, reason: impl Into<String>) {
        self.shared.state.lock().fail_initialize = Some(reason.into());
    }

    /// Make [`DeviceBinding::open`] fail with `reason`; `None` clears it.
    pub fn fail_open(&self, reason: Option<String>) {
        let mut st = self.shared.state.lock();
        st.fail_open = reason;
        st.half_open_on_failure = false;
    }

    /// Like [`fail_open`][Self::fail_open], but the failed open leaves the
    /// device handle open until someone closes it.
    pub fn fail_open_half_open(&self, reason: impl Into<String>) {
        let mut st = self.shared.state.lock();
        st.fail_open = Some(reason.into());
        st.half_open_on_failure = true;
    }

    /// Fail the next `n` grabs with a capture error.
    pub fn fail_next_grabs(&self, n: u32) {
        self.shared.state.lock().failing_grabs = n;
    }

    /// Return a truncated buffer from the next `n` grabs.
    pub fn short_next_grabs(&self, n: u32) {
        self.shared.state.lock().short_grabs = n;
    }

    /// Report busy for the next `polls` calls to `is_busy`.
    pub fn report_busy_for(&self, polls: u32) {
        self.shared.state.lock().busy_polls = polls;
    }

    /// Report busy on every poll until cleared.
    pub fn set_stuck_busy(&self, stuck: bool) {
        self.shared.state.lock().stuck_busy = stuck;
    }

    /// Remaining forced-busy polls.
    pub fn busy_polls_remaining(&self) -> u32 {
        self.shared.state.lock().busy_polls
    }

    /// Reject every write to `property` with [`CamError::PropertyRejected`].
    pub fn reject_property(&self, property: impl Into<String>) {
        self.shared.state.lock().rejected.push(property.into());
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
