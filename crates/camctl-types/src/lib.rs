//! `camctl-types` – shared vocabulary of the camera control plane.
//!
//! Every other crate in the workspace speaks in these types: the property
//! enums a [`DeviceBinding`] reads and writes, the [`ChangeEvent`] envelope
//! published on the notifier, the [`RgbFrame`] pixel buffer handed out by
//! the session, and the single [`CamError`] enum used on every fallible
//! path.
//!
//! [`DeviceBinding`]: https://docs.rs/camctl-hal

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Property vocabulary
// ────────────────────────────────────────────────────────────────────────────

/// Operation mode of a device "auto" function (exposure, gain, white
/// balance).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoMode {
    /// The auto function is disabled; the manual value applies.
    #[default]
    Off,
    /// Adjust once until the target is reached, then switch off.
    Once,
    /// Adjust repeatedly while frames are acquired.
    Continuous,
}

impl AutoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoMode::Off => "off",
            AutoMode::Once => "once",
            AutoMode::Continuous => "continuous",
        }
    }
}

impl fmt::Display for AutoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutoMode {
    type Err = CamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(AutoMode::Off),
            "once" => Ok(AutoMode::Once),
            "continuous" => Ok(AutoMode::Continuous),
            other => Err(CamError::PropertyRejected {
                property: "auto_mode".to_string(),
                details: format!("unknown mode '{other}'"),
            }),
        }
    }
}

/// Colour preset matching the scene illumination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightSourcePreset {
    #[default]
    Off,
    Daylight5000K,
    Daylight6500K,
    Tungsten2800K,
}

impl LightSourcePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightSourcePreset::Off => "off",
            LightSourcePreset::Daylight5000K => "daylight5000k",
            LightSourcePreset::Daylight6500K => "daylight6500k",
            LightSourcePreset::Tungsten2800K => "tungsten2800k",
        }
    }
}

impl fmt::Display for LightSourcePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LightSourcePreset {
    type Err = CamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(LightSourcePreset::Off),
            "daylight5000k" => Ok(LightSourcePreset::Daylight5000K),
            "daylight6500k" => Ok(LightSourcePreset::Daylight6500K),
            "tungsten2800k" => Ok(LightSourcePreset::Tungsten2800K),
            other => Err(CamError::PropertyRejected {
                property: "light_source".to_string(),
                details: format!("unknown preset '{other}'"),
            }),
        }
    }
}

/// Software scaling levels applied per colour channel when a raw frame is
/// assembled.  `255` leaves the channel untouched, `0` blanks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLevels {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl ChannelLevels {
    /// Identity levels (every channel at 255).
    pub const FULL: ChannelLevels = ChannelLevels {
        red: 255,
        green: 255,
        blue: 255,
    };
}

impl Default for ChannelLevels {
    fn default() -> Self {
        Self::FULL
    }
}

/// Inclusive `[min, max]` range reported by the device for a numeric
/// property.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> Limits<T> {
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

/// The session's cached view of every camera property.
///
/// Device-backed fields are refreshed on every successful device read; the
/// software-only fields (`levels`, `negative`, `color_saturation`,
/// `continuous_awb`) never touch the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraProperties {
    /// Exposure time in microseconds.
    pub exposure_time_us: u32,
    pub exposure_auto: AutoMode,
    /// Gain in dB.
    pub gain_db: f64,
    pub gain_auto: AutoMode,
    pub sharpness: f64,
    pub gamma: f64,
    pub negative: bool,
    pub light_source: LightSourcePreset,
    pub levels: ChannelLevels,
    pub continuous_awb: bool,
    pub color_saturation: u8,
    pub white_balance_auto: AutoMode,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraProperties {
    fn default() -> Self {
        Self {
            exposure_time_us: 0,
            exposure_auto: AutoMode::Off,
            gain_db: 0.0,
            gain_auto: AutoMode::Off,
            sharpness: 0.0,
            gamma: 1.0,
            negative: false,
            light_source: LightSourcePreset::Off,
            levels: ChannelLevels::FULL,
            continuous_awb: false,
            color_saturation: 0,
            white_balance_auto: AutoMode::Off,
            width: 0,
            height: 0,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Frames
// ────────────────────────────────────────────────────────────────────────────

/// An assembled RGB24 frame (interleaved, row-major).
#[derive(Debug, Clone, PartialEq)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes.
    pub data: Vec<u8>,
    /// Per-session capture counter, starting at 1.
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
}

impl RgbFrame {
    /// Return the `(r, g, b)` triple at column `x`, row `y`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize * self.width as usize) + x as usize) * 3;
        Some((self.data[i], self.data[i + 1], self.data[i + 2]))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Change notification
// ────────────────────────────────────────────────────────────────────────────

/// Why a [`ChangeEvent`] was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeReason {
    /// The session connected or disconnected.
    Connection,
    /// Acquisition started or stopped.
    Acquisition,
    /// A new frame replaced the last frame.
    NewFrame,
    /// One or more cached properties changed.
    Properties,
}

impl ChangeReason {
    pub const ALL: [ChangeReason; 4] = [
        ChangeReason::Connection,
        ChangeReason::Acquisition,
        ChangeReason::NewFrame,
        ChangeReason::Properties,
    ];
}

/// Value copy of the session state at the moment an event was emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub connected: bool,
    pub acquiring: bool,
    /// Model identifier reported by the device; `None` while disconnected.
    pub model: Option<String>,
    pub properties: CameraProperties,
    pub frames_captured: u64,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            connected: false,
            acquiring: false,
            model: None,
            properties: CameraProperties::default(),
            frames_captured: 0,
        }
    }
}

/// Immutable `(reason, snapshot)` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub reason: ChangeReason,
    pub snapshot: SessionSnapshot,
}

impl ChangeEvent {
    pub fn new(reason: ChangeReason, snapshot: SessionSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            reason,
            snapshot,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error type shared by the whole control plane.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CamError {
    /// The device could not be opened or reported no model identifier.
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Camera is not connected")]
    NotConnected,

    /// The vendor driver could not be loaded or initialised.
    #[error("Driver load failed: {0}")]
    DriverLoad(String),

    /// A single capture cycle failed; acquisition keeps running.
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Raw frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    /// The device stayed busy past the momentary-control wait bound.
    #[error("Device still busy after {waited_ms} ms")]
    BusyTimeout { waited_ms: u64 },

    #[error("{property} value {value} outside [{min}, {max}]")]
    OutOfRange {
        property: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// The device refused a property value or does not support it.
    #[error("{property} rejected: {details}")]
    PropertyRejected { property: String, details: String },

    #[error("Device fault during {operation}: {details}")]
    Device { operation: String, details: String },

    /// A lifecycle call was issued from the acquisition worker thread.
    #[error("Not allowed on the acquisition thread: {0}")]
    AcquisitionThread(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CamError {
    /// Shorthand for a [`CamError::Device`] fault.
    pub fn device(operation: impl Into<String>, details: impl Into<String>) -> Self {
        CamError::Device {
            operation: operation.into(),
            details: details.into(),
        }
    }

    /// `true` for errors caused by a rejected property value.
    pub fn is_property_error(&self) -> bool {
        matches!(
            self,
            CamError::OutOfRange { .. } | CamError::PropertyRejected { .. }
        )
    }
}
