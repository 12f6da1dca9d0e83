//! `camctl-runtime` – The Camera Session
//!
//! Composes the device gate, the change notifier and a background
//! acquisition worker into one [`CameraSession`].
//!
//! # Modules
//!
//! - [`session`] – [`CameraSession`][session::CameraSession]: connection
//!   lifecycle (`connect`, `disconnect`, `start_acquisition`,
//!   `stop_acquisition`), snapshots, statistics and subscriptions.
//!   [`SessionConfig`][session::SessionConfig] carries the busy-wait and
//!   idle timing.
//! - `acquisition` – the per-session worker thread that grabs, assembles
//!   and publishes frames while the session is acquiring.
//! - [`properties`] – per-property getters and setters, each a single
//!   momentary-control operation through the
//!   [`DeviceGate`][camctl_kernel::DeviceGate].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP span export.
//!
//! # Example
//!
//! ```
//! use camctl_hal::SimCamera;
//! use camctl_runtime::{CameraSession, SessionConfig};
//!
//! let session = CameraSession::new(Box::new(SimCamera::new("sim-1")), SessionConfig::default())?;
//! session.connect()?;
//! session.set_gamma(1.4)?;
//! assert_eq!(session.snapshot().properties.gamma, 1.4);
//! session.disconnect()?;
//! # Ok::<(), camctl_types::CamError>(())
//! ```

mod acquisition;
pub mod properties;
pub mod session;
pub mod telemetry;

pub use session::{CameraSession, SessionConfig, SessionStats};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};

// Re-exported so callers can subscribe without depending on the middleware
// crate directly.
pub use camctl_middleware::{EventStream, ReasonFilter, SubscriptionId};
