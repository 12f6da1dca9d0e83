//! `camctl-hal` – Hardware Abstraction Layer
//!
//! Everything that touches the camera device lives behind this crate.
//!
//! # Modules
//!
//! - [`device`] – [`DeviceBinding`]: the primitive, single-outstanding-
//!   operation interface a vendor driver exposes (open/close, per-property
//!   get/set, raw grab, busy query).
//! - [`frame`] – [`assemble_rgb`][frame::assemble_rgb]: turns a raw
//!   interleaved RGB buffer into an [`RgbFrame`][camctl_types::RgbFrame],
//!   applying the software channel levels.
//! - [`sim`] – [`SimCamera`][sim::SimCamera]: an in-process simulated
//!   binding with a [`SimProbe`][sim::SimProbe] for fault injection, used by
//!   the CLI and the test suites.

pub mod device;
pub mod frame;
pub mod sim;

pub use device::DeviceBinding;
pub use frame::{assemble_rgb, scale_channel};
pub use sim::{SimCamera, SimProbe};
