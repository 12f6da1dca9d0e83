//! `camctl-kernel` – Device Arbitration
//!
//! Enforces the one rule every camera binding depends on: a single
//! outstanding device operation at a time, with control requests taking
//! precedence over the acquisition loop.
//!
//! # Modules
//!
//! - [`gate`] – [`DeviceGate`]: owns the
//!   [`DeviceBinding`][camctl_hal::DeviceBinding] and is the only path to it.
//!   Control requests go through [`DeviceGate::with_device`] (pause capture,
//!   ensure open, bounded busy wait, run, resume); the acquisition loop goes
//!   through [`DeviceGate::capture`], which yields while control is pending.

pub mod gate;

pub use gate::{BusyPolicy, DeviceGate, GateStats};
